//! Campaign materialization: targeting, enrollment, and date assignment.
//!
//! A campaign type defines behavior (priority, exclusion handling, spread vs
//! trigger dates); instances bind a type to templates, an active window, and
//! targeting. The catalog validates referential integrity once at load so
//! the per-contact path never sees an unknown type name.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::config::OrgConfig;
use crate::dates;
use crate::error::{Diagnostic, SchedulerError};
use crate::types::{
    Candidate, CampaignInstance, CampaignType, Contact, ContactCampaign, Disposition, EmailType,
};
use crate::util;

/// The validated campaign configuration for one run.
#[derive(Debug, Clone)]
pub struct CampaignCatalog {
    types: HashMap<String, CampaignType>,
    /// Instances whose type is active, sorted by id for deterministic
    /// emission order.
    instances: Vec<CampaignInstance>,
    /// instance id → contact id → enrollment (eligible statuses only).
    enrollments: HashMap<i64, HashMap<i64, ContactCampaign>>,
}

impl CampaignCatalog {
    /// Build and validate a catalog.
    ///
    /// An instance referencing an unknown campaign type is a configuration
    /// error; an instance of an inactive type is silently dropped; a
    /// spread-evenly instance with a missing or inverted spread range is a
    /// configuration error.
    pub fn new(
        types: Vec<CampaignType>,
        instances: Vec<CampaignInstance>,
        enrollments: Vec<ContactCampaign>,
    ) -> Result<CampaignCatalog, SchedulerError> {
        let types: HashMap<String, CampaignType> =
            types.into_iter().map(|t| (t.name.clone(), t)).collect();

        let mut kept = Vec::new();
        for instance in instances {
            let ty = types.get(&instance.campaign_type).ok_or_else(|| {
                SchedulerError::Config(format!(
                    "campaign instance {} ('{}') references unknown type '{}'",
                    instance.id, instance.instance_name, instance.campaign_type
                ))
            })?;
            if !ty.active {
                continue;
            }
            if ty.spread_evenly {
                match (instance.spread_start_date, instance.spread_end_date) {
                    (Some(start), Some(end)) if start <= end => {}
                    _ => {
                        return Err(SchedulerError::Config(format!(
                            "spread-evenly instance {} ('{}') needs spread_start_date <= spread_end_date",
                            instance.id, instance.instance_name
                        )));
                    }
                }
            }
            kept.push(instance);
        }
        kept.sort_by_key(|i| i.id);

        let mut by_instance: HashMap<i64, HashMap<i64, ContactCampaign>> = HashMap::new();
        for enrollment in enrollments {
            if !enrollment.status.is_eligible() {
                continue;
            }
            by_instance
                .entry(enrollment.campaign_instance_id)
                .or_default()
                .insert(enrollment.contact_id, enrollment);
        }

        Ok(CampaignCatalog {
            types,
            instances: kept,
            enrollments: by_instance,
        })
    }

    pub fn instances(&self) -> &[CampaignInstance] {
        &self.instances
    }

    pub fn type_of(&self, instance: &CampaignInstance) -> &CampaignType {
        // Validated in `new`.
        &self.types[&instance.campaign_type]
    }

    pub fn enrollment(&self, instance_id: i64, contact_id: i64) -> Option<&ContactCampaign> {
        self.enrollments.get(&instance_id)?.get(&contact_id)
    }

    /// All instance ids a contact could possibly receive (for test setup and
    /// introspection).
    pub fn instance_ids(&self) -> Vec<i64> {
        self.instances.iter().map(|i| i.id).collect()
    }
}

/// Emit campaign candidates for `contact` across all instances active today.
pub fn campaign_candidates(
    contact: &Contact,
    catalog: &CampaignCatalog,
    cfg: &OrgConfig,
    today: NaiveDate,
    horizon_end: NaiveDate,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<Candidate> {
    let mut out = Vec::new();

    for instance in catalog.instances() {
        if !instance.is_active_on(today) {
            continue;
        }
        let ty = catalog.type_of(instance);

        if !instance
            .target_states
            .matches(contact.state.as_ref().map(|s| s.as_str()))
        {
            continue;
        }
        if !instance.target_carriers.matches(contact.carrier.as_deref()) {
            continue;
        }
        // Universal campaigns reach contacts we cannot place in any state;
        // whether that is allowed is an org-level decision.
        if instance.target_states.is_all()
            && !contact.has_location()
            && !cfg.send_without_zipcode_for_universal
        {
            continue;
        }

        let enrollment = catalog.enrollment(instance.id, contact.id);
        if !ty.target_all_contacts && enrollment.is_none() {
            continue;
        }
        if ty.skip_failed_underwriting && contact.failed_underwriting {
            continue;
        }

        let (date, anchor) = if ty.spread_evenly {
            // Validated at catalog construction.
            let (Some(start), Some(end)) = (instance.spread_start_date, instance.spread_end_date)
            else {
                continue;
            };
            let width = dates::diff_days(start, end) + 1;
            let offset = (util::hash64_pair(contact.id, instance.id) % width as u64) as i64;
            let date = dates::add_days(start, offset);
            (date, date)
        } else {
            let Some(enrollment) = enrollment else {
                // target_all without a trigger source: nothing to anchor a
                // date to, so the contact is simply not scheduled.
                continue;
            };
            let Some(trigger) = enrollment.trigger_date else {
                diagnostics.push(Diagnostic::new(
                    contact.id,
                    format!(
                        "enrollment in campaign instance {} has no trigger_date",
                        instance.id
                    ),
                ));
                continue;
            };
            (dates::add_days(trigger, -ty.days_before_event), trigger)
        };

        if date < today || date > horizon_end {
            continue;
        }

        out.push(Candidate {
            contact_id: contact.id,
            email_type: EmailType::Campaign {
                type_name: ty.name.clone(),
                instance_id: instance.id,
            },
            date,
            priority: ty.priority,
            template_id: instance.email_template.clone(),
            sms_template_id: instance.sms_template.clone(),
            campaign_instance_id: Some(instance.id),
            event_anchor: Some(anchor),
            respects_exclusions: ty.respects_exclusion_windows,
            disposition: Disposition::PreScheduled,
        });
    }

    out
}
