//! Campaign definition reads: types, instances, enrollments.

use super::{OrgDb, SchedulerError};
use crate::campaigns::CampaignCatalog;
use crate::dates;
use crate::error::Diagnostic;
use crate::types::{
    CampaignInstance, CampaignType, ContactCampaign, EnrollmentStatus, Targeting,
};

impl OrgDb {
    /// Load and validate the full campaign catalog.
    ///
    /// Definition problems (unknown type names, broken spread ranges,
    /// unparseable instance dates) are configuration errors and abort the
    /// run; per-enrollment data problems become diagnostics.
    pub fn load_campaign_catalog(
        &self,
    ) -> Result<(CampaignCatalog, Vec<Diagnostic>), SchedulerError> {
        let types = self.load_campaign_types()?;
        let instances = self.load_campaign_instances()?;
        let (enrollments, diagnostics) = self.load_enrollments()?;
        let catalog = CampaignCatalog::new(types, instances, enrollments)?;
        Ok((catalog, diagnostics))
    }

    fn load_campaign_types(&self) -> Result<Vec<CampaignType>, SchedulerError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, priority, active, respect_exclusion_windows, enable_followups,
                    days_before_event, target_all_contacts, spread_evenly,
                    skip_failed_underwriting
             FROM campaign_types
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CampaignType {
                name: row.get(0)?,
                priority: row.get(1)?,
                active: row.get::<_, i64>(2)? != 0,
                respects_exclusion_windows: row.get::<_, i64>(3)? != 0,
                enable_followups: row.get::<_, i64>(4)? != 0,
                days_before_event: row.get(5)?,
                target_all_contacts: row.get::<_, i64>(6)? != 0,
                spread_evenly: row.get::<_, i64>(7)? != 0,
                skip_failed_underwriting: row.get::<_, i64>(8)? != 0,
            })
        })?;
        let mut types = Vec::new();
        for row in rows {
            types.push(row?);
        }
        Ok(types)
    }

    fn load_campaign_instances(&self) -> Result<Vec<CampaignInstance>, SchedulerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, campaign_type, instance_name, email_template, sms_template,
                    active_start_date, active_end_date, spread_start_date, spread_end_date,
                    target_states, target_carriers, metadata
             FROM campaign_instances
             ORDER BY id",
        )?;

        struct RawInstance {
            id: i64,
            campaign_type: String,
            instance_name: String,
            email_template: Option<String>,
            sms_template: Option<String>,
            active_start_date: Option<String>,
            active_end_date: Option<String>,
            spread_start_date: Option<String>,
            spread_end_date: Option<String>,
            target_states: Option<String>,
            target_carriers: Option<String>,
            metadata: Option<String>,
        }

        let rows = stmt.query_map([], |row| {
            Ok(RawInstance {
                id: row.get(0)?,
                campaign_type: row.get(1)?,
                instance_name: row.get(2)?,
                email_template: row.get(3)?,
                sms_template: row.get(4)?,
                active_start_date: row.get(5)?,
                active_end_date: row.get(6)?,
                spread_start_date: row.get(7)?,
                spread_end_date: row.get(8)?,
                target_states: row.get(9)?,
                target_carriers: row.get(10)?,
                metadata: row.get(11)?,
            })
        })?;

        let mut instances = Vec::new();
        for row in rows {
            let raw = row?;
            let id = raw.id;
            let date = move |field: &str, value: Option<String>| instance_date(id, field, value);
            let metadata = match raw.metadata {
                Some(blob) if !blob.trim().is_empty() => {
                    Some(serde_json::from_str(&blob).map_err(|e| {
                        SchedulerError::Config(format!(
                            "campaign instance {}: invalid metadata JSON: {e}",
                            raw.id
                        ))
                    })?)
                }
                _ => None,
            };
            instances.push(CampaignInstance {
                id: raw.id,
                campaign_type: raw.campaign_type,
                instance_name: raw.instance_name,
                email_template: raw.email_template,
                sms_template: raw.sms_template,
                active_start_date: date("active_start_date", raw.active_start_date)?,
                active_end_date: date("active_end_date", raw.active_end_date)?,
                spread_start_date: date("spread_start_date", raw.spread_start_date)?,
                spread_end_date: date("spread_end_date", raw.spread_end_date)?,
                target_states: Targeting::parse(raw.target_states.as_deref()),
                target_carriers: Targeting::parse(raw.target_carriers.as_deref()),
                metadata,
            });
        }
        Ok(instances)
    }

    fn load_enrollments(
        &self,
    ) -> Result<(Vec<ContactCampaign>, Vec<Diagnostic>), SchedulerError> {
        let mut stmt = self.conn.prepare(
            "SELECT contact_id, campaign_instance_id, trigger_date, status
             FROM contact_campaigns
             WHERE status IN ('pending', 'active')
             ORDER BY campaign_instance_id, contact_id",
        )?;

        let mut enrollments = Vec::new();
        let mut diagnostics = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let contact_id: i64 = row.get(0)?;
            let instance_id: i64 = row.get(1)?;
            let raw_trigger: Option<String> = row.get(2)?;
            let raw_status: String = row.get(3)?;

            // The WHERE clause already filtered to eligible statuses.
            let Some(status) = EnrollmentStatus::parse(&raw_status) else {
                continue;
            };

            let trigger_date = match raw_trigger {
                None => None,
                Some(s) if s.trim().is_empty() => None,
                Some(s) => match dates::parse_wire_date(&s) {
                    Some(d) => Some(d),
                    None => {
                        diagnostics.push(Diagnostic::new(
                            contact_id,
                            format!(
                                "malformed trigger_date '{s}' for campaign instance {instance_id}"
                            ),
                        ));
                        continue;
                    }
                },
            };

            enrollments.push(ContactCampaign {
                contact_id,
                campaign_instance_id: instance_id,
                trigger_date,
                status,
            });
        }
        Ok((enrollments, diagnostics))
    }
}

fn instance_date(
    id: i64,
    field: &str,
    value: Option<String>,
) -> Result<Option<chrono::NaiveDate>, SchedulerError> {
    match value {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => dates::parse_wire_date(&s).map(Some).ok_or_else(|| {
            SchedulerError::Config(format!("campaign instance {id}: malformed {field} '{s}'"))
        }),
    }
}
