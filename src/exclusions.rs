//! Exclusion filtering and post-window recovery.
//!
//! Every anniversary candidate — and every campaign candidate whose type
//! respects exclusion windows — is checked against the rule engine. Windowed
//! suppressions of anniversary kinds queue a single recovery send the day
//! after the window ends; year-round suppressions never do.
//!
//! The synthesized recovery candidate is re-checked only against year-round
//! rules: its date is definitionally outside the window that produced it,
//! and re-running the windowed check would reintroduce the cycle the
//! pipeline is structured to avoid.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::config::OrgConfig;
use crate::dates;
use crate::rules::{self, ExclusionOutcome};
use crate::types::{Candidate, Contact, Disposition, EmailType, PRIORITY_POST_WINDOW};

/// Resolve dispositions for one contact's candidates and append any
/// post-window recovery candidates.
pub fn apply_exclusions(
    contact: &Contact,
    cfg: &OrgConfig,
    candidates: Vec<Candidate>,
) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(candidates.len());
    // window_end → anchor of the first suppressed sibling. BTreeMap so the
    // synthesized candidates come out date-ordered.
    let mut suppressed_windows: BTreeMap<NaiveDate, NaiveDate> = BTreeMap::new();

    for mut candidate in candidates {
        let needs_check = candidate.email_type.is_anniversary() || candidate.respects_exclusions;
        if needs_check {
            match rules::check_exclusion(cfg, contact, candidate.date) {
                ExclusionOutcome::NotExcluded => {}
                ExclusionOutcome::Excluded {
                    reason,
                    window_end: None,
                } => {
                    candidate.disposition = Disposition::Skipped(reason);
                }
                ExclusionOutcome::Excluded {
                    reason,
                    window_end: Some(end),
                } => {
                    candidate.disposition = Disposition::Skipped(reason);
                    // Only suppressed anniversaries earn a recovery send.
                    if candidate.email_type.is_anniversary() && cfg.enable_post_window_emails {
                        if let Some(anchor) = candidate.event_anchor {
                            suppressed_windows.entry(end).or_insert(anchor);
                        }
                    }
                }
            }
        }
        out.push(candidate);
    }

    if !suppressed_windows.is_empty() {
        // A year-round ban would make the recovery just as unlawful as the
        // original send.
        if rules::year_round_exclusion(contact).is_none() {
            for (window_end, anchor) in suppressed_windows {
                out.push(Candidate {
                    contact_id: contact.id,
                    email_type: EmailType::PostWindow,
                    date: dates::add_days(window_end, 1),
                    priority: PRIORITY_POST_WINDOW,
                    template_id: None,
                    sms_template_id: None,
                    campaign_instance_id: None,
                    event_anchor: Some(anchor),
                    respects_exclusions: true,
                    disposition: Disposition::PreScheduled,
                });
            }
        }
    }

    out
}
