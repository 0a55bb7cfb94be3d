//! Anniversary candidate emission: birthday, policy effective date, AEP.
//!
//! For one contact and one planning window this emits the raw (kind, date)
//! tuples; exclusion filtering and post-window recovery happen downstream.

use chrono::{Datelike, NaiveDate};

use crate::config::OrgConfig;
use crate::dates;
use crate::types::{
    Candidate, Contact, Disposition, EmailType, PRIORITY_AEP, PRIORITY_BIRTHDAY,
    PRIORITY_EFFECTIVE_DATE,
};

/// Approximation used for the new-policy suppression: months are counted as
/// 30-day blocks.
const DAYS_PER_MONTH: i64 = 30;

/// Emit anniversary candidates for `contact` within `[today, horizon_end]`.
pub fn anniversary_candidates(
    contact: &Contact,
    cfg: &OrgConfig,
    today: NaiveDate,
    horizon_end: NaiveDate,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    let in_window = |date: NaiveDate| date >= today && date <= horizon_end;

    // The global underwriting ban covers birthday/effective-date sends; AEP
    // is a statutory enrollment notice and stays.
    let underwriting_banned = cfg.exclude_failed_underwriting_global && contact.failed_underwriting;

    if !underwriting_banned {
        if let Some(birthday) = contact.birthday {
            let anniversary = dates::next_anniversary(today, birthday);
            let date = dates::add_days(anniversary, -cfg.birthday_days_before);
            if in_window(date) {
                out.push(anniversary_candidate(
                    contact.id,
                    EmailType::Birthday,
                    date,
                    PRIORITY_BIRTHDAY,
                    anniversary,
                ));
            }
        }

        if let Some(effective) = contact.effective_date {
            let policy_age_days = dates::diff_days(effective, today);
            let min_age_days = cfg.effective_date_first_email_months * DAYS_PER_MONTH;
            if policy_age_days >= min_age_days {
                let anniversary = dates::next_anniversary(today, effective);
                let date = dates::add_days(anniversary, -cfg.effective_date_days_before);
                if in_window(date) {
                    out.push(anniversary_candidate(
                        contact.id,
                        EmailType::EffectiveDate,
                        date,
                        PRIORITY_EFFECTIVE_DATE,
                        anniversary,
                    ));
                }
            }
        }
    }

    if !cfg.aep_as_campaign {
        for &(month, day) in &cfg.aep_dates {
            let Some(date) = aep_date_for(today, month, day) else {
                continue;
            };
            if in_window(date) {
                out.push(anniversary_candidate(
                    contact.id,
                    EmailType::Aep,
                    date,
                    PRIORITY_AEP,
                    date,
                ));
            }
        }
    }

    out
}

/// The active-year occurrence of a configured AEP month/day: this year if
/// still ahead of (or on) `today`, else next year.
fn aep_date_for(today: NaiveDate, month: u32, day: u32) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if this_year >= today {
        Some(this_year)
    } else {
        NaiveDate::from_ymd_opt(today.year() + 1, month, day)
    }
}

fn anniversary_candidate(
    contact_id: i64,
    email_type: EmailType,
    date: NaiveDate,
    priority: i32,
    anchor: NaiveDate,
) -> Candidate {
    Candidate {
        contact_id,
        email_type,
        date,
        priority,
        template_id: None,
        sms_template_id: None,
        campaign_instance_id: None,
        event_anchor: Some(anchor),
        respects_exclusions: true,
        disposition: Disposition::PreScheduled,
    }
}
