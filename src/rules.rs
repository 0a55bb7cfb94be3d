//! State-level exclusion rule engine.
//!
//! Each regulated state maps to a static rule set. A windowed rule bans
//! sends inside `[anchor − before − buffer, anchor + after]` (inclusive),
//! where the anchor is the contact's birthday or policy-effective-date
//! anniversary and the buffer is the configurable pre-window extension
//! (default 60 days, overridable per state). Nevada anchors its birthday
//! window to the first of the birthday month. Year-round states ban sends
//! outright.
//!
//! The check is pure and per-date: the filter calls it once per candidate.

use chrono::{Datelike, NaiveDate};

use crate::config::OrgConfig;
use crate::dates;
use crate::types::{Contact, StateCode};

/// One exclusion rule attached to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionRule {
    BirthdayWindow {
        days_before: i64,
        days_after: i64,
        month_start: bool,
    },
    EffectiveDateWindow {
        days_before: i64,
        days_after: i64,
    },
    YearRound,
}

/// Outcome of checking one (contact, date) pair.
///
/// `window_end = None` means a year-round ban: the caller must not schedule
/// a post-window recovery for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionOutcome {
    NotExcluded,
    Excluded {
        reason: String,
        window_end: Option<NaiveDate>,
    },
}

/// Static policy table.
pub fn rules_for_state(state: &StateCode) -> &'static [ExclusionRule] {
    const BDAY_30_60: &[ExclusionRule] = &[ExclusionRule::BirthdayWindow {
        days_before: 30,
        days_after: 60,
        month_start: false,
    }];
    const BDAY_0_63: &[ExclusionRule] = &[ExclusionRule::BirthdayWindow {
        days_before: 0,
        days_after: 63,
        month_start: false,
    }];
    const BDAY_0_60: &[ExclusionRule] = &[ExclusionRule::BirthdayWindow {
        days_before: 0,
        days_after: 60,
        month_start: false,
    }];
    const BDAY_0_30: &[ExclusionRule] = &[ExclusionRule::BirthdayWindow {
        days_before: 0,
        days_after: 30,
        month_start: false,
    }];
    const BDAY_0_60_MONTH_START: &[ExclusionRule] = &[ExclusionRule::BirthdayWindow {
        days_before: 0,
        days_after: 60,
        month_start: true,
    }];
    const BDAY_0_31: &[ExclusionRule] = &[ExclusionRule::BirthdayWindow {
        days_before: 0,
        days_after: 31,
        month_start: false,
    }];
    const ED_30_33: &[ExclusionRule] = &[ExclusionRule::EffectiveDateWindow {
        days_before: 30,
        days_after: 33,
    }];
    const YEAR_ROUND: &[ExclusionRule] = &[ExclusionRule::YearRound];
    const NONE: &[ExclusionRule] = &[];

    match state {
        StateCode::Ca => BDAY_30_60,
        StateCode::Id => BDAY_0_63,
        StateCode::Ky | StateCode::Ok => BDAY_0_60,
        StateCode::Md | StateCode::Va => BDAY_0_30,
        StateCode::Nv => BDAY_0_60_MONTH_START,
        StateCode::Or => BDAY_0_31,
        StateCode::Mo => ED_30_33,
        StateCode::Ct | StateCode::Ma | StateCode::Ny | StateCode::Wa => YEAR_ROUND,
        StateCode::Other(_) => NONE,
    }
}

/// If the contact's state bans marketing sends year-round, the reason.
///
/// Post-window recovery candidates are re-checked against this alone: their
/// date is definitionally outside the windowed rule that produced them.
pub fn year_round_exclusion(contact: &Contact) -> Option<String> {
    let state = contact.state.as_ref()?;
    rules_for_state(state)
        .iter()
        .find(|rule| matches!(rule, ExclusionRule::YearRound))
        .map(|_| format!("Year-round exclusion for {state}"))
}

/// Classify a candidate send date for a contact.
///
/// When several windowed rules cover the date, the one with the later
/// window end wins, so any recovery send lands after the longer ban.
pub fn check_exclusion(
    cfg: &OrgConfig,
    contact: &Contact,
    check_date: NaiveDate,
) -> ExclusionOutcome {
    let Some(state) = &contact.state else {
        return ExclusionOutcome::NotExcluded;
    };

    let buffer = cfg.buffer_days_for_state(state.as_str());
    let mut best: Option<(NaiveDate, String)> = None;

    for rule in rules_for_state(state) {
        let (anchor, before, after, month_start, label) = match *rule {
            ExclusionRule::YearRound => {
                return ExclusionOutcome::Excluded {
                    reason: format!("Year-round exclusion for {state}"),
                    window_end: None,
                };
            }
            ExclusionRule::BirthdayWindow {
                days_before,
                days_after,
                month_start,
            } => {
                let Some(birthday) = contact.birthday else {
                    continue;
                };
                (birthday, days_before, days_after, month_start, "Birthday")
            }
            ExclusionRule::EffectiveDateWindow {
                days_before,
                days_after,
            } => {
                let Some(effective) = contact.effective_date else {
                    continue;
                };
                (effective, days_before, days_after, false, "Effective date")
            }
        };

        if let Some(end) = windowed_hit(anchor, check_date, before, after, buffer, month_start) {
            let better = match &best {
                Some((best_end, _)) => end > *best_end,
                None => true,
            };
            if better {
                best = Some((end, format!("{label} exclusion window for {state}")));
            }
        }
    }

    match best {
        Some((end, reason)) => ExclusionOutcome::Excluded {
            reason,
            window_end: Some(end),
        },
        None => ExclusionOutcome::NotExcluded,
    }
}

/// Whether `check_date` falls in the rule's window anchored at the next
/// anniversary or the one before it (windows reach backwards far enough to
/// span a year boundary). Returns the end of the matching window.
fn windowed_hit(
    anchor: NaiveDate,
    check_date: NaiveDate,
    before: i64,
    after: i64,
    buffer: i64,
    month_start: bool,
) -> Option<NaiveDate> {
    let upcoming = window_anchor(dates::next_anniversary(check_date, anchor), month_start);
    let prior = window_anchor(
        dates::anniversary_in_year(anchor, upcoming.year() - 1),
        month_start,
    );

    // Later window first so an overlap reports the later end.
    for candidate_anchor in [upcoming, prior] {
        let start = dates::add_days(candidate_anchor, -(before + buffer));
        let end = dates::add_days(candidate_anchor, after);
        if check_date >= start && check_date <= end {
            return Some(end);
        }
    }
    None
}

fn window_anchor(anniversary: NaiveDate, month_start: bool) -> NaiveDate {
    if month_start {
        // Day 1 always exists.
        NaiveDate::from_ymd_opt(anniversary.year(), anniversary.month(), 1).unwrap_or(anniversary)
    } else {
        anniversary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrgRow;
    use std::collections::HashMap;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn cfg() -> OrgConfig {
        OrgConfig::resolve(&OrgRow::default(), HashMap::new(), 100).unwrap()
    }

    fn contact(state: &str, birthday: Option<NaiveDate>, effective: Option<NaiveDate>) -> Contact {
        Contact {
            id: 1,
            email: "c@example.com".to_string(),
            zip_code: None,
            state: StateCode::parse(state),
            birthday,
            effective_date: effective,
            carrier: None,
            failed_underwriting: false,
        }
    }

    fn assert_window_end(outcome: ExclusionOutcome, end: NaiveDate) {
        match outcome {
            ExclusionOutcome::Excluded {
                window_end: Some(w),
                ..
            } => assert_eq!(w, end),
            other => panic!("expected windowed exclusion, got {other:?}"),
        }
    }

    #[test]
    fn no_state_means_not_excluded() {
        let c = contact("", Some(d(1980, 6, 1)), None);
        assert_eq!(c.state, None);
        assert_eq!(
            check_exclusion(&cfg(), &c, d(2024, 6, 1)),
            ExclusionOutcome::NotExcluded
        );
    }

    #[test]
    fn missing_anchor_means_not_excluded() {
        // CA is a birthday-window state; a contact without a birthday has
        // nothing to anchor the window to.
        let c = contact("CA", None, Some(d(2020, 6, 1)));
        assert_eq!(
            check_exclusion(&cfg(), &c, d(2024, 6, 1)),
            ExclusionOutcome::NotExcluded
        );
    }

    #[test]
    fn ca_birthday_window_with_buffer() {
        // Birthday Dec 1; CA window [anchor-30-60, anchor+60].
        let c = contact("CA", Some(d(1960, 12, 1)), None);
        let cfg = cfg();

        assert_window_end(check_exclusion(&cfg, &c, d(2024, 11, 17)), d(2025, 1, 30));
        assert_window_end(check_exclusion(&cfg, &c, d(2024, 9, 2)), d(2025, 1, 30));
        assert_window_end(check_exclusion(&cfg, &c, d(2025, 1, 30)), d(2025, 1, 30));

        assert_eq!(
            check_exclusion(&cfg, &c, d(2024, 9, 1)),
            ExclusionOutcome::NotExcluded
        );
        assert_eq!(
            check_exclusion(&cfg, &c, d(2025, 1, 31)),
            ExclusionOutcome::NotExcluded
        );
    }

    #[test]
    fn window_spanning_year_boundary_is_caught_after_the_anniversary() {
        // Birthday Jan 10, ID window [anchor-0-60, anchor+63]. A check in
        // February sits after this year's anniversary: the next anniversary
        // is next January, so only the prior-year window can match.
        let c = contact("ID", Some(d(1975, 1, 10)), None);
        assert_window_end(check_exclusion(&cfg(), &c, d(2024, 2, 20)), d(2024, 3, 13));
    }

    #[test]
    fn nevada_anchors_to_month_start() {
        // S2: birthday Mar 15 → anchor Mar 1; window [Jan 1, Apr 30].
        let c = contact("NV", Some(d(1980, 3, 15)), None);
        let cfg = cfg();

        assert_window_end(check_exclusion(&cfg, &c, d(2024, 3, 1)), d(2024, 4, 30));
        assert_window_end(check_exclusion(&cfg, &c, d(2024, 1, 1)), d(2024, 4, 30));
        assert_window_end(check_exclusion(&cfg, &c, d(2024, 4, 30)), d(2024, 4, 30));
        assert_eq!(
            check_exclusion(&cfg, &c, d(2024, 5, 1)),
            ExclusionOutcome::NotExcluded
        );
    }

    #[test]
    fn missouri_uses_the_effective_date() {
        // MO window [anchor-30-60, anchor+33] off the policy anniversary.
        let c = contact("MO", Some(d(1960, 1, 1)), Some(d(2020, 7, 1)));
        let cfg = cfg();

        assert_window_end(check_exclusion(&cfg, &c, d(2024, 6, 15)), d(2024, 8, 3));
        assert_window_end(check_exclusion(&cfg, &c, d(2024, 4, 2)), d(2024, 8, 3));
        assert_eq!(
            check_exclusion(&cfg, &c, d(2024, 4, 1)),
            ExclusionOutcome::NotExcluded
        );
        // The birthday does not matter in MO.
        assert_eq!(
            check_exclusion(&cfg, &c, d(2024, 1, 1)),
            ExclusionOutcome::NotExcluded
        );
    }

    #[test]
    fn year_round_states_always_excluded() {
        let cfg = cfg();
        for state in ["CT", "MA", "NY", "WA"] {
            let c = contact(state, Some(d(1970, 6, 1)), None);
            match check_exclusion(&cfg, &c, d(2024, 5, 18)) {
                ExclusionOutcome::Excluded { reason, window_end } => {
                    assert_eq!(window_end, None);
                    assert_eq!(reason, format!("Year-round exclusion for {state}"));
                }
                other => panic!("{state}: expected year-round exclusion, got {other:?}"),
            }
        }
    }

    #[test]
    fn year_round_helper_only_fires_for_banned_states() {
        assert!(year_round_exclusion(&contact("NY", None, None)).is_some());
        assert!(year_round_exclusion(&contact("CA", None, None)).is_none());
        assert!(year_round_exclusion(&contact("TX", None, None)).is_none());
    }

    #[test]
    fn unregulated_states_have_no_rules() {
        let c = contact("TX", Some(d(1980, 6, 1)), Some(d(2015, 6, 1)));
        assert_eq!(
            check_exclusion(&cfg(), &c, d(2024, 6, 1)),
            ExclusionOutcome::NotExcluded
        );
    }

    #[test]
    fn per_state_buffer_override_narrows_the_window() {
        let mut buffers = HashMap::new();
        buffers.insert("KY".to_string(), 0);
        let cfg = OrgConfig::resolve(&OrgRow::default(), buffers, 100).unwrap();
        let c = contact("KY", Some(d(1970, 8, 1)), None);

        // With buffer 0 the window is [anchor, anchor+60].
        assert_eq!(
            check_exclusion(&cfg, &c, d(2024, 7, 31)),
            ExclusionOutcome::NotExcluded
        );
        assert_window_end(check_exclusion(&cfg, &c, d(2024, 8, 1)), d(2024, 9, 30));
    }

    #[test]
    fn window_boundaries_for_every_birthday_state() {
        // (state, days_before, days_after) with the default 60-day buffer;
        // birthday Aug 1 keeps every window inside one calendar year.
        let table = [
            ("CA", 30, 60),
            ("ID", 0, 63),
            ("KY", 0, 60),
            ("OK", 0, 60),
            ("MD", 0, 30),
            ("VA", 0, 30),
            ("OR", 0, 31),
        ];
        let cfg = cfg();
        for (state, before, after) in table {
            let c = contact(state, Some(d(1970, 8, 1)), None);
            let anchor = d(2024, 8, 1);
            let start = anchor - chrono::Duration::days(before + 60);
            let end = anchor + chrono::Duration::days(after);

            assert_eq!(
                check_exclusion(&cfg, &c, start - chrono::Duration::days(1)),
                ExclusionOutcome::NotExcluded,
                "{state}: day before window start should be clear"
            );
            assert_window_end(check_exclusion(&cfg, &c, start), end);
            assert_window_end(check_exclusion(&cfg, &c, end), end);
            assert_eq!(
                check_exclusion(&cfg, &c, end + chrono::Duration::days(1)),
                ExclusionOutcome::NotExcluded,
                "{state}: day after window end should be clear"
            );
        }
    }

    #[test]
    fn feb_29_birthday_windows_roll_over() {
        // OR window [anchor-0-60, anchor+31]; anchor rolls to Feb 28 in
        // non-leap years.
        let c = contact("OR", Some(d(1992, 2, 29)), None);
        assert_window_end(check_exclusion(&cfg(), &c, d(2023, 2, 28)), d(2023, 3, 31));
    }
}
