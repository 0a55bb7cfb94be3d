//! Load balancing: effective-date smoothing, then daily-cap enforcement.
//!
//! Both passes are deterministic for a fixed input ordering — re-running the
//! scheduler over identical inputs must byte-for-byte reproduce the schedule
//! so the smart diff can preserve row identity. Skipped candidates keep
//! their dates and consume no capacity.
//!
//! Pass order matters: smoothing first flattens effective-date clumps
//! (policies sold in bursts renew in bursts), then the cap pass enforces the
//! org-wide ceiling with priority-ordered eviction and a bounded catch-up
//! spread.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};

use chrono::{Datelike, NaiveDate};

use crate::config::OrgConfig;
use crate::dates;
use crate::types::{Candidate, EmailType};
use crate::util;

/// Resolved knobs for one balancing run.
#[derive(Debug, Clone, Copy)]
pub struct BalancerLimits {
    pub daily_cap: usize,
    pub ed_soft_limit: usize,
    pub smoothing_window_days: i64,
    pub catch_up_spread_days: i64,
    pub overage_threshold: f64,
}

impl BalancerLimits {
    pub fn from_config(cfg: &OrgConfig, total_contacts: usize) -> BalancerLimits {
        let daily_cap = ((cfg.daily_send_percentage_cap * total_contacts as f64).ceil() as usize)
            .max(1);
        // The soft limit floors at 30% of the cap so tiny configured limits
        // cannot trigger pointless churn on large organizations.
        let ed_soft_limit = cfg
            .ed_daily_soft_limit
            .max((daily_cap as f64 * 0.3).ceil() as usize);
        BalancerLimits {
            daily_cap,
            ed_soft_limit,
            smoothing_window_days: cfg.ed_smoothing_window_days,
            catch_up_spread_days: cfg.catch_up_spread_days,
            overage_threshold: cfg.overage_threshold,
        }
    }
}

/// Redistribute pre-scheduled candidates in place.
pub fn balance(
    candidates: &mut [Candidate],
    limits: BalancerLimits,
    today: NaiveDate,
    horizon_end: NaiveDate,
) {
    smooth_effective_dates(candidates, limits, today);
    enforce_daily_cap(candidates, limits, horizon_end);
}

// ---------------------------------------------------------------------------
// Pass (a): effective-date smoothing
// ---------------------------------------------------------------------------

fn smooth_effective_dates(candidates: &mut [Candidate], limits: BalancerLimits, today: NaiveDate) {
    let window = limits.smoothing_window_days.max(1);
    let half = window / 2;

    let mut ed_by_date: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.is_pre_scheduled() && candidate.email_type == EmailType::EffectiveDate {
            ed_by_date.entry(candidate.date).or_default().push(idx);
        }
    }
    let mut ed_counts: HashMap<NaiveDate, usize> =
        ed_by_date.iter().map(|(d, v)| (*d, v.len())).collect();

    // Candidates already jittered stay put; smoothing is one hop.
    let mut moved: HashSet<usize> = HashSet::new();
    let dates: Vec<NaiveDate> = ed_by_date.keys().copied().collect();

    for day in dates {
        let count = ed_counts.get(&day).copied().unwrap_or(0);
        if count <= limits.ed_soft_limit {
            continue;
        }

        let mut here: Vec<usize> = ed_by_date
            .get(&day)
            .map(|v| {
                v.iter()
                    .copied()
                    .filter(|idx| !moved.contains(idx) && candidates[*idx].date == day)
                    .collect()
            })
            .unwrap_or_default();
        here.sort_by_key(|&idx| candidates[idx].contact_id);

        if here.len() <= limits.ed_soft_limit {
            continue;
        }
        let surplus: Vec<usize> = here.split_off(limits.ed_soft_limit);

        for idx in surplus {
            let contact_id = candidates[idx].contact_id;
            let jitter = (util::hash64_tagged(contact_id, "ed", day.year()) % window as u64) as i64;
            let preferred = dates::add_days(day, jitter - half);

            let target = pick_smoothing_target(preferred, day, half, today, limits, &ed_counts);
            let Some(target) = target else {
                continue; // no under-limit day in the window: stay put
            };

            if let Some(count) = ed_counts.get_mut(&day) {
                *count = count.saturating_sub(1);
            }
            *ed_counts.entry(target).or_insert(0) += 1;
            ed_by_date.entry(target).or_default().push(idx);
            candidates[idx].date = target;
            moved.insert(idx);
        }
    }
}

/// The jittered day if it has room, else the nearest under-limit day inside
/// the window (earlier wins a distance tie), else nothing.
fn pick_smoothing_target(
    preferred: NaiveDate,
    day: NaiveDate,
    half: i64,
    today: NaiveDate,
    limits: BalancerLimits,
    ed_counts: &HashMap<NaiveDate, usize>,
) -> Option<NaiveDate> {
    let under_limit = |d: NaiveDate| ed_counts.get(&d).copied().unwrap_or(0) < limits.ed_soft_limit;
    let admissible = |d: NaiveDate| d >= today && d != day;

    if admissible(preferred) && under_limit(preferred) {
        return Some(preferred);
    }

    for distance in 1..=half {
        for offset in [-distance, distance] {
            let d = dates::add_days(day, offset);
            if admissible(d) && under_limit(d) {
                return Some(d);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Pass (b): daily cap
// ---------------------------------------------------------------------------

fn enforce_daily_cap(candidates: &mut [Candidate], limits: BalancerLimits, horizon_end: NaiveDate) {
    let mut by_date: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.is_pre_scheduled() {
            by_date.entry(candidate.date).or_default().push(idx);
        }
    }

    let trigger = limits.daily_cap as f64 * limits.overage_threshold;

    let mut cursor = by_date.keys().next().copied();
    while let Some(day) = cursor {
        let count = by_date.get(&day).map_or(0, Vec::len);
        if count as f64 > trigger {
            let mut here = by_date.remove(&day).unwrap_or_default();
            sort_for_eviction(candidates, &mut here);

            let tail = here.split_off(limits.daily_cap.min(here.len()));
            by_date.insert(day, here);

            relocate_tail(candidates, &mut by_date, tail, day, limits, horizon_end);
        }

        cursor = by_date
            .range((Excluded(day), Unbounded))
            .next()
            .map(|(d, _)| *d);
    }
}

/// Eviction order: priority ascending, then contact id, then type tag so
/// ties cannot depend on input order.
fn sort_for_eviction(candidates: &[Candidate], indices: &mut [usize]) {
    indices.sort_by(|&a, &b| {
        let ca = &candidates[a];
        let cb = &candidates[b];
        (ca.priority, ca.contact_id, ca.email_type.wire_tag())
            .cmp(&(cb.priority, cb.contact_id, cb.email_type.wire_tag()))
    });
}

/// Move evicted candidates forward: first under-cap day within the catch-up
/// range, else spread the remainder round-robin across the range. Never
/// backwards, never past the horizon; with no forward room they stay put.
fn relocate_tail(
    candidates: &mut [Candidate],
    by_date: &mut BTreeMap<NaiveDate, Vec<usize>>,
    tail: Vec<usize>,
    day: NaiveDate,
    limits: BalancerLimits,
    horizon_end: NaiveDate,
) {
    let range_end = dates::add_days(day, limits.catch_up_spread_days).min(horizon_end);
    let range: Vec<NaiveDate> = (1..)
        .map(|offset| dates::add_days(day, offset))
        .take_while(|d| *d <= range_end)
        .collect();

    if range.is_empty() {
        tracing::warn!(
            %day,
            stranded = tail.len(),
            "over-cap day at the planning horizon has no forward room"
        );
        by_date.entry(day).or_default().extend(tail);
        return;
    }

    let mut leftover = Vec::new();
    for idx in tail {
        let slot = range
            .iter()
            .find(|d| by_date.get(d).map_or(0, Vec::len) < limits.daily_cap)
            .copied();
        match slot {
            Some(target) => {
                candidates[idx].date = target;
                by_date.entry(target).or_default().push(idx);
            }
            None => leftover.push(idx),
        }
    }

    if !leftover.is_empty() {
        tracing::debug!(
            %day,
            spread = leftover.len(),
            days = range.len(),
            "catch-up range saturated; spreading remainder round-robin"
        );
        leftover.sort_by_key(|&idx| candidates[idx].contact_id);
        for (i, idx) in leftover.into_iter().enumerate() {
            let target = range[i % range.len()];
            candidates[idx].date = target;
            by_date.entry(target).or_default().push(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Disposition, PRIORITY_BIRTHDAY, PRIORITY_EFFECTIVE_DATE};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn limits() -> BalancerLimits {
        BalancerLimits {
            daily_cap: 70,
            ed_soft_limit: 21,
            smoothing_window_days: 5,
            catch_up_spread_days: 7,
            overage_threshold: 1.2,
        }
    }

    fn ed(contact_id: i64, date: NaiveDate) -> Candidate {
        Candidate {
            contact_id,
            email_type: EmailType::EffectiveDate,
            date,
            priority: PRIORITY_EFFECTIVE_DATE,
            template_id: None,
            sms_template_id: None,
            campaign_instance_id: None,
            event_anchor: Some(date),
            respects_exclusions: true,
            disposition: Disposition::PreScheduled,
        }
    }

    fn birthday(contact_id: i64, date: NaiveDate) -> Candidate {
        Candidate {
            contact_id,
            email_type: EmailType::Birthday,
            date,
            priority: PRIORITY_BIRTHDAY,
            template_id: None,
            sms_template_id: None,
            campaign_instance_id: None,
            event_anchor: Some(date),
            respects_exclusions: true,
            disposition: Disposition::PreScheduled,
        }
    }

    fn campaign(contact_id: i64, date: NaiveDate) -> Candidate {
        Candidate {
            contact_id,
            email_type: EmailType::Campaign {
                type_name: "rate_increase".to_string(),
                instance_id: 1,
            },
            date,
            priority: 30,
            template_id: None,
            sms_template_id: None,
            campaign_instance_id: Some(1),
            event_anchor: Some(date),
            respects_exclusions: false,
            disposition: Disposition::PreScheduled,
        }
    }

    fn count_on(candidates: &[Candidate], date: NaiveDate) -> usize {
        candidates
            .iter()
            .filter(|c| c.is_pre_scheduled() && c.date == date)
            .count()
    }

    #[test]
    fn limits_from_config_apply_the_cap_floor() {
        let cfg = crate::config::OrgConfig::resolve(
            &crate::config::OrgRow::default(),
            Default::default(),
            100_000,
        )
        .unwrap();
        let limits = BalancerLimits::from_config(&cfg, 100_000);
        assert_eq!(limits.daily_cap, 7_000);
        // 0.3 × cap dominates the profile's soft limit here.
        assert_eq!(limits.ed_soft_limit, 2_100);
    }

    #[test]
    fn smoothing_moves_surplus_within_the_window() {
        let today = d(2024, 10, 1);
        let day = d(2024, 10, 15);
        let mut candidates: Vec<Candidate> = (1..=40).map(|id| ed(id, day)).collect();

        let mut lim = limits();
        lim.ed_soft_limit = 10;
        smooth_effective_dates(&mut candidates, lim, today);

        // The overloaded day keeps exactly the soft limit; everyone else is
        // within ±2 days and never before today.
        assert_eq!(count_on(&candidates, day), 10);
        for c in &candidates {
            assert!(c.date >= d(2024, 10, 13) && c.date <= d(2024, 10, 17));
            assert!(c.date >= today);
        }
    }

    #[test]
    fn smoothing_never_moves_before_today() {
        let today = d(2024, 10, 15);
        let mut candidates: Vec<Candidate> = (1..=40).map(|id| ed(id, today)).collect();

        let mut lim = limits();
        lim.ed_soft_limit = 10;
        smooth_effective_dates(&mut candidates, lim, today);

        for c in &candidates {
            assert!(c.date >= today, "candidate moved into the past: {}", c.date);
        }
    }

    #[test]
    fn smoothing_is_deterministic() {
        let today = d(2024, 10, 1);
        let day = d(2024, 10, 15);
        let build = || -> Vec<Candidate> { (1..=50).map(|id| ed(id, day)).collect() };

        let mut lim = limits();
        lim.ed_soft_limit = 15;

        let mut a = build();
        let mut b = build();
        smooth_effective_dates(&mut a, lim, today);
        smooth_effective_dates(&mut b, lim, today);
        let dates_a: Vec<_> = a.iter().map(|c| c.date).collect();
        let dates_b: Vec<_> = b.iter().map(|c| c.date).collect();
        assert_eq!(dates_a, dates_b);
    }

    #[test]
    fn under_soft_limit_days_are_untouched() {
        let today = d(2024, 10, 1);
        let day = d(2024, 10, 15);
        let mut candidates: Vec<Candidate> = (1..=5).map(|id| ed(id, day)).collect();
        smooth_effective_dates(&mut candidates, limits(), today);
        assert_eq!(count_on(&candidates, day), 5);
    }

    #[test]
    fn cap_eviction_keeps_low_priority_numbers() {
        // S6 shape, scaled: cap 70, trigger 84. 90 campaign rows + 10
        // birthday rows on one day.
        let day = d(2024, 10, 10);
        let mut candidates: Vec<Candidate> = Vec::new();
        for id in 1..=90 {
            candidates.push(campaign(id, day));
        }
        for id in 101..=110 {
            candidates.push(birthday(id, day));
        }

        enforce_daily_cap(&mut candidates, limits(), d(2025, 1, 1));

        assert_eq!(count_on(&candidates, day), 70);
        // Every birthday (priority 10) survived on the original day.
        for c in candidates.iter().filter(|c| c.email_type == EmailType::Birthday) {
            assert_eq!(c.date, day);
        }
        // The 30 evicted rows are campaign rows with the highest contact ids.
        let moved: Vec<i64> = candidates
            .iter()
            .filter(|c| c.date != day)
            .map(|c| c.contact_id)
            .collect();
        assert_eq!(moved.len(), 30);
        assert!(moved.iter().all(|&id| id > 60));
        // All landed on the next day: it had plenty of room.
        assert!(candidates
            .iter()
            .filter(|c| c.date != day)
            .all(|c| c.date == d(2024, 10, 11)));
    }

    #[test]
    fn cap_overflow_cascades_across_days() {
        // 200 rows on one day with cap 70: day keeps 70, day+1 fills to 70,
        // day+2 takes the remaining 60.
        let day = d(2024, 10, 10);
        let mut candidates: Vec<Candidate> = (1..=200).map(|id| campaign(id, day)).collect();

        enforce_daily_cap(&mut candidates, limits(), d(2025, 1, 1));

        assert_eq!(count_on(&candidates, day), 70);
        assert_eq!(count_on(&candidates, d(2024, 10, 11)), 70);
        assert_eq!(count_on(&candidates, d(2024, 10, 12)), 60);
    }

    #[test]
    fn overage_threshold_tolerates_mild_spikes() {
        // 80 rows with cap 70 is under the 1.2 trigger (84): untouched.
        let day = d(2024, 10, 10);
        let mut candidates: Vec<Candidate> = (1..=80).map(|id| campaign(id, day)).collect();
        enforce_daily_cap(&mut candidates, limits(), d(2025, 1, 1));
        assert_eq!(count_on(&candidates, day), 80);
    }

    #[test]
    fn skipped_rows_neither_move_nor_consume_capacity() {
        let day = d(2024, 10, 10);
        let mut candidates: Vec<Candidate> = (1..=100).map(|id| campaign(id, day)).collect();
        for c in candidates.iter_mut().take(40) {
            c.disposition = Disposition::Skipped("Year-round exclusion for NY".to_string());
        }

        enforce_daily_cap(&mut candidates, limits(), d(2025, 1, 1));

        // 60 live rows: under the trigger, nothing moves.
        assert!(candidates.iter().all(|c| c.date == day));
    }

    #[test]
    fn saturated_catch_up_range_spreads_round_robin() {
        // Fill day..day+7 to the cap, then overload day itself.
        let day = d(2024, 10, 10);
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut id = 0;
        for offset in 1..=7 {
            for _ in 0..70 {
                id += 1;
                candidates.push(campaign(id, dates::add_days(day, offset)));
            }
        }
        for _ in 0..150 {
            id += 1;
            candidates.push(campaign(id, day));
        }

        enforce_daily_cap(&mut candidates, limits(), d(2025, 1, 1));

        assert_eq!(count_on(&candidates, day), 70);
        // The 80 evicted rows had nowhere under-cap to go within 7 days;
        // they spread across the range instead of stacking on one day.
        let spread: Vec<usize> = (1..=7)
            .map(|offset| count_on(&candidates, dates::add_days(day, offset)))
            .collect();
        let extra: usize = spread.iter().map(|&c| c - 70).sum();
        assert_eq!(extra, 80);
        let max_extra = spread.iter().map(|&c| c - 70).max().unwrap();
        let min_extra = spread.iter().map(|&c| c - 70).min().unwrap();
        assert!(max_extra - min_extra <= 1, "uneven spread: {spread:?}");
    }

    #[test]
    fn nothing_moves_past_the_horizon() {
        let day = d(2024, 10, 10);
        let horizon = d(2024, 10, 12);
        let mut candidates: Vec<Candidate> = (1..=200).map(|id| campaign(id, day)).collect();

        enforce_daily_cap(&mut candidates, limits(), horizon);

        for c in &candidates {
            assert!(c.date <= horizon);
        }
        assert_eq!(count_on(&candidates, day), 70);
    }

    #[test]
    fn fully_stranded_day_at_the_horizon_stays_put() {
        let day = d(2024, 10, 10);
        let mut candidates: Vec<Candidate> = (1..=200).map(|id| campaign(id, day)).collect();

        // Horizon equals the overloaded day: no forward room at all.
        enforce_daily_cap(&mut candidates, limits(), day);
        assert_eq!(count_on(&candidates, day), 200);
    }

    #[test]
    fn full_balance_is_idempotent_on_balanced_input() {
        let today = d(2024, 10, 1);
        let mut candidates: Vec<Candidate> = (1..=50)
            .map(|id| campaign(id, dates::add_days(today, id % 10)))
            .collect();
        let before: Vec<_> = candidates.iter().map(|c| c.date).collect();

        balance(&mut candidates, limits(), today, d(2025, 1, 1));
        let after: Vec<_> = candidates.iter().map(|c| c.date).collect();
        assert_eq!(before, after);
    }
}
