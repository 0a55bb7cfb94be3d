//! The streaming coordinator: one invocation, one run id, one checkpoint.
//!
//! Contacts are read in id-ordered batches and pushed through the
//! per-contact stages (anniversary + campaign emission, exclusion filter).
//! Load balancing then runs once over the whole candidate set — the daily
//! cap and smoothing are organization-global, so balancing per batch would
//! be wrong — and the result is persisted batch-by-batch through the smart
//! diff. A wall-clock budget, when configured, is honored at batch
//! boundaries only; committed batches stay committed.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use rand::RngCore;

use crate::anniversaries;
use crate::balancer::{self, BalancerLimits};
use crate::campaigns;
use crate::config::OrgConfig;
use crate::dates;
use crate::db::{CheckpointRow, DiffStats, OrgDb};
use crate::error::{Diagnostic, SchedulerError};
use crate::exclusions;
use crate::types::{Candidate, Disposition, EmailSchedule, EmailType, ScheduleStatus};

/// Diagnostics kept on the summary; the rest are counted, not carried.
const MAX_DIAGNOSTICS: usize = 100;

/// Backoff before the single retry of a failed batch transaction.
const BATCH_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// What one scheduler run did.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: String,
    pub contacts_processed: usize,
    pub emails_scheduled: usize,
    pub emails_skipped: usize,
    pub diff: DiffStats,
    pub diagnostics: Vec<Diagnostic>,
    /// Diagnostics beyond [`MAX_DIAGNOSTICS`] are dropped; this counts them.
    pub diagnostics_truncated: usize,
}

/// Run the scheduler against the organization store at `db_path`.
///
/// `today` pins the planning date for reproducibility; when absent it is
/// read once from the clock in the organization's business timezone.
pub fn run_scheduler(
    db_path: &Path,
    today: Option<NaiveDate>,
) -> Result<RunSummary, SchedulerError> {
    let db = OrgDb::open(db_path)?;
    run_on(&db, today)
}

/// Run against an already-open store. The store must not have another
/// scheduler run in flight; that lock belongs to the orchestration layer.
pub fn run_on(db: &OrgDb, today: Option<NaiveDate>) -> Result<RunSummary, SchedulerError> {
    let started = Instant::now();

    let org_row = db.load_org_row()?;
    let state_buffers = db.load_state_buffers()?;
    let total_contacts = db.count_contacts()?;
    let cfg = OrgConfig::resolve(&org_row, state_buffers, total_contacts)?;

    let today = today.unwrap_or_else(|| dates::today_in_tz(cfg.timezone));
    let horizon_end = dates::add_days(today, cfg.planning_horizon_days);
    let deadline = cfg.max_run_seconds.map(|s| started + Duration::from_secs(s));

    let run_id = generate_run_id();
    let started_at = Utc::now().to_rfc3339();
    tracing::info!(
        %run_id,
        %today,
        total_contacts,
        profile = cfg.size_profile.as_str(),
        batch_size = cfg.batch_size,
        "scheduler run starting"
    );

    let mut checkpoint = CheckpointRow::started(&run_id, &started_at);
    db.write_checkpoint(&checkpoint)?;

    let (catalog, mut diagnostics) = db.load_campaign_catalog()?;

    // Stage 1: collect candidates per contact.
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut processed_ids: Vec<i64> = Vec::new();
    let mut cursor = 0i64;
    loop {
        if deadline_passed(deadline) {
            return abort_cancelled(db, &mut checkpoint, "wall-clock budget exhausted");
        }

        let batch = db.fetch_contacts_after(cursor, cfg.batch_size)?;
        let Some(last_id) = batch.last_id else { break };
        diagnostics.extend(batch.diagnostics);

        for contact in &batch.contacts {
            processed_ids.push(contact.id);

            let mut proposed =
                anniversaries::anniversary_candidates(contact, &cfg, today, horizon_end);
            proposed.extend(campaigns::campaign_candidates(
                contact,
                &catalog,
                &cfg,
                today,
                horizon_end,
                &mut diagnostics,
            ));
            candidates.extend(exclusions::apply_exclusions(contact, &cfg, proposed));
        }
        cursor = last_id;
    }

    // Stage 2: merge, balance globally, order deterministically.
    let mut candidates = dedupe_candidates(candidates);
    let limits = BalancerLimits::from_config(&cfg, total_contacts);
    balancer::balance(&mut candidates, limits, today, horizon_end);
    candidates.sort_by(|a, b| a.natural_key().cmp(&b.natural_key()));

    let emails_scheduled = candidates.iter().filter(|c| c.is_pre_scheduled()).count();
    let emails_skipped = candidates.len() - emails_scheduled;

    // Stage 3: persist in contact-ordered batches.
    let rows: Vec<EmailSchedule> = candidates
        .iter()
        .map(|c| EmailSchedule::from_candidate(c, cfg.send_time))
        .collect();
    let now = Utc::now().to_rfc3339();

    let mut diff = DiffStats::default();
    let mut row_cursor = 0usize;
    for chunk in processed_ids.chunks(cfg.batch_size) {
        if deadline_passed(deadline) {
            return abort_cancelled(db, &mut checkpoint, "wall-clock budget exhausted");
        }
        let Some(&chunk_last) = chunk.last() else { continue };

        let row_start = row_cursor;
        while row_cursor < rows.len() && rows[row_cursor].contact_id <= chunk_last {
            row_cursor += 1;
        }
        let chunk_rows = &rows[row_start..row_cursor];

        let pre_count = chunk_rows
            .iter()
            .filter(|r| r.status == ScheduleStatus::PreScheduled)
            .count();
        checkpoint.contacts_processed += chunk.len() as i64;
        checkpoint.emails_scheduled += pre_count as i64;
        checkpoint.emails_skipped += (chunk_rows.len() - pre_count) as i64;

        let stats = apply_with_retry(db, chunk, chunk_rows, &run_id, &now, &checkpoint)?;
        tracing::debug!(
            contacts = chunk.len(),
            inserted = stats.inserted,
            updated = stats.updated,
            deleted = stats.deleted,
            unchanged = stats.unchanged,
            "batch committed"
        );
        diff.absorb(stats);
    }

    checkpoint.finished_at = Some(Utc::now().to_rfc3339());
    checkpoint.status = "completed".to_string();
    db.write_checkpoint(&checkpoint)?;

    let diagnostics_truncated = diagnostics.len().saturating_sub(MAX_DIAGNOSTICS);
    diagnostics.truncate(MAX_DIAGNOSTICS);

    tracing::info!(
        %run_id,
        contacts_processed = processed_ids.len(),
        emails_scheduled,
        emails_skipped,
        inserted = diff.inserted,
        updated = diff.updated,
        deleted = diff.deleted,
        unchanged = diff.unchanged,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scheduler run completed"
    );

    Ok(RunSummary {
        run_id,
        contacts_processed: processed_ids.len(),
        emails_scheduled,
        emails_skipped,
        diff,
        diagnostics,
        diagnostics_truncated,
    })
}

/// `run_YYYYMMDD_HHMMSS_<6-hex>`, generated once per invocation.
fn generate_run_id() -> String {
    let mut nonce = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut nonce);
    format!(
        "run_{}_{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        hex::encode(nonce)
    )
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn abort_cancelled(
    db: &OrgDb,
    checkpoint: &mut CheckpointRow,
    reason: &str,
) -> Result<RunSummary, SchedulerError> {
    checkpoint.finished_at = Some(Utc::now().to_rfc3339());
    checkpoint.status = "cancelled".to_string();
    // Best effort: the cancellation itself must not be masked by a
    // checkpoint write failure.
    if let Err(err) = db.write_checkpoint(checkpoint) {
        tracing::warn!(%err, "failed to record cancelled checkpoint");
    }
    tracing::warn!(run_id = %checkpoint.run_id, reason, "scheduler run cancelled");
    Err(SchedulerError::Cancelled(reason.to_string()))
}

/// One retry with backoff for transient store contention, then give up.
fn apply_with_retry(
    db: &OrgDb,
    contact_ids: &[i64],
    rows: &[EmailSchedule],
    run_id: &str,
    now: &str,
    checkpoint: &CheckpointRow,
) -> Result<DiffStats, SchedulerError> {
    match db.apply_schedule_batch(contact_ids, rows, run_id, now, checkpoint) {
        Ok(stats) => Ok(stats),
        Err(err) if err.is_retryable() => {
            tracing::warn!(%err, "batch transaction failed; retrying once");
            std::thread::sleep(BATCH_RETRY_BACKOFF);
            db.apply_schedule_batch(contact_ids, rows, run_id, now, checkpoint)
        }
        Err(err) => Err(err),
    }
}

/// Merge-step deduplication.
///
/// Two rules: exact natural-key duplicates collapse (the store's unique
/// index would reject them), and a contact targeted by several campaigns on
/// the same day keeps only the best-priority one. Anniversary kinds never
/// crowd each other out.
fn dedupe_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        (
            a.contact_id,
            a.date,
            a.priority,
            !a.is_pre_scheduled(),
            a.email_type.wire_tag(),
            a.campaign_instance_id,
        )
            .cmp(&(
                b.contact_id,
                b.date,
                b.priority,
                !b.is_pre_scheduled(),
                b.email_type.wire_tag(),
                b.campaign_instance_id,
            ))
    });

    let mut out: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let key = candidate.natural_key();
        if out
            .iter()
            .rev()
            .take_while(|prev| prev.contact_id == candidate.contact_id && prev.date == candidate.date)
            .any(|prev| prev.natural_key() == key)
        {
            continue; // exact duplicate: first (best) occurrence already kept
        }

        let campaign_sibling_kept = matches!(candidate.email_type, EmailType::Campaign { .. })
            && candidate.disposition == Disposition::PreScheduled
            && out
                .iter()
                .rev()
                .take_while(|prev| {
                    prev.contact_id == candidate.contact_id && prev.date == candidate.date
                })
                .any(|prev| {
                    matches!(prev.email_type, EmailType::Campaign { .. })
                        && prev.disposition == Disposition::PreScheduled
                });
        if campaign_sibling_kept {
            continue;
        }

        out.push(candidate);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    fn seed_contact(
        db: &OrgDb,
        id: i64,
        state: &str,
        birthday: Option<&str>,
        effective: Option<&str>,
    ) {
        db.conn_ref()
            .execute(
                "INSERT INTO contacts (id, email, zip_code, state, birth_date, effective_date)
                 VALUES (?1, ?2, '00000', ?3, ?4, ?5)",
                params![id, format!("c{id}@example.com"), state, birthday, effective],
            )
            .unwrap();
    }

    fn schedules_of(db: &OrgDb, contact_id: i64) -> Vec<EmailSchedule> {
        db.load_schedules_for(&[contact_id]).unwrap()
    }

    #[test]
    fn run_id_format() {
        let run_id = generate_run_id();
        assert!(run_id.starts_with("run_"));
        let parts: Vec<&str> = run_id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        assert_eq!(parts[3].len(), 6);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ca_contact_gets_skip_and_recovery_rows() {
        // S1 end to end.
        init_tracing();
        let db = OrgDb::open_in_memory().unwrap();
        seed_contact(&db, 1, "CA", Some("1960-12-01"), None);

        let summary = run_on(&db, Some(d(2024, 10, 1))).unwrap();
        assert_eq!(summary.contacts_processed, 1);

        let rows = schedules_of(&db, 1);
        let birthday = rows
            .iter()
            .find(|r| r.email_type == EmailType::Birthday)
            .unwrap();
        assert_eq!(birthday.scheduled_date, d(2024, 11, 17));
        assert_eq!(birthday.status, ScheduleStatus::Skipped);
        assert_eq!(
            birthday.skip_reason.as_deref(),
            Some("Birthday exclusion window for CA")
        );

        let recovery = rows
            .iter()
            .find(|r| r.email_type == EmailType::PostWindow)
            .unwrap();
        assert_eq!(recovery.scheduled_date, d(2025, 1, 31));
        assert_eq!(recovery.status, ScheduleStatus::PreScheduled);
        assert_eq!(recovery.scheduler_run_id.as_deref(), Some(summary.run_id.as_str()));
    }

    #[test]
    fn ny_contact_is_skipped_without_recovery() {
        // S3 end to end.
        let db = OrgDb::open_in_memory().unwrap();
        seed_contact(&db, 1, "NY", Some("1970-06-01"), None);

        run_on(&db, Some(d(2024, 5, 1))).unwrap();

        let rows = schedules_of(&db, 1);
        assert!(rows
            .iter()
            .all(|r| r.email_type != EmailType::PostWindow));
        let birthday = rows
            .iter()
            .find(|r| r.email_type == EmailType::Birthday)
            .unwrap();
        assert_eq!(birthday.scheduled_date, d(2024, 5, 18));
        assert_eq!(
            birthday.skip_reason.as_deref(),
            Some("Year-round exclusion for NY")
        );
    }

    #[test]
    fn reruns_are_idempotent_and_preserve_run_ids() {
        init_tracing();
        let db = OrgDb::open_in_memory().unwrap();
        seed_contact(&db, 1, "TX", Some("1980-11-01"), Some("2018-12-10"));
        seed_contact(&db, 2, "CA", Some("1960-12-01"), None);

        let today = Some(d(2024, 10, 1));
        let first = run_on(&db, today).unwrap();
        assert!(first.diff.inserted > 0);

        let before: Vec<EmailSchedule> = [1, 2]
            .iter()
            .flat_map(|&id| schedules_of(&db, id))
            .collect();

        let second = run_on(&db, today).unwrap();
        assert_eq!(second.diff.touched(), 0, "second apply must be a no-op");

        let after: Vec<EmailSchedule> = [1, 2]
            .iter()
            .flat_map(|&id| schedules_of(&db, id))
            .collect();
        assert_eq!(before, after);
        // Identity preserved: rows still carry the first run's id.
        for row in &after {
            assert_eq!(row.scheduler_run_id.as_deref(), Some(first.run_id.as_str()));
        }
    }

    #[test]
    fn natural_keys_are_unique_across_the_run() {
        let db = OrgDb::open_in_memory().unwrap();
        for id in 1..=40 {
            seed_contact(&db, id, "TX", Some("1980-11-01"), Some("2018-11-20"));
        }

        run_on(&db, Some(d(2024, 10, 1))).unwrap();

        let dup_count: i64 = db
            .conn_ref()
            .query_row(
                "SELECT COUNT(*) FROM (
                     SELECT contact_id, email_type, scheduled_date, COUNT(*) AS n
                     FROM email_schedules
                     GROUP BY contact_id, email_type, scheduled_date
                     HAVING n > 1
                 )",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(dup_count, 0);
    }

    #[test]
    fn stale_rows_from_prior_runs_are_deleted() {
        let db = OrgDb::open_in_memory().unwrap();
        seed_contact(&db, 1, "TX", Some("1980-11-01"), None);

        run_on(&db, Some(d(2024, 10, 1))).unwrap();
        assert!(!schedules_of(&db, 1).is_empty());

        // The birthday passes; a later run has nothing for this contact.
        let summary = run_on(&db, Some(d(2024, 12, 15))).unwrap();
        assert!(summary.diff.deleted > 0);
        let rows = schedules_of(&db, 1);
        assert!(
            rows.iter().all(|r| r.email_type != EmailType::Birthday
                || r.scheduled_date >= d(2024, 12, 15)),
            "stale birthday row survived: {rows:?}"
        );
    }

    #[test]
    fn checkpoint_records_the_completed_run() {
        let db = OrgDb::open_in_memory().unwrap();
        seed_contact(&db, 1, "TX", Some("1980-11-01"), None);

        let summary = run_on(&db, Some(d(2024, 10, 1))).unwrap();

        let checkpoint = db.checkpoint_for(&summary.run_id).unwrap().unwrap();
        assert_eq!(checkpoint.status, "completed");
        assert_eq!(checkpoint.contacts_processed, 1);
        assert!(checkpoint.finished_at.is_some());
        assert_eq!(
            checkpoint.emails_scheduled as usize,
            summary.emails_scheduled
        );
    }

    #[test]
    fn exclusion_soundness_for_pre_scheduled_rows() {
        // Mixed population across regulated and free states.
        let db = OrgDb::open_in_memory().unwrap();
        let states = ["CA", "NV", "NY", "MO", "TX", "OR", "ID"];
        for (i, state) in states.iter().enumerate() {
            let id = i as i64 + 1;
            seed_contact(
                &db,
                id,
                state,
                Some("1975-11-05"),
                Some("2019-12-01"),
            );
        }

        let today = d(2024, 10, 1);
        run_on(&db, Some(today)).unwrap();

        let org_row = db.load_org_row().unwrap();
        let cfg = OrgConfig::resolve(&org_row, db.load_state_buffers().unwrap(), 7).unwrap();

        for id in 1..=7 {
            let batch = db.fetch_contacts_after(id - 1, 1).unwrap();
            let contact = &batch.contacts[0];
            for row in schedules_of(&db, id) {
                if row.status != ScheduleStatus::PreScheduled {
                    continue;
                }
                if row.email_type == EmailType::PostWindow {
                    // Recovery rows are only vetted against year-round bans.
                    assert!(crate::rules::year_round_exclusion(contact).is_none());
                    continue;
                }
                assert_eq!(
                    crate::rules::check_exclusion(&cfg, contact, row.scheduled_date),
                    crate::rules::ExclusionOutcome::NotExcluded,
                    "unsound pre-scheduled row for contact {id}: {row}"
                );
            }
        }
    }

    #[test]
    fn campaign_rows_flow_end_to_end() {
        let db = OrgDb::open_in_memory().unwrap();
        for id in 1..=10 {
            seed_contact(&db, id, "TX", None, None);
        }
        // Lift the daily cap so the balancer leaves the spread assignment
        // visible; 10 contacts at the default 7% would cap each day at one.
        db.conn_ref()
            .execute(
                "INSERT INTO organizations (id, daily_send_percentage_cap) VALUES (1, 1.0)",
                [],
            )
            .unwrap();
        db.conn_ref()
            .execute(
                "INSERT INTO campaign_types
                 (name, priority, active, respect_exclusion_windows, days_before_event,
                  target_all_contacts, spread_evenly, skip_failed_underwriting)
                 VALUES ('newsletter', 25, 1, 0, 0, 1, 1, 0)",
                [],
            )
            .unwrap();
        db.conn_ref()
            .execute(
                "INSERT INTO campaign_instances
                 (id, campaign_type, instance_name, email_template,
                  active_start_date, active_end_date, spread_start_date, spread_end_date)
                 VALUES (1, 'newsletter', 'oct-news', 'news_v1',
                         '2024-10-01', '2024-10-31', '2024-10-05', '2024-10-25')",
                [],
            )
            .unwrap();

        let first = run_on(&db, Some(d(2024, 10, 1))).unwrap();
        assert_eq!(first.emails_scheduled, 10);

        let mut first_dates = Vec::new();
        for id in 1..=10 {
            let rows = schedules_of(&db, id);
            assert_eq!(rows.len(), 1);
            let row = &rows[0];
            assert_eq!(
                row.email_type,
                EmailType::Campaign {
                    type_name: "newsletter".to_string(),
                    instance_id: 1
                }
            );
            assert!(row.scheduled_date >= d(2024, 10, 5));
            assert!(row.scheduled_date <= d(2024, 10, 25));
            assert_eq!(row.template_id.as_deref(), Some("news_v1"));
            first_dates.push(row.scheduled_date);
        }

        // Deterministic spread across reruns.
        run_on(&db, Some(d(2024, 10, 1))).unwrap();
        for id in 1..=10usize {
            assert_eq!(
                schedules_of(&db, id as i64)[0].scheduled_date,
                first_dates[id - 1]
            );
        }
    }

    #[test]
    fn no_date_exceeds_the_hard_cap_after_balancing() {
        // 200 contacts sharing one birthday: the raw pipeline would put 200
        // rows on a single day against a cap of ceil(0.07 × 200) = 14.
        let db = OrgDb::open_in_memory().unwrap();
        for id in 1..=200 {
            seed_contact(&db, id, "TX", Some("1980-11-20"), None);
        }

        run_on(&db, Some(d(2024, 10, 1))).unwrap();

        let hard_cap = (14.0f64 * 1.2).ceil() as usize;
        let counts = db.pre_scheduled_counts_by_date().unwrap();
        assert_eq!(counts.values().sum::<usize>(), 200);
        for (date, count) in counts {
            assert!(
                count <= hard_cap,
                "{count} pre-scheduled rows on {date} (hard cap {hard_cap})"
            );
        }
    }

    #[test]
    fn summary_counts_match_the_store() {
        let db = OrgDb::open_in_memory().unwrap();
        seed_contact(&db, 1, "CA", Some("1960-12-01"), None);
        seed_contact(&db, 2, "TX", Some("1980-11-01"), None);

        let summary = run_on(&db, Some(d(2024, 10, 1))).unwrap();

        let pre: i64 = db
            .conn_ref()
            .query_row(
                "SELECT COUNT(*) FROM email_schedules WHERE status = 'pre-scheduled'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let skipped: i64 = db
            .conn_ref()
            .query_row(
                "SELECT COUNT(*) FROM email_schedules WHERE status = 'skipped'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(summary.emails_scheduled as i64, pre);
        assert_eq!(summary.emails_skipped as i64, skipped);
    }

    #[test]
    fn malformed_contacts_surface_as_diagnostics() {
        let db = OrgDb::open_in_memory().unwrap();
        seed_contact(&db, 1, "TX", Some("not-a-date"), None);
        seed_contact(&db, 2, "TX", Some("1980-11-01"), None);

        let summary = run_on(&db, Some(d(2024, 10, 1))).unwrap();
        assert_eq!(summary.contacts_processed, 1);
        assert_eq!(summary.diagnostics.len(), 1);
        assert_eq!(summary.diagnostics[0].contact_id, 1);
        assert_eq!(summary.diagnostics_truncated, 0);
    }

    #[test]
    fn dedupe_collapses_campaign_siblings_on_one_day() {
        let mk = |instance_id: i64, priority: i32, type_name: &str| Candidate {
            contact_id: 1,
            email_type: EmailType::Campaign {
                type_name: type_name.to_string(),
                instance_id,
            },
            date: d(2024, 10, 10),
            priority,
            template_id: None,
            sms_template_id: None,
            campaign_instance_id: Some(instance_id),
            event_anchor: None,
            respects_exclusions: false,
            disposition: Disposition::PreScheduled,
        };

        let out = dedupe_candidates(vec![
            mk(1, 30, "newsletter"),
            mk(2, 20, "rate_increase"),
            mk(3, 40, "upsell"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].priority, 20);
    }

    #[test]
    fn dedupe_keeps_anniversaries_next_to_campaigns() {
        let birthday = Candidate {
            contact_id: 1,
            email_type: EmailType::Birthday,
            date: d(2024, 10, 10),
            priority: 10,
            template_id: None,
            sms_template_id: None,
            campaign_instance_id: None,
            event_anchor: Some(d(2024, 10, 24)),
            respects_exclusions: true,
            disposition: Disposition::PreScheduled,
        };
        let campaign = Candidate {
            contact_id: 1,
            email_type: EmailType::Campaign {
                type_name: "newsletter".to_string(),
                instance_id: 1,
            },
            date: d(2024, 10, 10),
            priority: 30,
            template_id: None,
            sms_template_id: None,
            campaign_instance_id: Some(1),
            event_anchor: None,
            respects_exclusions: false,
            disposition: Disposition::PreScheduled,
        };

        let out = dedupe_candidates(vec![campaign, birthday]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn dedupe_collapses_exact_natural_key_duplicates() {
        let mk = |instance_id: i64| Candidate {
            contact_id: 1,
            email_type: EmailType::Campaign {
                type_name: "newsletter".to_string(),
                instance_id,
            },
            date: d(2024, 10, 10),
            priority: 30,
            template_id: None,
            sms_template_id: None,
            campaign_instance_id: Some(instance_id),
            event_anchor: None,
            respects_exclusions: false,
            disposition: Disposition::PreScheduled,
        };
        // Two instances of the same type on the same day share a natural key.
        let out = dedupe_candidates(vec![mk(2), mk(1)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].campaign_instance_id, Some(1));
    }
}
