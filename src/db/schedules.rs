//! Smart-diff persistence for email schedules.
//!
//! The contract: atomically replace the pre-scheduled and skipped rows for a
//! batch of contacts while preserving the surrogate id and scheduler_run_id
//! of any row whose content is unchanged. Rows in delivery states (`sent`,
//! `failed`) belong to the delivery worker and are never read or touched —
//! if a regenerated row collides with one on the natural key, the delivery
//! history wins and the new row is dropped.

use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use super::checkpoints::{self, CheckpointRow};
use super::{OrgDb, SchedulerError, IN_CHUNK};
use crate::dates;
use crate::types::{EmailSchedule, EmailType, ScheduleStatus};

/// Outcome counts for one diff application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl DiffStats {
    pub fn absorb(&mut self, other: DiffStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
    }

    /// Rows this diff touched (anything but unchanged).
    pub fn touched(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

struct StoredRow {
    id: i64,
    schedule: EmailSchedule,
}

impl OrgDb {
    /// Apply one batch of the schedule diff inside a single `BEGIN IMMEDIATE`
    /// transaction, and refresh the run checkpoint in the same commit.
    ///
    /// `new_rows` must contain every row the scheduler wants to exist for
    /// `contact_ids`; existing scheduler-owned rows for those contacts that
    /// have no counterpart are deleted.
    pub fn apply_schedule_batch(
        &self,
        contact_ids: &[i64],
        new_rows: &[EmailSchedule],
        run_id: &str,
        now: &str,
        checkpoint: &CheckpointRow,
    ) -> Result<DiffStats, SchedulerError> {
        self.with_immediate_tx(|conn| {
            let mut existing = read_existing(conn, contact_ids)?;
            let mut stats = DiffStats::default();

            for row in new_rows {
                match existing.remove(&row.natural_key()) {
                    Some(stored) => {
                        if stored.schedule.content_key() == row.content_key() {
                            stats.unchanged += 1;
                        } else {
                            update_row(conn, stored.id, row, run_id, now)?;
                            stats.updated += 1;
                        }
                    }
                    None => {
                        stats.inserted += insert_row(conn, row, run_id, now)?;
                    }
                }
            }

            let stale: Vec<i64> = existing.into_values().map(|s| s.id).collect();
            delete_rows(conn, &stale)?;
            stats.deleted = stale.len();

            checkpoints::upsert_checkpoint(conn, checkpoint)?;
            Ok(stats)
        })
    }

    /// Pre-scheduled row counts per send date, across the whole store.
    /// Cheap capacity introspection for operators (and the capacity tests).
    pub fn pre_scheduled_counts_by_date(
        &self,
    ) -> Result<std::collections::BTreeMap<NaiveDate, usize>, SchedulerError> {
        let mut stmt = self.conn.prepare(
            "SELECT scheduled_date, COUNT(*)
             FROM email_schedules
             WHERE status = 'pre-scheduled'
             GROUP BY scheduled_date
             ORDER BY scheduled_date",
        )?;
        let mut counts = std::collections::BTreeMap::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            let n: i64 = row.get(1)?;
            if let Some(date) = dates::parse_wire_date(&raw) {
                counts.insert(date, n.max(0) as usize);
            }
        }
        Ok(counts)
    }

    /// Read back scheduler-owned rows for a contact set, in natural-key
    /// order. Used by the runner's summary counts and by tests.
    pub fn load_schedules_for(
        &self,
        contact_ids: &[i64],
    ) -> Result<Vec<EmailSchedule>, SchedulerError> {
        let mut rows: Vec<EmailSchedule> = read_existing(&self.conn, contact_ids)?
            .into_values()
            .map(|s| {
                let mut schedule = s.schedule;
                schedule.id = Some(s.id);
                schedule
            })
            .collect();
        rows.sort_by(|a, b| a.natural_key().cmp(&b.natural_key()));
        Ok(rows)
    }
}

type NaturalKey = (i64, String, NaiveDate);

fn read_existing(
    conn: &Connection,
    contact_ids: &[i64],
) -> Result<HashMap<NaturalKey, StoredRow>, SchedulerError> {
    let mut existing = HashMap::new();

    for chunk in contact_ids.chunks(IN_CHUNK) {
        let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT id, contact_id, email_type, scheduled_date, scheduled_time, status,
                    skip_reason, priority, template_id, sms_template_id,
                    campaign_instance_id, event_year, event_month, event_day,
                    scheduler_run_id
             FROM email_schedules
             WHERE status IN ('pre-scheduled', 'skipped')
               AND contact_id IN ({})",
            placeholders.join(", ")
        );
        let params_vec: Vec<&dyn rusqlite::types::ToSql> =
            chunk.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_vec.as_slice())?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let Some(stored) = decode_stored(row)? else {
                tracing::warn!(row_id = id, "unreadable email_schedules row; leaving it alone");
                continue;
            };
            existing.insert(stored.schedule.natural_key(), stored);
        }
    }

    Ok(existing)
}

/// Decode a stored row into the domain model. Rows the scheduler cannot
/// interpret (hand-edited dates, unknown statuses) are surfaced as `None`.
fn decode_stored(row: &rusqlite::Row<'_>) -> Result<Option<StoredRow>, SchedulerError> {
    let id: i64 = row.get(0)?;
    let contact_id: i64 = row.get(1)?;
    let type_tag: String = row.get(2)?;
    let raw_date: String = row.get(3)?;
    let raw_time: String = row.get(4)?;
    let raw_status: String = row.get(5)?;
    let campaign_instance_id: Option<i64> = row.get(10)?;

    let (Some(scheduled_date), Some(scheduled_time), Some(status)) = (
        dates::parse_wire_date(&raw_date),
        dates::parse_wire_time(&raw_time),
        ScheduleStatus::parse(&raw_status),
    ) else {
        return Ok(None);
    };

    let event_anchor = match (
        row.get::<_, Option<i32>>(11)?,
        row.get::<_, Option<u32>>(12)?,
        row.get::<_, Option<u32>>(13)?,
    ) {
        (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
        _ => None,
    };

    Ok(Some(StoredRow {
        id,
        schedule: EmailSchedule {
            id: Some(id),
            contact_id,
            email_type: EmailType::decode(&type_tag, campaign_instance_id),
            scheduled_date,
            scheduled_time,
            status,
            skip_reason: row.get(6)?,
            priority: row.get(7)?,
            template_id: row.get(8)?,
            sms_template_id: row.get(9)?,
            campaign_instance_id,
            event_anchor,
            scheduler_run_id: row.get(14)?,
        },
    }))
}

/// Insert a fresh row. Returns 1 when the row landed, 0 when a delivery-state
/// row already holds the natural key.
fn insert_row(
    conn: &Connection,
    row: &EmailSchedule,
    run_id: &str,
    now: &str,
) -> Result<usize, SchedulerError> {
    let (event_year, event_month, event_day) = row.event_ymd();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO email_schedules
            (contact_id, email_type, scheduled_date, scheduled_time, status, skip_reason,
             priority, template_id, sms_template_id, campaign_instance_id,
             event_year, event_month, event_day, scheduler_run_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(contact_id, email_type, scheduled_date) DO NOTHING",
    )?;
    let changed = stmt.execute(params![
        row.contact_id,
        row.email_type.wire_tag(),
        dates::format_wire_date(row.scheduled_date),
        dates::format_wire_time(row.scheduled_time),
        row.status.wire_tag(),
        row.skip_reason,
        row.priority,
        row.template_id,
        row.sms_template_id,
        row.campaign_instance_id,
        event_year,
        event_month,
        event_day,
        run_id,
        now,
        now,
    ])?;
    Ok(changed)
}

fn update_row(
    conn: &Connection,
    id: i64,
    row: &EmailSchedule,
    run_id: &str,
    now: &str,
) -> Result<(), SchedulerError> {
    let (event_year, event_month, event_day) = row.event_ymd();
    let mut stmt = conn.prepare_cached(
        "UPDATE email_schedules SET
            scheduled_time = ?1,
            status = ?2,
            skip_reason = ?3,
            priority = ?4,
            template_id = ?5,
            sms_template_id = ?6,
            campaign_instance_id = ?7,
            event_year = ?8,
            event_month = ?9,
            event_day = ?10,
            scheduler_run_id = ?11,
            updated_at = ?12
         WHERE id = ?13",
    )?;
    stmt.execute(params![
        dates::format_wire_time(row.scheduled_time),
        row.status.wire_tag(),
        row.skip_reason,
        row.priority,
        row.template_id,
        row.sms_template_id,
        row.campaign_instance_id,
        event_year,
        event_month,
        event_day,
        run_id,
        now,
        id,
    ])?;
    Ok(())
}

fn delete_rows(conn: &Connection, ids: &[i64]) -> Result<(), SchedulerError> {
    for chunk in ids.chunks(IN_CHUNK) {
        let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "DELETE FROM email_schedules WHERE id IN ({})",
            placeholders.join(", ")
        );
        let params_vec: Vec<&dyn rusqlite::types::ToSql> =
            chunk.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
        conn.execute(&sql, params_vec.as_slice())?;
    }
    Ok(())
}
