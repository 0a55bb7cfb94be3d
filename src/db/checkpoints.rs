//! Scheduler run checkpoints: one audit row per run id.

use rusqlite::{params, Connection};

use super::{OrgDb, SchedulerError};

/// One row of `scheduler_checkpoints`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRow {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub contacts_processed: i64,
    pub emails_scheduled: i64,
    pub emails_skipped: i64,
    pub status: String,
}

impl CheckpointRow {
    pub fn started(run_id: &str, started_at: &str) -> CheckpointRow {
        CheckpointRow {
            run_id: run_id.to_string(),
            started_at: started_at.to_string(),
            finished_at: None,
            contacts_processed: 0,
            emails_scheduled: 0,
            emails_skipped: 0,
            status: "running".to_string(),
        }
    }
}

/// Insert or update the checkpoint row for its run id. Called inside each
/// batch transaction so progress is visible exactly as far as data is
/// committed.
pub(crate) fn upsert_checkpoint(
    conn: &Connection,
    row: &CheckpointRow,
) -> Result<(), SchedulerError> {
    conn.execute(
        "INSERT INTO scheduler_checkpoints
            (run_id, started_at, finished_at, contacts_processed, emails_scheduled,
             emails_skipped, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(run_id) DO UPDATE SET
            finished_at = excluded.finished_at,
            contacts_processed = excluded.contacts_processed,
            emails_scheduled = excluded.emails_scheduled,
            emails_skipped = excluded.emails_skipped,
            status = excluded.status",
        params![
            row.run_id,
            row.started_at,
            row.finished_at,
            row.contacts_processed,
            row.emails_scheduled,
            row.emails_skipped,
            row.status,
        ],
    )?;
    Ok(())
}

impl OrgDb {
    /// Write a checkpoint outside any batch (run start, final status).
    pub fn write_checkpoint(&self, row: &CheckpointRow) -> Result<(), SchedulerError> {
        upsert_checkpoint(&self.conn, row)
    }

    /// The most recently started checkpoint, if any.
    pub fn latest_checkpoint(&self) -> Result<Option<CheckpointRow>, SchedulerError> {
        self.checkpoint_query(
            "SELECT run_id, started_at, finished_at, contacts_processed, emails_scheduled,
                    emails_skipped, status
             FROM scheduler_checkpoints
             ORDER BY started_at DESC, run_id DESC
             LIMIT 1",
            rusqlite::params![],
        )
    }

    /// The checkpoint for a specific run id.
    pub fn checkpoint_for(&self, run_id: &str) -> Result<Option<CheckpointRow>, SchedulerError> {
        self.checkpoint_query(
            "SELECT run_id, started_at, finished_at, contacts_processed, emails_scheduled,
                    emails_skipped, status
             FROM scheduler_checkpoints
             WHERE run_id = ?1",
            rusqlite::params![run_id],
        )
    }

    fn checkpoint_query<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Option<CheckpointRow>, SchedulerError> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        match rows.next()? {
            Some(row) => Ok(Some(CheckpointRow {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                contacts_processed: row.get(3)?,
                emails_scheduled: row.get(4)?,
                emails_skipped: row.get(5)?,
                status: row.get(6)?,
            })),
            None => Ok(None),
        }
    }
}
