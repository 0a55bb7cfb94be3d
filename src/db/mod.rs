//! SQLite access layer for the organization store.
//!
//! One `OrgDb` per run, single writer. WAL mode keeps concurrent readers
//! (the delivery worker) unblocked while batches commit; `synchronous=NORMAL`
//! is the durability/throughput tradeoff WAL is designed for. All writes go
//! through `with_immediate_tx` so a batch either commits whole or not at all.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::SchedulerError;
use crate::migrations;

pub mod campaigns;
pub mod checkpoints;
pub mod contacts;
pub mod org;
pub mod schedules;

pub use checkpoints::CheckpointRow;
pub use contacts::ContactBatch;
pub use schedules::DiffStats;

pub struct OrgDb {
    conn: Connection,
}

impl OrgDb {
    /// Open (or create) the organization store and bring its schema up to
    /// date.
    pub fn open(path: &Path) -> Result<Self, SchedulerError> {
        let conn = Connection::open(path)?;
        Self::configure(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, SchedulerError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, SchedulerError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a `BEGIN IMMEDIATE` transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_immediate_tx<F, T>(&self, f: F) -> Result<T, SchedulerError>
    where
        F: FnOnce(&Connection) -> Result<T, SchedulerError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&self.conn) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                // Preserve the original error even if rollback also fails.
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }
}

/// Chunk size for `IN (...)` parameter lists, comfortably under SQLite's
/// default host-parameter limit.
pub(crate) const IN_CHUNK: usize = 500;
