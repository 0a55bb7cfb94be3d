//! Contact reads: counting and keyset-paginated batches.

use rusqlite::params;

use super::{OrgDb, SchedulerError};
use crate::dates;
use crate::error::Diagnostic;
use crate::types::{Contact, StateCode};

/// One page of contacts, plus per-row problems and the pagination cursor.
#[derive(Debug, Default)]
pub struct ContactBatch {
    pub contacts: Vec<Contact>,
    pub diagnostics: Vec<Diagnostic>,
    /// Highest raw row id seen, including rows that failed validation.
    /// `None` when the table is exhausted.
    pub last_id: Option<i64>,
}

impl OrgDb {
    pub fn count_contacts(&self) -> Result<usize, SchedulerError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    /// Fetch up to `limit` contacts with id greater than `last_id`, in id
    /// order. Rows with malformed data come back as diagnostics, not
    /// contacts; the run continues without them.
    pub fn fetch_contacts_after(
        &self,
        last_id: i64,
        limit: usize,
    ) -> Result<ContactBatch, SchedulerError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, email, zip_code, state, birth_date, effective_date, carrier,
                    failed_underwriting
             FROM contacts
             WHERE id > ?1
             ORDER BY id
             LIMIT ?2",
        )?;

        let mut batch = ContactBatch::default();
        let mut rows = stmt.query(params![last_id, limit as i64])?;

        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            batch.last_id = Some(id);

            let email: String = row.get::<_, Option<String>>(1)?.unwrap_or_default();
            if email.trim().is_empty() {
                batch
                    .diagnostics
                    .push(Diagnostic::new(id, "contact has no email address"));
                continue;
            }

            let birthday = match parse_optional_date(row.get::<_, Option<String>>(4)?) {
                Ok(d) => d,
                Err(raw) => {
                    batch
                        .diagnostics
                        .push(Diagnostic::new(id, format!("malformed birth_date '{raw}'")));
                    continue;
                }
            };
            let effective_date = match parse_optional_date(row.get::<_, Option<String>>(5)?) {
                Ok(d) => d,
                Err(raw) => {
                    batch.diagnostics.push(Diagnostic::new(
                        id,
                        format!("malformed effective_date '{raw}'"),
                    ));
                    continue;
                }
            };

            let state = row
                .get::<_, Option<String>>(3)?
                .as_deref()
                .and_then(StateCode::parse);
            let zip_code = row
                .get::<_, Option<String>>(2)?
                .filter(|z| !z.trim().is_empty());
            let carrier = row
                .get::<_, Option<String>>(6)?
                .filter(|c| !c.trim().is_empty());
            let failed_underwriting = row.get::<_, i64>(7)? != 0;

            batch.contacts.push(Contact {
                id,
                email,
                zip_code,
                state,
                birthday,
                effective_date,
                carrier,
                failed_underwriting,
            });
        }

        Ok(batch)
    }
}

/// NULL and empty strings are "no date"; anything else must parse.
fn parse_optional_date(
    raw: Option<String>,
) -> Result<Option<chrono::NaiveDate>, String> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => match dates::parse_wire_date(&s) {
            Some(d) => Ok(Some(d)),
            None => Err(s),
        },
    }
}
