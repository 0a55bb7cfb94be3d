//! Organization configuration reads.

use std::collections::HashMap;

use super::{OrgDb, SchedulerError};
use crate::config::OrgRow;

impl OrgDb {
    /// Read the organization row. A store without one runs entirely on
    /// defaults, which is how fresh organizations bootstrap.
    pub fn load_org_row(&self) -> Result<OrgRow, SchedulerError> {
        let mut stmt = self.conn.prepare(
            "SELECT timezone, send_time, birthday_days_before, effective_date_days_before,
                    pre_window_exclusion_days, effective_date_first_email_months,
                    enable_post_window_emails, exclude_failed_underwriting,
                    send_without_zipcode_for_universal, aep_as_campaign,
                    daily_send_percentage_cap, ed_daily_soft_limit, ed_smoothing_window_days,
                    catch_up_spread_days, overage_threshold, batch_size,
                    planning_horizon_days, max_run_seconds, size_profile, config_overrides
             FROM organizations
             ORDER BY id
             LIMIT 1",
        )?;

        let as_bool = |v: Option<i64>| v.map(|n| n != 0);
        let mut rows = stmt.query([])?;
        let Some(row) = rows.next()? else {
            tracing::warn!("no organizations row; running on default configuration");
            return Ok(OrgRow::default());
        };

        Ok(OrgRow {
            timezone: row.get(0)?,
            send_time: row.get(1)?,
            birthday_days_before: row.get(2)?,
            effective_date_days_before: row.get(3)?,
            pre_window_exclusion_days: row.get(4)?,
            effective_date_first_email_months: row.get(5)?,
            enable_post_window_emails: as_bool(row.get(6)?),
            exclude_failed_underwriting: as_bool(row.get(7)?),
            send_without_zipcode_for_universal: as_bool(row.get(8)?),
            aep_as_campaign: as_bool(row.get(9)?),
            daily_send_percentage_cap: row.get(10)?,
            ed_daily_soft_limit: row.get(11)?,
            ed_smoothing_window_days: row.get(12)?,
            catch_up_spread_days: row.get(13)?,
            overage_threshold: row.get(14)?,
            batch_size: row.get(15)?,
            planning_horizon_days: row.get(16)?,
            max_run_seconds: row.get(17)?,
            size_profile: row.get(18)?,
            config_overrides: row.get(19)?,
        })
    }

    /// Per-state pre-window buffer overrides, keyed by upper-cased state code.
    pub fn load_state_buffers(&self) -> Result<HashMap<String, i64>, SchedulerError> {
        let mut stmt = self.conn.prepare(
            "SELECT state_code, pre_exclusion_buffer_days FROM organization_state_buffers",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut buffers = HashMap::new();
        for row in rows {
            let (state, days) = row?;
            buffers.insert(state.trim().to_ascii_uppercase(), days);
        }
        Ok(buffers)
    }
}
