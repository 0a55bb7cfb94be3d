//! Organization configuration: layered resolution and size profiles.
//!
//! Resolution order (later layers win):
//!   hard-coded defaults → `organizations` row columns → `config_overrides`
//!   JSON blob → size-profile defaults for any load-balancer field no layer
//!   set explicitly.
//!
//! Validation happens once here, before any write; a bad config aborts the
//! run as `SchedulerError::Config`.

use std::collections::HashMap;

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;

use crate::dates;
use crate::error::SchedulerError;

/// Default business timezone when the organization row does not set one.
pub const DEFAULT_TIMEZONE: &str = "America/Chicago";

/// Default send time of day.
pub const DEFAULT_SEND_TIME: &str = "08:30:00";

/// Coarse organization size classes, keyed off contact count, selecting
/// load-balancer defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeProfile {
    Small,
    Medium,
    Large,
    Enterprise,
}

impl SizeProfile {
    pub fn from_contact_count(count: usize) -> SizeProfile {
        match count {
            0..=9_999 => SizeProfile::Small,
            10_000..=99_999 => SizeProfile::Medium,
            100_000..=499_999 => SizeProfile::Large,
            _ => SizeProfile::Enterprise,
        }
    }

    pub fn parse(s: &str) -> Option<SizeProfile> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Some(SizeProfile::Small),
            "medium" => Some(SizeProfile::Medium),
            "large" => Some(SizeProfile::Large),
            "enterprise" => Some(SizeProfile::Enterprise),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeProfile::Small => "small",
            SizeProfile::Medium => "medium",
            SizeProfile::Large => "large",
            SizeProfile::Enterprise => "enterprise",
        }
    }

    fn default_daily_cap_percentage(&self) -> f64 {
        match self {
            SizeProfile::Small => 0.10,
            SizeProfile::Medium | SizeProfile::Large => 0.07,
            SizeProfile::Enterprise => 0.05,
        }
    }

    fn default_ed_daily_soft_limit(&self) -> usize {
        match self {
            SizeProfile::Small => 50,
            SizeProfile::Medium => 200,
            SizeProfile::Large => 500,
            SizeProfile::Enterprise => 1_000,
        }
    }

    fn default_batch_size(&self) -> usize {
        match self {
            SizeProfile::Small => 1_000,
            SizeProfile::Medium => 5_000,
            SizeProfile::Large => 10_000,
            SizeProfile::Enterprise => 25_000,
        }
    }
}

/// Raw `organizations` row as read from the store. All nullable; `None`
/// falls through to the next layer.
#[derive(Debug, Clone, Default)]
pub struct OrgRow {
    pub timezone: Option<String>,
    pub send_time: Option<String>,
    pub birthday_days_before: Option<i64>,
    pub effective_date_days_before: Option<i64>,
    pub pre_window_exclusion_days: Option<i64>,
    pub effective_date_first_email_months: Option<i64>,
    pub enable_post_window_emails: Option<bool>,
    pub exclude_failed_underwriting: Option<bool>,
    pub send_without_zipcode_for_universal: Option<bool>,
    pub aep_as_campaign: Option<bool>,
    pub daily_send_percentage_cap: Option<f64>,
    pub ed_daily_soft_limit: Option<i64>,
    pub ed_smoothing_window_days: Option<i64>,
    pub catch_up_spread_days: Option<i64>,
    pub overage_threshold: Option<f64>,
    pub batch_size: Option<i64>,
    pub planning_horizon_days: Option<i64>,
    pub max_run_seconds: Option<i64>,
    pub size_profile: Option<String>,
    pub config_overrides: Option<String>,
}

/// The `config_overrides` JSON blob. Unknown keys are rejected so a typo'd
/// override fails loudly instead of silently doing nothing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub timezone: Option<String>,
    pub send_time: Option<String>,
    pub birthday_days_before: Option<i64>,
    pub effective_date_days_before: Option<i64>,
    pub pre_window_exclusion_days: Option<i64>,
    pub effective_date_first_email_months: Option<i64>,
    pub enable_post_window_emails: Option<bool>,
    pub exclude_failed_underwriting: Option<bool>,
    pub send_without_zipcode_for_universal: Option<bool>,
    pub aep_as_campaign: Option<bool>,
    /// Month/day pairs, e.g. `[[9, 15]]`.
    pub aep_dates: Option<Vec<(u32, u32)>>,
    pub daily_send_percentage_cap: Option<f64>,
    pub ed_daily_soft_limit: Option<i64>,
    pub ed_smoothing_window_days: Option<i64>,
    pub catch_up_spread_days: Option<i64>,
    pub overage_threshold: Option<f64>,
    pub batch_size: Option<i64>,
    pub planning_horizon_days: Option<i64>,
    pub max_run_seconds: Option<i64>,
    pub size_profile: Option<String>,
}

/// Fully resolved, validated configuration for one run.
#[derive(Debug, Clone)]
pub struct OrgConfig {
    pub timezone: Tz,
    pub send_time: NaiveTime,
    pub birthday_days_before: i64,
    pub effective_date_days_before: i64,
    pub pre_window_exclusion_days: i64,
    /// Per-state overrides of the pre-window buffer, keyed by state code.
    pub state_buffer_overrides: HashMap<String, i64>,
    pub effective_date_first_email_months: i64,
    pub enable_post_window_emails: bool,
    pub exclude_failed_underwriting_global: bool,
    pub send_without_zipcode_for_universal: bool,
    pub aep_as_campaign: bool,
    /// Month/day pairs scheduled once per contact per year.
    pub aep_dates: Vec<(u32, u32)>,
    pub daily_send_percentage_cap: f64,
    pub ed_daily_soft_limit: usize,
    pub ed_smoothing_window_days: i64,
    pub catch_up_spread_days: i64,
    pub overage_threshold: f64,
    pub batch_size: usize,
    pub planning_horizon_days: i64,
    pub max_run_seconds: Option<u64>,
    pub size_profile: SizeProfile,
}

impl OrgConfig {
    /// The pre-window buffer for a state, honoring per-state overrides.
    pub fn buffer_days_for_state(&self, state: &str) -> i64 {
        self.state_buffer_overrides
            .get(state)
            .copied()
            .unwrap_or(self.pre_window_exclusion_days)
    }

    /// Resolve the final configuration for a run.
    pub fn resolve(
        row: &OrgRow,
        state_buffers: HashMap<String, i64>,
        contact_count: usize,
    ) -> Result<OrgConfig, SchedulerError> {
        let overrides: ConfigOverrides = match row.config_overrides.as_deref() {
            Some(blob) if !blob.trim().is_empty() => serde_json::from_str(blob)
                .map_err(|e| SchedulerError::Config(format!("invalid config_overrides: {e}")))?,
            _ => ConfigOverrides::default(),
        };

        // Profile: explicit override > org row > auto-detect from count.
        let profile_name = overrides
            .size_profile
            .as_deref()
            .or(row.size_profile.as_deref());
        let size_profile = match profile_name {
            Some(name) => SizeProfile::parse(name).ok_or_else(|| {
                SchedulerError::Config(format!("unknown size_profile '{name}'"))
            })?,
            None => SizeProfile::from_contact_count(contact_count),
        };

        let tz_name = overrides
            .timezone
            .as_deref()
            .or(row.timezone.as_deref())
            .unwrap_or(DEFAULT_TIMEZONE);
        let timezone: Tz = tz_name
            .parse()
            .map_err(|_| SchedulerError::Config(format!("invalid timezone '{tz_name}'")))?;

        let time_str = overrides
            .send_time
            .as_deref()
            .or(row.send_time.as_deref())
            .unwrap_or(DEFAULT_SEND_TIME);
        let send_time = dates::parse_wire_time(time_str)
            .ok_or_else(|| SchedulerError::Config(format!("invalid send_time '{time_str}'")))?;

        let pick_i64 = |ov: Option<i64>, col: Option<i64>, default: i64| {
            ov.or(col).unwrap_or(default)
        };
        let pick_bool = |ov: Option<bool>, col: Option<bool>, default: bool| {
            ov.or(col).unwrap_or(default)
        };

        let birthday_days_before = pick_i64(overrides.birthday_days_before, row.birthday_days_before, 14);
        let effective_date_days_before = pick_i64(
            overrides.effective_date_days_before,
            row.effective_date_days_before,
            30,
        );
        let pre_window_exclusion_days = pick_i64(
            overrides.pre_window_exclusion_days,
            row.pre_window_exclusion_days,
            60,
        );
        // Out-of-range values clamp rather than abort: 11 is the statutory
        // floor, 35 the ceiling.
        let effective_date_first_email_months = pick_i64(
            overrides.effective_date_first_email_months,
            row.effective_date_first_email_months,
            11,
        )
        .clamp(11, 35);

        // Load-balancer fields: the profile default applies only when no
        // layer set the field.
        let daily_send_percentage_cap = overrides
            .daily_send_percentage_cap
            .or(row.daily_send_percentage_cap)
            .unwrap_or_else(|| size_profile.default_daily_cap_percentage());
        let ed_daily_soft_limit = overrides
            .ed_daily_soft_limit
            .or(row.ed_daily_soft_limit)
            .map(|v| v.max(0) as usize)
            .unwrap_or_else(|| size_profile.default_ed_daily_soft_limit());
        let batch_size = overrides
            .batch_size
            .or(row.batch_size)
            .map(|v| v.max(0) as usize)
            .unwrap_or_else(|| size_profile.default_batch_size());

        let ed_smoothing_window_days = pick_i64(
            overrides.ed_smoothing_window_days,
            row.ed_smoothing_window_days,
            5,
        );
        let catch_up_spread_days =
            pick_i64(overrides.catch_up_spread_days, row.catch_up_spread_days, 7);
        let overage_threshold = overrides
            .overage_threshold
            .or(row.overage_threshold)
            .unwrap_or(1.20);
        let planning_horizon_days = pick_i64(
            overrides.planning_horizon_days,
            row.planning_horizon_days,
            90,
        );
        let max_run_seconds = overrides
            .max_run_seconds
            .or(row.max_run_seconds)
            .filter(|&v| v > 0)
            .map(|v| v as u64);

        let aep_dates = overrides.aep_dates.clone().unwrap_or_else(|| vec![(9, 15)]);

        let config = OrgConfig {
            timezone,
            send_time,
            birthday_days_before,
            effective_date_days_before,
            pre_window_exclusion_days,
            state_buffer_overrides: state_buffers,
            effective_date_first_email_months,
            enable_post_window_emails: pick_bool(
                overrides.enable_post_window_emails,
                row.enable_post_window_emails,
                true,
            ),
            exclude_failed_underwriting_global: pick_bool(
                overrides.exclude_failed_underwriting,
                row.exclude_failed_underwriting,
                false,
            ),
            send_without_zipcode_for_universal: pick_bool(
                overrides.send_without_zipcode_for_universal,
                row.send_without_zipcode_for_universal,
                false,
            ),
            aep_as_campaign: pick_bool(overrides.aep_as_campaign, row.aep_as_campaign, false),
            aep_dates,
            daily_send_percentage_cap,
            ed_daily_soft_limit,
            ed_smoothing_window_days,
            catch_up_spread_days,
            overage_threshold,
            batch_size,
            planning_horizon_days,
            max_run_seconds,
            size_profile,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        let err = |msg: String| Err(SchedulerError::Config(msg));

        if !(self.daily_send_percentage_cap > 0.0 && self.daily_send_percentage_cap <= 1.0) {
            return err(format!(
                "daily_send_percentage_cap must be in (0, 1], got {}",
                self.daily_send_percentage_cap
            ));
        }
        if self.overage_threshold < 1.0 {
            return err(format!(
                "overage_threshold must be >= 1.0, got {}",
                self.overage_threshold
            ));
        }
        for (name, value) in [
            ("birthday_days_before", self.birthday_days_before),
            ("effective_date_days_before", self.effective_date_days_before),
            ("pre_window_exclusion_days", self.pre_window_exclusion_days),
        ] {
            if !(0..=366).contains(&value) {
                return err(format!("{name} must be in [0, 366], got {value}"));
            }
        }
        for (name, value) in [
            ("ed_smoothing_window_days", self.ed_smoothing_window_days),
            ("catch_up_spread_days", self.catch_up_spread_days),
            ("planning_horizon_days", self.planning_horizon_days),
        ] {
            if !(1..=366).contains(&value) {
                return err(format!("{name} must be in [1, 366], got {value}"));
            }
        }
        for (state, buffer) in &self.state_buffer_overrides {
            if !(0..=366).contains(buffer) {
                return err(format!(
                    "state buffer for {state} must be in [0, 366], got {buffer}"
                ));
            }
        }
        if self.batch_size == 0 {
            return err("batch_size must be positive".to_string());
        }
        if self.aep_dates.is_empty() {
            return err("aep_dates must not be empty".to_string());
        }
        for &(month, day) in &self.aep_dates {
            // Validate against a leap year so (2, 29) is representable.
            if chrono::NaiveDate::from_ymd_opt(2024, month, day).is_none() {
                return err(format!("invalid AEP date {month:02}-{day:02}"));
            }
        }
        Ok(())
    }
}
