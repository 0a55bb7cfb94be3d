//! Domain model for the scheduling core.
//!
//! Pure, immutable values. Contacts and campaign definitions are read-only
//! inputs owned by the organization store; `EmailSchedule` rows are the
//! core's output. Schedule equality for the smart diff is `content_key()`,
//! which deliberately excludes surrogate ids, run ids, and timestamps.

use chrono::{Datelike, NaiveDate, NaiveTime};

use crate::dates;

/// Priorities for anniversary kinds (lower = higher precedence). Campaign
/// priority comes from its type row.
pub const PRIORITY_BIRTHDAY: i32 = 10;
pub const PRIORITY_EFFECTIVE_DATE: i32 = 20;
pub const PRIORITY_AEP: i32 = 30;
pub const PRIORITY_POST_WINDOW: i32 = 40;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// A US state as far as exclusion policy cares: the regulated states are
/// closed variants, everything else is `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateCode {
    Ca,
    Ct,
    Id,
    Ky,
    Ma,
    Md,
    Mo,
    Nv,
    Ny,
    Ok,
    Or,
    Va,
    Wa,
    Other(String),
}

impl StateCode {
    /// Parse a two-letter code, case-insensitively. Empty input is `None`.
    pub fn parse(s: &str) -> Option<StateCode> {
        let code = s.trim().to_ascii_uppercase();
        if code.is_empty() {
            return None;
        }
        Some(match code.as_str() {
            "CA" => StateCode::Ca,
            "CT" => StateCode::Ct,
            "ID" => StateCode::Id,
            "KY" => StateCode::Ky,
            "MA" => StateCode::Ma,
            "MD" => StateCode::Md,
            "MO" => StateCode::Mo,
            "NV" => StateCode::Nv,
            "NY" => StateCode::Ny,
            "OK" => StateCode::Ok,
            "OR" => StateCode::Or,
            "VA" => StateCode::Va,
            "WA" => StateCode::Wa,
            _ => StateCode::Other(code),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            StateCode::Ca => "CA",
            StateCode::Ct => "CT",
            StateCode::Id => "ID",
            StateCode::Ky => "KY",
            StateCode::Ma => "MA",
            StateCode::Md => "MD",
            StateCode::Mo => "MO",
            StateCode::Nv => "NV",
            StateCode::Ny => "NY",
            StateCode::Ok => "OK",
            StateCode::Or => "OR",
            StateCode::Va => "VA",
            StateCode::Wa => "WA",
            StateCode::Other(code) => code,
        }
    }
}

impl std::fmt::Display for StateCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

/// A contact row. Read-only input to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: i64,
    pub email: String,
    pub zip_code: Option<String>,
    pub state: Option<StateCode>,
    pub birthday: Option<NaiveDate>,
    pub effective_date: Option<NaiveDate>,
    pub carrier: Option<String>,
    pub failed_underwriting: bool,
}

impl Contact {
    /// Sendable contacts have a non-empty email address.
    pub fn is_sendable(&self) -> bool {
        !self.email.trim().is_empty()
    }

    /// Whether we know where this contact lives (state or at least a zip).
    pub fn has_location(&self) -> bool {
        self.state.is_some() || self.zip_code.as_deref().is_some_and(|z| !z.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Email types and statuses
// ---------------------------------------------------------------------------

/// The kind of a scheduled email.
///
/// The wire keeps a plain string tag for interoperability; the
/// `campaign_instance_id` column disambiguates campaign rows from
/// anniversary/followup rows whose tag happens to collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EmailType {
    Birthday,
    EffectiveDate,
    Aep,
    PostWindow,
    Campaign { type_name: String, instance_id: i64 },
    /// Declared for wire decode compatibility; the core never emits it.
    Followup(String),
}

impl EmailType {
    pub fn wire_tag(&self) -> &str {
        match self {
            EmailType::Birthday => "birthday",
            EmailType::EffectiveDate => "effective_date",
            EmailType::Aep => "aep",
            EmailType::PostWindow => "post_window",
            EmailType::Campaign { type_name, .. } => type_name,
            EmailType::Followup(subtype) => subtype,
        }
    }

    /// Decode a wire tag. A non-null `campaign_instance_id` marks a campaign
    /// row regardless of the tag string.
    pub fn decode(tag: &str, campaign_instance_id: Option<i64>) -> EmailType {
        if let Some(instance_id) = campaign_instance_id {
            return EmailType::Campaign {
                type_name: tag.to_string(),
                instance_id,
            };
        }
        match tag {
            "birthday" => EmailType::Birthday,
            "effective_date" => EmailType::EffectiveDate,
            "aep" => EmailType::Aep,
            "post_window" => EmailType::PostWindow,
            other => EmailType::Followup(other.to_string()),
        }
    }

    pub fn is_anniversary(&self) -> bool {
        matches!(
            self,
            EmailType::Birthday | EmailType::EffectiveDate | EmailType::Aep | EmailType::PostWindow
        )
    }

    pub fn instance_id(&self) -> Option<i64> {
        match self {
            EmailType::Campaign { instance_id, .. } => Some(*instance_id),
            _ => None,
        }
    }
}

/// Schedule row status. The core only ever writes the first two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleStatus {
    PreScheduled,
    Skipped,
    Sent,
    Failed,
}

impl ScheduleStatus {
    pub fn wire_tag(&self) -> &'static str {
        match self {
            ScheduleStatus::PreScheduled => "pre-scheduled",
            ScheduleStatus::Skipped => "skipped",
            ScheduleStatus::Sent => "sent",
            ScheduleStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<ScheduleStatus> {
        match s {
            "pre-scheduled" => Some(ScheduleStatus::PreScheduled),
            "skipped" => Some(ScheduleStatus::Skipped),
            "sent" => Some(ScheduleStatus::Sent),
            "failed" => Some(ScheduleStatus::Failed),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Campaign definitions
// ---------------------------------------------------------------------------

/// A campaign type: the behavioral template shared by its instances.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignType {
    pub name: String,
    pub priority: i32,
    pub active: bool,
    pub respects_exclusion_windows: bool,
    pub enable_followups: bool,
    pub days_before_event: i64,
    pub target_all_contacts: bool,
    pub spread_evenly: bool,
    pub skip_failed_underwriting: bool,
}

/// Targeting parsed from the `target_states` / `target_carriers` columns.
/// `NULL` and the literal `ALL` both mean unrestricted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targeting {
    All,
    OneOf(Vec<String>),
}

impl Targeting {
    pub fn parse(raw: Option<&str>) -> Targeting {
        match raw.map(str::trim) {
            None | Some("") => Targeting::All,
            Some(s) if s.eq_ignore_ascii_case("ALL") => Targeting::All,
            Some(s) => Targeting::OneOf(
                s.split(',')
                    .map(|p| p.trim().to_ascii_uppercase())
                    .filter(|p| !p.is_empty())
                    .collect(),
            ),
        }
    }

    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            Targeting::All => true,
            Targeting::OneOf(allowed) => match value {
                Some(v) => allowed.iter().any(|a| a.eq_ignore_ascii_case(v.trim())),
                None => false,
            },
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Targeting::All)
    }
}

/// A configured campaign instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignInstance {
    pub id: i64,
    pub campaign_type: String,
    pub instance_name: String,
    pub email_template: Option<String>,
    pub sms_template: Option<String>,
    pub active_start_date: Option<NaiveDate>,
    pub active_end_date: Option<NaiveDate>,
    pub spread_start_date: Option<NaiveDate>,
    pub spread_end_date: Option<NaiveDate>,
    pub target_states: Targeting,
    pub target_carriers: Targeting,
    /// Opaque; passed through untouched.
    pub metadata: Option<serde_json::Value>,
}

impl CampaignInstance {
    /// Instance visibility: today within [active_start, active_end]; an
    /// unset bound is open.
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        if let Some(start) = self.active_start_date {
            if today < start {
                return false;
            }
        }
        if let Some(end) = self.active_end_date {
            if today > end {
                return false;
            }
        }
        true
    }
}

/// Enrollment status for a (contact, campaign instance) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStatus {
    Pending,
    Active,
    Completed,
    Skipped,
}

impl EnrollmentStatus {
    pub fn parse(s: &str) -> Option<EnrollmentStatus> {
        match s {
            "pending" => Some(EnrollmentStatus::Pending),
            "active" => Some(EnrollmentStatus::Active),
            "completed" => Some(EnrollmentStatus::Completed),
            "skipped" => Some(EnrollmentStatus::Skipped),
            _ => None,
        }
    }

    /// Only pending/active enrollments produce sends.
    pub fn is_eligible(&self) -> bool {
        matches!(self, EnrollmentStatus::Pending | EnrollmentStatus::Active)
    }
}

/// A contact's enrollment in a campaign instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactCampaign {
    pub contact_id: i64,
    pub campaign_instance_id: i64,
    pub trigger_date: Option<NaiveDate>,
    pub status: EnrollmentStatus,
}

// ---------------------------------------------------------------------------
// Candidates (pre-persistence pipeline unit)
// ---------------------------------------------------------------------------

/// Outcome of the exclusion filter for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    PreScheduled,
    Skipped(String),
}

/// A proposed (contact, kind, date) send flowing through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub contact_id: i64,
    pub email_type: EmailType,
    pub date: NaiveDate,
    pub priority: i32,
    pub template_id: Option<String>,
    pub sms_template_id: Option<String>,
    pub campaign_instance_id: Option<i64>,
    /// The anchoring anniversary or trigger date, kept for audit.
    pub event_anchor: Option<NaiveDate>,
    pub respects_exclusions: bool,
    pub disposition: Disposition,
}

impl Candidate {
    pub fn is_pre_scheduled(&self) -> bool {
        self.disposition == Disposition::PreScheduled
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match &self.disposition {
            Disposition::Skipped(reason) => Some(reason),
            Disposition::PreScheduled => None,
        }
    }

    /// Natural identity within one run's output.
    pub fn natural_key(&self) -> (i64, String, NaiveDate) {
        (
            self.contact_id,
            self.email_type.wire_tag().to_string(),
            self.date,
        )
    }
}

// ---------------------------------------------------------------------------
// Email schedules (the output entity)
// ---------------------------------------------------------------------------

/// One row of `email_schedules`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailSchedule {
    /// Surrogate id; `None` before first persistence.
    pub id: Option<i64>,
    pub contact_id: i64,
    pub email_type: EmailType,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub status: ScheduleStatus,
    pub skip_reason: Option<String>,
    pub priority: i32,
    pub template_id: Option<String>,
    pub sms_template_id: Option<String>,
    pub campaign_instance_id: Option<i64>,
    pub event_anchor: Option<NaiveDate>,
    pub scheduler_run_id: Option<String>,
}

/// The content identity used by the smart diff. Excludes the surrogate id,
/// run id, event anchor, and timestamps — a row whose key is unchanged keeps
/// its stored identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub contact_id: i64,
    pub email_type_tag: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub status: ScheduleStatus,
    pub skip_reason: Option<String>,
    pub priority: i32,
    pub template_id: Option<String>,
    pub campaign_instance_id: Option<i64>,
}

impl EmailSchedule {
    pub fn natural_key(&self) -> (i64, String, NaiveDate) {
        (
            self.contact_id,
            self.email_type.wire_tag().to_string(),
            self.scheduled_date,
        )
    }

    pub fn content_key(&self) -> ContentKey {
        ContentKey {
            contact_id: self.contact_id,
            email_type_tag: self.email_type.wire_tag().to_string(),
            scheduled_date: self.scheduled_date,
            scheduled_time: self.scheduled_time,
            status: self.status,
            skip_reason: self.skip_reason.clone(),
            priority: self.priority,
            template_id: self.template_id.clone(),
            campaign_instance_id: self.campaign_instance_id,
        }
    }

    /// Audit columns derived from the anchor.
    pub fn event_ymd(&self) -> (Option<i32>, Option<u32>, Option<u32>) {
        match self.event_anchor {
            Some(d) => (Some(d.year()), Some(d.month()), Some(d.day())),
            None => (None, None, None),
        }
    }

    /// Materialize a candidate into a persistable row.
    pub fn from_candidate(candidate: &Candidate, send_time: NaiveTime) -> EmailSchedule {
        let (status, skip_reason) = match &candidate.disposition {
            Disposition::PreScheduled => (ScheduleStatus::PreScheduled, None),
            Disposition::Skipped(reason) => (ScheduleStatus::Skipped, Some(reason.clone())),
        };
        EmailSchedule {
            id: None,
            contact_id: candidate.contact_id,
            email_type: candidate.email_type.clone(),
            scheduled_date: candidate.date,
            scheduled_time: send_time,
            status,
            skip_reason,
            priority: candidate.priority,
            template_id: candidate.template_id.clone(),
            sms_template_id: candidate.sms_template_id.clone(),
            campaign_instance_id: candidate.campaign_instance_id,
            event_anchor: candidate.event_anchor,
            scheduler_run_id: None,
        }
    }
}

impl std::fmt::Display for EmailSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} ({})",
            self.contact_id,
            self.email_type.wire_tag(),
            dates::format_wire_date(self.scheduled_date),
            self.status.wire_tag()
        )
    }
}
