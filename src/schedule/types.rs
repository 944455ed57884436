/// Schedule record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cron schedule for one workflow
///
/// The aggregate owns its armed-job handle: the id of the delayed queue job
/// currently armed for it, if any. Keeping the handle on the record (rather
/// than in a parallel map) means schedule and job state can never drift.
/// Invariant: at most one active schedule per workflow id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub workflow_id: String,
    pub cron_expression: String,
    /// IANA timezone name; "UTC" when unspecified
    pub timezone: String,
    pub is_active: bool,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
    pub execution_count: i64,
    /// Stable id of the armed delayed job (`schedule-{id}`), if armed
    pub armed_job_id: Option<String>,
}

/// Partial update applied through the registry; untouched fields keep their
/// current values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleUpdate {
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
}
