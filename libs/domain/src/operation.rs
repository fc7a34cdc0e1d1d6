//! Operation scheduling and execution types.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use fleet_configuration::Configuration;
use fleet_id::{HistoryId, ResourceId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Status of an operation history entry. Everything but `InProgress` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    #[serde(rename = "INPROGRESS")]
    InProgress,
    Success,
    Failure,
    Canceled,
    TimedOut,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::InProgress => "INPROGRESS",
            OperationStatus::Success => "SUCCESS",
            OperationStatus::Failure => "FAILURE",
            OperationStatus::Canceled => "CANCELED",
            OperationStatus::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

const JOB_ID_SEPARATOR: &str = "_|_";

/// Correlation key of one scheduled operation run.
///
/// The creation time is kept at millisecond precision so the key survives a
/// round trip through its string form unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct JobId {
    pub job_name: String,
    pub job_group: String,
    pub created_at: DateTime<Utc>,
}

impl JobId {
    pub fn new(job_name: impl Into<String>, job_group: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let millis = created_at.timestamp_millis();
        Self {
            job_name: job_name.into(),
            job_group: job_group.into(),
            created_at: Utc.timestamp_millis_opt(millis).single().unwrap_or(created_at),
        }
    }

    /// Mints a key for a run starting now.
    pub fn now(job_name: impl Into<String>, job_group: impl Into<String>) -> Self {
        Self::new(job_name, job_group, Utc::now())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{JOB_ID_SEPARATOR}{}{JOB_ID_SEPARATOR}{}",
            self.job_name,
            self.job_group,
            self.created_at.timestamp_millis()
        )
    }
}

impl FromStr for JobId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::InvalidJobId(s.to_string());
        let mut parts = s.split(JOB_ID_SEPARATOR);
        let (Some(name), Some(group), Some(millis), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        let millis: i64 = millis.parse().map_err(|_| invalid())?;
        let created_at = Utc.timestamp_millis_opt(millis).single().ok_or_else(invalid)?;
        Ok(Self::new(name, group, created_at))
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for JobId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Asks an agent to run an operation against one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInvocation {
    pub history_id: HistoryId,
    pub job_id: JobId,
    pub resource_id: ResourceId,
    pub operation: String,
    #[serde(default)]
    pub parameters: Configuration,
    pub timeout_secs: u64,
}

impl OperationInvocation {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Outcome of an invocation as reported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReport {
    pub history_id: HistoryId,
    pub job_id: JobId,
    pub resource_id: ResourceId,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Configuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Where an invocation was when a cancel request reached the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Waiting behind another operation on the same resource; it will not run.
    Queued,
    /// Running; it was interrupted.
    Running,
    /// Already completed before the cancel arrived.
    Finished,
    /// The agent has no record of the job.
    Unknown,
}
