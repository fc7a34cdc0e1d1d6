//! Operation history entries.
//!
//! An entry's identity (id, job key, target, operation, parameters and
//! creation time) never changes. Everything that does change lives in one
//! [`HistoryState`] value that is swapped atomically, so a reader always sees
//! a status together with the `modified_at` it was published with, and
//! computing a duration never takes a lock.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use fleet_configuration::Configuration;
use fleet_domain::{JobId, OperationDefinition, OperationStatus};
use fleet_id::{GroupId, HistoryId, ResourceId};
use serde::Serialize;

/// The resource an individual entry runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceTarget {
    pub resource_id: ResourceId,
    /// Used in group failure messages.
    pub resource_name: String,
}

impl ResourceTarget {
    pub fn new(resource_id: ResourceId, resource_name: impl Into<String>) -> Self {
        Self {
            resource_id,
            resource_name: resource_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum HistoryScope {
    Resource {
        target: ResourceTarget,
        /// The group entry this run belongs to, if any.
        group: Option<HistoryId>,
    },
    Group {
        group_id: GroupId,
        group_name: String,
    },
}

/// The mutable part of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryState {
    pub status: OperationStatus,
    pub modified_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub results: Option<Configuration>,
}

pub struct OperationHistory {
    id: HistoryId,
    job_id: JobId,
    scope: HistoryScope,
    operation: OperationDefinition,
    parameters: Configuration,
    created_at: DateTime<Utc>,
    state: ArcSwap<HistoryState>,
}

impl OperationHistory {
    pub(crate) fn new(
        job_id: JobId,
        scope: HistoryScope,
        operation: OperationDefinition,
        parameters: Configuration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: HistoryId::new(),
            job_id,
            scope,
            operation,
            parameters,
            created_at,
            state: ArcSwap::from_pointee(HistoryState {
                status: OperationStatus::InProgress,
                modified_at: created_at,
                error_message: None,
                results: None,
            }),
        }
    }

    pub fn id(&self) -> HistoryId {
        self.id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn scope(&self) -> &HistoryScope {
        &self.scope
    }

    pub fn is_group(&self) -> bool {
        matches!(self.scope, HistoryScope::Group { .. })
    }

    /// The owning group entry of an individual run.
    pub fn group_history_id(&self) -> Option<HistoryId> {
        match &self.scope {
            HistoryScope::Resource { group, .. } => *group,
            HistoryScope::Group { .. } => None,
        }
    }

    pub fn target(&self) -> Option<&ResourceTarget> {
        match &self.scope {
            HistoryScope::Resource { target, .. } => Some(target),
            HistoryScope::Group { .. } => None,
        }
    }

    pub fn operation(&self) -> &OperationDefinition {
        &self.operation
    }

    pub fn parameters(&self) -> &Configuration {
        &self.parameters
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The current state as one consistent value.
    pub fn state(&self) -> Arc<HistoryState> {
        self.state.load_full()
    }

    pub fn status(&self) -> OperationStatus {
        self.state.load().status
    }

    pub fn is_in_progress(&self) -> bool {
        !self.status().is_terminal()
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.state.load().modified_at
    }

    pub fn error_message(&self) -> Option<String> {
        self.state.load().error_message.clone()
    }

    pub fn results(&self) -> Option<Configuration> {
        self.state.load().results.clone()
    }

    /// Time spent so far while in progress; the final run time once terminal.
    pub fn duration(&self) -> Duration {
        self.duration_at(Utc::now())
    }

    /// [`duration`](Self::duration) as seen at `now`.
    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        let state = self.state.load();
        let end = if state.status.is_terminal() {
            state.modified_at
        } else {
            now
        };
        (end - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            id: self.id,
            job_id: self.job_id.clone(),
            scope: self.scope.clone(),
            operation: self.operation.name.clone(),
            created_at: self.created_at,
            duration_ms: self.duration().as_millis() as u64,
            state: (*self.state()).clone(),
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    pub(crate) fn succeed(&self, results: Option<Configuration>) -> Result<(), OperationStatus> {
        self.finish(OperationStatus::Success, None, results)
    }

    /// Any error message makes the entry a failure and discards results.
    pub(crate) fn fail(&self, message: impl Into<String>) -> Result<(), OperationStatus> {
        self.finish(OperationStatus::Failure, Some(message.into()), None)
    }

    pub(crate) fn cancel(&self, message: Option<String>) -> Result<(), OperationStatus> {
        self.finish(OperationStatus::Canceled, message, None)
    }

    pub(crate) fn time_out(&self, message: impl Into<String>) -> Result<(), OperationStatus> {
        self.finish(OperationStatus::TimedOut, Some(message.into()), None)
    }

    /// Sets a terminal status directly. An error message forces `Failure`.
    pub(crate) fn set_status(
        &self,
        status: OperationStatus,
        error_message: Option<String>,
    ) -> Result<(), OperationStatus> {
        match error_message {
            Some(message) => self.fail(message),
            None => self.finish(status, None, None),
        }
    }

    /// Publishes a terminal state. Only an in-progress entry moves; the
    /// current status is returned otherwise.
    fn finish(
        &self,
        status: OperationStatus,
        error_message: Option<String>,
        results: Option<Configuration>,
    ) -> Result<(), OperationStatus> {
        let current = self.state.load();
        if current.status.is_terminal() {
            return Err(current.status);
        }
        let next = Arc::new(HistoryState {
            status,
            modified_at: Utc::now().max(self.created_at),
            error_message,
            results,
        });
        let previous = self.state.compare_and_swap(&current, next);
        if Arc::ptr_eq(&*previous, &*current) {
            Ok(())
        } else {
            Err(previous.status)
        }
    }
}

impl std::fmt::Debug for OperationHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHistory")
            .field("id", &self.id)
            .field("job_id", &self.job_id.to_string())
            .field("operation", &self.operation.name)
            .field("status", &self.status())
            .finish()
    }
}

/// A serializable copy of an entry at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct HistorySnapshot {
    pub id: HistoryId,
    pub job_id: JobId,
    #[serde(flatten)]
    pub scope: HistoryScope,
    pub operation: String,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub state: HistoryState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> OperationHistory {
        OperationHistory::new(
            JobId::now("restart", "test"),
            HistoryScope::Resource {
                target: ResourceTarget::new(ResourceId::new(1), "db"),
                group: None,
            },
            OperationDefinition::new("restart"),
            Configuration::new(),
        )
    }

    #[test]
    fn test_new_entry_in_progress() {
        let h = entry();
        assert_eq!(h.status(), OperationStatus::InProgress);
        assert_eq!(h.modified_at(), h.created_at());
        assert!(h.results().is_none());
    }

    #[test]
    fn test_success_only_from_in_progress() {
        let h = entry();
        h.fail("boom").unwrap();
        let err = h.succeed(Some(Configuration::new().with_simple("k", "v"))).unwrap_err();
        assert_eq!(err, OperationStatus::Failure);
        assert!(h.results().is_none());
        assert_eq!(h.error_message().as_deref(), Some("boom"));
    }

    #[test]
    fn test_terminal_state_is_published_with_modified_time() {
        let h = entry();
        h.succeed(Some(Configuration::new().with_simple("k", "v"))).unwrap();
        let state = h.state();
        assert_eq!(state.status, OperationStatus::Success);
        assert!(state.modified_at >= h.created_at());
        assert_eq!(state.results.as_ref().and_then(|r| r.simple_value("k")), Some("v"));
    }

    #[test]
    fn test_duration_frozen_when_terminal() {
        let h = entry();
        h.cancel(None).unwrap();
        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(h.duration_at(later), h.duration());
        assert!(h.duration_at(later) < Duration::from_secs(60));
    }

    #[test]
    fn test_duration_grows_in_progress() {
        let h = entry();
        let later = h.created_at() + chrono::Duration::seconds(90);
        assert_eq!(h.duration_at(later), Duration::from_secs(90));
    }

    #[test]
    fn test_snapshot_shape() {
        let h = entry();
        h.time_out("too slow").unwrap();
        let json = serde_json::to_value(h.snapshot()).unwrap();
        assert_eq!(json["status"], "TIMED_OUT");
        assert_eq!(json["scope"], "resource");
        assert_eq!(json["error_message"], "too slow");
        assert_eq!(json["target"]["resource_name"], "db");
    }
}
