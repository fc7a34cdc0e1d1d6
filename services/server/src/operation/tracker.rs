//! The operation history table.
//!
//! Every write, whether a status transition, a creation or a delete, happens
//! under the tracker's write lock, so each entry has exactly one writer at a
//! time. Readers holding an `Arc<OperationHistory>` never need the lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_configuration::Configuration;
use fleet_domain::{JobId, OperationDefinition, OperationStatus};
use fleet_id::{GroupId, HistoryId};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::error::TrackerError;
use super::history::{HistoryScope, OperationHistory, ResourceTarget};

/// Name of the invocation parameter that overrides an operation's timeout, in seconds.
pub const TIMEOUT_PARAMETER: &str = "timeout";

const GROUP_FAILURE_PREFIX: &str = "The following resources failed to invoke the operation: ";

const GROUP_TIMEOUT_MESSAGE: &str = "This group operation timed out before all child resource \
     operations could complete normally, those still in progress will attempt to be canceled.";

const GROUP_CANCEL_MESSAGE: &str = "Canceled along with its group operation";

/// What a scheduler hands the tracker for a new run.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub job_id: JobId,
    pub operation: OperationDefinition,
    pub parameters: Configuration,
}

/// What one timeout sweep changed.
#[derive(Debug, Default)]
pub struct TimeoutSweep {
    /// Individual entries moved to `TimedOut`.
    pub timed_out: Vec<HistoryId>,
    /// Groups failed because they ran past their own timeout.
    pub timed_out_groups: Vec<HistoryId>,
    /// In-progress members canceled because their group timed out.
    pub canceled: Vec<Arc<OperationHistory>>,
    /// Groups that completed because no member is left in progress.
    pub completed_groups: Vec<HistoryId>,
}

impl TimeoutSweep {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty()
            && self.timed_out_groups.is_empty()
            && self.canceled.is_empty()
            && self.completed_groups.is_empty()
    }
}

#[derive(Default)]
struct TrackerState {
    entries: HashMap<HistoryId, Arc<OperationHistory>>,
    jobs: HashMap<JobId, HistoryId>,
    /// Group entry to its members, in creation order.
    members: HashMap<HistoryId, Vec<HistoryId>>,
}

pub struct OperationTracker {
    state: RwLock<TrackerState>,
    default_timeout: Duration,
}

impl OperationTracker {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            default_timeout,
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Records an in-progress run of `new.operation` against one resource,
    /// optionally as a member of the group entry `group`.
    pub async fn create_resource_history(
        &self,
        new: NewOperation,
        target: ResourceTarget,
        group: Option<HistoryId>,
    ) -> Result<Arc<OperationHistory>, TrackerError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&new.job_id) {
            return Err(TrackerError::DuplicateJobId(new.job_id));
        }
        if let Some(group_id) = group {
            match state.entries.get(&group_id) {
                None => return Err(TrackerError::NotFound(group_id)),
                Some(entry) if !entry.is_group() => return Err(TrackerError::NotAGroup(group_id)),
                Some(entry) if !entry.is_in_progress() => {
                    return Err(TrackerError::NotInProgress {
                        id: group_id,
                        status: entry.status(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(state.insert_member(new, target, group))
    }

    /// Records an in-progress group run and one member per target under a
    /// single write. Members come back in the order given.
    pub async fn create_group_with_members(
        &self,
        new: NewOperation,
        group_id: GroupId,
        group_name: impl Into<String>,
        members: Vec<(NewOperation, ResourceTarget)>,
    ) -> Result<(Arc<OperationHistory>, Vec<Arc<OperationHistory>>), TrackerError> {
        let mut state = self.state.write().await;
        {
            let mut seen = HashSet::new();
            for job_id in std::iter::once(&new.job_id).chain(members.iter().map(|(m, _)| &m.job_id)) {
                if state.jobs.contains_key(job_id) || !seen.insert(job_id) {
                    return Err(TrackerError::DuplicateJobId(job_id.clone()));
                }
            }
        }

        let group = state.insert_group(new, group_id, group_name.into());
        let members = members
            .into_iter()
            .map(|(new, target)| state.insert_member(new, target, Some(group.id())))
            .collect();
        Ok((group, members))
    }

    /// Records an in-progress group run. Members are added afterwards with
    /// [`create_resource_history`](Self::create_resource_history) while the
    /// group is still in progress.
    pub async fn create_group_history(
        &self,
        new: NewOperation,
        group_id: GroupId,
        group_name: impl Into<String>,
    ) -> Result<Arc<OperationHistory>, TrackerError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&new.job_id) {
            return Err(TrackerError::DuplicateJobId(new.job_id));
        }
        Ok(state.insert_group(new, group_id, group_name.into()))
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub async fn get(&self, id: HistoryId) -> Option<Arc<OperationHistory>> {
        self.state.read().await.entries.get(&id).cloned()
    }

    pub async fn get_by_job_id(&self, job_id: &JobId) -> Option<Arc<OperationHistory>> {
        let state = self.state.read().await;
        state.jobs.get(job_id).and_then(|id| state.entries.get(id)).cloned()
    }

    /// Members of a group entry in creation order.
    pub async fn group_members(&self, group: HistoryId) -> Result<Vec<Arc<OperationHistory>>, TrackerError> {
        let state = self.state.read().await;
        let entry = state.entries.get(&group).ok_or(TrackerError::NotFound(group))?;
        if !entry.is_group() {
            return Err(TrackerError::NotAGroup(group));
        }
        Ok(state.members_of(group))
    }

    /// All entries, oldest first.
    pub async fn list(&self) -> Vec<Arc<OperationHistory>> {
        self.state.read().await.sorted()
    }

    pub async fn in_progress(&self) -> Vec<Arc<OperationHistory>> {
        let mut entries = self.list().await;
        entries.retain(|e| e.is_in_progress());
        entries
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The parameter override, else the definition's timeout, else the default.
    pub fn timeout_for(&self, operation: &OperationDefinition, parameters: &Configuration) -> Duration {
        parameters
            .simple_value(TIMEOUT_PARAMETER)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .or_else(|| operation.timeout())
            .unwrap_or(self.default_timeout)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    pub async fn complete(
        &self,
        id: HistoryId,
        results: Option<Configuration>,
    ) -> Result<Arc<OperationHistory>, TrackerError> {
        self.transition(id, |entry| entry.succeed(results)).await
    }

    /// Fails an entry with `message`; any results are dropped.
    pub async fn fail(&self, id: HistoryId, message: impl Into<String>) -> Result<Arc<OperationHistory>, TrackerError> {
        let message = message.into();
        self.transition(id, |entry| entry.fail(message)).await
    }

    pub async fn time_out(
        &self,
        id: HistoryId,
        message: impl Into<String>,
    ) -> Result<Arc<OperationHistory>, TrackerError> {
        let message = message.into();
        self.transition(id, |entry| entry.time_out(message)).await
    }

    /// Cancels an in-progress entry. Canceling a group also cancels its
    /// in-progress members. Returns the individual entries that were
    /// canceled, so their agents can be told.
    pub async fn cancel(&self, id: HistoryId) -> Result<Vec<Arc<OperationHistory>>, TrackerError> {
        let state = self.state.write().await;
        let entry = state.get(id)?;
        entry
            .cancel(None)
            .map_err(|status| TrackerError::NotInProgress { id, status })?;

        if !entry.is_group() {
            if let Some(group) = entry.group_history_id() {
                state.settle_group(group);
            }
            info!(history_id = %id, "Canceled operation");
            return Ok(vec![entry]);
        }

        let canceled: Vec<_> = state
            .members_of(id)
            .into_iter()
            .filter(|member| member.cancel(Some(GROUP_CANCEL_MESSAGE.to_string())).is_ok())
            .collect();
        info!(history_id = %id, members_canceled = canceled.len(), "Canceled group operation");
        Ok(canceled)
    }

    /// Lets an operator set a group's own outcome. Members are left alone.
    pub async fn set_group_status(
        &self,
        id: HistoryId,
        status: OperationStatus,
        error_message: Option<String>,
    ) -> Result<Arc<OperationHistory>, TrackerError> {
        if !status.is_terminal() {
            return Err(TrackerError::NotTerminal(status));
        }
        let state = self.state.write().await;
        let entry = state.get(id)?;
        if !entry.is_group() {
            return Err(TrackerError::NotAGroup(id));
        }
        entry
            .set_status(status, error_message)
            .map_err(|status| TrackerError::NotInProgress { id, status })?;
        info!(history_id = %id, status = %entry.status(), "Group status set by operator");
        Ok(entry)
    }

    /// Re-derives a group's status from its members; see [`group_outcome`].
    pub async fn check_group_completion(&self, group: HistoryId) -> Result<Option<OperationStatus>, TrackerError> {
        let state = self.state.write().await;
        let entry = state.get(group)?;
        if !entry.is_group() {
            return Err(TrackerError::NotAGroup(group));
        }
        Ok(state.settle_group(group))
    }

    async fn transition(
        &self,
        id: HistoryId,
        apply: impl FnOnce(&OperationHistory) -> Result<(), OperationStatus>,
    ) -> Result<Arc<OperationHistory>, TrackerError> {
        let state = self.state.write().await;
        let entry = state.get(id)?;
        apply(&entry).map_err(|status| TrackerError::NotInProgress { id, status })?;
        debug!(history_id = %id, status = %entry.status(), "Operation history updated");

        if let Some(group) = entry.group_history_id() {
            state.settle_group(group);
        }
        Ok(entry)
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Deletes an entry; a group takes all of its members with it.
    ///
    /// An in-progress entry is refused unless `purge_in_progress` is set.
    /// Only the named entry is checked; a group's members go with it whatever
    /// their status. Returns every deleted id, members before their group.
    pub async fn delete(&self, id: HistoryId, purge_in_progress: bool) -> Result<Vec<HistoryId>, TrackerError> {
        let mut state = self.state.write().await;
        let entry = state.get(id)?;
        if !purge_in_progress && entry.is_in_progress() {
            return Err(TrackerError::InProgress(id));
        }

        let mut doomed: Vec<Arc<OperationHistory>> = if entry.is_group() {
            state.members_of(id)
        } else {
            Vec::new()
        };
        doomed.push(Arc::clone(&entry));

        let removed: Vec<HistoryId> = doomed.iter().map(|e| e.id()).collect();
        for victim in &doomed {
            state.entries.remove(&victim.id());
            state.jobs.remove(victim.job_id());
        }
        state.members.remove(&id);

        if let Some(group) = entry.group_history_id() {
            if let Some(members) = state.members.get_mut(&group) {
                members.retain(|m| *m != id);
            }
            state.settle_group(group);
        }

        info!(history_id = %id, removed = removed.len(), "Deleted operation history");
        Ok(removed)
    }

    // =========================================================================
    // Timeouts
    // =========================================================================

    pub async fn check_for_timed_out(&self) -> TimeoutSweep {
        self.check_for_timed_out_at(Utc::now()).await
    }

    /// Times out entries that have been running longer than allowed as of `now`.
    ///
    /// Individual entries past their timeout become `TimedOut`. Groups past
    /// their own timeout fail and cancel their remaining members. Finally any
    /// in-progress group with no member left in progress is completed, which
    /// covers groups without members.
    pub async fn check_for_timed_out_at(&self, now: DateTime<Utc>) -> TimeoutSweep {
        let state = self.state.write().await;
        let mut sweep = TimeoutSweep::default();
        let entries = state.sorted();

        for entry in entries.iter().filter(|e| !e.is_group() && e.is_in_progress()) {
            let timeout = self.timeout_for(entry.operation(), entry.parameters());
            let duration = entry.duration_at(now);
            if duration <= timeout {
                continue;
            }
            let message = format!(
                "Timed out: did not complete after {} ms (the timeout period was {} ms)",
                duration.as_millis(),
                timeout.as_millis()
            );
            if entry.time_out(message).is_ok() {
                warn!(
                    history_id = %entry.id(),
                    duration_ms = duration.as_millis() as u64,
                    "Operation orphaned, timed out"
                );
                sweep.timed_out.push(entry.id());
                if let Some(group) = entry.group_history_id() {
                    if state.settle_group(group).is_some() {
                        sweep.completed_groups.push(group);
                    }
                }
            }
        }

        for group in entries.iter().filter(|e| e.is_group() && e.is_in_progress()) {
            let timeout = self.timeout_for(group.operation(), group.parameters());
            if group.duration_at(now) < timeout {
                continue;
            }
            // The group fails first so canceling its members cannot complete it.
            if group.fail(GROUP_TIMEOUT_MESSAGE).is_err() {
                continue;
            }
            warn!(history_id = %group.id(), "Group operation timed out");
            sweep.timed_out_groups.push(group.id());
            for member in state.members_of(group.id()) {
                if member.cancel(Some(GROUP_CANCEL_MESSAGE.to_string())).is_ok() {
                    sweep.canceled.push(member);
                }
            }
        }

        for group in entries.iter().filter(|e| e.is_group() && e.is_in_progress()) {
            if state.settle_group(group.id()).is_some() {
                sweep.completed_groups.push(group.id());
            }
        }

        if !sweep.is_empty() {
            info!(
                timed_out = sweep.timed_out.len(),
                timed_out_groups = sweep.timed_out_groups.len(),
                canceled = sweep.canceled.len(),
                completed_groups = sweep.completed_groups.len(),
                "Operation timeout sweep complete"
            );
        }
        sweep
    }
}

impl TrackerState {
    fn insert_group(&mut self, new: NewOperation, group_id: GroupId, group_name: String) -> Arc<OperationHistory> {
        let entry = Arc::new(OperationHistory::new(
            new.job_id,
            HistoryScope::Group { group_id, group_name },
            new.operation,
            new.parameters,
        ));
        let id = entry.id();
        self.jobs.insert(entry.job_id().clone(), id);
        self.entries.insert(id, Arc::clone(&entry));
        self.members.insert(id, Vec::new());

        info!(
            history_id = %id,
            group_id = %group_id,
            operation = %entry.operation().name,
            "Created group operation history"
        );
        entry
    }

    fn insert_member(
        &mut self,
        new: NewOperation,
        target: ResourceTarget,
        group: Option<HistoryId>,
    ) -> Arc<OperationHistory> {
        let resource_id = target.resource_id;
        let entry = Arc::new(OperationHistory::new(
            new.job_id,
            HistoryScope::Resource { target, group },
            new.operation,
            new.parameters,
        ));
        let id = entry.id();
        self.jobs.insert(entry.job_id().clone(), id);
        self.entries.insert(id, Arc::clone(&entry));
        if let Some(group_id) = group {
            self.members.entry(group_id).or_default().push(id);
        }

        info!(
            history_id = %id,
            resource_id = %resource_id,
            operation = %entry.operation().name,
            job_id = %entry.job_id(),
            "Created operation history"
        );
        entry
    }

    fn get(&self, id: HistoryId) -> Result<Arc<OperationHistory>, TrackerError> {
        self.entries.get(&id).cloned().ok_or(TrackerError::NotFound(id))
    }

    fn members_of(&self, group: HistoryId) -> Vec<Arc<OperationHistory>> {
        self.members
            .get(&group)
            .map(|ids| ids.iter().filter_map(|id| self.entries.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    fn sorted(&self) -> Vec<Arc<OperationHistory>> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| (e.created_at(), e.id()));
        entries
    }

    /// Completes an in-progress group once none of its members is in
    /// progress. Returns the status it was given.
    fn settle_group(&self, group: HistoryId) -> Option<OperationStatus> {
        let entry = self.entries.get(&group)?;
        if !entry.is_in_progress() {
            return None;
        }
        let members = self.members_of(group);
        let outcome = group_outcome(members.iter().map(|m| {
            let name = m.target().map(|t| t.resource_name.as_str()).unwrap_or_default();
            (name, m.status())
        }))?;

        let (status, message) = outcome;
        entry.set_status(status, message).ok()?;
        info!(history_id = %group, status = %status, "Group operation completed");
        Some(status)
    }
}

/// Derives a group's outcome from `(resource name, status)` of its members.
///
/// `None` while any member is in progress. Otherwise `Success`, or `Failure`
/// naming every member that failed, was canceled or timed out. A group
/// without members succeeds.
pub fn group_outcome<'a>(
    members: impl IntoIterator<Item = (&'a str, OperationStatus)>,
) -> Option<(OperationStatus, Option<String>)> {
    let mut failed = Vec::new();
    for (name, status) in members {
        match status {
            OperationStatus::InProgress => return None,
            OperationStatus::Success => {}
            OperationStatus::Failure | OperationStatus::Canceled | OperationStatus::TimedOut => failed.push(name),
        }
    }
    if failed.is_empty() {
        Some((OperationStatus::Success, None))
    } else {
        Some((
            OperationStatus::Failure,
            Some(format!("{GROUP_FAILURE_PREFIX}{}", failed.join(","))),
        ))
    }
}
