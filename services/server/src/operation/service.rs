//! Scheduling operations and folding agent reports back into history.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use fleet_configuration::Configuration;
use fleet_domain::{
    AgentCommand, CancelOutcome, JobId, OperationDefinition, OperationInvocation, OperationReport,
    OperationStatus,
};
use fleet_id::{GroupId, HistoryId, Sequence};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use super::error::TrackerError;
use super::history::{OperationHistory, ResourceTarget};
use super::tracker::{NewOperation, OperationTracker, TimeoutSweep};
use crate::transport::AgentTransport;

#[derive(Debug, Clone)]
pub struct OperationConfig {
    /// Used when neither the invocation nor the definition sets a timeout.
    pub default_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// A group of resources to run one operation against.
#[derive(Debug, Clone)]
pub struct GroupTarget {
    pub group_id: GroupId,
    pub group_name: String,
    pub members: Vec<ResourceTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupExecution {
    /// Every member is sent at once.
    #[default]
    Concurrent,
    /// Members run one after another in the listed order.
    Ordered {
        /// Cancel the members that have not run yet once one does not succeed.
        halt_on_failure: bool,
    },
}

struct OrderedPlan {
    remaining: VecDeque<Arc<OperationHistory>>,
    halt_on_failure: bool,
}

pub struct OperationService {
    tracker: Arc<OperationTracker>,
    transport: Arc<dyn AgentTransport>,
    config: OperationConfig,
    jobs: Sequence,
    plans: Mutex<HashMap<HistoryId, OrderedPlan>>,
}

impl OperationService {
    pub fn new(tracker: Arc<OperationTracker>, transport: Arc<dyn AgentTransport>, config: OperationConfig) -> Self {
        Self {
            tracker,
            transport,
            config,
            jobs: Sequence::new(),
            plans: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Records and dispatches one run of `operation` against `target`.
    ///
    /// A dispatch failure is not an error here; the entry is failed with the
    /// transport error instead.
    pub async fn schedule(
        &self,
        target: ResourceTarget,
        operation: OperationDefinition,
        parameters: Configuration,
    ) -> Result<Arc<OperationHistory>, TrackerError> {
        let new = NewOperation {
            job_id: self.mint_job_id("rop", target.resource_id, &operation.name),
            operation,
            parameters,
        };
        let entry = self.tracker.create_resource_history(new, target, None).await?;
        self.dispatch(&entry).await;
        Ok(entry)
    }

    /// Records a group run with one member entry per resource and dispatches
    /// them according to `execution`.
    pub async fn schedule_group(
        &self,
        group: GroupTarget,
        operation: OperationDefinition,
        parameters: Configuration,
        execution: GroupExecution,
    ) -> Result<Arc<OperationHistory>, TrackerError> {
        let new = NewOperation {
            job_id: self.mint_job_id("gop", group.group_id, &operation.name),
            operation: operation.clone(),
            parameters: parameters.clone(),
        };
        let member_runs = group
            .members
            .into_iter()
            .map(|target| {
                let new = NewOperation {
                    job_id: self.mint_job_id("rop", target.resource_id, &operation.name),
                    operation: operation.clone(),
                    parameters: parameters.clone(),
                };
                (new, target)
            })
            .collect();
        let (group_entry, members) = self
            .tracker
            .create_group_with_members(new, group.group_id, group.group_name, member_runs)
            .await?;

        info!(
            history_id = %group_entry.id(),
            members = members.len(),
            execution = ?execution,
            "Scheduling group operation"
        );

        if members.is_empty() {
            self.tracker.check_group_completion(group_entry.id()).await?;
            return Ok(group_entry);
        }

        match execution {
            GroupExecution::Concurrent => {
                for member in &members {
                    self.dispatch(member).await;
                }
            }
            GroupExecution::Ordered { halt_on_failure } => {
                self.plans.lock().await.insert(
                    group_entry.id(),
                    OrderedPlan {
                        remaining: members.into(),
                        halt_on_failure,
                    },
                );
                self.advance(group_entry.id()).await;
            }
        }
        Ok(group_entry)
    }

    fn mint_job_id(&self, kind: &str, subject: impl Display, operation: &str) -> JobId {
        let n: u64 = self.jobs.next();
        JobId::now(format!("{kind}-{subject}-{operation}-{n}"), format!("{kind}-jobs"))
    }

    /// Sends the invocation for `entry`; returns whether the agent took it.
    async fn dispatch(&self, entry: &OperationHistory) -> bool {
        let Some(target) = entry.target() else {
            return false;
        };
        let invocation = OperationInvocation {
            history_id: entry.id(),
            job_id: entry.job_id().clone(),
            resource_id: target.resource_id,
            operation: entry.operation().name.clone(),
            parameters: entry.parameters().clone(),
            timeout_secs: self
                .tracker
                .timeout_for(entry.operation(), entry.parameters())
                .as_secs(),
        };

        match self.transport.send(AgentCommand::InvokeOperation(invocation)).await {
            Ok(()) => {
                debug!(history_id = %entry.id(), "Dispatched operation");
                true
            }
            Err(e) => {
                warn!(history_id = %entry.id(), error = %e, "Failed to dispatch operation");
                if let Err(e) = self
                    .tracker
                    .fail(entry.id(), format!("Failed to send operation to agent: {e}"))
                    .await
                {
                    debug!(history_id = %entry.id(), error = %e, "Entry already settled");
                }
                false
            }
        }
    }

    // =========================================================================
    // Ordered groups
    // =========================================================================

    /// Dispatches the next queued member of an ordered group, skipping
    /// members that were settled while they waited.
    async fn advance(&self, group: HistoryId) {
        loop {
            let (next, halt_on_failure) = {
                let mut plans = self.plans.lock().await;
                let Some(plan) = plans.get_mut(&group) else {
                    return;
                };
                let next = plan.remaining.pop_front();
                let halt_on_failure = plan.halt_on_failure;
                if plan.remaining.is_empty() {
                    plans.remove(&group);
                }
                (next, halt_on_failure)
            };

            let Some(member) = next else {
                return;
            };
            if !member.is_in_progress() {
                continue;
            }
            if self.dispatch(&member).await {
                return;
            }
            if halt_on_failure {
                self.halt(group).await;
                return;
            }
        }
    }

    /// Cancels the members of an ordered group that have not run yet.
    async fn halt(&self, group: HistoryId) {
        let Some(plan) = self.plans.lock().await.remove(&group) else {
            return;
        };
        info!(history_id = %group, skipped = plan.remaining.len(), "Halting ordered group operation");
        for member in plan.remaining {
            if let Err(e) = self.tracker.cancel(member.id()).await {
                debug!(history_id = %member.id(), error = %e, "Member already settled");
            }
        }
    }

    async fn member_finished(&self, entry: &OperationHistory) {
        let Some(group) = entry.group_history_id() else {
            return;
        };
        let halt_on_failure = match self.plans.lock().await.get(&group) {
            Some(plan) => plan.halt_on_failure,
            None => return,
        };
        if halt_on_failure && entry.status() != OperationStatus::Success {
            self.halt(group).await;
        } else {
            self.advance(group).await;
        }
    }

    // =========================================================================
    // Agent replies
    // =========================================================================

    /// Applies an agent's report to the matching entry.
    ///
    /// Reports for entries that already reached a terminal state (timed out
    /// or canceled on this side) are ignored.
    pub async fn handle_report(&self, report: OperationReport) {
        let id = report.history_id;
        let result = match report.status {
            OperationStatus::Success => self.tracker.complete(id, report.results).await,
            OperationStatus::Failure => {
                let message = report.error_message.unwrap_or_else(|| "Operation failed".to_string());
                self.tracker.fail(id, message).await
            }
            OperationStatus::TimedOut => {
                let message = report
                    .error_message
                    .unwrap_or_else(|| "Operation timed out on the agent".to_string());
                self.tracker.time_out(id, message).await
            }
            OperationStatus::Canceled => self.tracker.cancel(id).await.and_then(|mut canceled| {
                canceled.pop().ok_or(TrackerError::NotFound(id))
            }),
            OperationStatus::InProgress => {
                warn!(history_id = %id, "Agent reported a non-terminal status, ignoring");
                return;
            }
        };

        match result {
            Ok(entry) => {
                info!(history_id = %id, status = %entry.status(), "Operation completed");
                self.member_finished(&entry).await;
            }
            Err(TrackerError::NotInProgress { status, .. }) => {
                debug!(history_id = %id, %status, "Late operation report ignored");
            }
            Err(e) => {
                warn!(history_id = %id, error = %e, "Dropping operation report");
            }
        }
    }

    pub fn handle_cancel_outcome(&self, job_id: &JobId, outcome: CancelOutcome) {
        debug!(job_id = %job_id, ?outcome, "Agent answered cancel request");
    }

    // =========================================================================
    // Cancel and timeouts
    // =========================================================================

    /// Cancels an in-progress entry (a group cancels its running members)
    /// and asks the agents to stop what they are running.
    pub async fn cancel(&self, id: HistoryId) -> Result<Vec<HistoryId>, TrackerError> {
        let canceled = self.tracker.cancel(id).await?;
        self.plans.lock().await.remove(&id);

        for entry in &canceled {
            self.request_agent_cancel(entry).await;
        }
        if let [entry] = canceled.as_slice() {
            if entry.id() == id {
                self.member_finished(entry).await;
            }
        }
        Ok(canceled.iter().map(|e| e.id()).collect())
    }

    async fn request_agent_cancel(&self, entry: &OperationHistory) {
        let command = AgentCommand::CancelOperation {
            job_id: entry.job_id().clone(),
        };
        if let Err(e) = self.transport.send(command).await {
            warn!(history_id = %entry.id(), error = %e, "Failed to send cancel request");
        }
    }

    /// One timeout pass over the tracker.
    pub async fn sweep(&self) -> TimeoutSweep {
        let sweep = self.tracker.check_for_timed_out().await;

        for group in &sweep.timed_out_groups {
            self.plans.lock().await.remove(group);
        }
        for entry in &sweep.canceled {
            self.request_agent_cancel(entry).await;
        }
        for id in &sweep.timed_out {
            if let Some(entry) = self.tracker.get(*id).await {
                self.member_finished(&entry).await;
            }
        }
        sweep
    }

    /// Runs [`sweep`](Self::sweep) every `sweep_interval` until shutdown.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            default_timeout_secs = self.config.default_timeout.as_secs(),
            "Starting operation timeout sweeper"
        );

        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Operation sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Forgets queued ordered-group members; their entries stay in progress
    /// until the sweeper times them out.
    pub async fn shutdown(&self) {
        let dropped = std::mem::take(&mut *self.plans.lock().await);
        if !dropped.is_empty() {
            info!(groups = dropped.len(), "Dropped queued ordered group members");
        }
    }
}
