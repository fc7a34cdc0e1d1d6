//! Operation execution on the agent.
//!
//! Each resource has its own FIFO queue drained by one worker task, so
//! invocations against the same resource run one at a time in submission
//! order while different resources proceed concurrently. A worker exits and
//! drops its queue once the queue runs dry. A job can be canceled while it
//! waits in the queue or while it runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use fleet_configuration::Configuration;
use fleet_domain::{CancelOutcome, JobId, OperationInvocation, OperationReport, OperationStatus};
use fleet_id::ResourceId;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::inventory::InventoryManager;

/// Finished jobs remembered for answering late cancel requests.
const FINISHED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Queued,
    Running,
}

struct Job {
    state: JobState,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct JobTable {
    active: HashMap<JobId, Job>,
    finished: HashSet<JobId>,
    finished_order: VecDeque<JobId>,
}

impl JobTable {
    fn finish(&mut self, job_id: &JobId) {
        self.active.remove(job_id);
        if self.finished.insert(job_id.clone()) {
            self.finished_order.push_back(job_id.clone());
        }
        while self.finished_order.len() > FINISHED_CAPACITY {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }
}

struct QueuedJob {
    invocation: OperationInvocation,
    cancel: oneshot::Receiver<()>,
    reply: oneshot::Sender<OperationReport>,
}

struct Shared {
    inventory: Arc<InventoryManager>,
    jobs: Mutex<JobTable>,
    /// Sends happen under this lock, and a worker only leaves after
    /// removing its own entry under it with nothing left to receive.
    queues: Mutex<HashMap<ResourceId, mpsc::UnboundedSender<QueuedJob>>>,
}

/// Runs operation invocations against inventoried resources.
pub struct OperationExecutor {
    shared: Arc<Shared>,
}

impl OperationExecutor {
    pub fn new(inventory: Arc<InventoryManager>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inventory,
                jobs: Mutex::new(JobTable::default()),
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resources that currently have a worker.
    pub async fn queue_count(&self) -> usize {
        self.shared.queues.lock().await.len()
    }

    /// Queues `invocation` behind earlier ones for the same resource.
    ///
    /// The receiver resolves with the report once the job has run, been
    /// canceled or failed.
    pub async fn submit(&self, invocation: OperationInvocation) -> oneshot::Receiver<OperationReport> {
        let (cancel_tx, cancel) = oneshot::channel();
        let (reply, report_rx) = oneshot::channel();

        self.shared.jobs.lock().await.active.insert(
            invocation.job_id.clone(),
            Job {
                state: JobState::Queued,
                cancel: Some(cancel_tx),
            },
        );
        debug!(job_id = %invocation.job_id, resource_id = %invocation.resource_id, "Queued operation");

        let resource_id = invocation.resource_id;
        let job = QueuedJob {
            invocation,
            cancel,
            reply,
        };

        let mut queues = self.shared.queues.lock().await;
        let queue = queues
            .entry(resource_id)
            .or_insert_with(|| spawn_worker(Arc::clone(&self.shared), resource_id));
        if let Err(mpsc::error::SendError(job)) = queue.send(job) {
            let queue = spawn_worker(Arc::clone(&self.shared), resource_id);
            let _ = queue.send(job);
            queues.insert(resource_id, queue);
        }
        report_rx
    }

    /// Submits `invocation` and waits for its report.
    pub async fn execute(&self, invocation: OperationInvocation) -> OperationReport {
        let fallback = report(
            &invocation,
            OperationStatus::Failure,
            None,
            Some("operation worker stopped".to_string()),
        );
        self.submit(invocation).await.await.unwrap_or(fallback)
    }

    /// Cancels `job_id` if it is still queued or running.
    pub async fn cancel(&self, job_id: &JobId) -> CancelOutcome {
        let mut jobs = self.shared.jobs.lock().await;
        if let Some(job) = jobs.active.get_mut(job_id) {
            let outcome = match job.state {
                JobState::Queued => CancelOutcome::Queued,
                JobState::Running => CancelOutcome::Running,
            };
            if let Some(cancel) = job.cancel.take() {
                let _ = cancel.send(());
            }
            info!(job_id = %job_id, ?outcome, "Canceling operation");
            return outcome;
        }

        if jobs.finished.contains(job_id) {
            CancelOutcome::Finished
        } else {
            CancelOutcome::Unknown
        }
    }
}

fn spawn_worker(shared: Arc<Shared>, resource_id: ResourceId) -> mpsc::UnboundedSender<QueuedJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let job_id = job.invocation.job_id.clone();
            let report = shared.process(job.invocation, job.cancel).await;
            shared.jobs.lock().await.finish(&job_id);
            let _ = job.reply.send(report);

            if rx.is_empty() {
                let mut queues = shared.queues.lock().await;
                if rx.is_empty() {
                    queues.remove(&resource_id);
                    break;
                }
            }
        }
        debug!(resource_id = %resource_id, "Operation queue closed");
    });
    tx
}

impl Shared {
    async fn process(&self, invocation: OperationInvocation, mut cancel: oneshot::Receiver<()>) -> OperationReport {
        if cancel.try_recv().is_ok() {
            info!(job_id = %invocation.job_id, "Operation canceled before it ran");
            return report(&invocation, OperationStatus::Canceled, None, None);
        }
        if let Some(job) = self.jobs.lock().await.active.get_mut(&invocation.job_id) {
            job.state = JobState::Running;
        }

        let report = self.run(&invocation, cancel).await;
        debug!(job_id = %invocation.job_id, status = %report.status, "Operation finished");
        report
    }

    async fn run(&self, invocation: &OperationInvocation, cancel: oneshot::Receiver<()>) -> OperationReport {
        let failure = |message: String| {
            warn!(job_id = %invocation.job_id, operation = %invocation.operation, error = %message, "Operation failed");
            report(invocation, OperationStatus::Failure, None, Some(message))
        };

        let Some(node) = self.inventory.get(invocation.resource_id).await else {
            return failure(format!("resource {} not found", invocation.resource_id));
        };
        if !node.is_started() {
            return failure(format!("resource {} is not started", node.id));
        }
        let known = self
            .inventory
            .registry()
            .resource_type(&node.resource_type)
            .is_some_and(|rt| rt.operation(&invocation.operation).is_some());
        if !known {
            return failure(format!(
                "resource type {} has no operation '{}'",
                node.resource_type, invocation.operation
            ));
        }
        let Some(invoker) = self
            .inventory
            .component(node.id)
            .await
            .and_then(|c| c.operations)
        else {
            return failure(format!("resource {} does not support operations", node.id));
        };

        let limit = invocation.timeout();
        info!(
            job_id = %invocation.job_id,
            operation = %invocation.operation,
            timeout_secs = limit.as_secs(),
            "Invoking operation"
        );

        tokio::select! {
            biased;
            Ok(()) = cancel => {
                info!(job_id = %invocation.job_id, "Operation canceled while running");
                report(invocation, OperationStatus::Canceled, None, None)
            }
            outcome = timeout(limit, invoker.invoke(&invocation.operation, &invocation.parameters)) => {
                match outcome {
                    Ok(Ok(result)) => match result.error_message {
                        Some(message) => failure(message),
                        None => report(invocation, OperationStatus::Success, Some(result.complex_results), None),
                    },
                    Ok(Err(e)) => failure(format!("{e:#}")),
                    Err(_) => {
                        warn!(job_id = %invocation.job_id, "Operation timed out");
                        report(
                            invocation,
                            OperationStatus::TimedOut,
                            None,
                            Some(format!("operation timed out after {}s", limit.as_secs())),
                        )
                    }
                }
            }
        }
    }
}

fn report(
    invocation: &OperationInvocation,
    status: OperationStatus,
    results: Option<Configuration>,
    error_message: Option<String>,
) -> OperationReport {
    OperationReport {
        history_id: invocation.history_id,
        job_id: invocation.job_id.clone(),
        resource_id: invocation.resource_id,
        status,
        results,
        error_message,
    }
}
