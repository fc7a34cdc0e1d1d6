//! Actor that carries out server commands.
//!
//! Commands are accepted in mailbox order. Operation invocations are queued
//! on the executor inline, which fixes their per-resource order; the waiting
//! and all create/delete work happen in spawned tasks so a slow plugin never
//! blocks the mailbox. Every command produces exactly one event.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_domain::{AgentCommand, AgentEvent, OperationReport, OperationStatus};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::framework::{Actor, ActorContext, ActorError};
use crate::factory::FactoryExecutor;
use crate::operations::OperationExecutor;

pub struct AgentCommandActor {
    operations: Arc<OperationExecutor>,
    factory: Arc<FactoryExecutor>,
    events: mpsc::Sender<AgentEvent>,
    tasks: JoinSet<()>,
}

impl AgentCommandActor {
    pub fn new(
        operations: Arc<OperationExecutor>,
        factory: Arc<FactoryExecutor>,
        events: mpsc::Sender<AgentEvent>,
    ) -> Self {
        Self {
            operations,
            factory,
            events,
            tasks: JoinSet::new(),
        }
    }

    fn emit_later(&mut self, work: impl std::future::Future<Output = AgentEvent> + Send + 'static) {
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let event = work.await;
            let kind = event.kind();
            if events.send(event).await.is_err() {
                warn!(event = kind, "Event channel closed, dropping event");
            }
        });
    }
}

#[async_trait]
impl Actor for AgentCommandActor {
    type Message = AgentCommand;

    fn name(&self) -> &str {
        "agent_command"
    }

    async fn handle(&mut self, msg: AgentCommand, _ctx: &mut ActorContext) -> Result<bool, ActorError> {
        debug!(command = msg.kind(), "Received command");

        // Drop finished tasks.
        while self.tasks.try_join_next().is_some() {}

        match msg {
            AgentCommand::CreateResource(request) => {
                let factory = Arc::clone(&self.factory);
                self.emit_later(async move { AgentEvent::ResourceCreated(factory.create(request).await) });
            }
            AgentCommand::DeleteResource(request) => {
                let factory = Arc::clone(&self.factory);
                self.emit_later(async move { AgentEvent::ResourceDeleted(factory.delete(request).await) });
            }
            AgentCommand::InvokeOperation(invocation) => {
                let fallback = OperationReport {
                    history_id: invocation.history_id,
                    job_id: invocation.job_id.clone(),
                    resource_id: invocation.resource_id,
                    status: OperationStatus::Failure,
                    results: None,
                    error_message: Some("operation worker stopped".to_string()),
                };
                let pending = self.operations.submit(invocation).await;
                self.emit_later(async move { AgentEvent::OperationCompleted(pending.await.unwrap_or(fallback)) });
            }
            AgentCommand::CancelOperation { job_id } => {
                let outcome = self.operations.cancel(&job_id).await;
                self.events
                    .send(AgentEvent::OperationCancelRequested { job_id, outcome })
                    .await
                    .map_err(|_| ActorError::Permanent("event channel closed".to_string()))?;
            }
        }
        Ok(true)
    }

    async fn on_stop(&mut self, _ctx: &mut ActorContext) {
        self.tasks.abort_all();
    }
}
