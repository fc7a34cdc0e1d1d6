//! Routes agent events to the service that is waiting for them.

use fleet_domain::AgentEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::state::ServerContext;

pub async fn dispatch(ctx: &ServerContext, event: AgentEvent) {
    debug!(event = event.kind(), "Agent event");
    match event {
        AgentEvent::ResourceCreated(response) => {
            ctx.factory().complete_create_resource(response).await;
        }
        AgentEvent::ResourceDeleted(response) => {
            ctx.factory().complete_delete_resource(response).await;
        }
        AgentEvent::OperationCompleted(report) => {
            ctx.operations().handle_report(report).await;
        }
        AgentEvent::OperationCancelRequested { job_id, outcome } => {
            ctx.operations().handle_cancel_outcome(&job_id, outcome);
        }
    }
}

/// Feeds every event from `events` through [`dispatch`] until the channel closes.
pub fn spawn_event_pump(ctx: ServerContext, mut events: mpsc::Receiver<AgentEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            dispatch(&ctx, event).await;
        }
        info!("Agent event channel closed");
    })
}
