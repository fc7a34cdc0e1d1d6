//! The seam between the server and its agents.
//!
//! The server only needs to hand an [`AgentCommand`] to whoever can deliver
//! it; replies come back separately as `AgentEvent`s. The embedded agent's
//! command mailbox is one such transport.

use async_trait::async_trait;
use fleet_agent::actors::{ActorError, ActorHandle};
use fleet_domain::AgentCommand;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("agent is not connected")]
    Disconnected,

    #[error("agent mailbox is full")]
    Busy,

    #[error("failed to deliver command: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Delivers one command. Success means the agent accepted it, not that it ran.
    async fn send(&self, command: AgentCommand) -> Result<(), TransportError>;
}

#[async_trait]
impl AgentTransport for ActorHandle<AgentCommand> {
    async fn send(&self, command: AgentCommand) -> Result<(), TransportError> {
        ActorHandle::send(self, command).await.map_err(|e| match e {
            ActorError::ActorStopped => TransportError::Disconnected,
            ActorError::MailboxFull => TransportError::Busy,
            other => TransportError::Delivery(other.to_string()),
        })
    }
}
