#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fleet_configuration::Configuration;
use fleet_domain::{AgentCommand, JobId, OperationDefinition};
use fleet_id::ResourceId;
use fleet_server::operation::{NewOperation, ResourceTarget};
use fleet_server::{AgentTransport, TransportError};
use tokio::sync::{mpsc, Mutex};

/// Records every command; fails every send while `disconnected` is set.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<AgentCommand>>,
    disconnected: AtomicBool,
    forward: Option<mpsc::UnboundedSender<AgentCommand>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn disconnected() -> Arc<Self> {
        let transport = Self::default();
        transport.disconnected.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// Also forwards each accepted command to the returned receiver.
    pub fn forwarding() -> (Arc<Self>, mpsc::UnboundedReceiver<AgentCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            forward: Some(tx),
            ..Default::default()
        };
        (Arc::new(transport), rx)
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<AgentCommand> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent.lock().await.iter().map(AgentCommand::kind).collect()
    }
}

#[async_trait]
impl AgentTransport for RecordingTransport {
    async fn send(&self, command: AgentCommand) -> Result<(), TransportError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.sent.lock().await.push(command.clone());
        if let Some(forward) = &self.forward {
            let _ = forward.send(command);
        }
        Ok(())
    }
}

pub fn restart() -> OperationDefinition {
    OperationDefinition::new("restart")
}

pub fn new_operation(name: &str) -> NewOperation {
    NewOperation {
        job_id: JobId::now(name, "test"),
        operation: restart(),
        parameters: Configuration::new(),
    }
}

pub fn target(id: u64, name: &str) -> ResourceTarget {
    ResourceTarget::new(ResourceId::new(id), name)
}
