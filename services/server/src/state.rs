//! Process-wide server state.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::factory::ResourceFactoryProtocol;
use crate::operation::{OperationService, OperationTracker};
use crate::transport::AgentTransport;

/// The server's services, created once at startup and shared by handle.
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerContextInner>,
}

struct ServerContextInner {
    config: Config,
    tracker: Arc<OperationTracker>,
    operations: Arc<OperationService>,
    factory: Arc<ResourceFactoryProtocol>,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerContext {
    pub fn new(config: Config, transport: Arc<dyn AgentTransport>) -> Self {
        let tracker = Arc::new(OperationTracker::new(config.operations.default_timeout));
        let operations = Arc::new(OperationService::new(
            Arc::clone(&tracker),
            Arc::clone(&transport),
            config.operations.clone(),
        ));
        let factory = Arc::new(ResourceFactoryProtocol::new(transport, config.factory.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(ServerContextInner {
                config,
                tracker,
                operations,
                factory,
                shutdown_tx,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.inner.tracker
    }

    pub fn operations(&self) -> &Arc<OperationService> {
        &self.inner.operations
    }

    pub fn factory(&self) -> &Arc<ResourceFactoryProtocol> {
        &self.inner.factory
    }

    /// Spawns the operation and factory sweepers; both stop on [`shutdown`](Self::shutdown).
    pub fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let operations = Arc::clone(&self.inner.operations);
        let operations_rx = self.inner.shutdown_tx.subscribe();
        let factory = Arc::clone(&self.inner.factory);
        let factory_rx = self.inner.shutdown_tx.subscribe();

        vec![
            tokio::spawn(async move { operations.run(operations_rx).await }),
            tokio::spawn(async move { factory.run(factory_rx).await }),
        ]
    }

    /// Stops the workers, then fails outstanding factory requests and drops
    /// queued ordered-group members.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        self.inner.operations.shutdown().await;
        self.inner.factory.shutdown().await;
    }
}
