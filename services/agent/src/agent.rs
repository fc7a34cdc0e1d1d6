//! The assembled agent.

use std::sync::Arc;

use fleet_domain::{AgentCommand, AgentEvent};
use fleet_id::AgentId;
use tokio::sync::{mpsc, watch};

use crate::actors::{ActorHandle, AgentCommandActor, Supervisor};
use crate::config::Config;
use crate::discovery::DiscoveryEngine;
use crate::factory::FactoryExecutor;
use crate::inventory::InventoryManager;
use crate::operations::OperationExecutor;
use crate::plugin::PluginRegistry;

/// Inventory, discovery and executors sharing one plugin registry.
pub struct Agent {
    id: AgentId,
    config: Config,
    inventory: Arc<InventoryManager>,
    discovery: Arc<DiscoveryEngine>,
    operations: Arc<OperationExecutor>,
    factory: Arc<FactoryExecutor>,
}

impl Agent {
    pub fn new(config: Config, registry: Arc<PluginRegistry>) -> Self {
        let inventory = Arc::new(InventoryManager::new(registry, config.inventory.clone()));
        let discovery = Arc::new(DiscoveryEngine::new(
            Arc::clone(&inventory),
            config.discovery.clone(),
        ));
        let operations = Arc::new(OperationExecutor::new(Arc::clone(&inventory)));
        let factory = Arc::new(FactoryExecutor::new(
            Arc::clone(&inventory),
            config.operation_timeout(),
        ));

        Self {
            id: config.agent_id,
            config,
            inventory,
            discovery,
            operations,
            factory,
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn inventory(&self) -> &Arc<InventoryManager> {
        &self.inventory
    }

    pub fn discovery(&self) -> &Arc<DiscoveryEngine> {
        &self.discovery
    }

    pub fn operations(&self) -> &Arc<OperationExecutor> {
        &self.operations
    }

    pub fn factory(&self) -> &Arc<FactoryExecutor> {
        &self.factory
    }

    /// Spawns the command actor; its events are sent to `events`.
    pub fn spawn_commands(
        &self,
        supervisor: &mut Supervisor,
        events: mpsc::Sender<AgentEvent>,
    ) -> ActorHandle<AgentCommand> {
        let actor = AgentCommandActor::new(
            Arc::clone(&self.operations),
            Arc::clone(&self.factory),
            events,
        );
        supervisor.spawn(actor, self.config.mailbox_size)
    }

    /// Spawns the discovery loop.
    pub fn spawn_discovery(&self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let discovery = Arc::clone(&self.discovery);
        tokio::spawn(async move { discovery.run(shutdown).await })
    }
}
