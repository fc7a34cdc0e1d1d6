//! Shared fixtures for agent integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use fleet_agent::inventory::{InventoryConfig, InventoryManager};
use fleet_agent::plugin::{DiscoveredResource, PluginRegistry};
use fleet_agent::MockPlugin;
use fleet_configuration::{ConfigurationDefinition, PropertyDefinition};
use fleet_domain::{
    CreateDeletePolicy, OperationDefinition, ResourceCategory, ResourceType, ResourceTypeKey,
};
use fleet_id::ResourceId;

pub fn host_type() -> ResourceType {
    ResourceType::new("test", "host", ResourceCategory::Platform)
}

pub fn server_type() -> ResourceType {
    let port = PropertyDefinition::simple("port").required().with_default("5432");
    ResourceType::new("test", "server", ResourceCategory::Server)
        .with_parent(host_type().key)
        .with_plugin_config(ConfigurationDefinition::new("test:server/plugin", vec![port]).unwrap())
}

/// `server_type` with an extra required `tls` property; a new schema version.
pub fn server_type_v2() -> ResourceType {
    let port = PropertyDefinition::simple("port").required().with_default("5432");
    let tls = PropertyDefinition::simple("tls").required().with_default("off");
    server_type()
        .with_plugin_config(ConfigurationDefinition::new("test:server/plugin", vec![port, tls]).unwrap())
}

pub fn database_type() -> ResourceType {
    let owner = PropertyDefinition::simple("owner").required();
    ResourceType::new("test", "database", ResourceCategory::Service)
        .with_parent(server_type().key)
        .with_resource_config(ConfigurationDefinition::new("test:database/resource", vec![owner]).unwrap())
        .with_operation(OperationDefinition::new("vacuum"))
        .with_operation(OperationDefinition::new("reindex"))
        .with_policy(CreateDeletePolicy::Both)
}

pub fn key(rt: &ResourceType) -> ResourceTypeKey {
    rt.key.clone()
}

pub struct Fixture {
    pub plugin: MockPlugin,
    pub registry: Arc<PluginRegistry>,
    pub inventory: Arc<InventoryManager>,
}

/// Registry with host, server and database types backed by one mock plugin.
pub fn fixture(config: InventoryConfig) -> Fixture {
    let plugin = MockPlugin::new();
    let registry = Arc::new(PluginRegistry::new());
    for rt in [host_type(), server_type(), database_type()] {
        registry.register(plugin.registration(rt)).unwrap();
    }
    let inventory = Arc::new(InventoryManager::new(Arc::clone(&registry), config));
    Fixture {
        plugin,
        registry,
        inventory,
    }
}

impl Fixture {
    /// Merges and commits one resource of `rt` beneath `parent`.
    pub async fn committed(&self, parent: Option<ResourceId>, rt: &ResourceType, name: &str) -> ResourceId {
        let report = self
            .inventory
            .merge(parent, &rt.key, vec![DiscoveredResource::new(name, name)])
            .await
            .unwrap();
        let id = report.added[0];
        self.inventory.commit(id).await.unwrap();
        id
    }

    /// host → server → database, all committed and started.
    pub async fn chain(&self) -> (ResourceId, ResourceId, ResourceId) {
        let host = self.committed(None, &host_type(), "host-1").await;
        let server = self.committed(Some(host), &server_type(), "pg").await;
        let db = self.committed(Some(server), &database_type(), "orders").await;
        (host, server, db)
    }
}
