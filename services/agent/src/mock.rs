//! Mock plugin for testing and development.
//!
//! One [`MockPlugin`] can back any number of resource types. Its behaviour is
//! swapped atomically, so tests can change what discovery returns or make
//! starts fail between scans. Every call is counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use fleet_configuration::{Configuration, ConfigurationDefinition, PropertyDefinition, SimpleType};
use fleet_domain::{
    Availability, CreateDeletePolicy, OperationDefinition, ResourceCategory, ResourceType,
    ResourceTypeKey,
};
use tracing::{debug, info};

use crate::plugin::{
    ChildFactory, ComponentFactory, ComponentSet, CreateChildRequest, CreatedChild, Discoverer,
    DiscoveredResource, DiscoveryContext, Lifecycle, OperationInvoker, OperationResult,
    PluginRegistry, RegistryError, ResourceContext, ResourceDeleter, TypeRegistration,
    UpgradeContext, UpgradeReport, Upgrader,
};

/// Scripted outcome of a mock operation.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Result(OperationResult),
    Error(String),
}

/// What the mock plugin does when called.
#[derive(Debug, Clone)]
pub struct MockBehaviour {
    /// Discovery results by type, and optionally by parent key.
    ///
    /// A `(type, Some(parent))` entry wins over `(type, None)`.
    pub discovered: HashMap<(ResourceTypeKey, Option<String>), Vec<DiscoveredResource>>,
    pub fail_discovery: bool,
    pub discovery_delay: Option<Duration>,
    pub fail_starts: bool,
    pub start_delay: Option<Duration>,
    pub availability: Availability,
    pub availability_delay: Option<Duration>,
    /// Results by operation name. Unlisted operations succeed and echo their parameters.
    pub operations: HashMap<String, MockOutcome>,
    pub operation_delay: Option<Duration>,
    pub upgrade_report: Option<UpgradeReport>,
    pub fail_upgrades: bool,
    pub fail_creates: bool,
    pub create_delay: Option<Duration>,
    pub fail_deletes: bool,
    /// Whether components carry operation, child-creation and delete capabilities.
    pub with_operations: bool,
    pub with_children: bool,
    pub with_deleter: bool,
}

impl Default for MockBehaviour {
    fn default() -> Self {
        Self {
            discovered: HashMap::new(),
            fail_discovery: false,
            discovery_delay: None,
            fail_starts: false,
            start_delay: None,
            availability: Availability::Up,
            availability_delay: None,
            operations: HashMap::new(),
            operation_delay: None,
            upgrade_report: None,
            fail_upgrades: false,
            fail_creates: false,
            create_delay: None,
            fail_deletes: false,
            with_operations: true,
            with_children: true,
            with_deleter: true,
        }
    }
}

#[derive(Default)]
struct Counters {
    discoveries: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    upgrades: AtomicU64,
    invocations: AtomicU64,
    creates: AtomicU64,
    deletes: AtomicU64,
}

struct MockState {
    behaviour: ArcSwap<MockBehaviour>,
    counters: Counters,
}

/// Mock plugin; clones share behaviour and counters.
#[derive(Clone)]
pub struct MockPlugin {
    state: Arc<MockState>,
}

impl MockPlugin {
    pub fn new() -> Self {
        Self::with_behaviour(MockBehaviour::default())
    }

    /// A plugin whose components never start.
    pub fn failing() -> Self {
        Self::with_behaviour(MockBehaviour {
            fail_starts: true,
            ..Default::default()
        })
    }

    pub fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            state: Arc::new(MockState {
                behaviour: ArcSwap::from_pointee(behaviour),
                counters: Counters::default(),
            }),
        }
    }

    /// Changes behaviour for subsequent calls.
    pub fn configure(&self, f: impl Fn(&mut MockBehaviour)) {
        self.state.behaviour.rcu(|current| {
            let mut next = MockBehaviour::clone(current);
            f(&mut next);
            next
        });
    }

    /// Sets what discovery of `resource_type` returns beneath any parent.
    pub fn discover(&self, resource_type: &ResourceTypeKey, resources: Vec<DiscoveredResource>) {
        self.configure(|b| {
            b.discovered
                .insert((resource_type.clone(), None), resources.clone());
        });
    }

    /// Sets what discovery of `resource_type` returns beneath the parent keyed `parent_key`.
    pub fn discover_under(
        &self,
        resource_type: &ResourceTypeKey,
        parent_key: &str,
        resources: Vec<DiscoveredResource>,
    ) {
        self.configure(|b| {
            b.discovered.insert(
                (resource_type.clone(), Some(parent_key.to_string())),
                resources.clone(),
            );
        });
    }

    /// A registration for `resource_type` backed by this plugin.
    pub fn registration(&self, resource_type: ResourceType) -> TypeRegistration {
        TypeRegistration::new(resource_type, Arc::new(self.clone()))
            .with_discoverer(Arc::new(self.clone()))
            .with_upgrader(Arc::new(self.clone()))
    }

    pub fn discoveries(&self) -> u64 {
        self.state.counters.discoveries.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u64 {
        self.state.counters.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u64 {
        self.state.counters.stops.load(Ordering::SeqCst)
    }

    pub fn upgrades(&self) -> u64 {
        self.state.counters.upgrades.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> u64 {
        self.state.counters.invocations.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> u64 {
        self.state.counters.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> u64 {
        self.state.counters.deletes.load(Ordering::SeqCst)
    }

    fn behaviour(&self) -> Arc<MockBehaviour> {
        self.state.behaviour.load_full()
    }
}

impl Default for MockPlugin {
    fn default() -> Self {
        Self::new()
    }
}

async fn pause(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl Discoverer for MockPlugin {
    async fn discover(&self, ctx: &DiscoveryContext) -> Result<Vec<DiscoveredResource>> {
        self.state.counters.discoveries.fetch_add(1, Ordering::SeqCst);
        let behaviour = self.behaviour();
        pause(behaviour.discovery_delay).await;

        if behaviour.fail_discovery {
            bail!("Mock plugin configured to fail discovery");
        }

        let key = &ctx.resource_type.key;
        let parent_key = ctx.parent.as_ref().map(|p| p.key.clone());
        let found = behaviour
            .discovered
            .get(&(key.clone(), parent_key.clone()))
            .or_else(|| behaviour.discovered.get(&(key.clone(), None)))
            .cloned()
            .unwrap_or_default();

        debug!(
            resource_type = %key,
            parent_key = parent_key.as_deref().unwrap_or("-"),
            found = found.len(),
            "[MOCK] Discovery"
        );
        Ok(found)
    }
}

#[async_trait]
impl Upgrader for MockPlugin {
    async fn upgrade(&self, ctx: &UpgradeContext) -> Result<Option<UpgradeReport>> {
        self.state.counters.upgrades.fetch_add(1, Ordering::SeqCst);
        let behaviour = self.behaviour();
        if behaviour.fail_upgrades {
            bail!("Mock plugin configured to fail upgrades");
        }
        info!(resource_key = %ctx.resource_key, "[MOCK] Upgrading resource");
        Ok(behaviour.upgrade_report.clone())
    }
}

impl ComponentFactory for MockPlugin {
    fn create(&self, ctx: &ResourceContext) -> Result<ComponentSet> {
        let behaviour = self.behaviour();
        let component = Arc::new(MockComponent {
            plugin: self.clone(),
            resource_key: ctx.resource_key.clone(),
        });

        let mut set = ComponentSet::new(component.clone());
        if behaviour.with_operations {
            set.operations = Some(component.clone());
        }
        if behaviour.with_children {
            set.children = Some(component.clone());
        }
        if behaviour.with_deleter {
            set.deleter = Some(component);
        }
        Ok(set)
    }
}

/// Component built for one resource.
pub struct MockComponent {
    plugin: MockPlugin,
    resource_key: String,
}

#[async_trait]
impl Lifecycle for MockComponent {
    async fn start(&self, _ctx: &ResourceContext) -> Result<()> {
        let counters = &self.plugin.state.counters;
        counters.starts.fetch_add(1, Ordering::SeqCst);
        let behaviour = self.plugin.behaviour();
        pause(behaviour.start_delay).await;

        if behaviour.fail_starts {
            bail!("Mock plugin configured to fail");
        }
        info!(resource_key = %self.resource_key, "[MOCK] Started component");
        Ok(())
    }

    async fn stop(&self) {
        self.plugin.state.counters.stops.fetch_add(1, Ordering::SeqCst);
        info!(resource_key = %self.resource_key, "[MOCK] Stopped component");
    }

    async fn availability(&self) -> Availability {
        let behaviour = self.plugin.behaviour();
        pause(behaviour.availability_delay).await;
        behaviour.availability
    }
}

#[async_trait]
impl OperationInvoker for MockComponent {
    async fn invoke(&self, name: &str, parameters: &Configuration) -> Result<OperationResult> {
        self.plugin.state.counters.invocations.fetch_add(1, Ordering::SeqCst);
        let behaviour = self.plugin.behaviour();
        info!(resource_key = %self.resource_key, operation = name, "[MOCK] Invoking operation");
        pause(behaviour.operation_delay).await;

        match behaviour.operations.get(name) {
            Some(MockOutcome::Result(result)) => Ok(result.clone()),
            Some(MockOutcome::Error(message)) => bail!("{message}"),
            None => Ok(OperationResult {
                complex_results: parameters.clone(),
                error_message: None,
            }),
        }
    }
}

#[async_trait]
impl ChildFactory for MockComponent {
    async fn create_child(&self, request: &CreateChildRequest) -> Result<CreatedChild> {
        self.plugin.state.counters.creates.fetch_add(1, Ordering::SeqCst);
        let behaviour = self.plugin.behaviour();
        pause(behaviour.create_delay).await;

        if behaviour.fail_creates {
            bail!("Mock plugin configured to fail creates");
        }
        info!(
            parent_key = %self.resource_key,
            resource_name = %request.resource_name,
            "[MOCK] Created child resource"
        );
        Ok(CreatedChild {
            resource_key: format!("{}/{}", self.resource_key, request.resource_name),
            resource_name: request.resource_name.clone(),
        })
    }
}

#[async_trait]
impl ResourceDeleter for MockComponent {
    async fn delete(&self) -> Result<()> {
        self.plugin.state.counters.deletes.fetch_add(1, Ordering::SeqCst);
        if self.plugin.behaviour().fail_deletes {
            bail!("Mock plugin configured to fail deletes");
        }
        info!(resource_key = %self.resource_key, "[MOCK] Deleted resource");
        Ok(())
    }
}

// =============================================================================
// Demo inventory
// =============================================================================

/// Resource types of the demo inventory: a host with a database server and
/// its databases.
pub fn demo_types() -> Vec<ResourceType> {
    let host = ResourceType::new("demo", "host", ResourceCategory::Platform);

    let port = PropertyDefinition::simple("port")
        .of_type(SimpleType::Integer)
        .required()
        .with_default("5432");
    let server_config = ConfigurationDefinition::new("demo:db-server/plugin", vec![port]);
    let mut server = ResourceType::new("demo", "db-server", ResourceCategory::Server)
        .with_parent(host.key.clone())
        .with_operation(OperationDefinition::new("restart").with_timeout(Duration::from_secs(60)));
    if let Ok(definition) = server_config {
        server = server.with_plugin_config(definition);
    }

    let owner = PropertyDefinition::simple("owner").required().with_default("postgres");
    let mut database = ResourceType::new("demo", "database", ResourceCategory::Service)
        .with_parent(server.key.clone())
        .with_operation(OperationDefinition::new("vacuum"))
        .with_policy(CreateDeletePolicy::Both);
    if let Ok(definition) = ConfigurationDefinition::new("demo:database/resource", vec![owner]) {
        database = database.with_resource_config(definition);
    }

    vec![host, server, database]
}

/// Registers the demo types backed by `plugin` and seeds their discovery results.
pub fn register_demo(registry: &PluginRegistry, plugin: &MockPlugin, host_name: &str) -> Result<(), RegistryError> {
    for resource_type in demo_types() {
        registry.register(plugin.registration(resource_type))?;
    }

    plugin.discover(
        &ResourceTypeKey::new("demo", "host"),
        vec![DiscoveredResource::new(host_name, host_name)],
    );
    plugin.discover(
        &ResourceTypeKey::new("demo", "db-server"),
        vec![DiscoveredResource::new("postgres:5432", "PostgreSQL").with_version("16.2")],
    );
    plugin.discover(
        &ResourceTypeKey::new("demo", "database"),
        vec![
            DiscoveredResource::new("orders", "orders"),
            DiscoveredResource::new("inventory", "inventory"),
        ],
    );
    Ok(())
}
