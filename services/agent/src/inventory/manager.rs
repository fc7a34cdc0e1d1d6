//! Inventory manager: the tree plus the plugin calls that mutate it.
//!
//! Every mutation (merge, commit, ignore, activate, deactivate, upgrade,
//! remove) holds the manager's mutation lock for its whole duration,
//! including the plugin calls it makes, so two mutations never interleave.
//! The tree lock itself is only held for short synchronous sections and is
//! never held across a plugin call. Readers take the tree lock only.

use std::sync::Arc;
use std::time::Duration;

use fleet_configuration::{adapt, resolve, Configuration};
use fleet_domain::{Availability, ResourceTypeKey};
use fleet_id::ResourceId;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::InventoryError;
use super::node::{
    Activation, AvailabilityChange, ComponentState, InventoryStatus, NewResource, ResourceErrorKind,
    ResourceNode,
};
use super::tree::InventoryTree;
use crate::plugin::{
    ComponentSet, DiscoveredResource, PluginRegistry, ResourceContext, UpgradeContext,
};

/// Time limits and policies for inventory mutations.
#[derive(Debug, Clone)]
pub struct InventoryConfig {
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub availability_timeout: Duration,
    pub upgrade_timeout: Duration,
    /// Commit and start newly discovered resources without waiting for an operator.
    pub auto_commit: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(30),
            availability_timeout: Duration::from_secs(5),
            upgrade_timeout: Duration::from_secs(60),
            auto_commit: false,
        }
    }
}

/// What a discovery merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: Vec<ResourceId>,
    /// Existing nodes whose name or version changed.
    pub updated: Vec<ResourceId>,
    pub upgraded: Vec<ResourceId>,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The node already matches its type's schema version.
    Current,
    Upgraded { key_changed: bool },
}

pub struct InventoryManager {
    registry: Arc<PluginRegistry>,
    tree: RwLock<InventoryTree>,
    mutations: Mutex<()>,
    config: InventoryConfig,
}

impl InventoryManager {
    pub fn new(registry: Arc<PluginRegistry>, config: InventoryConfig) -> Self {
        Self {
            registry,
            tree: RwLock::new(InventoryTree::new()),
            mutations: Mutex::new(()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, id: ResourceId) -> Option<ResourceNode> {
        self.tree.read().await.get(id).cloned()
    }

    /// Children of `parent`, or the roots when `parent` is `None`.
    pub async fn children(&self, parent: Option<ResourceId>) -> Vec<ResourceNode> {
        let tree = self.tree.read().await;
        tree.child_ids(parent)
            .iter()
            .filter_map(|id| tree.get(*id).cloned())
            .collect()
    }

    pub async fn find(
        &self,
        parent: Option<ResourceId>,
        resource_type: &ResourceTypeKey,
        key: &str,
    ) -> Option<ResourceId> {
        self.tree.read().await.find(parent, resource_type, key)
    }

    pub async fn component(&self, id: ResourceId) -> Option<ComponentSet> {
        self.tree.read().await.component(id).cloned()
    }

    /// All nodes ordered by id.
    pub async fn snapshot(&self) -> Vec<ResourceNode> {
        let mut nodes: Vec<_> = self.tree.read().await.iter().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    pub async fn len(&self) -> usize {
        self.tree.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tree.read().await.is_empty()
    }

    // =========================================================================
    // Errors
    // =========================================================================

    pub async fn record_error(&self, id: ResourceId, kind: ResourceErrorKind, message: impl Into<String>) {
        if let Some(node) = self.tree.write().await.get_mut(id) {
            node.record_error(kind, message);
        }
    }

    pub async fn clear_errors(&self, id: ResourceId, kind: ResourceErrorKind) {
        if let Some(node) = self.tree.write().await.get_mut(id) {
            node.clear_errors(kind);
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Merges one discoverer's results for `resource_type` beneath `parent`.
    ///
    /// Resources are matched to existing children by type and key. New ones
    /// are added with configurations resolved from the type's schemas, with
    /// any discovered plugin configuration laid over the defaults. Matched
    /// nodes whose schema version is stale are upgraded.
    pub async fn merge(
        &self,
        parent: Option<ResourceId>,
        resource_type: &ResourceTypeKey,
        discovered: Vec<DiscoveredResource>,
    ) -> Result<MergeReport, InventoryError> {
        let _guard = self.mutations.lock().await;

        let registration = self
            .registry
            .get(resource_type)
            .ok_or_else(|| InventoryError::UnknownType(resource_type.clone()))?;
        let rt = &registration.resource_type;
        let version = rt.schema_version();

        if let Some(parent_id) = parent {
            self.tree.read().await.require(parent_id)?;
        }

        let mut report = MergeReport::default();
        for item in discovered {
            let existing = self.tree.read().await.find(parent, resource_type, &item.key);
            match existing {
                Some(id) => {
                    let (changed, stale) = {
                        let mut tree = self.tree.write().await;
                        let node = tree.require_mut(id)?;
                        let changed = node.name != item.name || node.version != item.version;
                        if changed {
                            node.name = item.name;
                            node.version = item.version;
                            node.touch();
                        }
                        (changed, node.schema_version != version)
                    };

                    if stale {
                        match self.upgrade_locked(id).await {
                            Ok(UpgradeOutcome::Upgraded { .. }) => report.upgraded.push(id),
                            Ok(UpgradeOutcome::Current) => {}
                            Err(e) => warn!(resource_id = %id, error = %e, "Upgrade during merge failed"),
                        }
                    } else if changed {
                        report.updated.push(id);
                    } else {
                        report.unchanged += 1;
                    }
                }
                None => {
                    let mut plugin_configuration = resolve(&rt.plugin_config_definition);
                    if let Some(overrides) = item.plugin_configuration {
                        for property in overrides.properties().iter() {
                            plugin_configuration.insert(property.name.clone(), property.value.clone());
                        }
                    }
                    let inventory_status = if self.config.auto_commit {
                        InventoryStatus::Committed(Activation::Active)
                    } else {
                        InventoryStatus::Discovered
                    };

                    let id = self.tree.write().await.insert(
                        parent,
                        NewResource {
                            key: item.key,
                            name: item.name,
                            version: item.version,
                            description: item.description,
                            resource_type: resource_type.clone(),
                            plugin_configuration,
                            resource_configuration: resolve(&rt.resource_config_definition),
                            schema_version: version.clone(),
                            inventory_status,
                        },
                    )?;
                    info!(resource_id = %id, resource_type = %resource_type, "Discovered new resource");
                    report.added.push(id);

                    if self.config.auto_commit {
                        if let Err(e) = self.activate_locked(id).await {
                            warn!(resource_id = %id, error = %e, "Auto-committed resource did not start");
                        }
                    }
                }
            }
        }

        debug!(
            resource_type = %resource_type,
            added = report.added.len(),
            updated = report.updated.len(),
            upgraded = report.upgraded.len(),
            unchanged = report.unchanged,
            "Merged discovery results"
        );
        Ok(report)
    }

    /// Adds a resource a plugin created on request, committed and started.
    pub async fn add_created(
        &self,
        parent: ResourceId,
        resource_type: &ResourceTypeKey,
        key: String,
        name: String,
        plugin_configuration: Configuration,
        resource_configuration: Configuration,
    ) -> Result<ResourceId, InventoryError> {
        let _guard = self.mutations.lock().await;

        let rt = self
            .registry
            .resource_type(resource_type)
            .ok_or_else(|| InventoryError::UnknownType(resource_type.clone()))?;

        let id = self.tree.write().await.insert(
            Some(parent),
            NewResource {
                key,
                name,
                version: None,
                description: None,
                resource_type: resource_type.clone(),
                plugin_configuration,
                resource_configuration,
                schema_version: rt.schema_version(),
                inventory_status: InventoryStatus::Committed(Activation::Active),
            },
        )?;
        info!(resource_id = %id, parent_id = %parent, resource_type = %resource_type, "Added created resource");

        if let Err(e) = self.activate_locked(id).await {
            warn!(resource_id = %id, error = %e, "Created resource did not start");
        }
        Ok(id)
    }

    /// Accepts a resource into inventory and starts its component.
    ///
    /// Returns the resulting component state. A failed start leaves the node
    /// committed but uninitialized with a recorded error; it is not an `Err`.
    pub async fn commit(&self, id: ResourceId) -> Result<ComponentState, InventoryError> {
        let _guard = self.mutations.lock().await;

        {
            let mut tree = self.tree.write().await;
            let node = tree.require_mut(id)?;
            if !node.inventory_status.is_active() {
                node.inventory_status = InventoryStatus::Committed(Activation::Active);
                node.touch();
                info!(resource_id = %id, "Committed resource");
            }
        }

        match self.activate_locked(id).await {
            Ok(()) => Ok(ComponentState::Started),
            Err(InventoryError::StartFailed { .. }) => Ok(ComponentState::Uninitialized),
            Err(e) => Err(e),
        }
    }

    /// Keeps a resource in inventory without managing it.
    pub async fn ignore(&self, id: ResourceId) -> Result<(), InventoryError> {
        let _guard = self.mutations.lock().await;

        self.deactivate_locked(id).await?;
        let mut tree = self.tree.write().await;
        let node = tree.require_mut(id)?;
        node.inventory_status = InventoryStatus::Committed(Activation::Ignored);
        node.touch();
        info!(resource_id = %id, "Ignored resource");
        Ok(())
    }

    /// Starts the component of an active resource. Started resources are left alone.
    pub async fn activate(&self, id: ResourceId) -> Result<(), InventoryError> {
        let _guard = self.mutations.lock().await;
        self.activate_locked(id).await
    }

    pub async fn deactivate(&self, id: ResourceId) -> Result<(), InventoryError> {
        let _guard = self.mutations.lock().await;
        self.deactivate_locked(id).await
    }

    /// Removes `id` and its descendants.
    ///
    /// Components are stopped depth-first before anything is detached, so no
    /// component runs while its subtree is half removed. Returns the removed
    /// ids, children first.
    pub async fn remove(&self, id: ResourceId) -> Result<Vec<ResourceId>, InventoryError> {
        let _guard = self.mutations.lock().await;

        let order = {
            let tree = self.tree.read().await;
            tree.require(id)?;
            tree.post_order(id)
        };

        for node_id in &order {
            self.deactivate_locked(*node_id).await?;
        }

        let removed: Vec<ResourceId> = self
            .tree
            .write()
            .await
            .detach(id)
            .into_iter()
            .map(|(node, _component)| node.id)
            .collect();

        info!(resource_id = %id, removed = removed.len(), "Removed resource subtree");
        Ok(removed)
    }

    /// Upgrades one node to its type's current schema version.
    pub async fn upgrade(&self, id: ResourceId) -> Result<UpgradeOutcome, InventoryError> {
        let _guard = self.mutations.lock().await;
        self.upgrade_locked(id).await
    }

    /// Upgrades every committed node whose schema version is stale.
    ///
    /// Failures are recorded on the nodes; the returned ids are those that
    /// were upgraded.
    pub async fn upgrade_stale(&self) -> Vec<ResourceId> {
        let _guard = self.mutations.lock().await;

        let stale: Vec<ResourceId> = {
            let tree = self.tree.read().await;
            let mut ids: Vec<_> = tree
                .iter()
                .filter(|node| node.inventory_status != InventoryStatus::Discovered)
                .filter(|node| {
                    self.registry
                        .resource_type(&node.resource_type)
                        .is_some_and(|rt| rt.schema_version() != node.schema_version)
                })
                .map(|node| node.id)
                .collect();
            ids.sort();
            ids
        };

        let mut upgraded = Vec::new();
        for id in stale {
            match self.upgrade_locked(id).await {
                Ok(UpgradeOutcome::Upgraded { .. }) => upgraded.push(id),
                Ok(UpgradeOutcome::Current) => {}
                Err(e) => warn!(resource_id = %id, error = %e, "Inventory upgrade failed"),
            }
        }
        upgraded
    }

    /// Polls every started component and returns the availabilities that changed.
    ///
    /// A poll that exceeds the availability timeout counts as down.
    pub async fn check_availability(&self) -> Vec<AvailabilityChange> {
        let targets: Vec<_> = {
            let tree = self.tree.read().await;
            tree.iter()
                .filter(|node| node.is_started())
                .filter_map(|node| {
                    tree.component(node.id)
                        .map(|c| (node.id, Arc::clone(&c.lifecycle)))
                })
                .collect()
        };

        let limit = self.config.availability_timeout;
        let mut polls = JoinSet::new();
        for (id, lifecycle) in targets {
            polls.spawn(async move { (id, timeout(limit, lifecycle.availability()).await.ok()) });
        }

        let mut changes = Vec::new();
        while let Some(joined) = polls.join_next().await {
            let (id, polled) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Availability check task failed");
                    continue;
                }
            };

            let mut tree = self.tree.write().await;
            let Some(node) = tree.get_mut(id) else {
                continue;
            };
            if !node.is_started() {
                continue;
            }

            let current = match polled {
                Some(availability) => {
                    node.clear_errors(ResourceErrorKind::Availability);
                    availability
                }
                None => {
                    if !node.has_error(ResourceErrorKind::Availability) {
                        node.record_error(
                            ResourceErrorKind::Availability,
                            format!("availability check timed out after {}ms", limit.as_millis()),
                        );
                    }
                    Availability::Down
                }
            };

            if node.availability != current {
                changes.push(AvailabilityChange {
                    resource_id: id,
                    previous: node.availability,
                    current,
                });
                node.availability = current;
                node.touch();
            }
        }

        changes.sort_by_key(|c| c.resource_id);
        changes
    }

    // =========================================================================
    // Locked helpers: callers hold `mutations`
    // =========================================================================

    async fn activate_locked(&self, id: ResourceId) -> Result<(), InventoryError> {
        let (ctx, registration, existing) = {
            let tree = self.tree.read().await;
            let node = tree.require(id)?;
            if !node.inventory_status.is_active() {
                return Err(InventoryError::NotActive(id));
            }
            if node.is_started() {
                return Ok(());
            }
            let registration = self
                .registry
                .get(&node.resource_type)
                .ok_or_else(|| InventoryError::UnknownType(node.resource_type.clone()))?;
            let ctx = ResourceContext {
                resource_id: id,
                resource_key: node.key.clone(),
                resource_type: node.resource_type.clone(),
                plugin_configuration: node.plugin_configuration.clone(),
                parent_key: node.parent.and_then(|p| tree.get(p)).map(|p| p.key.clone()),
            };
            (ctx, registration, tree.component(id).cloned())
        };

        let component = match existing {
            Some(component) => component,
            None => match registration.components.create(&ctx) {
                Ok(component) => component,
                Err(e) => return self.start_failed(id, format!("{e:#}")).await,
            },
        };

        match timeout(self.config.start_timeout, component.lifecycle.start(&ctx)).await {
            Ok(Ok(())) => {
                let mut tree = self.tree.write().await;
                tree.set_component(id, component);
                if let Some(node) = tree.get_mut(id) {
                    node.component_state = ComponentState::Started;
                    node.availability = Availability::Unknown;
                    node.clear_errors(ResourceErrorKind::ComponentStart);
                    node.touch();
                }
                info!(resource_id = %id, resource_key = %ctx.resource_key, "Started resource component");
                Ok(())
            }
            Ok(Err(e)) => self.start_failed(id, format!("{e:#}")).await,
            Err(_) => {
                self.start_failed(
                    id,
                    format!("start timed out after {}ms", self.config.start_timeout.as_millis()),
                )
                .await
            }
        }
    }

    async fn start_failed(&self, id: ResourceId, message: String) -> Result<(), InventoryError> {
        let mut tree = self.tree.write().await;
        tree.take_component(id);
        if let Some(node) = tree.get_mut(id) {
            node.component_state = ComponentState::Uninitialized;
            node.record_error(ResourceErrorKind::ComponentStart, message.clone());
        }
        warn!(resource_id = %id, error = %message, "Resource component failed to start");
        Err(InventoryError::StartFailed { id, message })
    }

    async fn deactivate_locked(&self, id: ResourceId) -> Result<(), InventoryError> {
        let component = {
            let tree = self.tree.read().await;
            if !tree.require(id)?.is_started() {
                return Ok(());
            }
            tree.component(id).cloned()
        };

        if let Some(component) = component {
            if timeout(self.config.stop_timeout, component.lifecycle.stop()).await.is_err() {
                warn!(resource_id = %id, "Resource component did not stop in time");
            }
        }

        if let Some(node) = self.tree.write().await.get_mut(id) {
            node.component_state = ComponentState::Stopped;
            node.availability = Availability::Unknown;
            node.touch();
        }
        info!(resource_id = %id, "Stopped resource component");
        Ok(())
    }

    async fn upgrade_locked(&self, id: ResourceId) -> Result<UpgradeOutcome, InventoryError> {
        let (ctx, registration, started) = {
            let tree = self.tree.read().await;
            let node = tree.require(id)?;
            let registration = self
                .registry
                .get(&node.resource_type)
                .ok_or_else(|| InventoryError::UnknownType(node.resource_type.clone()))?;
            if node.schema_version == registration.resource_type.schema_version() {
                return Ok(UpgradeOutcome::Current);
            }
            let ctx = UpgradeContext {
                resource_id: id,
                resource_key: node.key.clone(),
                resource_name: node.name.clone(),
                resource_type: registration.resource_type.clone(),
                previous_schema_version: node.schema_version.clone(),
                plugin_configuration: node.plugin_configuration.clone(),
                resource_configuration: node.resource_configuration.clone(),
            };
            (ctx, registration, node.is_started())
        };

        let report = match &registration.upgrader {
            Some(upgrader) => match timeout(self.config.upgrade_timeout, upgrader.upgrade(&ctx)).await {
                Ok(Ok(report)) => report.unwrap_or_default(),
                Ok(Err(e)) => return self.upgrade_failed(id, format!("{e:#}")).await,
                Err(_) => {
                    let message = format!(
                        "upgrade timed out after {}ms",
                        self.config.upgrade_timeout.as_millis()
                    );
                    return self.upgrade_failed(id, message).await;
                }
            },
            None => Default::default(),
        };

        let rt = &registration.resource_type;
        // Configurations handed back by the upgrader are authoritative for
        // read-only values; carried-over ones take the new schema's defaults.
        let plugin_configuration = match &report.new_plugin_configuration {
            Some(config) => adapt(config, &rt.plugin_config_definition, true),
            None => adapt(&ctx.plugin_configuration, &rt.plugin_config_definition, false),
        };
        let resource_configuration = match &report.new_resource_configuration {
            Some(config) => adapt(config, &rt.resource_config_definition, true),
            None => adapt(&ctx.resource_configuration, &rt.resource_config_definition, false),
        };
        let new_key = report
            .new_resource_key
            .clone()
            .filter(|key| *key != ctx.resource_key);

        let collision = {
            let tree = self.tree.read().await;
            let parent = tree.require(id)?.parent;
            new_key
                .as_ref()
                .is_some_and(|key| tree.find(parent, &rt.key, key).is_some())
        };
        if let (true, Some(key)) = (collision, &new_key) {
            let message = format!("upgraded key '{key}' collides with an existing sibling");
            return self.upgrade_failed(id, message).await;
        }

        let plugin_config_changed = {
            let mut tree = self.tree.write().await;
            let node = tree.require_mut(id)?;
            let changed = node.plugin_configuration != plugin_configuration;
            if let Some(key) = &new_key {
                node.key = key.clone();
            }
            if let Some(name) = &report.new_name {
                node.name = name.clone();
            }
            node.plugin_configuration = plugin_configuration;
            node.resource_configuration = resource_configuration;
            node.schema_version = rt.schema_version();
            node.clear_errors(ResourceErrorKind::Upgrade);
            node.touch();
            changed
        };

        info!(
            resource_id = %id,
            old_key = %ctx.resource_key,
            new_key = new_key.as_deref().unwrap_or(&ctx.resource_key),
            schema_version = %rt.schema_version(),
            "Upgraded resource"
        );

        if started && plugin_config_changed {
            self.deactivate_locked(id).await?;
            if let Err(e) = self.activate_locked(id).await {
                warn!(resource_id = %id, error = %e, "Upgraded resource did not restart");
            }
        }

        Ok(UpgradeOutcome::Upgraded {
            key_changed: new_key.is_some(),
        })
    }

    async fn upgrade_failed(&self, id: ResourceId, message: String) -> Result<UpgradeOutcome, InventoryError> {
        if let Some(node) = self.tree.write().await.get_mut(id) {
            node.record_error(ResourceErrorKind::Upgrade, message.clone());
        }
        warn!(resource_id = %id, error = %message, "Resource upgrade failed");
        Err(InventoryError::UpgradeFailed { id, message })
    }
}
