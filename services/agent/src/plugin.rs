//! Plugin contract and registry.
//!
//! A plugin contributes resource types. For each type it registers a set of
//! capabilities:
//!
//! - a [`Discoverer`] that finds resources of the type beneath a parent
//! - an optional [`Upgrader`] that migrates nodes when the type's schema changes
//! - a [`ComponentFactory`] that builds the per-resource [`ComponentSet`]
//!
//! A component set always carries a [`Lifecycle`] and may carry an
//! [`OperationInvoker`], a [`ChildFactory`] and a [`ResourceDeleter`]. Call
//! sites check for a capability before using it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use fleet_configuration::{Configuration, SchemaFingerprint};
use fleet_domain::{Availability, ResourceCategory, ResourceType, ResourceTypeKey};
use fleet_id::ResourceId;
use thiserror::Error;
use tracing::info;

// =============================================================================
// Contexts
// =============================================================================

/// The already-inventoried resource a discovery runs beneath.
#[derive(Debug, Clone)]
pub struct ParentResource {
    pub id: ResourceId,
    pub key: String,
    pub resource_type: ResourceTypeKey,
    pub plugin_configuration: Configuration,
}

/// Input to a discovery run for one resource type.
#[derive(Debug, Clone)]
pub struct DiscoveryContext {
    pub resource_type: ResourceType,
    /// `None` when discovering platforms.
    pub parent: Option<ParentResource>,
    /// Plugin configuration resolved from the type's schema.
    pub default_plugin_configuration: Configuration,
}

/// A resource reported by a discoverer.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredResource {
    /// Unique among siblings of the same type and stable across restarts.
    pub key: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    /// Overrides seeded onto the resolved default plugin configuration.
    pub plugin_configuration: Option<Configuration>,
}

impl DiscoveredResource {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            version: None,
            description: None,
            plugin_configuration: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_plugin_configuration(mut self, config: Configuration) -> Self {
        self.plugin_configuration = Some(config);
        self
    }
}

/// What a component sees of the resource it manages.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    pub resource_id: ResourceId,
    pub resource_key: String,
    pub resource_type: ResourceTypeKey,
    pub plugin_configuration: Configuration,
    pub parent_key: Option<String>,
}

/// Input to an upgrade: the node as committed under the previous schema.
#[derive(Debug, Clone)]
pub struct UpgradeContext {
    pub resource_id: ResourceId,
    pub resource_key: String,
    pub resource_name: String,
    /// The type as currently registered.
    pub resource_type: ResourceType,
    pub previous_schema_version: SchemaFingerprint,
    pub plugin_configuration: Configuration,
    pub resource_configuration: Configuration,
}

/// Changes an upgrader wants applied. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpgradeReport {
    pub new_resource_key: Option<String>,
    pub new_name: Option<String>,
    pub new_plugin_configuration: Option<Configuration>,
    pub new_resource_configuration: Option<Configuration>,
}

/// Result of an operation invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationResult {
    pub complex_results: Configuration,
    /// Set when the operation ran but failed.
    pub error_message: Option<String>,
}

/// Request to create a child resource.
#[derive(Debug, Clone)]
pub struct CreateChildRequest {
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub plugin_configuration: Configuration,
    pub resource_configuration: Configuration,
}

/// A child a plugin created.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedChild {
    pub resource_key: String,
    pub resource_name: String,
}

// =============================================================================
// Capabilities
// =============================================================================

#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self, ctx: &DiscoveryContext) -> Result<Vec<DiscoveredResource>>;
}

#[async_trait]
pub trait Upgrader: Send + Sync {
    /// Returns `None` when the node needs no changes.
    async fn upgrade(&self, ctx: &UpgradeContext) -> Result<Option<UpgradeReport>>;
}

#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn start(&self, ctx: &ResourceContext) -> Result<()>;

    async fn stop(&self);

    async fn availability(&self) -> Availability;
}

#[async_trait]
pub trait OperationInvoker: Send + Sync {
    async fn invoke(&self, name: &str, parameters: &Configuration) -> Result<OperationResult>;
}

#[async_trait]
pub trait ChildFactory: Send + Sync {
    async fn create_child(&self, request: &CreateChildRequest) -> Result<CreatedChild>;
}

#[async_trait]
pub trait ResourceDeleter: Send + Sync {
    async fn delete(&self) -> Result<()>;
}

/// The capabilities of one resource's component.
#[derive(Clone)]
pub struct ComponentSet {
    pub lifecycle: Arc<dyn Lifecycle>,
    pub operations: Option<Arc<dyn OperationInvoker>>,
    pub children: Option<Arc<dyn ChildFactory>>,
    pub deleter: Option<Arc<dyn ResourceDeleter>>,
}

impl ComponentSet {
    pub fn new(lifecycle: Arc<dyn Lifecycle>) -> Self {
        Self {
            lifecycle,
            operations: None,
            children: None,
            deleter: None,
        }
    }
}

impl std::fmt::Debug for ComponentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentSet")
            .field("operations", &self.operations.is_some())
            .field("children", &self.children.is_some())
            .field("deleter", &self.deleter.is_some())
            .finish()
    }
}

/// Builds the component for one resource.
pub trait ComponentFactory: Send + Sync {
    fn create(&self, ctx: &ResourceContext) -> Result<ComponentSet>;
}

// =============================================================================
// Registry
// =============================================================================

/// Everything a plugin registered for one resource type.
#[derive(Clone)]
pub struct TypeRegistration {
    pub resource_type: ResourceType,
    pub discoverer: Option<Arc<dyn Discoverer>>,
    pub upgrader: Option<Arc<dyn Upgrader>>,
    pub components: Arc<dyn ComponentFactory>,
}

impl TypeRegistration {
    pub fn new(resource_type: ResourceType, components: Arc<dyn ComponentFactory>) -> Self {
        Self {
            resource_type,
            discoverer: None,
            upgrader: None,
            components,
        }
    }

    #[must_use]
    pub fn with_discoverer(mut self, discoverer: Arc<dyn Discoverer>) -> Self {
        self.discoverer = Some(discoverer);
        self
    }

    #[must_use]
    pub fn with_upgrader(mut self, upgrader: Arc<dyn Upgrader>) -> Self {
        self.upgrader = Some(upgrader);
        self
    }

    pub fn key(&self) -> &ResourceTypeKey {
        &self.resource_type.key
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("root resource type {0} must be a platform")]
    RootNotPlatform(ResourceTypeKey),

    #[error("resource type {child} names unregistered parent type {parent}")]
    UnknownParent {
        child: ResourceTypeKey,
        parent: ResourceTypeKey,
    },
}

/// Registered resource types, swapped atomically as plugins are (re)loaded.
///
/// Readers get a consistent snapshot; registering a type again replaces the
/// previous registration, which is how a plugin upgrade changes a type's
/// schema.
pub struct PluginRegistry {
    types: ArcSwap<HashMap<ResourceTypeKey, TypeRegistration>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            types: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Adds or replaces a type.
    ///
    /// Parent types must already be registered.
    pub fn register(&self, registration: TypeRegistration) -> Result<(), RegistryError> {
        let rt = &registration.resource_type;
        if rt.is_root() && rt.category != ResourceCategory::Platform {
            return Err(RegistryError::RootNotPlatform(rt.key.clone()));
        }

        let current = self.types.load();
        for parent in &rt.parents {
            if parent != &rt.key && !current.contains_key(parent) {
                return Err(RegistryError::UnknownParent {
                    child: rt.key.clone(),
                    parent: parent.clone(),
                });
            }
        }

        info!(
            resource_type = %rt.key,
            schema_version = %rt.schema_version(),
            "Registered resource type"
        );

        self.types.rcu(move |types| {
            let mut next = HashMap::clone(types);
            next.insert(registration.key().clone(), registration.clone());
            next
        });
        Ok(())
    }

    pub fn get(&self, key: &ResourceTypeKey) -> Option<TypeRegistration> {
        self.types.load().get(key).cloned()
    }

    pub fn resource_type(&self, key: &ResourceTypeKey) -> Option<ResourceType> {
        self.types.load().get(key).map(|r| r.resource_type.clone())
    }

    /// Types discovered without a parent, in key order.
    pub fn roots(&self) -> Vec<TypeRegistration> {
        let mut roots: Vec<_> = self
            .types
            .load()
            .values()
            .filter(|r| r.resource_type.is_root())
            .cloned()
            .collect();
        roots.sort_by(|a, b| a.key().cmp(b.key()));
        roots
    }

    /// Types that may be discovered beneath `parent`, in key order.
    pub fn child_types(&self, parent: &ResourceTypeKey) -> Vec<TypeRegistration> {
        let mut children: Vec<_> = self
            .types
            .load()
            .values()
            .filter(|r| r.resource_type.has_parent(parent))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.key().cmp(b.key()));
        children
    }

    pub fn len(&self) -> usize {
        self.types.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.load().is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
