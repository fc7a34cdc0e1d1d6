//! Inventory node state.

use chrono::{DateTime, Utc};
use fleet_configuration::{Configuration, SchemaFingerprint};
use fleet_domain::{Availability, ResourceTypeKey};
use fleet_id::ResourceId;
use serde::{Deserialize, Serialize};

/// Whether a discovered resource has been accepted into inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    /// Reported by a discoverer, awaiting a decision.
    Discovered,
    Committed(Activation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Managed: the component is started and polled.
    Active,
    /// Tracked but never started.
    Ignored,
}

impl InventoryStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, InventoryStatus::Committed(Activation::Active))
    }
}

/// State of the plugin component behind an active node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    #[default]
    Uninitialized,
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceErrorKind {
    /// Discovery of this node's children failed or timed out.
    Discovery,
    Upgrade,
    /// The component failed to start, usually bad plugin configuration.
    ComponentStart,
    Availability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceError {
    pub kind: ResourceErrorKind,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// A tracked resource.
///
/// Parent and children are arena ids; the tree owns every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: ResourceId,
    pub key: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub resource_type: ResourceTypeKey,
    pub plugin_configuration: Configuration,
    pub resource_configuration: Configuration,
    pub inventory_status: InventoryStatus,
    pub component_state: ComponentState,
    pub availability: Availability,
    /// Schema version of the type when the node was last created or upgraded.
    pub schema_version: SchemaFingerprint,
    pub errors: Vec<ResourceError>,
    pub parent: Option<ResourceId>,
    pub children: Vec<ResourceId>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ResourceNode {
    /// Keeps only the latest error of each kind.
    pub fn record_error(&mut self, kind: ResourceErrorKind, message: impl Into<String>) {
        let now = Utc::now();
        let error = ResourceError {
            kind,
            message: message.into(),
            occurred_at: now,
        };
        match self.errors.iter_mut().find(|e| e.kind == kind) {
            Some(existing) => *existing = error,
            None => self.errors.push(error),
        }
        self.modified_at = now;
    }

    pub fn clear_errors(&mut self, kind: ResourceErrorKind) {
        self.errors.retain(|e| e.kind != kind);
    }

    pub fn has_error(&self, kind: ResourceErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    pub fn is_started(&self) -> bool {
        self.component_state == ComponentState::Started
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

/// Resource-specific fields supplied when a node is created.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub key: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub resource_type: ResourceTypeKey,
    pub plugin_configuration: Configuration,
    pub resource_configuration: Configuration,
    pub schema_version: SchemaFingerprint,
    pub inventory_status: InventoryStatus,
}

/// An availability that changed during a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityChange {
    pub resource_id: ResourceId,
    pub previous: Availability,
    pub current: Availability,
}
