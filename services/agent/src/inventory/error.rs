//! Inventory errors.

use fleet_domain::ResourceTypeKey;
use fleet_id::ResourceId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("resource {0} not found")]
    NotFound(ResourceId),

    #[error("resource type {0} is not registered")]
    UnknownType(ResourceTypeKey),

    #[error("a {resource_type} resource with key '{key}' already exists under {}", display_parent(.parent))]
    DuplicateKey {
        parent: Option<ResourceId>,
        resource_type: ResourceTypeKey,
        key: String,
    },

    #[error("resource {0} is not committed as active")]
    NotActive(ResourceId),

    #[error("resource {id} failed to start: {message}")]
    StartFailed { id: ResourceId, message: String },

    #[error("resource {id} failed to upgrade: {message}")]
    UpgradeFailed { id: ResourceId, message: String },
}

fn display_parent(parent: &Option<ResourceId>) -> String {
    match parent {
        Some(id) => format!("resource {id}"),
        None => "the inventory root".to_string(),
    }
}
