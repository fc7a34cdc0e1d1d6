//! Resource inventory: the tree of discovered resources and its lifecycle.

mod error;
mod manager;
mod node;
mod tree;

pub use error::InventoryError;
pub use manager::{InventoryConfig, InventoryManager, MergeReport, UpgradeOutcome};
pub use node::{
    Activation, AvailabilityChange, ComponentState, InventoryStatus, NewResource, ResourceError,
    ResourceErrorKind, ResourceNode,
};
pub use tree::InventoryTree;
