//! # fleet-agent
//!
//! The agent runs next to the resources it manages. Plugins tell it which
//! resource types exist and how to find, start, upgrade and operate them;
//! the agent keeps the resulting inventory tree and carries out commands
//! from the server.
//!
//! ## Architecture
//!
//! ```text
//! PluginRegistry ──► InventoryManager ◄── DiscoveryEngine  (scan + availability loop)
//!                         ▲    ▲
//!        OperationExecutor    FactoryExecutor
//!                         ▲    ▲
//!                    AgentCommandActor ◄── AgentCommand / ──► AgentEvent
//! ```
//!
//! ## Modules
//!
//! - `plugin`: capability traits and the type registry
//! - `inventory`: node state, the arena tree and its mutations
//! - `discovery`: the scan loop
//! - `operations`, `factory`: command executors
//! - `actors`: mailbox plumbing between server and executors
//! - `mock`: an in-process plugin for tests and the demo binary

pub mod actors;
pub mod agent;
pub mod config;
pub mod discovery;
pub mod factory;
pub mod inventory;
pub mod mock;
pub mod operations;
pub mod plugin;

pub use agent::Agent;
pub use config::Config;
pub use discovery::{DiscoveryConfig, DiscoveryEngine, ScanReport};
pub use inventory::{InventoryConfig, InventoryError, InventoryManager};
pub use mock::MockPlugin;
pub use plugin::PluginRegistry;
