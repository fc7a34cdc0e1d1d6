//! # fleet-server
//!
//! The server side of fleet: it records every operation run against managed
//! resources and correlates resource create/delete requests with the
//! responses agents send back.
//!
//! ## Architecture
//!
//! ```text
//!                   ┌────────────── ServerContext ──────────────┐
//!  schedule/cancel ─► OperationService ─► OperationTracker        │
//!  create/delete  ──► ResourceFactoryProtocol                     │
//!                   └──────┬──────────────────────────▲──────────┘
//!                          │ AgentCommand             │ AgentEvent
//!                          ▼                          │
//!                    AgentTransport ──► agent ──► events::dispatch
//! ```
//!
//! Both services run a sweeper that times out work an agent never answered.

pub mod config;
pub mod events;
pub mod factory;
pub mod operation;
pub mod state;
pub mod transport;

pub use config::Config;
pub use factory::{FactoryConfig, FactoryError, ResourceFactoryProtocol};
pub use operation::{OperationConfig, OperationService, OperationTracker, TrackerError};
pub use state::ServerContext;
pub use transport::{AgentTransport, TransportError};
