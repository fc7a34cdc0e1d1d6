//! # fleet-domain
//!
//! Types shared by the fleet server and its agents.
//!
//! - Resource types: the plugin-declared categories of manageable
//!   resources, their configuration schemas, operations and the parent/child
//!   type graph
//! - Factory envelopes: create/delete resource requests and their responses,
//!   correlated by [`RequestId`](fleet_id::RequestId)
//! - Operation wire types: job correlation keys, invocations and outcomes
//! - Messages: the commands a server sends to an agent and the events an
//!   agent sends back
//!
//! Nothing here assumes a transport; every message is plain serde data.

mod error;
mod factory;
mod message;
mod operation;
mod resource_type;

pub use error::DomainError;
pub use factory::*;
pub use message::*;
pub use operation::*;
pub use resource_type::*;
