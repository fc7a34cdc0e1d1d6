//! # fleet-id
//!
//! Typed identifiers used across the fleet server and agent.
//!
//! Two families of ids exist:
//!
//! - Prefixed ULIDs (`{prefix}_{ulid}`) for entities minted on the server,
//!   such as operation histories and resource groups. These sort by creation
//!   time and carry their type in the prefix.
//! - Integer sequence ids for inventory nodes and factory requests. Nodes
//!   live in an arena indexed by [`ResourceId`]; factory requests are
//!   correlated by [`RequestId`] which only needs to be unique among the
//!   outstanding requests of the issuing side.
//!
//! Examples:
//! - `oph_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `grp_01HV4Z3MXNKPQR9HSTZ7WCLD4E`

mod error;
#[doc(hidden)]
pub mod macros;
mod sequence;
mod types;

pub use error::IdError;
pub use sequence::Sequence;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
