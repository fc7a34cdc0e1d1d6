//! Create/delete resource requests between the server and its agents.

mod error;
mod protocol;

pub use error::FactoryError;
pub use protocol::{FactoryConfig, FactoryRecord, FactoryResponse, RequestKind, ResourceFactoryProtocol};
