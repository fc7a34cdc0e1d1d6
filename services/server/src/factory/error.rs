//! Factory protocol errors.

use fleet_id::RequestId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FactoryError {
    /// Request ids may only be reused once the earlier request completed.
    #[error("request {0} is already outstanding")]
    DuplicateRequest(RequestId),

    #[error("the factory protocol is shut down")]
    ShutDown,
}
