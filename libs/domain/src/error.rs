//! Error types for domain values.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A job id string did not have the `name_|_group_|_millis` shape.
    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    /// A resource type key string was not `plugin:name`.
    #[error("invalid resource type key: {0}")]
    InvalidTypeKey(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
