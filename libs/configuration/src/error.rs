//! Schema load errors.

use thiserror::Error;

use crate::SimpleType;

/// A malformed configuration schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate property '{name}' in '{parent}'")]
    DuplicateName { parent: String, name: String },

    #[error("property with empty name in '{parent}'")]
    EmptyName { parent: String },

    #[error("list property '{name}' has min entries {min} greater than max entries {max}")]
    InvalidListBounds { name: String, min: usize, max: usize },

    #[error("default '{default}' of property '{name}' is not a valid {simple_type}")]
    InvalidDefault {
        name: String,
        default: String,
        simple_type: SimpleType,
    },

    #[error("failed to encode schema: {0}")]
    Encoding(String),
}
