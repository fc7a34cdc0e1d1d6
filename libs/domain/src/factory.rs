//! Create/delete resource envelopes.

use fleet_configuration::Configuration;
use fleet_id::{RequestId, ResourceId};
use serde::{Deserialize, Serialize};

use crate::resource_type::ResourceTypeKey;

// =============================================================================
// Statuses
// =============================================================================

/// Terminal status of a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateResourceStatus {
    Success,
    Failure,
    InvalidConfiguration,
    InvalidArtifact,
    TimedOut,
}

/// Terminal status of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteResourceStatus {
    Success,
    Failure,
    TimedOut,
}

impl std::fmt::Display for CreateResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CreateResourceStatus::Success => "SUCCESS",
            CreateResourceStatus::Failure => "FAILURE",
            CreateResourceStatus::InvalidConfiguration => "INVALID_CONFIGURATION",
            CreateResourceStatus::InvalidArtifact => "INVALID_ARTIFACT",
            CreateResourceStatus::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for DeleteResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeleteResourceStatus::Success => "SUCCESS",
            DeleteResourceStatus::Failure => "FAILURE",
            DeleteResourceStatus::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Create
// =============================================================================

/// Asks an agent to create a child resource beneath `parent_resource_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResourceRequest {
    pub request_id: RequestId,
    pub parent_resource_id: ResourceId,
    pub resource_type: ResourceTypeKey,
    pub resource_name: String,
    /// Falls back to the type's resolved default plugin configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_configuration: Option<Configuration>,
    #[serde(default)]
    pub resource_configuration: Configuration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResourceResponse {
    pub request_id: RequestId,
    pub status: CreateResourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_configuration: Option<Configuration>,
}

impl CreateResourceResponse {
    pub fn success(request_id: RequestId, resource_key: String, resource_name: String) -> Self {
        Self {
            request_id,
            status: CreateResourceStatus::Success,
            resource_key: Some(resource_key),
            resource_name: Some(resource_name),
            error_message: None,
            resource_configuration: None,
        }
    }

    pub fn failed(request_id: RequestId, status: CreateResourceStatus, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            resource_key: None,
            resource_name: None,
            error_message: Some(message.into()),
            resource_configuration: None,
        }
    }

    pub fn failure(request_id: RequestId, message: impl Into<String>) -> Self {
        Self::failed(request_id, CreateResourceStatus::Failure, message)
    }

    pub fn timed_out(request_id: RequestId, message: impl Into<String>) -> Self {
        Self::failed(request_id, CreateResourceStatus::TimedOut, message)
    }

    pub fn is_success(&self) -> bool {
        self.status == CreateResourceStatus::Success
    }
}

// =============================================================================
// Delete
// =============================================================================

/// Asks an agent to delete a resource and everything beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResourceRequest {
    pub request_id: RequestId,
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResourceResponse {
    pub request_id: RequestId,
    pub status: DeleteResourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DeleteResourceResponse {
    pub fn success(request_id: RequestId) -> Self {
        Self {
            request_id,
            status: DeleteResourceStatus::Success,
            error_message: None,
        }
    }

    pub fn failure(request_id: RequestId, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status: DeleteResourceStatus::Failure,
            error_message: Some(message.into()),
        }
    }

    pub fn timed_out(request_id: RequestId, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status: DeleteResourceStatus::TimedOut,
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeleteResourceStatus::Success
    }
}
