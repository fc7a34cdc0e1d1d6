//! Messages exchanged between the server and an agent.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::factory::{
    CreateResourceRequest, CreateResourceResponse, DeleteResourceRequest, DeleteResourceResponse,
};
use crate::operation::{CancelOutcome, JobId, OperationInvocation, OperationReport};

/// Server to agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum AgentCommand {
    CreateResource(CreateResourceRequest),
    DeleteResource(DeleteResourceRequest),
    InvokeOperation(OperationInvocation),
    CancelOperation { job_id: JobId },
}

/// Agent to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum AgentEvent {
    ResourceCreated(CreateResourceResponse),
    ResourceDeleted(DeleteResourceResponse),
    OperationCompleted(OperationReport),
    OperationCancelRequested { job_id: JobId, outcome: CancelOutcome },
}

impl AgentCommand {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentCommand::CreateResource(_) => "create_resource",
            AgentCommand::DeleteResource(_) => "delete_resource",
            AgentCommand::InvokeOperation(_) => "invoke_operation",
            AgentCommand::CancelOperation { .. } => "cancel_operation",
        }
    }

    pub fn to_json(&self) -> Result<String, DomainError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, DomainError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::ResourceCreated(_) => "resource_created",
            AgentEvent::ResourceDeleted(_) => "resource_deleted",
            AgentEvent::OperationCompleted(_) => "operation_completed",
            AgentEvent::OperationCancelRequested { .. } => "operation_cancel_requested",
        }
    }

    pub fn to_json(&self) -> Result<String, DomainError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, DomainError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceTypeKey;
    use fleet_configuration::Configuration;
    use fleet_id::{RequestId, ResourceId};

    #[test]
    fn test_command_envelope_shape() {
        let cmd = AgentCommand::DeleteResource(DeleteResourceRequest {
            request_id: RequestId::new(7),
            resource_id: ResourceId::new(3),
        });
        let json: serde_json::Value = serde_json::from_str(&cmd.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "delete_resource");
        assert_eq!(json["payload"]["request_id"], 7);
    }

    #[test]
    fn test_create_command_decodes() {
        let cmd = AgentCommand::CreateResource(CreateResourceRequest {
            request_id: RequestId::new(1),
            parent_resource_id: ResourceId::new(1),
            resource_type: ResourceTypeKey::new("pg", "database"),
            resource_name: "orders".to_string(),
            plugin_configuration: None,
            resource_configuration: Configuration::new().with_simple("owner", "app"),
        });
        let decoded = AgentCommand::from_json(&cmd.to_json().unwrap()).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(decoded.kind(), "create_resource");
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let err = AgentEvent::from_json(r#"{"type":"bogus","payload":{}}"#).unwrap_err();
        assert!(matches!(err, DomainError::Serialization(_)));
    }
}
