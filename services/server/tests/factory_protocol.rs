//! Integration tests for create/delete request correlation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingTransport;
use fleet_configuration::Configuration;
use fleet_domain::{
    AgentCommand, CreateResourceRequest, CreateResourceResponse, CreateResourceStatus, DeleteResourceRequest,
    DeleteResourceResponse, DeleteResourceStatus, ResourceTypeKey,
};
use fleet_id::{RequestId, ResourceId};
use fleet_server::factory::{FactoryConfig, FactoryError, FactoryResponse, RequestKind, ResourceFactoryProtocol};

fn protocol(transport: Arc<RecordingTransport>) -> ResourceFactoryProtocol {
    ResourceFactoryProtocol::new(transport, FactoryConfig::default())
}

fn create_request(id: u64) -> CreateResourceRequest {
    CreateResourceRequest {
        request_id: RequestId::new(id),
        parent_resource_id: ResourceId::new(2),
        resource_type: ResourceTypeKey::new("demo", "database"),
        resource_name: "billing".to_string(),
        plugin_configuration: None,
        resource_configuration: Configuration::new().with_simple("owner", "app"),
    }
}

fn created(id: u64) -> CreateResourceResponse {
    CreateResourceResponse::success(RequestId::new(id), "pg/billing".to_string(), "billing".to_string())
}

#[tokio::test]
async fn test_duplicate_response_is_harmless() {
    let transport = RecordingTransport::new();
    let protocol = protocol(Arc::clone(&transport));

    let id = protocol.create_resource(create_request(7)).await.unwrap();
    assert_eq!(id, RequestId::new(7));
    assert!(protocol.is_pending(id).await);
    assert_eq!(transport.sent_kinds().await, vec!["create_resource"]);

    assert!(protocol.complete_create_resource(created(7)).await);
    assert!(!protocol.complete_create_resource(created(7)).await);

    assert!(!protocol.is_pending(id).await);
    let history = protocol.history().await;
    assert_eq!(history.len(), 1);
    assert!(history[0].response.is_success());
    assert_eq!(history[0].resource_name.as_deref(), Some("billing"));
}

#[tokio::test]
async fn test_unknown_response_is_dropped() {
    let protocol = protocol(RecordingTransport::new());

    assert!(!protocol.complete_delete_resource(DeleteResourceResponse::success(RequestId::new(99))).await);
    assert!(protocol.history().await.is_empty());
}

#[tokio::test]
async fn test_mismatched_response_leaves_request_pending() {
    let protocol = protocol(RecordingTransport::new());
    let id = protocol.create_resource(create_request(3)).await.unwrap();

    assert!(!protocol.complete_delete_resource(DeleteResourceResponse::success(id)).await);
    assert!(protocol.is_pending(id).await);
}

#[tokio::test]
async fn test_outstanding_id_rejected_then_reusable() {
    let protocol = protocol(RecordingTransport::new());
    protocol.create_resource(create_request(5)).await.unwrap();

    let err = protocol
        .delete_resource(DeleteResourceRequest {
            request_id: RequestId::new(5),
            resource_id: ResourceId::new(4),
        })
        .await
        .unwrap_err();
    assert_eq!(err, FactoryError::DuplicateRequest(RequestId::new(5)));

    protocol.complete_create_resource(created(5)).await;
    tokio_test::assert_ok!(protocol.create_resource(create_request(5)).await);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_times_out_stale_request() {
    let protocol = protocol(RecordingTransport::new());
    let id = protocol.create_resource(create_request(11)).await.unwrap();

    tokio::time::advance(Duration::from_secs(1800)).await;
    assert!(protocol.check_for_timed_out().await.is_empty());

    tokio::time::advance(Duration::from_secs(1801)).await;
    assert_eq!(protocol.check_for_timed_out().await, vec![id]);

    let record = &protocol.history().await[0];
    match &record.response {
        FactoryResponse::Create(response) => {
            assert_eq!(response.status, CreateResourceStatus::TimedOut);
            let message = response.error_message.as_deref().unwrap();
            assert!(message.starts_with("Request with duration 3601000"), "{message}");
            assert!(message.ends_with("exceeded the timeout threshold of 3600000"), "{message}");
        }
        other => panic!("unexpected response {other:?}"),
    }

    // The real response turns up too late.
    assert!(!protocol.complete_create_resource(created(11)).await);
    assert_eq!(protocol.history().await.len(), 1);
}

#[tokio::test]
async fn test_send_failure_completes_request_immediately() {
    let protocol = protocol(RecordingTransport::disconnected());

    let id = protocol.create_resource(create_request(8)).await.unwrap();

    assert!(!protocol.is_pending(id).await);
    let record = &protocol.history().await[0];
    assert_eq!(record.response.status(), "FAILURE");
    assert!(record.response.error_message().unwrap().contains("agent is not connected"));

    let response = protocol.execute_create_resource_immediately(create_request(9)).await.unwrap();
    assert_eq!(response.status, CreateResourceStatus::Failure);
    assert_eq!(protocol.pending_count().await, 0);
}

#[tokio::test]
async fn test_immediate_create_returns_agent_response() {
    let (transport, mut commands) = RecordingTransport::forwarding();
    let protocol = Arc::new(protocol(transport));

    let responder = {
        let protocol = Arc::clone(&protocol);
        tokio::spawn(async move {
            if let Some(AgentCommand::CreateResource(request)) = commands.recv().await {
                protocol
                    .complete_create_resource(CreateResourceResponse::success(
                        request.request_id,
                        format!("pg/{}", request.resource_name),
                        request.resource_name,
                    ))
                    .await;
            }
        })
    };

    let response = protocol
        .execute_create_resource_immediately(create_request(21))
        .await
        .unwrap();
    responder.await.unwrap();

    assert!(response.is_success());
    assert_eq!(response.resource_key.as_deref(), Some("pg/billing"));
    assert_eq!(protocol.pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_delete_times_out_without_leaving_pending() {
    let protocol = protocol(RecordingTransport::new());

    let response = protocol
        .execute_delete_resource_immediately(DeleteResourceRequest {
            request_id: RequestId::new(30),
            resource_id: ResourceId::new(4),
        })
        .await
        .unwrap();

    assert_eq!(response.status, DeleteResourceStatus::TimedOut);
    assert_eq!(protocol.pending_count().await, 0);
    assert_eq!(protocol.history().await[0].kind, RequestKind::Delete);
}

#[tokio::test]
async fn test_dropped_immediate_call_withdraws_its_request() {
    let transport = RecordingTransport::new();
    let protocol = protocol(Arc::clone(&transport));

    let waited = tokio::time::timeout(
        Duration::from_millis(50),
        protocol.execute_create_resource_immediately(create_request(31)),
    )
    .await;

    assert!(waited.is_err());
    assert_eq!(transport.sent_kinds().await, vec!["create_resource"]);
    assert!(!protocol.is_pending(RequestId::new(31)).await);
    assert!(!protocol.complete_create_resource(created(31)).await);
    assert!(protocol.history().await.is_empty());

    // The id is free again.
    protocol.create_resource(create_request(31)).await.unwrap();
    assert!(protocol.check_for_timed_out().await.is_empty());
    assert!(protocol.is_pending(RequestId::new(31)).await);
}

#[tokio::test]
async fn test_completions_are_broadcast() {
    let protocol = protocol(RecordingTransport::new());
    let mut completions = protocol.subscribe();

    protocol.create_resource(create_request(40)).await.unwrap();
    protocol.complete_create_resource(created(40)).await;

    let record = completions.recv().await.unwrap();
    assert_eq!(record.request_id, RequestId::new(40));
    assert_eq!(record.kind, RequestKind::Create);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let protocol = ResourceFactoryProtocol::new(
        RecordingTransport::new(),
        FactoryConfig {
            history_limit: 2,
            ..Default::default()
        },
    );
    for id in 1..=3 {
        protocol.create_resource(create_request(id)).await.unwrap();
        protocol.complete_create_resource(created(id)).await;
    }

    let ids: Vec<u64> = protocol.history().await.iter().map(|r| r.request_id.value()).collect();
    assert_eq!(ids, vec![2, 3]);
}

#[tokio::test]
async fn test_shutdown_fails_outstanding_requests() {
    let protocol = protocol(RecordingTransport::new());
    protocol.create_resource(create_request(50)).await.unwrap();
    protocol
        .delete_resource(DeleteResourceRequest {
            request_id: RequestId::new(51),
            resource_id: ResourceId::new(4),
        })
        .await
        .unwrap();

    assert_eq!(protocol.shutdown().await, 2);

    assert_eq!(protocol.pending_count().await, 0);
    assert!(protocol.history().await.iter().all(|r| !r.response.is_success()));
    assert_eq!(
        protocol.create_resource(create_request(52)).await.unwrap_err(),
        FactoryError::ShutDown
    );
}
