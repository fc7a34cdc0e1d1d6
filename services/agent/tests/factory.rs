//! Integration tests for resource creation and deletion on the agent.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{database_type, fixture, host_type, server_type, Fixture};
use fleet_agent::factory::FactoryExecutor;
use fleet_agent::inventory::InventoryConfig;
use fleet_configuration::Configuration;
use fleet_domain::{
    CreateDeletePolicy, CreateResourceRequest, CreateResourceStatus, DeleteResourceRequest,
    DeleteResourceStatus,
};
use fleet_id::{RequestId, ResourceId};
use rstest::rstest;

fn executor(f: &Fixture) -> FactoryExecutor {
    FactoryExecutor::new(Arc::clone(&f.inventory), Duration::from_secs(30))
}

fn create_request(id: u64, parent: ResourceId, name: &str, config: Configuration) -> CreateResourceRequest {
    CreateResourceRequest {
        request_id: RequestId::new(id),
        parent_resource_id: parent,
        resource_type: database_type().key,
        resource_name: name.to_string(),
        plugin_configuration: None,
        resource_configuration: config,
    }
}

#[tokio::test]
async fn test_create_adds_committed_started_child() {
    let f = fixture(InventoryConfig::default());
    let (_, server, _) = f.chain().await;

    let response = executor(&f)
        .create(create_request(1, server, "billing", Configuration::new().with_simple("owner", "app")))
        .await;

    assert!(response.is_success(), "{response:?}");
    assert_eq!(response.resource_key.as_deref(), Some("pg/billing"));
    let id = f
        .inventory
        .find(Some(server), &database_type().key, "pg/billing")
        .await
        .unwrap();
    let node = f.inventory.get(id).await.unwrap();
    assert!(node.inventory_status.is_active());
    assert!(node.is_started());
    assert_eq!(node.resource_configuration.simple_value("owner"), Some("app"));
}

#[tokio::test]
async fn test_create_rejects_invalid_configuration() {
    let f = fixture(InventoryConfig::default());
    let (_, server, _) = f.chain().await;

    let response = executor(&f).create(create_request(2, server, "billing", Configuration::new())).await;

    assert_eq!(response.status, CreateResourceStatus::InvalidConfiguration);
    assert!(response.error_message.unwrap().contains("owner"));
    assert_eq!(f.plugin.creates(), 0);
}

#[tokio::test]
async fn test_create_requires_allowed_parent_type() {
    let f = fixture(InventoryConfig::default());
    let (host, _, _) = f.chain().await;

    let response = executor(&f)
        .create(create_request(3, host, "billing", Configuration::new().with_simple("owner", "app")))
        .await;

    assert_eq!(response.status, CreateResourceStatus::Failure);
    assert!(response.error_message.unwrap().contains("cannot be created beneath"));
}

#[tokio::test]
async fn test_create_honours_policy() {
    let f = fixture(InventoryConfig::default());
    let (_, server, _) = f.chain().await;
    f.registry
        .register(f.plugin.registration(database_type().with_policy(CreateDeletePolicy::DeleteOnly)))
        .unwrap();

    let response = executor(&f)
        .create(create_request(4, server, "billing", Configuration::new().with_simple("owner", "app")))
        .await;
    assert_eq!(response.status, CreateResourceStatus::Failure);
}

#[tokio::test]
async fn test_create_under_missing_parent() {
    let f = fixture(InventoryConfig::default());
    let response = executor(&f)
        .create(create_request(5, ResourceId::new(99), "x", Configuration::new()))
        .await;
    assert_eq!(response.status, CreateResourceStatus::Failure);
}

#[tokio::test(start_paused = true)]
async fn test_create_times_out_in_plugin() {
    let f = fixture(InventoryConfig::default());
    let (_, server, _) = f.chain().await;
    f.plugin.configure(|b| b.create_delay = Some(Duration::from_secs(300)));

    let response = executor(&f)
        .create(create_request(6, server, "billing", Configuration::new().with_simple("owner", "app")))
        .await;
    assert_eq!(response.status, CreateResourceStatus::TimedOut);
}

#[tokio::test]
async fn test_delete_removes_subtree() {
    let f = fixture(InventoryConfig::default());
    let (_, server, db) = f.chain().await;
    f.registry
        .register(f.plugin.registration(server_type().with_policy(CreateDeletePolicy::Both)))
        .unwrap();

    let response = executor(&f)
        .delete(DeleteResourceRequest {
            request_id: RequestId::new(7),
            resource_id: server,
        })
        .await;

    assert!(response.is_success(), "{response:?}");
    assert!(f.inventory.get(server).await.is_none());
    assert!(f.inventory.get(db).await.is_none());
    assert_eq!(f.plugin.deletes(), 1);
}

#[rstest]
#[case::policy_forbids(false, false)]
#[case::plugin_fails(true, true)]
#[tokio::test]
async fn test_delete_failures_keep_resource(#[case] deletable: bool, #[case] plugin_fails: bool) {
    let f = fixture(InventoryConfig::default());
    let (host, _, _) = f.chain().await;
    if deletable {
        f.registry
            .register(f.plugin.registration(host_type().with_policy(CreateDeletePolicy::Both)))
            .unwrap();
    }
    f.plugin.configure(|b| b.fail_deletes = plugin_fails);

    let response = executor(&f)
        .delete(DeleteResourceRequest {
            request_id: RequestId::new(8),
            resource_id: host,
        })
        .await;

    assert_eq!(response.status, DeleteResourceStatus::Failure);
    assert!(f.inventory.get(host).await.is_some());
}
