//! Integration tests for discovery scans.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{database_type, fixture, host_type, server_type, server_type_v2};
use fleet_agent::inventory::{InventoryConfig, InventoryManager, InventoryStatus, ResourceErrorKind};
use fleet_agent::plugin::{DiscoveredResource, PluginRegistry};
use fleet_agent::{DiscoveryConfig, DiscoveryEngine, MockPlugin};
use fleet_domain::{ResourceCategory, ResourceType};

fn seed(plugin: &MockPlugin) {
    plugin.discover(&host_type().key, vec![DiscoveredResource::new("host-1", "host-1")]);
    plugin.discover(&server_type().key, vec![DiscoveredResource::new("pg", "PostgreSQL")]);
    plugin.discover(
        &database_type().key,
        vec![
            DiscoveredResource::new("orders", "orders"),
            DiscoveredResource::new("billing", "billing"),
        ],
    );
}

fn engine(inventory: &Arc<InventoryManager>, config: DiscoveryConfig) -> DiscoveryEngine {
    DiscoveryEngine::new(Arc::clone(inventory), config)
}

#[tokio::test]
async fn test_scan_with_auto_commit_builds_whole_tree() {
    let f = fixture(InventoryConfig {
        auto_commit: true,
        ..Default::default()
    });
    seed(&f.plugin);

    let report = engine(&f.inventory, DiscoveryConfig::default()).scan().await;

    assert_eq!(report.added, 4);
    assert_eq!(report.failed, 0);
    assert_eq!(f.inventory.len().await, 4);
    assert!(f.inventory.snapshot().await.iter().all(|n| n.is_started()));
}

#[tokio::test]
async fn test_scan_stops_at_uncommitted_nodes() {
    let f = fixture(InventoryConfig::default());
    seed(&f.plugin);
    let discovery = engine(&f.inventory, DiscoveryConfig::default());

    let first = discovery.scan().await;
    assert_eq!(first.added, 1);
    let host = f.inventory.children(None).await[0].clone();
    assert_eq!(host.inventory_status, InventoryStatus::Discovered);

    f.inventory.commit(host.id).await.unwrap();
    let second = discovery.scan().await;
    assert_eq!(second.added, 1);
    assert_eq!(second.unchanged, 1);
    assert_eq!(f.inventory.children(Some(host.id)).await.len(), 1);
}

#[tokio::test]
async fn test_rescan_is_stable() {
    let f = fixture(InventoryConfig {
        auto_commit: true,
        ..Default::default()
    });
    seed(&f.plugin);
    let discovery = engine(&f.inventory, DiscoveryConfig::default());

    discovery.scan().await;
    let again = discovery.scan().await;

    assert_eq!(again.added, 0);
    assert_eq!(again.unchanged, 4);
    assert_eq!(f.inventory.len().await, 4);
}

#[tokio::test]
async fn test_failing_discoverer_attaches_error_to_parent() {
    let f = fixture(InventoryConfig::default());
    let host = f.committed(None, &host_type(), "host-1").await;

    let broken = MockPlugin::new();
    broken.configure(|b| b.fail_discovery = true);
    f.registry.register(broken.registration(server_type())).unwrap();

    let discovery = engine(&f.inventory, DiscoveryConfig::default());
    let report = discovery.scan().await;

    assert_eq!(report.failed, 1);
    let node = f.inventory.get(host).await.unwrap();
    assert!(node.has_error(ResourceErrorKind::Discovery));
    assert!(node.errors[0].message.contains("test:server"));

    // The next clean pass clears it.
    broken.configure(|b| b.fail_discovery = false);
    discovery.scan().await;
    assert!(!f.inventory.get(host).await.unwrap().has_error(ResourceErrorKind::Discovery));
}

#[tokio::test(start_paused = true)]
async fn test_hung_discoverer_times_out() {
    let f = fixture(InventoryConfig::default());
    let host = f.committed(None, &host_type(), "host-1").await;

    let slow = MockPlugin::new();
    slow.configure(|b| b.discovery_delay = Some(Duration::from_secs(3600)));
    f.registry.register(slow.registration(server_type())).unwrap();

    let report = engine(
        &f.inventory,
        DiscoveryConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        },
    )
    .scan()
    .await;

    assert_eq!(report.timed_out, 1);
    let node = f.inventory.get(host).await.unwrap();
    assert!(node.has_error(ResourceErrorKind::Discovery));
    assert!(node.errors[0].message.contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_worker_pool_bounds_concurrency() {
    async fn elapsed_with(workers: usize) -> Duration {
        let plugin = MockPlugin::new();
        let slow = MockPlugin::new();
        slow.configure(|b| b.discovery_delay = Some(Duration::from_secs(10)));

        let registry = Arc::new(PluginRegistry::new());
        registry.register(plugin.registration(host_type())).unwrap();
        for name in ["alpha", "beta"] {
            let rt = ResourceType::new("test", name, ResourceCategory::Server).with_parent(host_type().key);
            registry.register(slow.registration(rt)).unwrap();
        }
        let inventory = Arc::new(InventoryManager::new(registry, InventoryConfig::default()));
        let host = inventory
            .merge(None, &host_type().key, vec![DiscoveredResource::new("h", "h")])
            .await
            .unwrap()
            .added[0];
        inventory.commit(host).await.unwrap();

        let discovery = DiscoveryEngine::new(
            inventory,
            DiscoveryConfig {
                workers,
                timeout: Duration::from_secs(60),
                ..Default::default()
            },
        );
        let started = tokio::time::Instant::now();
        discovery.scan().await;
        started.elapsed()
    }

    assert!(elapsed_with(1).await >= Duration::from_secs(20));
    assert!(elapsed_with(2).await < Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_platform_discovery_runs_in_worker_pool() {
    async fn elapsed_with(workers: usize) -> Duration {
        let slow = MockPlugin::new();
        slow.configure(|b| b.discovery_delay = Some(Duration::from_secs(10)));

        let registry = Arc::new(PluginRegistry::new());
        for name in ["linux", "windows"] {
            let rt = ResourceType::new("test", name, ResourceCategory::Platform);
            slow.discover(&rt.key, vec![DiscoveredResource::new(name, name)]);
            registry.register(slow.registration(rt)).unwrap();
        }
        let inventory = Arc::new(InventoryManager::new(registry, InventoryConfig::default()));
        let discovery = DiscoveryEngine::new(
            Arc::clone(&inventory),
            DiscoveryConfig {
                workers,
                timeout: Duration::from_secs(60),
                ..Default::default()
            },
        );

        let started = tokio::time::Instant::now();
        let report = discovery.scan().await;
        assert_eq!(report.added, 2);
        assert_eq!(inventory.children(None).await.len(), 2);
        started.elapsed()
    }

    assert!(elapsed_with(1).await >= Duration::from_secs(20));
    assert!(elapsed_with(2).await < Duration::from_secs(20));
}

#[tokio::test]
async fn test_scan_runs_upgrade_pass_first() {
    let f = fixture(InventoryConfig::default());
    let host = f.committed(None, &host_type(), "host-1").await;
    let server = f.committed(Some(host), &server_type(), "pg").await;
    f.registry.register(f.plugin.registration(server_type_v2())).unwrap();

    let report = engine(&f.inventory, DiscoveryConfig::default()).scan().await;

    assert_eq!(report.upgraded, 1);
    assert_eq!(
        f.inventory.get(server).await.unwrap().schema_version,
        server_type_v2().schema_version()
    );
}

#[tokio::test]
async fn test_discovery_results_scoped_to_parent() {
    let f = fixture(InventoryConfig {
        auto_commit: true,
        ..Default::default()
    });
    f.plugin.discover(
        &host_type().key,
        vec![DiscoveredResource::new("a", "a"), DiscoveredResource::new("b", "b")],
    );
    f.plugin.discover_under(&server_type().key, "a", vec![DiscoveredResource::new("pg", "pg")]);

    engine(&f.inventory, DiscoveryConfig::default()).scan().await;

    let hosts = f.inventory.children(None).await;
    let a = hosts.iter().find(|h| h.key == "a").unwrap();
    let b = hosts.iter().find(|h| h.key == "b").unwrap();
    assert_eq!(f.inventory.children(Some(a.id)).await.len(), 1);
    assert!(f.inventory.children(Some(b.id)).await.is_empty());
}
