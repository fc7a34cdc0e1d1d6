//! Discovery engine.
//!
//! A scan walks the inventory top-down:
//! - stale nodes are upgraded to their type's current schema first
//! - platform types are discovered at the root
//! - beneath every active, started node, each child type that has a
//!   discoverer is run, one level at a time
//!
//! Discoveries run concurrently, bounded by a worker semaphore, and each is
//! cut off after the discovery timeout. A failing or hung discoverer records
//! an error on the parent it ran beneath and never stalls the scan.

use std::sync::Arc;
use std::time::Duration;

use fleet_configuration::resolve;
use fleet_domain::ResourceTypeKey;
use fleet_id::ResourceId;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::inventory::{InventoryManager, MergeReport, ResourceErrorKind, ResourceNode};
use crate::plugin::{DiscoveredResource, Discoverer, DiscoveryContext, ParentResource};

/// Deepest level a scan descends to.
const MAX_DEPTH: usize = 32;

/// Discovery engine configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Interval between full scans.
    pub interval: Duration,

    /// Interval between availability polls.
    pub availability_interval: Duration,

    /// Limit on a single discoverer call.
    pub timeout: Duration,

    /// Discoveries allowed to run at once.
    pub workers: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            availability_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
            workers: 4,
        }
    }
}

/// Totals for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub added: usize,
    pub updated: usize,
    pub upgraded: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl ScanReport {
    fn absorb(&mut self, merge: &MergeReport) {
        self.added += merge.added.len();
        self.updated += merge.updated.len();
        self.upgraded += merge.upgraded.len();
        self.unchanged += merge.unchanged;
    }
}

enum Outcome {
    Found(Vec<DiscoveredResource>),
    Failed(String),
    TimedOut,
}

struct Discovery {
    parent_id: Option<ResourceId>,
    key: ResourceTypeKey,
    outcome: Outcome,
}

pub struct DiscoveryEngine {
    inventory: Arc<InventoryManager>,
    config: DiscoveryConfig,
    permits: Arc<Semaphore>,
}

impl DiscoveryEngine {
    pub fn new(inventory: Arc<InventoryManager>, config: DiscoveryConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            inventory,
            config,
            permits,
        }
    }

    /// Runs scans and availability polls until shutdown.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            availability_interval_secs = self.config.availability_interval.as_secs(),
            workers = self.config.workers,
            "Starting discovery loop"
        );

        let mut scan_interval = tokio::time::interval(self.config.interval);
        let mut availability_interval = tokio::time::interval(self.config.availability_interval);

        loop {
            tokio::select! {
                _ = scan_interval.tick() => {
                    let report = self.scan().await;
                    debug!(?report, "Discovery scan finished");
                }
                _ = availability_interval.tick() => {
                    for change in self.inventory.check_availability().await {
                        info!(
                            resource_id = %change.resource_id,
                            previous = ?change.previous,
                            current = ?change.current,
                            "Availability changed"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Discovery loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Performs one full scan.
    pub async fn scan(&self) -> ScanReport {
        let mut report = ScanReport {
            upgraded: self.inventory.upgrade_stale().await.len(),
            ..Default::default()
        };

        self.scan_platforms(&mut report).await;

        let mut frontier: Vec<ResourceId> = self
            .inventory
            .children(None)
            .await
            .into_iter()
            .filter(is_scannable)
            .map(|n| n.id)
            .collect();

        let mut depth = 0;
        while !frontier.is_empty() {
            if depth == MAX_DEPTH {
                warn!(depth, "Discovery stopped at maximum depth");
                break;
            }
            self.scan_level(&frontier, &mut report).await;

            let mut next = Vec::new();
            for parent_id in &frontier {
                next.extend(
                    self.inventory
                        .children(Some(*parent_id))
                        .await
                        .into_iter()
                        .filter(is_scannable)
                        .map(|n| n.id),
                );
            }
            frontier = next;
            depth += 1;
        }

        info!(
            added = report.added,
            updated = report.updated,
            upgraded = report.upgraded,
            failed = report.failed,
            timed_out = report.timed_out,
            "Completed discovery scan"
        );
        report
    }

    /// Discovers platforms. Failures are only logged since there is no
    /// parent to attach them to.
    async fn scan_platforms(&self, report: &mut ScanReport) {
        let registry = Arc::clone(self.inventory.registry());
        let mut tasks = JoinSet::new();

        for registration in registry.roots() {
            let Some(discoverer) = registration.discoverer.clone() else {
                continue;
            };
            let ctx = DiscoveryContext {
                default_plugin_configuration: resolve(&registration.resource_type.plugin_config_definition),
                resource_type: registration.resource_type.clone(),
                parent: None,
            };
            self.spawn_discovery(&mut tasks, None, discoverer, ctx);
        }

        self.collect(tasks, report).await;
    }

    /// Runs every child-type discoverer beneath each parent in `parents`.
    async fn scan_level(&self, parents: &[ResourceId], report: &mut ScanReport) {
        let registry = Arc::clone(self.inventory.registry());
        let mut tasks = JoinSet::new();

        for parent_id in parents {
            let Some(parent) = self.inventory.get(*parent_id).await else {
                continue;
            };
            self.inventory
                .clear_errors(parent.id, ResourceErrorKind::Discovery)
                .await;

            for registration in registry.child_types(&parent.resource_type) {
                let Some(discoverer) = registration.discoverer.clone() else {
                    continue;
                };
                let ctx = DiscoveryContext {
                    default_plugin_configuration: resolve(
                        &registration.resource_type.plugin_config_definition,
                    ),
                    resource_type: registration.resource_type.clone(),
                    parent: Some(ParentResource {
                        id: parent.id,
                        key: parent.key.clone(),
                        resource_type: parent.resource_type.clone(),
                        plugin_configuration: parent.plugin_configuration.clone(),
                    }),
                };
                self.spawn_discovery(&mut tasks, Some(parent.id), discoverer, ctx);
            }
        }

        self.collect(tasks, report).await;
    }

    /// Queues one discoverer call behind the worker semaphore.
    fn spawn_discovery(
        &self,
        tasks: &mut JoinSet<Discovery>,
        parent_id: Option<ResourceId>,
        discoverer: Arc<dyn Discoverer>,
        ctx: DiscoveryContext,
    ) {
        let permits = Arc::clone(&self.permits);
        let limit = self.config.timeout;

        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let outcome = match timeout(limit, discoverer.discover(&ctx)).await {
                Ok(Ok(found)) => Outcome::Found(found),
                Ok(Err(e)) => Outcome::Failed(format!("{e:#}")),
                Err(_) => Outcome::TimedOut,
            };
            Discovery {
                parent_id,
                key: ctx.resource_type.key,
                outcome,
            }
        });
    }

    /// Merges finished discoveries as they complete.
    async fn collect(&self, mut tasks: JoinSet<Discovery>, report: &mut ScanReport) {
        while let Some(joined) = tasks.join_next().await {
            let Discovery {
                parent_id,
                key,
                outcome,
            } = match joined {
                Ok(result) => result,
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, "Discovery task failed");
                    continue;
                }
            };

            let message = match outcome {
                Outcome::Found(found) => {
                    match self.inventory.merge(parent_id, &key, found).await {
                        Ok(merge) => report.absorb(&merge),
                        Err(e) => warn!(
                            parent_id = ?parent_id,
                            resource_type = %key,
                            error = %e,
                            "Failed to merge discovery results"
                        ),
                    }
                    continue;
                }
                Outcome::Failed(message) => {
                    report.failed += 1;
                    warn!(parent_id = ?parent_id, resource_type = %key, error = %message, "Discovery failed");
                    format!("discovery of {key} failed: {message}")
                }
                Outcome::TimedOut => {
                    report.timed_out += 1;
                    warn!(parent_id = ?parent_id, resource_type = %key, "Discovery timed out");
                    format!(
                        "discovery of {key} timed out after {}ms",
                        self.config.timeout.as_millis()
                    )
                }
            };

            if let Some(parent_id) = parent_id {
                self.inventory
                    .record_error(parent_id, ResourceErrorKind::Discovery, message)
                    .await;
            }
        }
    }
}

/// Children are only discovered beneath managed, running resources.
fn is_scannable(node: &ResourceNode) -> bool {
    node.inventory_status.is_active() && node.is_started()
}
