//! Request/response correlation for resource creation and deletion.
//!
//! A request is entered in the pending table before it is sent. It leaves the
//! table exactly once: when its response arrives, when the sweeper finds it
//! past the timeout, when sending it fails, or when the protocol shuts down.
//! Whoever removes the entry completes the request; everyone else finds
//! nothing and backs off.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_domain::{
    AgentCommand, CreateResourceRequest, CreateResourceResponse, DeleteResourceRequest,
    DeleteResourceResponse,
};
use fleet_id::{RequestId, ResourceId, Sequence};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::error::FactoryError;
use crate::transport::{AgentTransport, TransportError};

#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// How long a request may stay outstanding.
    pub timeout: Duration,
    pub sweep_interval: Duration,
    /// Completed requests kept for [`ResourceFactoryProtocol::history`].
    pub history_limit: usize,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            history_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Create,
    Delete,
}

/// The terminal response of either kind of request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactoryResponse {
    Create(CreateResourceResponse),
    Delete(DeleteResourceResponse),
}

impl FactoryResponse {
    pub fn request_id(&self) -> RequestId {
        match self {
            FactoryResponse::Create(r) => r.request_id,
            FactoryResponse::Delete(r) => r.request_id,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            FactoryResponse::Create(_) => RequestKind::Create,
            FactoryResponse::Delete(_) => RequestKind::Delete,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            FactoryResponse::Create(r) => r.is_success(),
            FactoryResponse::Delete(r) => r.is_success(),
        }
    }

    pub fn status(&self) -> String {
        match self {
            FactoryResponse::Create(r) => r.status.to_string(),
            FactoryResponse::Delete(r) => r.status.to_string(),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            FactoryResponse::Create(r) => r.error_message.as_deref(),
            FactoryResponse::Delete(r) => r.error_message.as_deref(),
        }
    }

    fn failure(kind: RequestKind, request_id: RequestId, message: String) -> Self {
        match kind {
            RequestKind::Create => FactoryResponse::Create(CreateResourceResponse::failure(request_id, message)),
            RequestKind::Delete => FactoryResponse::Delete(DeleteResourceResponse::failure(request_id, message)),
        }
    }

    fn timed_out(kind: RequestKind, request_id: RequestId, message: String) -> Self {
        match kind {
            RequestKind::Create => FactoryResponse::Create(CreateResourceResponse::timed_out(request_id, message)),
            RequestKind::Delete => FactoryResponse::Delete(DeleteResourceResponse::timed_out(request_id, message)),
        }
    }

    fn into_create(self) -> CreateResourceResponse {
        match self {
            FactoryResponse::Create(r) => r,
            FactoryResponse::Delete(r) => {
                CreateResourceResponse::failure(r.request_id, "received a delete response for a create request")
            }
        }
    }

    fn into_delete(self) -> DeleteResourceResponse {
        match self {
            FactoryResponse::Delete(r) => r,
            FactoryResponse::Create(r) => {
                DeleteResourceResponse::failure(r.request_id, "received a create response for a delete request")
            }
        }
    }
}

/// A completed request.
#[derive(Debug, Clone, Serialize)]
pub struct FactoryRecord {
    pub request_id: RequestId,
    pub kind: RequestKind,
    /// The parent of a created resource, or the deleted resource.
    pub resource_id: ResourceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub response: FactoryResponse,
}

struct Pending {
    kind: RequestKind,
    resource_id: ResourceId,
    resource_name: Option<String>,
    issued_at: DateTime<Utc>,
    issued: Instant,
    waiter: Option<oneshot::Sender<FactoryResponse>>,
}

impl Pending {
    /// An immediate call whose caller stopped waiting.
    fn is_abandoned(&self) -> bool {
        self.waiter.as_ref().is_some_and(|w| w.is_closed())
    }
}

/// The caller's side of an immediate call. Dropping it mid-wait withdraws
/// the pending entry, unless the table is busy, in which case the sweeper
/// drops it on its next pass.
struct Waiter<'a> {
    pending: &'a Mutex<HashMap<RequestId, Pending>>,
    id: RequestId,
    rx: Option<oneshot::Receiver<FactoryResponse>>,
}

impl<'a> Waiter<'a> {
    fn new(
        pending: &'a Mutex<HashMap<RequestId, Pending>>,
        id: RequestId,
        rx: oneshot::Receiver<FactoryResponse>,
    ) -> Self {
        Self {
            pending,
            id,
            rx: Some(rx),
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        // Closes the channel, which marks our entry (and only ours) abandoned.
        drop(self.rx.take());
        let Ok(mut table) = self.pending.try_lock() else {
            return;
        };
        if table.get(&self.id).is_some_and(Pending::is_abandoned) {
            table.remove(&self.id);
            debug!(request_id = %self.id, "Withdrew abandoned factory request");
        }
    }
}

pub struct ResourceFactoryProtocol {
    transport: Arc<dyn AgentTransport>,
    config: FactoryConfig,
    requests: Sequence,
    pending: Mutex<HashMap<RequestId, Pending>>,
    history: Mutex<VecDeque<FactoryRecord>>,
    completions: broadcast::Sender<FactoryRecord>,
    closed: AtomicBool,
}

impl ResourceFactoryProtocol {
    pub fn new(transport: Arc<dyn AgentTransport>, config: FactoryConfig) -> Self {
        let (completions, _) = broadcast::channel(256);
        Self {
            transport,
            config,
            requests: Sequence::new(),
            pending: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            completions,
            closed: AtomicBool::new(false),
        }
    }

    /// A request id no earlier call of this method has returned.
    pub fn next_request_id(&self) -> RequestId {
        self.requests.next()
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    // =========================================================================
    // Issuing
    // =========================================================================

    /// Sends a create request and returns without waiting for the outcome,
    /// which arrives through [`complete_create_resource`](Self::complete_create_resource).
    pub async fn create_resource(&self, request: CreateResourceRequest) -> Result<RequestId, FactoryError> {
        let id = request.request_id;
        self.issue(
            id,
            RequestKind::Create,
            request.parent_resource_id,
            Some(request.resource_name.clone()),
            None,
        )
        .await?;
        self.send(id, RequestKind::Create, AgentCommand::CreateResource(request)).await;
        Ok(id)
    }

    /// Sends a delete request and returns without waiting for the outcome.
    pub async fn delete_resource(&self, request: DeleteResourceRequest) -> Result<RequestId, FactoryError> {
        let id = request.request_id;
        self.issue(id, RequestKind::Delete, request.resource_id, None, None).await?;
        self.send(id, RequestKind::Delete, AgentCommand::DeleteResource(request)).await;
        Ok(id)
    }

    /// Sends a create request and waits for its terminal response, at most
    /// for the configured timeout.
    pub async fn execute_create_resource_immediately(
        &self,
        request: CreateResourceRequest,
    ) -> Result<CreateResourceResponse, FactoryError> {
        let id = request.request_id;
        let (tx, rx) = oneshot::channel();
        self.issue(
            id,
            RequestKind::Create,
            request.parent_resource_id,
            Some(request.resource_name.clone()),
            Some(tx),
        )
        .await?;
        let waiter = Waiter::new(&self.pending, id, rx);
        self.send(id, RequestKind::Create, AgentCommand::CreateResource(request)).await;
        Ok(self.wait(id, RequestKind::Create, waiter).await.into_create())
    }

    /// Sends a delete request and waits for its terminal response.
    pub async fn execute_delete_resource_immediately(
        &self,
        request: DeleteResourceRequest,
    ) -> Result<DeleteResourceResponse, FactoryError> {
        let id = request.request_id;
        let (tx, rx) = oneshot::channel();
        self.issue(id, RequestKind::Delete, request.resource_id, None, Some(tx)).await?;
        let waiter = Waiter::new(&self.pending, id, rx);
        self.send(id, RequestKind::Delete, AgentCommand::DeleteResource(request)).await;
        Ok(self.wait(id, RequestKind::Delete, waiter).await.into_delete())
    }

    async fn issue(
        &self,
        id: RequestId,
        kind: RequestKind,
        resource_id: ResourceId,
        resource_name: Option<String>,
        waiter: Option<oneshot::Sender<FactoryResponse>>,
    ) -> Result<(), FactoryError> {
        let mut pending = self.pending.lock().await;
        // Checked under the table lock so a drain cannot miss this entry.
        if self.closed.load(Ordering::SeqCst) {
            return Err(FactoryError::ShutDown);
        }
        if pending.contains_key(&id) {
            return Err(FactoryError::DuplicateRequest(id));
        }
        pending.insert(
            id,
            Pending {
                kind,
                resource_id,
                resource_name,
                issued_at: Utc::now(),
                issued: Instant::now(),
                waiter,
            },
        );
        debug!(request_id = %id, ?kind, "Issued factory request");
        Ok(())
    }

    async fn send(&self, id: RequestId, kind: RequestKind, command: AgentCommand) {
        if let Err(e) = self.transport.send(command).await {
            self.fail_unsent(id, kind, e).await;
        }
    }

    async fn fail_unsent(&self, id: RequestId, kind: RequestKind, error: TransportError) {
        warn!(request_id = %id, error = %error, "Failed to send factory request");
        if let Some(pending) = self.take(id).await {
            let message = format!("Failed to send request to agent: {error}");
            self.finish(id, pending, FactoryResponse::failure(kind, id, message)).await;
        }
    }

    async fn wait(&self, id: RequestId, kind: RequestKind, mut waiter: Waiter<'_>) -> FactoryResponse {
        let abandoned = || FactoryResponse::failure(kind, id, "request was abandoned".to_string());
        let Some(rx) = waiter.rx.as_mut() else {
            return abandoned();
        };
        match tokio::time::timeout(self.config.timeout, &mut *rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => abandoned(),
            Err(_) => match self.take(id).await {
                Some(pending) => {
                    let response = self.timeout_response(id, &pending);
                    self.finish(id, pending, response.clone()).await;
                    response
                }
                // Completed between the timeout firing and the removal.
                None => rx.await.unwrap_or_else(|_| abandoned()),
            },
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Delivers an agent's create response. Returns false when no matching
    /// request is outstanding, in which case the response is dropped.
    pub async fn complete_create_resource(&self, response: CreateResourceResponse) -> bool {
        self.complete(FactoryResponse::Create(response)).await
    }

    pub async fn complete_delete_resource(&self, response: DeleteResourceResponse) -> bool {
        self.complete(FactoryResponse::Delete(response)).await
    }

    async fn complete(&self, response: FactoryResponse) -> bool {
        let id = response.request_id();
        let pending = {
            let mut table = self.pending.lock().await;
            match table.get(&id) {
                Some(p) if p.kind == response.kind() => table.remove(&id),
                Some(p) => {
                    warn!(request_id = %id, expected = ?p.kind, got = ?response.kind(), "Dropping mismatched factory response");
                    return false;
                }
                None => None,
            }
        };

        match pending {
            Some(pending) => {
                self.finish(id, pending, response).await;
                true
            }
            None => {
                warn!(request_id = %id, kind = ?response.kind(), "Dropping response for unknown factory request");
                false
            }
        }
    }

    async fn take(&self, id: RequestId) -> Option<Pending> {
        self.pending.lock().await.remove(&id)
    }

    fn timeout_response(&self, id: RequestId, pending: &Pending) -> FactoryResponse {
        let message = format!(
            "Request with duration {} exceeded the timeout threshold of {}",
            pending.issued.elapsed().as_millis(),
            self.config.timeout.as_millis()
        );
        FactoryResponse::timed_out(pending.kind, id, message)
    }

    async fn finish(&self, id: RequestId, pending: Pending, response: FactoryResponse) {
        let record = FactoryRecord {
            request_id: id,
            kind: pending.kind,
            resource_id: pending.resource_id,
            resource_name: pending.resource_name,
            issued_at: pending.issued_at,
            completed_at: Utc::now(),
            duration_ms: pending.issued.elapsed().as_millis() as u64,
            response,
        };
        info!(
            request_id = %id,
            kind = ?record.kind,
            status = %record.response.status(),
            duration_ms = record.duration_ms,
            "Factory request completed"
        );

        if let Some(waiter) = pending.waiter {
            let _ = waiter.send(record.response.clone());
        }

        {
            let mut history = self.history.lock().await;
            history.push_back(record.clone());
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }

        // No subscribers is fine.
        let _ = self.completions.send(record);
    }

    // =========================================================================
    // Timeouts and shutdown
    // =========================================================================

    /// Completes every request outstanding longer than the timeout with a
    /// timed-out response. Returns their ids.
    ///
    /// Entries of immediate calls whose caller has gone away are dropped
    /// without a response.
    pub async fn check_for_timed_out(&self) -> Vec<RequestId> {
        let expired: Vec<(RequestId, Pending)> = {
            let mut table = self.pending.lock().await;
            table.retain(|id, p| {
                let keep = !p.is_abandoned();
                if !keep {
                    debug!(request_id = %id, "Dropping abandoned factory request");
                }
                keep
            });
            let ids: Vec<RequestId> = table
                .iter()
                .filter(|(_, p)| p.issued.elapsed() > self.config.timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| table.remove(&id).map(|p| (id, p)))
                .collect()
        };

        let mut ids = Vec::with_capacity(expired.len());
        for (id, pending) in expired {
            let response = self.timeout_response(id, &pending);
            debug!(request_id = %id, "Timing out factory request");
            self.finish(id, pending, response).await;
            ids.push(id);
        }
        ids.sort();
        ids
    }

    /// Refuses new requests and fails everything still outstanding.
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<(RequestId, Pending)> = {
            let mut table = self.pending.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            table.drain().collect()
        };

        let count = drained.len();
        for (id, pending) in drained {
            let response = FactoryResponse::failure(pending.kind, id, "the server is shutting down".to_string());
            self.finish(id, pending, response).await;
        }
        if count > 0 {
            info!(drained = count, "Failed outstanding factory requests on shutdown");
        }
        count
    }

    /// Runs [`check_for_timed_out`](Self::check_for_timed_out) every
    /// `sweep_interval` until shutdown.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            timeout_secs = self.config.timeout.as_secs(),
            "Starting factory request sweeper"
        );

        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let expired = self.check_for_timed_out().await;
                    if !expired.is_empty() {
                        info!(expired = expired.len(), "Timed out factory requests");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Factory sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn is_pending(&self, id: RequestId) -> bool {
        self.pending.lock().await.contains_key(&id)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Completed requests, oldest first.
    pub async fn history(&self) -> Vec<FactoryRecord> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FactoryRecord> {
        self.completions.subscribe()
    }
}
