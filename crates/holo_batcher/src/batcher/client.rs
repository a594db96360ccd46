//! State shared by every batcher of one client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::engine::Batcher;
use super::metrics::BatcherMetrics;
use super::request_ids::RequestIdTracker;
use super::types::{
    BatcherConfig, ClientId, ConsistentReadPoint, FlushObserver, RpcDispatch, TabletResolver,
    TransactionGate,
};

/// Client context: collaborators, retry-id bookkeeping, metrics and config.
///
/// Batchers hold an `Arc` to it; it never points back at a batcher.
pub struct BatcherClient {
    id: ClientId,
    resolver: Arc<dyn TabletResolver>,
    dispatch: Arc<dyn RpcDispatch>,
    request_ids: RequestIdTracker,
    metrics: BatcherMetrics,
    config: BatcherConfig,
    next_batcher_id: AtomicU64,
}

impl BatcherClient {
    pub fn new(
        id: ClientId,
        resolver: Arc<dyn TabletResolver>,
        dispatch: Arc<dyn RpcDispatch>,
        config: BatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            resolver,
            dispatch,
            request_ids: RequestIdTracker::new(),
            metrics: BatcherMetrics::default(),
            config,
            next_batcher_id: AtomicU64::new(1),
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.id
    }

    pub fn resolver(&self) -> &Arc<dyn TabletResolver> {
        &self.resolver
    }

    pub fn dispatch(&self) -> &Arc<dyn RpcDispatch> {
        &self.dispatch
    }

    pub fn request_ids(&self) -> &RequestIdTracker {
        &self.request_ids
    }

    pub fn metrics(&self) -> &BatcherMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    pub(super) fn next_batcher_id(&self) -> u64 {
        self.next_batcher_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a batcher with no transaction, read point or session.
    pub fn new_batcher(self: &Arc<Self>) -> Arc<Batcher> {
        Batcher::new(self.clone(), None, None, None)
    }

    pub fn new_batcher_with(
        self: &Arc<Self>,
        transaction: Option<Arc<dyn TransactionGate>>,
        read_point: Option<Arc<dyn ConsistentReadPoint>>,
        session: Option<Weak<dyn FlushObserver>>,
    ) -> Arc<Batcher> {
        Batcher::new(self.clone(), transaction, read_point, session)
    }
}

impl std::fmt::Debug for BatcherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatcherClient")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}
