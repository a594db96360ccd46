//! Client session: the owner-facing wrapper that creates batchers.
//!
//! A session always has one gathering batcher. `flush` swaps in a fresh one
//! and flushes the old one; the flushing batcher is tracked until it reports
//! `flush_finished`. Batchers only keep a `Weak` to the session state, so a
//! dropped session never waits on, or is kept alive by, in-flight batches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;

use crate::batcher::{
    BatchError, Batcher, BatcherClient, CollectedError, ConsistentReadPoint, ErrorCollector,
    FlushObserver, Operation, TransactionGate,
};

/// Session state shared with its batchers through `Weak`.
#[derive(Default)]
struct SessionShared {
    errors: ErrorCollector,
    flushing: Mutex<HashMap<u64, Arc<Batcher>>>,
}

impl FlushObserver for SessionShared {
    /// Move the finished batcher's errors into the session before forgetting
    /// it, so they survive a caller that stopped awaiting the flush.
    fn flush_finished(&self, batcher_id: u64) {
        let mut flushing = self.flushing.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(batcher) = flushing.remove(&batcher_id) {
            self.errors.extend(batcher.get_and_clear_pending_errors());
        }
    }
}

pub struct Session {
    client: Arc<BatcherClient>,
    transaction: Option<Arc<dyn TransactionGate>>,
    read_point: Option<Arc<dyn ConsistentReadPoint>>,
    shared: Arc<SessionShared>,
    batcher: Mutex<Arc<Batcher>>,
    timeout: Mutex<Duration>,
}

impl Session {
    pub fn new(client: Arc<BatcherClient>) -> Self {
        Self::with_transaction(client, None, None)
    }

    pub fn with_transaction(
        client: Arc<BatcherClient>,
        transaction: Option<Arc<dyn TransactionGate>>,
        read_point: Option<Arc<dyn ConsistentReadPoint>>,
    ) -> Self {
        let shared = Arc::new(SessionShared::default());
        let timeout = client.config().default_timeout;
        let batcher = new_batcher(&client, &transaction, &read_point, &shared);
        Self {
            client,
            transaction,
            read_point,
            shared,
            batcher: Mutex::new(batcher),
            timeout: Mutex::new(timeout),
        }
    }

    /// Timeout applied to each flush, measured from the flush call.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock().unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    fn current(&self) -> Arc<Batcher> {
        self.batcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn apply(&self, op: Arc<Operation>) -> Result<(), BatchError> {
        self.current().add(op)
    }

    pub fn count_buffered_operations(&self) -> usize {
        self.current().count_buffered_operations()
    }

    pub fn has_pending_operations(&self) -> bool {
        if self.current().has_pending_operations() {
            return true;
        }
        self.shared
            .flushing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|b| b.has_pending_operations())
    }

    /// Number of batchers whose flush has not finished yet.
    pub fn flushing_batchers(&self) -> usize {
        self.shared
            .flushing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub async fn flush(&self) -> Result<(), BatchError> {
        self.flush_with(false).await
    }

    /// Flush the buffered operations. With `is_within_transaction_retry` the
    /// transaction is told these operations were already registered by an
    /// earlier attempt.
    pub async fn flush_with(&self, is_within_transaction_retry: bool) -> Result<(), BatchError> {
        let batcher = {
            let mut current = self.batcher.lock().unwrap_or_else(PoisonError::into_inner);
            let fresh = new_batcher(&self.client, &self.transaction, &self.read_point, &self.shared);
            std::mem::replace(&mut *current, fresh)
        };
        let timeout = *self.timeout.lock().unwrap_or_else(PoisonError::into_inner);
        batcher.set_deadline(Instant::now() + timeout);
        self.shared
            .flushing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(batcher.id(), batcher.clone());

        // Errors reach the session collector through `flush_finished`.
        batcher.flush(is_within_transaction_retry).await
    }

    /// Abort the gathering batcher; its operations fail with `status`.
    pub fn abort(&self, status: BatchError) {
        let batcher = {
            let mut current = self.batcher.lock().unwrap_or_else(PoisonError::into_inner);
            let fresh = new_batcher(&self.client, &self.transaction, &self.read_point, &self.shared);
            std::mem::replace(&mut *current, fresh)
        };
        batcher.abort(status);
        self.shared
            .errors
            .extend(batcher.get_and_clear_pending_errors());
    }

    pub fn count_pending_errors(&self) -> usize {
        self.shared.errors.count_errors()
    }

    pub fn get_and_clear_pending_errors(&self) -> Vec<CollectedError> {
        self.shared.errors.drain_all()
    }
}

fn new_batcher(
    client: &Arc<BatcherClient>,
    transaction: &Option<Arc<dyn TransactionGate>>,
    read_point: &Option<Arc<dyn ConsistentReadPoint>>,
    shared: &Arc<SessionShared>,
) -> Arc<Batcher> {
    let observer: Weak<dyn FlushObserver> = Arc::downgrade(shared) as Weak<dyn FlushObserver>;
    client.new_batcher_with(transaction.clone(), read_point.clone(), Some(observer))
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client.client_id())
            .field("buffered", &self.count_buffered_operations())
            .finish()
    }
}
