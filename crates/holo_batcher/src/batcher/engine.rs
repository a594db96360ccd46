//! The operation batcher: gathering, tablet resolution, transaction gating,
//! per-tablet dispatch and result fan-in for one logical batch.
//!
//! Ownership: the session that creates a batcher keeps one `Arc`, and every
//! asynchronous step the batcher issues (lookup, transaction prepare, call)
//! captures another. The batcher therefore outlives its session whenever work
//! is still in flight, and holds only a `Weak` back to the session.
//!
//! Phase ownership:
//! - `Gathering`: the caller thread mutates the op list.
//! - `ResolvingTablets`: lookup completions only touch their own `InFlightOp`
//!   and the error collector. The lookup that drops `outstanding_lookups` to
//!   zero becomes the phase owner and builds the tablet groups.
//! - `TransactionPrepare`: only the prepare completion moves the batch on.
//! - `TransactionReady`: call completions only settle the ops of their own
//!   group; the completion that drops `outstanding_rpcs` to zero finalizes.
//!
//! `core` is a plain mutex held for short, non-blocking sections only. It is
//! never held across an await, a collaborator call, or the flush callback.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::client::BatcherClient;
use super::error::{BatchError, CollectedError, CombinedError, ErrorCollector};
use super::op::{group_ops, InFlightOp, TabletGroup};
use super::state::BatcherState;
use super::types::{
    CallOp, ClientId, ConsistentReadPoint, FlushCallback, FlushObserver, OpId, Operation,
    PrepareRequest, RejectionScoreSource, RemoteTablet, RetryIds, RetryableRequestId, TabletCall,
    TabletResponse, TransactionGate, TransactionMetadata,
};

/// Mutable batch state, written by the current phase owner.
struct Core {
    state: BatcherState,
    /// Every op ever added, in add order.
    ops: Vec<Arc<InFlightOp>>,
    /// Ops still viable for sending; lookup failures are dropped from it.
    ops_queue: Vec<Arc<InFlightOp>>,
    op_ids: HashSet<OpId>,
    groups: Vec<Arc<TabletGroup>>,
    deadline: Instant,
    flush_requested: bool,
    flush_callback: Option<FlushCallback>,
    flush_started_at: Option<Instant>,
    combined_error: CombinedError,
    is_within_transaction_retry: bool,
    awaiting_transaction: bool,
    transaction_metadata: Option<TransactionMetadata>,
}

impl Core {
    fn transition(&mut self, batcher_id: u64, next: BatcherState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal batcher transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(
            batcher = batcher_id,
            from = %self.state,
            to = %next,
            ops = self.ops.len(),
            "batcher state transition"
        );
        self.state = next;
    }
}

/// What the phase owner does after all lookups settled.
enum AfterLookups {
    Finish,
    Prepare(PrepareRequest),
    Execute,
}

pub struct Batcher {
    id: u64,
    client: Arc<BatcherClient>,
    session: Option<Weak<dyn FlushObserver>>,
    transaction: Option<Arc<dyn TransactionGate>>,
    read_point: Option<Arc<dyn ConsistentReadPoint>>,
    core: Mutex<Core>,
    error_collector: ErrorCollector,
    outstanding_lookups: AtomicUsize,
    outstanding_rpcs: AtomicUsize,
    force_consistent_read: AtomicBool,
    allow_local_calls_in_curr_thread: AtomicBool,
    rejection_score_source: RwLock<Option<Arc<dyn RejectionScoreSource>>>,
}

impl Batcher {
    pub fn new(
        client: Arc<BatcherClient>,
        transaction: Option<Arc<dyn TransactionGate>>,
        read_point: Option<Arc<dyn ConsistentReadPoint>>,
        session: Option<Weak<dyn FlushObserver>>,
    ) -> Arc<Self> {
        let config = *client.config();
        Arc::new(Self {
            id: client.next_batcher_id(),
            session,
            transaction,
            read_point,
            core: Mutex::new(Core {
                state: BatcherState::Gathering,
                ops: Vec::new(),
                ops_queue: Vec::new(),
                op_ids: HashSet::new(),
                groups: Vec::new(),
                deadline: Instant::now() + config.default_timeout,
                flush_requested: false,
                flush_callback: None,
                flush_started_at: None,
                combined_error: CombinedError::default(),
                is_within_transaction_retry: false,
                awaiting_transaction: false,
                transaction_metadata: None,
            }),
            error_collector: ErrorCollector::new(),
            outstanding_lookups: AtomicUsize::new(0),
            outstanding_rpcs: AtomicUsize::new(0),
            force_consistent_read: AtomicBool::new(config.force_consistent_read),
            allow_local_calls_in_curr_thread: AtomicBool::new(
                config.allow_local_calls_in_curr_thread,
            ),
            rejection_score_source: RwLock::new(None),
            client,
        })
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn log_prefix(&self) -> String {
        format!("Batcher ({}, client {}): ", self.id, self.client.client_id())
    }

    pub fn state(&self) -> BatcherState {
        self.core().state
    }

    pub fn client_id(&self) -> ClientId {
        self.client.client_id()
    }

    /// Set the absolute deadline applied to every lookup and call.
    ///
    /// Only honoured while gathering; the deadline is read-only once the
    /// flush started.
    pub fn set_deadline(&self, deadline: Instant) {
        let mut core = self.core();
        if core.state != BatcherState::Gathering {
            tracing::warn!(batcher = self.id, state = %core.state, "ignoring deadline change after flush");
            return;
        }
        core.deadline = deadline;
    }

    pub fn deadline(&self) -> Instant {
        self.core().deadline
    }

    pub fn transaction(&self) -> Option<&Arc<dyn TransactionGate>> {
        self.transaction.as_ref()
    }

    pub fn read_point(&self) -> Option<&Arc<dyn ConsistentReadPoint>> {
        self.read_point.as_ref()
    }

    pub fn set_force_consistent_read(&self, value: bool) {
        self.force_consistent_read.store(value, Ordering::Relaxed);
    }

    pub fn allow_local_calls_in_curr_thread(&self) -> bool {
        self.allow_local_calls_in_curr_thread.load(Ordering::Relaxed)
    }

    pub fn set_allow_local_calls_in_curr_thread(&self, value: bool) {
        self.allow_local_calls_in_curr_thread
            .store(value, Ordering::Relaxed);
    }

    /// Add an operation. Only legal while gathering, and only once per op.
    pub fn add(&self, op: Arc<Operation>) -> Result<(), BatchError> {
        let mut core = self.core();
        if core.state != BatcherState::Gathering {
            return Err(BatchError::IllegalState(format!(
                "cannot add operation to batcher {} in state {}",
                self.id, core.state
            )));
        }
        if !core.op_ids.insert(op.id()) {
            return Err(BatchError::IllegalState(format!(
                "operation {:?} already added to batcher {}",
                op.id(),
                self.id
            )));
        }
        let in_flight = Arc::new(InFlightOp::new(op, core.ops.len()));
        core.ops.push(in_flight.clone());
        core.ops_queue.push(in_flight);
        Ok(())
    }

    /// True while gathering if `op` was added to this batcher.
    pub fn has(&self, op: &Operation) -> bool {
        let core = self.core();
        core.state == BatcherState::Gathering && core.op_ids.contains(&op.id())
    }

    /// True if any added op has neither succeeded nor failed yet.
    pub fn has_pending_operations(&self) -> bool {
        self.core().ops.iter().any(|op| op.is_pending())
    }

    /// Ops buffered and still viable; zero once the flush started.
    ///
    /// Lookups only start with the flush, so while gathering no op can have
    /// become unviable yet and this always equals
    /// `added_not_flushed_operations_count`.
    pub fn count_buffered_operations(&self) -> usize {
        let core = self.core();
        if core.state == BatcherState::Gathering {
            core.ops_queue.len()
        } else {
            0
        }
    }

    /// Ops added but not yet flushed. Counts what was added, not what is
    /// still viable; with lookups deferred to the flush both counts match.
    pub fn added_not_flushed_operations_count(&self) -> usize {
        let core = self.core();
        if core.state == BatcherState::Gathering {
            core.ops.len()
        } else {
            0
        }
    }

    /// Snapshot of every op added to this batcher, in add order.
    pub fn in_flight_ops(&self) -> Vec<Arc<InFlightOp>> {
        self.core().ops.clone()
    }

    /// Snapshot of the tablet groups; empty until all lookups settled.
    pub fn in_flight_groups(&self) -> Vec<Arc<TabletGroup>> {
        self.core().groups.clone()
    }

    pub fn next_request_id_and_min_running_request_id(&self, tablet_id: &str) -> RetryIds {
        self.client
            .request_ids()
            .next_request_id_and_min_running(tablet_id)
    }

    pub fn request_finished(&self, tablet_id: &str, request_id: RetryableRequestId) {
        self.client
            .request_ids()
            .request_finished(tablet_id, request_id);
    }

    pub fn set_rejection_score_source(&self, source: Arc<dyn RejectionScoreSource>) {
        *self
            .rejection_score_source
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(source);
    }

    /// Forward the backpressure query; 0.0 when no source is attached.
    pub fn rejection_score(&self, attempt: usize) -> f64 {
        self.rejection_score_source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|source| source.score(attempt))
            .unwrap_or(0.0)
    }

    /// Take every error collected so far; the caller owns the result.
    pub fn get_and_clear_pending_errors(&self) -> Vec<CollectedError> {
        self.error_collector.drain_all()
    }

    pub fn count_pending_errors(&self) -> usize {
        self.error_collector.count_errors()
    }

    /// Fail `op` with `error` and fold the failure into the batch summary.
    ///
    /// Ops that already settled keep their outcome; nothing is recorded.
    pub fn combine_error(&self, op: &InFlightOp, error: BatchError) {
        if !op.fail(error.clone()) {
            return;
        }
        self.error_collector
            .record(op.operation().clone(), error.clone());
        self.core().combined_error.add(&error);
    }

    /// Flush the batch and wait for its summary status.
    pub async fn flush(self: &Arc<Self>, is_within_transaction_retry: bool) -> Result<(), BatchError> {
        let (tx, rx) = oneshot::channel();
        self.flush_async(
            move |result| {
                let _ = tx.send(result);
            },
            is_within_transaction_retry,
        );
        rx.await
            .unwrap_or_else(|_| Err(BatchError::Aborted("flush callback dropped".to_string())))
    }

    /// Start flushing. `callback` runs exactly once, after the last
    /// asynchronous step of the flush, and never before this call returns.
    ///
    /// Must be called from within a tokio runtime.
    pub fn flush_async<F>(self: &Arc<Self>, callback: F, is_within_transaction_retry: bool)
    where
        F: FnOnce(Result<(), BatchError>) + Send + 'static,
    {
        let callback: FlushCallback = Box::new(callback);
        let (ops, deadline) = {
            let mut core = self.core();
            if core.flush_requested {
                let state = core.state;
                drop(core);
                tracing::warn!(batcher = self.id, state = %state, "flush requested twice");
                tokio::spawn(async move {
                    callback(Err(BatchError::IllegalState(format!(
                        "batcher already flushing (state {state})"
                    ))));
                });
                return;
            }
            core.flush_requested = true;
            core.flush_callback = Some(callback);
            core.flush_started_at = Some(Instant::now());
            core.is_within_transaction_retry = is_within_transaction_retry;

            if core.state == BatcherState::Aborted {
                // Aborted while gathering: nothing to look up, just report.
                drop(core);
                let this = self.clone();
                tokio::spawn(async move { this.try_finish() });
                return;
            }

            core.transition(self.id, BatcherState::ResolvingTablets);
            self.outstanding_lookups
                .store(core.ops_queue.len(), Ordering::SeqCst);
            (core.ops_queue.clone(), core.deadline)
        };

        if ops.is_empty() {
            let this = self.clone();
            tokio::spawn(async move { this.all_lookups_done() });
            return;
        }

        for op in ops {
            let this = self.clone();
            tokio::spawn(async move {
                let result = this
                    .client
                    .resolver()
                    .resolve(
                        op.operation().table(),
                        op.operation().partition_key(),
                        deadline,
                    )
                    .await;
                this.tablet_lookup_finished(&op, result);
            });
        }
    }

    fn tablet_lookup_finished(
        self: &Arc<Self>,
        op: &InFlightOp,
        result: anyhow::Result<RemoteTablet>,
    ) {
        match result {
            Ok(tablet) => {
                op.set_resolution(Ok(tablet));
            }
            Err(err) => {
                let status = BatchError::from_anyhow(err);
                self.client.metrics().record_lookup_failed();
                tracing::debug!(
                    batcher = self.id,
                    op = ?op.operation().id(),
                    table = op.operation().table(),
                    error = %status,
                    "tablet lookup failed"
                );
                op.set_resolution(Err(status.clone()));
                self.combine_error(op, status);
            }
        }

        if self.outstanding_lookups.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.all_lookups_done();
        }
    }

    /// Barrier after the last lookup: drop unresolved ops, build the groups
    /// and either prepare the transaction or go straight to dispatch.
    fn all_lookups_done(self: &Arc<Self>) {
        let next = {
            let mut core = self.core();
            if core.state != BatcherState::ResolvingTablets {
                debug_assert_eq!(core.state, BatcherState::Aborted);
                AfterLookups::Finish
            } else {
                core.ops_queue
                    .retain(|op| op.tablet().is_some() && op.is_pending());
                core.groups = group_ops(&core.ops_queue);
                core.transition(self.id, BatcherState::TransactionPrepare);

                let needs_transaction = self.transaction.is_some()
                    && core
                        .ops_queue
                        .iter()
                        .any(|op| op.operation().is_transactional());
                if needs_transaction {
                    core.awaiting_transaction = true;
                    AfterLookups::Prepare(PrepareRequest {
                        groups: core.groups.iter().map(|g| g.summary()).collect(),
                        is_within_transaction_retry: core.is_within_transaction_retry,
                        force_consistent_read: self.force_consistent_read.load(Ordering::Relaxed),
                        deadline: core.deadline,
                    })
                } else {
                    AfterLookups::Execute
                }
            }
        };

        match next {
            AfterLookups::Finish => self.try_finish(),
            AfterLookups::Execute => self.execute_operations(),
            AfterLookups::Prepare(request) => {
                let Some(gate) = self.transaction.clone() else {
                    return;
                };
                let this = self.clone();
                tokio::spawn(async move {
                    let result = gate
                        .prepare(request)
                        .await
                        .map_err(BatchError::from_anyhow);
                    this.transaction_ready(result);
                });
            }
        }
    }

    /// Readiness notification from the transaction gate.
    fn transaction_ready(self: &Arc<Self>, result: Result<TransactionMetadata, BatchError>) {
        {
            let mut core = self.core();
            core.awaiting_transaction = false;
            match &result {
                Ok(metadata) if core.state == BatcherState::TransactionPrepare => {
                    core.transaction_metadata = Some(metadata.clone());
                }
                _ => {}
            }
        }

        match result {
            Ok(_) => self.execute_operations(),
            Err(status) => {
                tracing::warn!(
                    batcher = self.id,
                    error = %status,
                    "transaction prepare failed, aborting batch"
                );
                self.abort(BatchError::TransactionPrepare(status.to_string()));
            }
        }
    }

    /// Send one call per tablet group.
    fn execute_operations(self: &Arc<Self>) {
        let groups = {
            let mut core = self.core();
            if core.state != BatcherState::TransactionPrepare {
                drop(core);
                self.try_finish();
                return;
            }
            core.transition(self.id, BatcherState::TransactionReady);
            // Counted before any launch so an early completion cannot see zero.
            self.outstanding_rpcs
                .store(core.groups.len(), Ordering::SeqCst);
            core.groups.clone()
        };

        if groups.is_empty() {
            self.try_finish();
            return;
        }

        let need_consistent_read = self.force_consistent_read.load(Ordering::Relaxed)
            || self.transaction.is_some()
            || (groups.len() > 1 && groups.iter().any(|g| g.kind().is_read()));
        let allow_local = self.allow_local_calls_in_curr_thread();

        for group in groups {
            // An abort stops every call not yet launched; only launched calls drain.
            if !self.dispatching() {
                self.skip_call(&group, None);
                continue;
            }
            let call = self.create_call(&group, allow_local, need_consistent_read);
            if !self.dispatching() {
                self.skip_call(&group, call.retry);
                continue;
            }
            self.client.metrics().record_rpcs_sent(1);
            let this = self.clone();
            tokio::spawn(async move {
                let retry = call.retry;
                let result = this.client.dispatch().launch(call).await;
                if group.kind().is_read() {
                    this.process_read_response(&group, result);
                } else {
                    this.process_write_response(&group, retry, result);
                }
            });
        }
    }

    /// Build the call for one group. Writes get a fresh retryable request id.
    pub fn create_call(
        &self,
        group: &TabletGroup,
        allow_local_calls_in_curr_thread: bool,
        need_consistent_read: bool,
    ) -> TabletCall {
        let (deadline, transaction) = {
            let core = self.core();
            (core.deadline, core.transaction_metadata.clone())
        };
        let retry = if group.kind().is_read() {
            None
        } else {
            let ids = self.next_request_id_and_min_running_request_id(group.tablet_id());
            for op in group.ops() {
                op.set_request_id(ids.request_id);
            }
            Some(ids)
        };
        let read_time = if need_consistent_read && group.kind().is_read() {
            self.read_point.as_ref().and_then(|rp| rp.read_time())
        } else {
            None
        };

        TabletCall {
            client_id: self.client.client_id(),
            tablet: group.tablet().clone(),
            kind: group.kind(),
            ops: group
                .ops()
                .iter()
                .map(|op| CallOp {
                    op_id: op.operation().id(),
                    partition_key: op.operation().partition_key().to_vec(),
                    payload: op.operation().payload().to_vec(),
                })
                .collect(),
            deadline,
            allow_local_execution: allow_local_calls_in_curr_thread && group.tablet().local,
            need_consistent_read,
            read_time,
            transaction,
            retry,
        }
    }

    fn process_read_response(
        self: &Arc<Self>,
        group: &TabletGroup,
        result: anyhow::Result<TabletResponse>,
    ) {
        self.process_response(group, result);
        self.rpc_finished();
    }

    fn process_write_response(
        self: &Arc<Self>,
        group: &TabletGroup,
        retry: Option<RetryIds>,
        result: anyhow::Result<TabletResponse>,
    ) {
        self.process_response(group, result);
        if let Some(retry) = retry {
            self.request_finished(group.tablet_id(), retry.request_id);
        }
        self.rpc_finished();
    }

    /// Settle every op of `group` from one call result.
    fn process_response(&self, group: &TabletGroup, result: anyhow::Result<TabletResponse>) {
        let mut used_read_time = None;
        let status = match result {
            Err(err) => {
                let status = BatchError::from_anyhow(err);
                self.client.metrics().record_rpc_failed();
                tracing::warn!(
                    batcher = self.id,
                    tablet = %group.tablet_id(),
                    ops = group.len(),
                    error = %status,
                    "tablet call failed"
                );
                for op in group.ops() {
                    self.combine_error(op, status.clone());
                }
                Err(status)
            }
            Ok(response) if response.results.len() != group.len() => {
                Err(self.add_op_count_mismatch_error(group, response.results.len()))
            }
            Ok(response) => {
                used_read_time = response.used_read_time;
                for (op, result) in group.ops().iter().zip(response.results) {
                    match result {
                        Ok(value) => {
                            op.succeed(value);
                        }
                        Err(error) => self.combine_error(op, error),
                    }
                }
                if let (Some(read_point), Some(used)) = (&self.read_point, used_read_time) {
                    read_point.update_used_read_time(used);
                }
                Ok(())
            }
        };

        let prepared = self.core().transaction_metadata.is_some();
        if let (true, Some(gate)) = (prepared, &self.transaction) {
            let op_ids = group
                .ops()
                .iter()
                .map(|op| op.operation().id())
                .collect::<Vec<_>>();
            gate.flushed(&op_ids, used_read_time, &status);
        }
    }

    /// A response that does not account for every op fails the whole group;
    /// results are never attributed partially.
    fn add_op_count_mismatch_error(&self, group: &TabletGroup, actual: usize) -> BatchError {
        let status = BatchError::OpCountMismatch {
            expected: group.len(),
            actual,
        };
        self.client.metrics().record_op_count_mismatch();
        tracing::error!(
            batcher = self.id,
            tablet = %group.tablet_id(),
            expected = group.len(),
            actual,
            "response op count mismatch"
        );
        for op in group.ops() {
            self.combine_error(op, status.clone());
        }
        status
    }

    fn dispatching(&self) -> bool {
        self.core().state == BatcherState::TransactionReady
    }

    /// Account for a call that was never launched because the batch aborted.
    fn skip_call(self: &Arc<Self>, group: &TabletGroup, retry: Option<RetryIds>) {
        tracing::debug!(
            batcher = self.id,
            tablet = %group.tablet_id(),
            ops = group.len(),
            "batch aborted, call not sent"
        );
        if let Some(retry) = retry {
            self.request_finished(group.tablet_id(), retry.request_id);
        }
        self.rpc_finished();
    }

    fn rpc_finished(self: &Arc<Self>) {
        if self.outstanding_rpcs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.try_finish();
        }
    }

    /// Abort the batch. Ops that have not settled fail with `status`; calls
    /// already in flight drain, and the flush callback fires once they have.
    pub fn abort(self: &Arc<Self>, status: BatchError) {
        {
            let mut core = self.core();
            if core.state.is_terminal() {
                tracing::debug!(batcher = self.id, state = %core.state, "abort after batch finished");
                drop(core);
                // An earlier abort may still be waiting on this completion.
                self.try_finish();
                return;
            }
            core.transition(self.id, BatcherState::Aborted);
            for op in core.ops.clone() {
                if op.fail(status.clone()) {
                    self.error_collector
                        .record(op.operation().clone(), status.clone());
                    core.combined_error.add(&status);
                }
            }
            core.combined_error.force(status.clone());
        }
        self.client.metrics().record_abort();
        tracing::info!(batcher = self.id, error = %status, "batcher aborted");
        self.try_finish();
    }

    /// Fire the flush callback if, and only if, every asynchronous step of
    /// the flush has reported back. Safe to call from any completion.
    fn try_finish(&self) {
        let (callback, summary, ops, started_at) = {
            let mut core = self.core();
            if core.flush_callback.is_none() {
                return;
            }
            let lookups = self.outstanding_lookups.load(Ordering::Acquire);
            let rpcs = self.outstanding_rpcs.load(Ordering::Acquire);
            let ready = match core.state {
                BatcherState::Aborted => lookups == 0 && rpcs == 0 && !core.awaiting_transaction,
                BatcherState::TransactionReady => rpcs == 0,
                _ => false,
            };
            if !ready {
                return;
            }
            if core.state != BatcherState::Aborted {
                core.transition(self.id, BatcherState::Complete);
            }
            (
                core.flush_callback.take(),
                core.combined_error.to_result(),
                core.ops.len(),
                core.flush_started_at,
            )
        };

        let elapsed = started_at.map(|at| at.elapsed()).unwrap_or_default();
        let slow = elapsed >= self.client.config().slow_flush_threshold;
        self.client
            .metrics()
            .record_flush(elapsed, ops, summary.is_ok(), slow);
        if slow {
            tracing::info!(
                batcher = self.id,
                ops,
                elapsed_us = elapsed.as_micros() as u64,
                ok = summary.is_ok(),
                "slow flush"
            );
        }
        match &summary {
            Ok(()) => tracing::debug!(batcher = self.id, ops, "flush finished"),
            Err(err) => tracing::debug!(
                batcher = self.id,
                ops,
                errors = self.error_collector.count_errors(),
                error = %err,
                "flush finished with errors"
            ),
        }

        if let Some(session) = self.session.as_ref().and_then(Weak::upgrade) {
            session.flush_finished(self.id);
        }
        if let Some(callback) = callback {
            callback(summary);
        }
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        if core.flush_callback.is_some() {
            tracing::error!(
                batcher = self.id,
                state = %core.state,
                "batcher dropped before its flush callback fired"
            );
        }
    }
}

impl std::fmt::Debug for Batcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("id", &self.id)
            .field("client_id", &self.client.client_id())
            .field("state", &self.state())
            .finish()
    }
}
