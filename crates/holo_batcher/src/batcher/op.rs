//! Per-operation bookkeeping and tablet groups.
//!
//! An `InFlightOp` is only ever mutated by one asynchronous step at a time:
//! its tablet lookup sets the resolution exactly once, and the call covering
//! its group (or an abort) settles the outcome exactly once. Grouping only
//! reads resolutions after every lookup of the flush has called back.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use super::error::BatchError;
use super::types::{GroupSummary, OpKind, Operation, RemoteTablet, RetryableRequestId, TabletId};

/// Result state of one operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpOutcome {
    Pending,
    Succeeded(Option<Vec<u8>>),
    Failed(BatchError),
}

#[derive(Debug)]
pub struct InFlightOp {
    op: Arc<Operation>,
    /// Position in the batch, used to keep groups in add order.
    sequence_number: usize,
    resolution: OnceLock<Result<RemoteTablet, BatchError>>,
    outcome: Mutex<OpOutcome>,
    request_id: OnceLock<RetryableRequestId>,
}

impl InFlightOp {
    pub fn new(op: Arc<Operation>, sequence_number: usize) -> Self {
        Self {
            op,
            sequence_number,
            resolution: OnceLock::new(),
            outcome: Mutex::new(OpOutcome::Pending),
            request_id: OnceLock::new(),
        }
    }

    pub fn operation(&self) -> &Arc<Operation> {
        &self.op
    }

    pub fn sequence_number(&self) -> usize {
        self.sequence_number
    }

    /// Record the lookup result. Returns false if the op was already resolved.
    pub(super) fn set_resolution(&self, result: Result<RemoteTablet, BatchError>) -> bool {
        self.resolution.set(result).is_ok()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.get().is_some()
    }

    pub fn tablet(&self) -> Option<&RemoteTablet> {
        self.resolution.get().and_then(|r| r.as_ref().ok())
    }

    pub fn resolution_error(&self) -> Option<&BatchError> {
        self.resolution.get().and_then(|r| r.as_ref().err())
    }

    pub fn outcome(&self) -> OpOutcome {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(
            *self.outcome.lock().unwrap_or_else(PoisonError::into_inner),
            OpOutcome::Pending
        )
    }

    /// Settle the op as succeeded. Returns false if it was already settled.
    pub(super) fn succeed(&self, value: Option<Vec<u8>>) -> bool {
        self.settle(OpOutcome::Succeeded(value))
    }

    /// Settle the op as failed. Returns false if it was already settled.
    pub(super) fn fail(&self, error: BatchError) -> bool {
        self.settle(OpOutcome::Failed(error))
    }

    fn settle(&self, next: OpOutcome) -> bool {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if *outcome != OpOutcome::Pending {
            return false;
        }
        *outcome = next;
        true
    }

    pub fn request_id(&self) -> Option<RetryableRequestId> {
        self.request_id.get().copied()
    }

    pub(super) fn set_request_id(&self, id: RetryableRequestId) {
        let _ = self.request_id.set(id);
    }
}

/// Operations bound for the same tablet, sent together in one call.
#[derive(Debug)]
pub struct TabletGroup {
    tablet: RemoteTablet,
    kind: OpKind,
    ops: Vec<Arc<InFlightOp>>,
}

impl TabletGroup {
    pub fn tablet(&self) -> &RemoteTablet {
        &self.tablet
    }

    pub fn tablet_id(&self) -> &TabletId {
        &self.tablet.tablet_id
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn ops(&self) -> &[Arc<InFlightOp>] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn summary(&self) -> GroupSummary {
        GroupSummary {
            tablet_id: self.tablet.tablet_id.clone(),
            kind: self.kind,
            ops: self.ops.len(),
        }
    }
}

/// Partition the resolved, still-pending ops by `(tablet, kind)`.
///
/// Groups come out ordered by tablet id then kind; ops inside a group keep
/// their add order.
pub(super) fn group_ops(ops: &[Arc<InFlightOp>]) -> Vec<Arc<TabletGroup>> {
    let mut by_key: BTreeMap<(TabletId, OpKind), (RemoteTablet, Vec<Arc<InFlightOp>>)> =
        BTreeMap::new();
    for op in ops {
        let Some(tablet) = op.tablet() else {
            continue;
        };
        if !op.is_pending() {
            continue;
        }
        by_key
            .entry((tablet.tablet_id.clone(), op.operation().kind()))
            .or_insert_with(|| (tablet.clone(), Vec::new()))
            .1
            .push(op.clone());
    }

    by_key
        .into_iter()
        .map(|((_, kind), (tablet, mut ops))| {
            ops.sort_by_key(|op| op.sequence_number());
            Arc::new(TabletGroup { tablet, kind, ops })
        })
        .collect()
}
