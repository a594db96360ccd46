//! Batch statuses and the per-operation error collector.
//!
//! `BatchError` is the status carried by failed operations and by the flush
//! summary. It is `Clone` because one transport failure is fanned out to every
//! operation of the affected tablet group. Collaborators speak `anyhow`; a
//! typed `BatchError` survives the round trip through `anyhow::Error` and is
//! recovered by downcast.

use std::sync::{Arc, Mutex, PoisonError};

use super::types::Operation;

/// Summary message used when per-operation errors must be fetched from the
/// error collector.
pub const ERROR_REACHING_OUT_TO_TSERVERS_MSG: &str =
    "Errors occurred while reaching out to the tablet servers";

/// Coarse error code used to decide whether two failures are "the same kind".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BatchErrorKind {
    NotFound,
    TimedOut,
    Remote,
    Aborted,
    IllegalState,
    OpCountMismatch,
    TransactionPrepare,
    PartitionListStale,
    Flush,
    Combined,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("response op count mismatch: sent {expected} operations, got {actual} results")]
    OpCountMismatch { expected: usize, actual: usize },

    #[error("transaction prepare failed: {0}")]
    TransactionPrepare(String),

    #[error("table partition list is stale: {0}")]
    PartitionListStale(String),

    /// One or more operations failed with the same kind of error.
    #[error("Errors occurred while reaching out to the tablet servers: {failed} operation(s) failed, first error: {first}; see the error collector for details")]
    Flush { failed: usize, first: Box<BatchError> },

    /// Operations failed with different kinds of errors.
    #[error("Multiple failures: {failed} operation(s) failed, first error: {first}; see the error collector for details")]
    Combined { failed: usize, first: Box<BatchError> },
}

impl BatchError {
    pub fn kind(&self) -> BatchErrorKind {
        match self {
            BatchError::NotFound(_) => BatchErrorKind::NotFound,
            BatchError::TimedOut(_) => BatchErrorKind::TimedOut,
            BatchError::Remote(_) => BatchErrorKind::Remote,
            BatchError::Aborted(_) => BatchErrorKind::Aborted,
            BatchError::IllegalState(_) => BatchErrorKind::IllegalState,
            BatchError::OpCountMismatch { .. } => BatchErrorKind::OpCountMismatch,
            BatchError::TransactionPrepare(_) => BatchErrorKind::TransactionPrepare,
            BatchError::PartitionListStale(_) => BatchErrorKind::PartitionListStale,
            BatchError::Flush { .. } => BatchErrorKind::Flush,
            BatchError::Combined { .. } => BatchErrorKind::Combined,
        }
    }

    /// Recover a typed status from a collaborator error.
    ///
    /// Untyped errors become `Remote` with the full context chain rendered.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<BatchError>() {
            Ok(status) => status,
            Err(err) => {
                if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
                    BatchError::TimedOut(format!("{err:#}"))
                } else {
                    BatchError::Remote(format!("{err:#}"))
                }
            }
        }
    }
}

/// Running summary of the failures seen by one batch.
///
/// The first failure determines the summary; a later failure of a different
/// kind turns the summary into `Combined`. A stale partition list always wins
/// so callers know to refresh table metadata before retrying.
#[derive(Clone, Debug, Default)]
pub struct CombinedError {
    first: Option<BatchError>,
    mixed: bool,
    failed: usize,
    forced: Option<BatchError>,
}

impl CombinedError {
    pub fn add(&mut self, error: &BatchError) {
        self.failed += 1;
        if error.kind() == BatchErrorKind::PartitionListStale {
            self.forced = Some(error.clone());
            return;
        }
        match &self.first {
            None => self.first = Some(error.clone()),
            Some(first) if first.kind() != error.kind() => self.mixed = true,
            Some(_) => {}
        }
    }

    /// Replace the summary with `status` regardless of what was seen before.
    pub fn force(&mut self, status: BatchError) {
        self.forced = Some(status);
    }

    pub fn is_ok(&self) -> bool {
        self.first.is_none() && self.forced.is_none()
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn to_result(&self) -> Result<(), BatchError> {
        if let Some(forced) = &self.forced {
            return Err(forced.clone());
        }
        let Some(first) = &self.first else {
            return Ok(());
        };
        let first = Box::new(first.clone());
        if self.mixed {
            Err(BatchError::Combined {
                failed: self.failed,
                first,
            })
        } else {
            Err(BatchError::Flush {
                failed: self.failed,
                first,
            })
        }
    }
}

/// One failed operation and the status it failed with.
#[derive(Clone, Debug)]
pub struct CollectedError {
    pub op: Arc<Operation>,
    pub error: BatchError,
}

/// Thread-safe sink for per-operation failures.
///
/// Lookup and RPC completions record into it concurrently; callers drain it
/// after the flush callback fired.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Mutex<Vec<CollectedError>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, op: Arc<Operation>, error: BatchError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CollectedError { op, error });
    }

    pub fn extend(&self, errors: Vec<CollectedError>) {
        if errors.is_empty() {
            return;
        }
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(errors);
    }

    pub fn count_errors(&self) -> usize {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Take every collected error; the collector is empty afterwards.
    pub fn drain_all(&self) -> Vec<CollectedError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_error_keeps_first_of_same_kind() {
        let mut combined = CombinedError::default();
        assert!(combined.is_ok());
        assert_eq!(combined.to_result(), Ok(()));

        combined.add(&BatchError::NotFound("tablet a".into()));
        combined.add(&BatchError::NotFound("tablet b".into()));
        match combined.to_result() {
            Err(BatchError::Flush { failed, first }) => {
                assert_eq!(failed, 2);
                assert_eq!(*first, BatchError::NotFound("tablet a".into()));
            }
            other => panic!("unexpected summary: {other:?}"),
        }
    }

    #[test]
    fn combined_error_turns_mixed_on_different_kind() {
        let mut combined = CombinedError::default();
        combined.add(&BatchError::NotFound("tablet a".into()));
        combined.add(&BatchError::TimedOut("rpc".into()));
        let Err(summary) = combined.to_result() else {
            panic!("expected failure summary");
        };
        assert_eq!(summary.kind(), BatchErrorKind::Combined);
        assert!(summary.to_string().contains("Multiple failures"));
    }

    #[test]
    fn stale_partition_list_wins() {
        let mut combined = CombinedError::default();
        combined.add(&BatchError::Remote("boom".into()));
        combined.add(&BatchError::PartitionListStale("t1".into()));
        combined.add(&BatchError::TimedOut("later".into()));
        assert_eq!(
            combined.to_result(),
            Err(BatchError::PartitionListStale("t1".into()))
        );
        assert_eq!(combined.failed(), 3);
    }

    #[test]
    fn from_anyhow_recovers_typed_status() {
        let err = anyhow::Error::new(BatchError::NotFound("no tablet".into()));
        assert_eq!(
            BatchError::from_anyhow(err),
            BatchError::NotFound("no tablet".into())
        );

        let err = anyhow::anyhow!("connection reset").context("write rpc");
        match BatchError::from_anyhow(err) {
            BatchError::Remote(msg) => assert!(msg.contains("connection reset")),
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn collector_drains_once() {
        let collector = ErrorCollector::new();
        let op = Arc::new(Operation::write("t", b"k".to_vec(), b"v".to_vec()));
        collector.record(op.clone(), BatchError::Remote("x".into()));
        collector.record(op, BatchError::Remote("y".into()));
        assert_eq!(collector.count_errors(), 2);
        assert_eq!(collector.drain_all().len(), 2);
        assert!(collector.drain_all().is_empty());
        assert_eq!(collector.count_errors(), 0);
    }
}
