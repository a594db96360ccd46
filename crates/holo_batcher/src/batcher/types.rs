//! Shared types and collaborator contracts for the batcher.
//!
//! These types are kept in a small, dependency-light module because they are
//! used by the batcher engine, the session, and the transport/resolver layers
//! that plug into it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::error::BatchError;

/// Identifier of a tablet (one partition of a table served by a replica set).
pub type TabletId = String;
/// Identifier of the client that owns a batcher; used for retry correlation.
pub type ClientId = u64;
/// Per-tablet monotonically increasing id used to deduplicate retried writes.
pub type RetryableRequestId = u64;
/// Hybrid time used for consistent reads.
pub type ReadTime = u64;
/// Replica node identifier.
pub type NodeId = u64;

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one caller-supplied operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u64);

impl OpId {
    fn next() -> Self {
        OpId(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What an operation does at the tablet. Also the second half of the grouping
/// key: a single remote call never mixes kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Write,
    /// Read served by the tablet leader.
    LeaderRead,
    /// Read that may be served by any replica with a consistent prefix.
    ConsistentPrefixRead,
}

impl OpKind {
    pub fn is_read(self) -> bool {
        !matches!(self, OpKind::Write)
    }
}

/// One row-level read or write submitted by a caller.
#[derive(Debug)]
pub struct Operation {
    id: OpId,
    kind: OpKind,
    table: String,
    partition_key: Vec<u8>,
    payload: Vec<u8>,
    transactional: bool,
}

impl Operation {
    pub fn new(kind: OpKind, table: impl Into<String>, partition_key: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            id: OpId::next(),
            kind,
            table: table.into(),
            partition_key,
            payload,
            transactional: false,
        }
    }

    pub fn write(table: impl Into<String>, partition_key: Vec<u8>, payload: Vec<u8>) -> Self {
        Self::new(OpKind::Write, table, partition_key, payload)
    }

    pub fn read(table: impl Into<String>, partition_key: Vec<u8>) -> Self {
        Self::new(OpKind::LeaderRead, table, partition_key, Vec::new())
    }

    pub fn consistent_prefix_read(table: impl Into<String>, partition_key: Vec<u8>) -> Self {
        Self::new(OpKind::ConsistentPrefixRead, table, partition_key, Vec::new())
    }

    /// Mark the operation as targeting a transactional table.
    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn partition_key(&self) -> &[u8] {
        &self.partition_key
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }
}

/// Location of a tablet as returned by the resolver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTablet {
    pub tablet_id: TabletId,
    pub replicas: Vec<NodeId>,
    pub leader: Option<NodeId>,
    /// True when a replica lives in the calling process.
    pub local: bool,
}

impl RemoteTablet {
    pub fn new(tablet_id: impl Into<TabletId>) -> Self {
        Self {
            tablet_id: tablet_id.into(),
            replicas: Vec::new(),
            leader: None,
            local: false,
        }
    }
}

/// Per-client batcher tuning.
#[derive(Clone, Copy, Debug)]
pub struct BatcherConfig {
    /// Deadline applied to lookups and calls when `set_deadline` is never used.
    pub default_timeout: Duration,
    /// Allow local tablet calls to run on the completing thread.
    pub allow_local_calls_in_curr_thread: bool,
    /// Force consistent reads even for single-group batches.
    pub force_consistent_read: bool,
    /// Flushes slower than this are logged at info.
    pub slow_flush_threshold: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
            allow_local_calls_in_curr_thread: true,
            force_consistent_read: false,
            slow_flush_threshold: Duration::from_millis(500),
        }
    }
}

/// Transaction metadata attached to every call of a prepared batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionMetadata {
    pub transaction_id: u64,
    pub status_tablet: TabletId,
    pub start_time: ReadTime,
}

/// Shape of one tablet group, as seen by the transaction coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupSummary {
    pub tablet_id: TabletId,
    pub kind: OpKind,
    pub ops: usize,
}

/// Batch metadata handed to `TransactionGate::prepare`.
#[derive(Clone, Debug)]
pub struct PrepareRequest {
    pub groups: Vec<GroupSummary>,
    /// Operations were already registered with the transaction by an earlier
    /// attempt and must not be registered again.
    pub is_within_transaction_retry: bool,
    pub force_consistent_read: bool,
    pub deadline: Instant,
}

/// One operation as it travels inside a `TabletCall`.
#[derive(Clone, Debug)]
pub struct CallOp {
    pub op_id: OpId,
    pub partition_key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Retry correlation for a write call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryIds {
    pub request_id: RetryableRequestId,
    pub min_running_request_id: RetryableRequestId,
}

/// A remote call for one tablet group, created by the batcher and launched by
/// `RpcDispatch`.
#[derive(Clone, Debug)]
pub struct TabletCall {
    pub client_id: ClientId,
    pub tablet: RemoteTablet,
    pub kind: OpKind,
    pub ops: Vec<CallOp>,
    pub deadline: Instant,
    pub allow_local_execution: bool,
    pub need_consistent_read: bool,
    pub read_time: Option<ReadTime>,
    pub transaction: Option<TransactionMetadata>,
    /// Set for writes only.
    pub retry: Option<RetryIds>,
}

/// Outcome of one operation inside a successful call.
pub type OpResponse = Result<Option<Vec<u8>>, BatchError>;

/// Response for one tablet call: one result per operation, in call order.
#[derive(Clone, Debug, Default)]
pub struct TabletResponse {
    pub results: Vec<OpResponse>,
    pub used_read_time: Option<ReadTime>,
}

/// Maps a partition key to the tablet currently serving it.
///
/// Expiry of `deadline` is detected by the resolver and reported as an error.
#[async_trait]
pub trait TabletResolver: Send + Sync + 'static {
    async fn resolve(
        &self,
        table: &str,
        partition_key: &[u8],
        deadline: Instant,
    ) -> anyhow::Result<RemoteTablet>;
}

/// Sends a tablet call and returns its response.
///
/// The transport owns wire encoding, retries and deadline enforcement.
#[async_trait]
pub trait RpcDispatch: Send + Sync + 'static {
    async fn launch(&self, call: TabletCall) -> anyhow::Result<TabletResponse>;
}

/// Narrow view of the ambient transaction coordinator.
#[async_trait]
pub trait TransactionGate: Send + Sync + 'static {
    /// Pick a status tablet and produce the metadata for this batch. Resolves
    /// once the transaction is ready for the batch to be sent.
    async fn prepare(&self, request: PrepareRequest) -> anyhow::Result<TransactionMetadata>;

    /// Notified once per completed call of a prepared batch.
    fn flushed(
        &self,
        _ops: &[OpId],
        _used_read_time: Option<ReadTime>,
        _result: &Result<(), BatchError>,
    ) {
    }
}

/// Snapshot marker for consistent reads.
pub trait ConsistentReadPoint: Send + Sync + 'static {
    fn read_time(&self) -> Option<ReadTime>;
    fn update_used_read_time(&self, used: ReadTime);
}

/// External backpressure signal; the batcher only forwards queries.
pub trait RejectionScoreSource: Send + Sync + 'static {
    fn score(&self, attempt: usize) -> f64;
}

/// Non-owning back-reference from a batcher to the session that created it.
pub trait FlushObserver: Send + Sync + 'static {
    fn flush_finished(&self, batcher_id: u64);
}

/// Completion callback of a flush; invoked exactly once.
pub type FlushCallback = Box<dyn FnOnce(Result<(), BatchError>) + Send + 'static>;
