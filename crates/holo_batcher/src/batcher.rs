//! Batcher module wiring.
//!
//! `engine` contains the batch state machine and its fan-out/fan-in, `op`
//! holds per-operation bookkeeping and tablet grouping, `state` the lifecycle
//! table, `error` the statuses and error collector, and `types` the shared
//! request/response types and collaborator contracts (resolver, dispatch,
//! transaction gate).

mod client;
mod engine;
mod error;
mod metrics;
mod op;
mod request_ids;
mod state;
mod types;

pub use client::BatcherClient;
pub use engine::Batcher;
pub use error::{
    BatchError, BatchErrorKind, CollectedError, CombinedError, ErrorCollector,
    ERROR_REACHING_OUT_TO_TSERVERS_MSG,
};
pub use metrics::{BatcherMetrics, MetricsSnapshot};
pub use op::{InFlightOp, OpOutcome, TabletGroup};
pub use request_ids::RequestIdTracker;
pub use state::BatcherState;
pub use types::{
    BatcherConfig, CallOp, ClientId, ConsistentReadPoint, FlushCallback, FlushObserver,
    GroupSummary, NodeId, OpId, OpKind, OpResponse, Operation, PrepareRequest, ReadTime,
    RejectionScoreSource, RemoteTablet, RetryIds, RetryableRequestId, RpcDispatch, TabletCall,
    TabletId, TabletResolver, TabletResponse, TransactionGate, TransactionMetadata,
};
