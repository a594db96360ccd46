//! Client-side operation batcher.
//!
//! This crate collects row-level read/write operations, resolves the tablet
//! each belongs to, groups them per destination, coordinates with an optional
//! transaction, and fans the groups out as remote calls. Higher layers supply
//! a `TabletResolver`, an `RpcDispatch` and optionally a `TransactionGate`,
//! then drive batches through `Session` or `Batcher` directly.

pub mod batcher;
pub mod session;

pub use batcher::{
    BatchError, BatchErrorKind, Batcher, BatcherClient, BatcherConfig, BatcherState, ClientId,
    CollectedError, ErrorCollector, FlushCallback, FlushObserver, InFlightOp, MetricsSnapshot,
    OpId, OpKind, OpOutcome, Operation, RemoteTablet, RequestIdTracker, RetryableRequestId,
    RpcDispatch, TabletCall, TabletGroup, TabletId, TabletResolver, TabletResponse,
    TransactionGate,
};
pub use session::Session;
