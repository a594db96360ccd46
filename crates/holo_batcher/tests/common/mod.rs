//! Shared in-memory collaborators for batcher integration tests.
//!
//! The resolver routes partition keys to tablets from a fixed table, the
//! dispatcher answers calls according to a per-tablet script, and the
//! transaction gate either prepares or fails. Each can be "held" behind a
//! semaphore so tests can act while lookups, prepares or calls are in flight.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use holo_batcher::batcher::{
    BatchError, Batcher, BatcherClient, BatcherConfig, OpId, PrepareRequest, ReadTime,
    RemoteTablet, RpcDispatch, TabletCall, TabletResolver, TabletResponse, TransactionGate,
    TransactionMetadata,
};
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Upper bound for any flush in tests; a hang fails instead of blocking.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct ScriptedResolver {
    routes: Mutex<HashMap<Vec<u8>, String>>,
    failures: Mutex<HashSet<Vec<u8>>>,
    hold: Mutex<Option<Arc<Semaphore>>>,
    pub calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn route(&self, key: &[u8], tablet: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(key.to_vec(), tablet.to_string());
    }

    pub fn fail(&self, key: &[u8]) {
        self.failures.lock().unwrap().insert(key.to_vec());
    }

    /// Block lookups until the returned semaphore gets permits.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.hold.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl TabletResolver for ScriptedResolver {
    async fn resolve(
        &self,
        _table: &str,
        partition_key: &[u8],
        _deadline: Instant,
    ) -> anyhow::Result<RemoteTablet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hold = self.hold.lock().unwrap().clone();
        if let Some(gate) = hold {
            gate.acquire().await?.forget();
        }
        if self.failures.lock().unwrap().contains(partition_key) {
            return Err(BatchError::NotFound(format!(
                "no tablet for key {}",
                String::from_utf8_lossy(partition_key)
            ))
            .into());
        }
        let tablet = self
            .routes
            .lock()
            .unwrap()
            .get(partition_key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unrouted key"))?;
        Ok(RemoteTablet::new(tablet))
    }
}

/// How the dispatcher answers calls for one tablet.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Every op succeeds; reads echo `value:<key>`.
    Ok,
    /// Transport-level failure of the whole call.
    Fail(BatchError),
    /// Drop the last result so the count does not match.
    Short,
    /// Per-op failure for the op at this position.
    OpError(usize, BatchError),
}

#[derive(Default)]
pub struct ScriptedDispatch {
    replies: Mutex<HashMap<String, Reply>>,
    hold: Mutex<HashMap<String, Arc<Semaphore>>>,
    pub calls: Mutex<Vec<TabletCall>>,
    pub used_read_time: Mutex<Option<ReadTime>>,
}

impl ScriptedDispatch {
    pub fn reply(&self, tablet: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(tablet.to_string(), reply);
    }

    /// Block calls to `tablet` until the returned semaphore gets permits.
    pub fn hold(&self, tablet: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.hold
            .lock()
            .unwrap()
            .insert(tablet.to_string(), gate.clone());
        gate
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<TabletCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcDispatch for ScriptedDispatch {
    async fn launch(&self, call: TabletCall) -> anyhow::Result<TabletResponse> {
        let tablet = call.tablet.tablet_id.clone();
        self.calls.lock().unwrap().push(call.clone());
        let hold = self.hold.lock().unwrap().get(&tablet).cloned();
        if let Some(gate) = hold {
            gate.acquire().await?.forget();
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&tablet)
            .cloned()
            .unwrap_or(Reply::Ok);

        let mut results = call
            .ops
            .iter()
            .map(|op| {
                if call.kind.is_read() {
                    let mut value = b"value:".to_vec();
                    value.extend_from_slice(&op.partition_key);
                    Ok(Some(value))
                } else {
                    Ok(None)
                }
            })
            .collect::<Vec<_>>();
        match reply {
            Reply::Ok => {}
            Reply::Fail(err) => return Err(err.into()),
            Reply::Short => {
                results.pop();
            }
            Reply::OpError(idx, err) => {
                if let Some(slot) = results.get_mut(idx) {
                    *slot = Err(err);
                }
            }
        }
        Ok(TabletResponse {
            results,
            used_read_time: *self.used_read_time.lock().unwrap(),
        })
    }
}

#[derive(Default)]
pub struct ScriptedTransaction {
    pub fail_with: Mutex<Option<BatchError>>,
    pub prepares: Mutex<Vec<PrepareRequest>>,
    pub flushed: Mutex<Vec<(Vec<OpId>, Result<(), BatchError>)>>,
    hold: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedTransaction {
    pub fn failing(err: BatchError) -> Self {
        let txn = Self::default();
        *txn.fail_with.lock().unwrap() = Some(err);
        txn
    }

    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.hold.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn metadata() -> TransactionMetadata {
        TransactionMetadata {
            transaction_id: 42,
            status_tablet: "status-0".to_string(),
            start_time: 1_000,
        }
    }
}

#[async_trait]
impl TransactionGate for ScriptedTransaction {
    async fn prepare(&self, request: PrepareRequest) -> anyhow::Result<TransactionMetadata> {
        self.prepares.lock().unwrap().push(request);
        let hold = self.hold.lock().unwrap().clone();
        if let Some(gate) = hold {
            gate.acquire().await?.forget();
        }
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err.into());
        }
        Ok(Self::metadata())
    }

    fn flushed(
        &self,
        ops: &[OpId],
        _used_read_time: Option<ReadTime>,
        result: &Result<(), BatchError>,
    ) {
        self.flushed
            .lock()
            .unwrap()
            .push((ops.to_vec(), result.clone()));
    }
}

pub struct Harness {
    pub resolver: Arc<ScriptedResolver>,
    pub dispatch: Arc<ScriptedDispatch>,
    pub client: Arc<BatcherClient>,
}

impl Harness {
    pub fn new() -> Self {
        let resolver = Arc::new(ScriptedResolver::default());
        let dispatch = Arc::new(ScriptedDispatch::default());
        let client = BatcherClient::new(
            7,
            resolver.clone(),
            dispatch.clone(),
            BatcherConfig::default(),
        );
        Self {
            resolver,
            dispatch,
            client,
        }
    }
}

/// Flush and wait for the callback, counting how often it fired.
pub async fn flush_counted(
    batcher: &Arc<Batcher>,
    is_within_transaction_retry: bool,
) -> (Result<(), BatchError>, Arc<AtomicUsize>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = tokio::sync::oneshot::channel();
    let counter = fired.clone();
    batcher.flush_async(
        move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        },
        is_within_transaction_retry,
    );
    let result = match tokio::time::timeout(FLUSH_TIMEOUT, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => panic!("flush callback dropped without firing"),
        Err(_) => panic!("flush did not complete within {FLUSH_TIMEOUT:?}"),
    };
    (result, fired)
}

/// Wait until `cond` holds or panic after `FLUSH_TIMEOUT`.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + FLUSH_TIMEOUT;
    while !cond() {
        if std::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
