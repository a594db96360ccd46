//! Workload driver for the operation batcher.
//!
//! Runs concurrent sessions against a simulated in-process cluster: tablet
//! lookups, tablet calls and transaction preparation all take a configurable
//! latency and fail at configurable rates. Every session applies batches of
//! reads and writes and flushes them; the run ends with a JSON summary of
//! batch outcomes, per-op error kinds and the batcher metrics.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use holo_batcher::batcher::{
    BatchError, BatcherClient, BatcherConfig, MetricsSnapshot, OpId, OpResponse, Operation,
    PrepareRequest, ReadTime, RemoteTablet, RpcDispatch, TabletCall, TabletResolver,
    TabletResponse, TransactionGate, TransactionMetadata,
};
use holo_batcher::Session;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::time::{self, Instant};

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "holo-batch-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Run(RunArgs),
}

/// CLI options for running the workload.
#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Number of concurrent sessions.
    #[arg(long, env = "HOLO_BATCH_SESSIONS", default_value_t = 8)]
    sessions: usize,

    /// Batches flushed by each session.
    #[arg(long, env = "HOLO_BATCH_BATCHES", default_value_t = 100)]
    batches: usize,

    /// Operations applied before each flush.
    #[arg(long, env = "HOLO_BATCH_OPS_PER_BATCH", default_value_t = 16)]
    ops_per_batch: usize,

    /// Number of simulated tablets keys are hashed onto.
    #[arg(long, env = "HOLO_BATCH_TABLETS", default_value_t = 4)]
    tablets: usize,

    /// Number of distinct keys.
    #[arg(long, env = "HOLO_BATCH_KEYS", default_value_t = 1024)]
    keys: usize,

    /// Percent of operations that are reads (rest are writes).
    #[arg(long, env = "HOLO_BATCH_READ_PCT", default_value_t = 50)]
    read_pct: u8,

    /// Percent of tablet lookups that fail with not-found.
    #[arg(long, env = "HOLO_BATCH_LOOKUP_FAIL_PCT", default_value_t = 0)]
    lookup_fail_pct: u8,

    /// Percent of tablet calls that fail as a whole.
    #[arg(long, env = "HOLO_BATCH_RPC_FAIL_PCT", default_value_t = 0)]
    rpc_fail_pct: u8,

    /// Percent of tablet calls answered with one result missing.
    #[arg(long, env = "HOLO_BATCH_MISMATCH_PCT", default_value_t = 0)]
    mismatch_pct: u8,

    /// Run every session inside a simulated transaction.
    #[arg(long, env = "HOLO_BATCH_TRANSACTIONAL", default_value_t = false, action = clap::ArgAction::Set)]
    transactional: bool,

    /// Percent of transaction prepares that fail.
    #[arg(long, env = "HOLO_BATCH_TXN_FAIL_PCT", default_value_t = 0)]
    txn_fail_pct: u8,

    /// Simulated latency of every lookup, prepare and call.
    #[arg(long, env = "HOLO_BATCH_LATENCY", default_value = "1ms")]
    latency: humantime::Duration,

    /// Per-flush timeout.
    #[arg(long, env = "HOLO_BATCH_TIMEOUT", default_value = "10s")]
    timeout: humantime::Duration,

    /// Flushes slower than this are logged.
    #[arg(long, env = "HOLO_BATCH_SLOW_FLUSH", default_value = "500ms")]
    slow_flush: humantime::Duration,

    /// Random seed (0 picks a random seed).
    #[arg(long, env = "HOLO_BATCH_SEED", default_value_t = 0)]
    seed: u64,

    /// Write the JSON summary to this path.
    #[arg(long, env = "HOLO_BATCH_OUT", default_value = ".tmp/batch-workload/summary.json")]
    out: PathBuf,
}

/// Run parameters embedded in the summary for reproducibility.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
struct SummaryMeta {
    sessions: usize,
    batches: usize,
    ops_per_batch: usize,
    tablets: usize,
    keys: usize,
    read_pct: u8,
    lookup_fail_pct: u8,
    rpc_fail_pct: u8,
    mismatch_pct: u8,
    transactional: bool,
    txn_fail_pct: u8,
    latency_ms: u64,
    timeout_ms: u64,
    seed: u64,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default)]
struct MetricsSummary {
    flush_count: u64,
    flush_failed: u64,
    flush_avg_us: u64,
    flush_max_us: u64,
    slow_flushes: u64,
    ops_flushed: u64,
    lookups_failed: u64,
    rpcs_sent: u64,
    rpcs_failed: u64,
    op_count_mismatches: u64,
    aborts: u64,
}

impl From<MetricsSnapshot> for MetricsSummary {
    fn from(m: MetricsSnapshot) -> Self {
        Self {
            flush_count: m.flush_count,
            flush_failed: m.flush_failed,
            flush_avg_us: m.flush_total_us.checked_div(m.flush_count).unwrap_or(0),
            flush_max_us: m.flush_max_us,
            slow_flushes: m.slow_flushes,
            ops_flushed: m.ops_flushed,
            lookups_failed: m.lookups_failed,
            rpcs_sent: m.rpcs_sent,
            rpcs_failed: m.rpcs_failed,
            op_count_mismatches: m.op_count_mismatches,
            aborts: m.aborts,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
struct Summary {
    meta: SummaryMeta,
    batches_ok: u64,
    batches_failed: u64,
    ops_applied: u64,
    ops_failed: u64,
    /// Per-op failures by error kind.
    errors: BTreeMap<String, u64>,
    /// Flush summaries by error kind.
    flush_errors: BTreeMap<String, u64>,
    elapsed_ms: u64,
    metrics: MetricsSummary,
}

/// Outcome counters of one session.
#[derive(Debug, Default)]
struct SessionReport {
    batches_ok: u64,
    batches_failed: u64,
    ops_applied: u64,
    errors: BTreeMap<String, u64>,
    flush_errors: BTreeMap<String, u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    anyhow::ensure!(args.sessions > 0, "--sessions must be > 0");
    anyhow::ensure!(args.tablets > 0, "--tablets must be > 0");
    anyhow::ensure!(args.keys > 0, "--keys must be > 0");
    for (name, pct) in [
        ("--read-pct", args.read_pct),
        ("--lookup-fail-pct", args.lookup_fail_pct),
        ("--rpc-fail-pct", args.rpc_fail_pct),
        ("--mismatch-pct", args.mismatch_pct),
        ("--txn-fail-pct", args.txn_fail_pct),
    ] {
        anyhow::ensure!(pct <= 100, "{name} must be <= 100");
    }

    // Use a random seed when the user provides zero.
    let seed = if args.seed == 0 {
        rand::thread_rng().gen()
    } else {
        args.seed
    };
    let latency: Duration = args.latency.into();
    let timeout: Duration = args.timeout.into();

    let resolver = Arc::new(SimResolver {
        tablets: args.tablets,
        fail_pct: args.lookup_fail_pct,
        latency,
        rng: Mutex::new(SmallRng::seed_from_u64(seed ^ 0x1)),
    });
    let dispatch = Arc::new(SimDispatch {
        fail_pct: args.rpc_fail_pct,
        mismatch_pct: args.mismatch_pct,
        latency,
        rng: Mutex::new(SmallRng::seed_from_u64(seed ^ 0x2)),
        store: Mutex::new(HashMap::new()),
    });
    let config = BatcherConfig {
        default_timeout: timeout,
        slow_flush_threshold: args.slow_flush.into(),
        ..BatcherConfig::default()
    };
    let client = BatcherClient::new(seed, resolver, dispatch, config);

    tracing::info!(
        sessions = args.sessions,
        batches = args.batches,
        ops_per_batch = args.ops_per_batch,
        tablets = args.tablets,
        seed,
        "starting batch workload"
    );
    let start = Instant::now();

    let mut tasks = Vec::with_capacity(args.sessions);
    for session_id in 0..args.sessions {
        let client = client.clone();
        let args = args.clone();
        // Mix the base seed with the session id for deterministic per-session RNG.
        let seed = seed ^ (session_id as u64).wrapping_mul(0x9e3779b97f4a7c15);
        tasks.push(tokio::spawn(async move {
            run_session(session_id, client, args, seed, latency, timeout).await
        }));
    }
    let reports = futures_util::future::try_join_all(tasks)
        .await
        .context("session task panicked")?;

    let mut summary = Summary {
        meta: SummaryMeta {
            sessions: args.sessions,
            batches: args.batches,
            ops_per_batch: args.ops_per_batch,
            tablets: args.tablets,
            keys: args.keys,
            read_pct: args.read_pct,
            lookup_fail_pct: args.lookup_fail_pct,
            rpc_fail_pct: args.rpc_fail_pct,
            mismatch_pct: args.mismatch_pct,
            transactional: args.transactional,
            txn_fail_pct: args.txn_fail_pct,
            latency_ms: latency.as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
            seed,
        },
        batches_ok: 0,
        batches_failed: 0,
        ops_applied: 0,
        ops_failed: 0,
        errors: BTreeMap::new(),
        flush_errors: BTreeMap::new(),
        elapsed_ms: start.elapsed().as_millis() as u64,
        metrics: client.metrics().snapshot().into(),
    };
    for report in reports {
        let report = report?;
        summary.batches_ok += report.batches_ok;
        summary.batches_failed += report.batches_failed;
        summary.ops_applied += report.ops_applied;
        for (kind, n) in report.errors {
            summary.ops_failed += n;
            *summary.errors.entry(kind).or_default() += n;
        }
        for (kind, n) in report.flush_errors {
            *summary.flush_errors.entry(kind).or_default() += n;
        }
    }

    let json = serde_json::to_string_pretty(&summary).context("serialize summary")?;
    println!("{json}");
    write_summary(&args.out, &summary).context("write summary")?;
    eprintln!("wrote summary: {}", args.out.display());
    Ok(())
}

/// Apply and flush `args.batches` batches on one session.
async fn run_session(
    session_id: usize,
    client: Arc<BatcherClient>,
    args: RunArgs,
    seed: u64,
    latency: Duration,
    timeout: Duration,
) -> anyhow::Result<SessionReport> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let session = if args.transactional {
        let txn = Arc::new(SimTransaction {
            id: session_id as u64 + 1,
            fail_pct: args.txn_fail_pct,
            latency,
            rng: Mutex::new(SmallRng::seed_from_u64(seed ^ 0x3)),
        });
        Session::with_transaction(client, Some(txn as Arc<dyn TransactionGate>), None)
    } else {
        Session::new(client)
    };
    session.set_timeout(timeout);

    let mut report = SessionReport::default();
    for batch in 0..args.batches {
        for i in 0..args.ops_per_batch {
            let key = format!("k{}", rng.gen_range(0..args.keys)).into_bytes();
            let op = if rng.gen_range(0..100) < u32::from(args.read_pct) {
                Operation::read("workload", key)
            } else {
                let value = format!("s{session_id}:b{batch}:o{i}").into_bytes();
                Operation::write("workload", key, value)
            };
            session
                .apply(Arc::new(op.with_transactional(args.transactional)))
                .with_context(|| format!("session {session_id} apply"))?;
            report.ops_applied += 1;
        }

        match session.flush().await {
            Ok(()) => report.batches_ok += 1,
            Err(err) => {
                report.batches_failed += 1;
                *report.flush_errors.entry(kind_name(&err)).or_default() += 1;
                tracing::debug!(session = session_id, batch, error = %err, "batch failed");
            }
        }
        for failed in session.get_and_clear_pending_errors() {
            *report.errors.entry(kind_name(&failed.error)).or_default() += 1;
        }
    }
    Ok(report)
}

fn kind_name(err: &BatchError) -> String {
    format!("{:?}", err.kind())
}

fn roll(rng: &Mutex<SmallRng>, pct: u8) -> bool {
    if pct == 0 {
        return false;
    }
    rng.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .gen_range(0..100)
        < u32::from(pct)
}

/// Waits `latency`, failing with a timeout once `deadline` passes first.
async fn simulate_latency(latency: Duration, deadline: Instant) -> anyhow::Result<()> {
    if latency.is_zero() {
        return Ok(());
    }
    time::timeout_at(deadline, time::sleep(latency)).await?;
    Ok(())
}

/// Hashes keys onto a fixed set of tablets.
struct SimResolver {
    tablets: usize,
    fail_pct: u8,
    latency: Duration,
    rng: Mutex<SmallRng>,
}

#[async_trait]
impl TabletResolver for SimResolver {
    async fn resolve(
        &self,
        table: &str,
        partition_key: &[u8],
        deadline: Instant,
    ) -> anyhow::Result<RemoteTablet> {
        simulate_latency(self.latency, deadline).await?;
        if roll(&self.rng, self.fail_pct) {
            return Err(BatchError::NotFound(format!("tablet of {table} not found")).into());
        }
        let mut hasher = DefaultHasher::new();
        partition_key.hash(&mut hasher);
        let idx = hasher.finish() % self.tablets as u64;
        let mut tablet = RemoteTablet::new(format!("{table}-t{idx}"));
        tablet.replicas = vec![idx + 1];
        tablet.leader = Some(idx + 1);
        Ok(tablet)
    }
}

/// In-memory key/value tablets with injected call failures.
struct SimDispatch {
    fail_pct: u8,
    mismatch_pct: u8,
    latency: Duration,
    rng: Mutex<SmallRng>,
    store: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

#[async_trait]
impl RpcDispatch for SimDispatch {
    async fn launch(&self, call: TabletCall) -> anyhow::Result<TabletResponse> {
        simulate_latency(self.latency, call.deadline).await?;
        if roll(&self.rng, self.fail_pct) {
            anyhow::bail!("tablet {} unavailable", call.tablet.tablet_id);
        }

        let mut results = {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            call.ops
                .iter()
                .map(|op| {
                    if call.kind.is_read() {
                        Ok(store.get(&op.partition_key).cloned())
                    } else {
                        store.insert(op.partition_key.clone(), op.payload.clone());
                        Ok(None)
                    }
                })
                .collect::<Vec<OpResponse>>()
        };
        if roll(&self.rng, self.mismatch_pct) {
            results.pop();
        }
        Ok(TabletResponse {
            results,
            used_read_time: call.read_time,
        })
    }
}

struct SimTransaction {
    id: u64,
    fail_pct: u8,
    latency: Duration,
    rng: Mutex<SmallRng>,
}

#[async_trait]
impl TransactionGate for SimTransaction {
    async fn prepare(&self, request: PrepareRequest) -> anyhow::Result<TransactionMetadata> {
        simulate_latency(self.latency, request.deadline).await?;
        if roll(&self.rng, self.fail_pct) {
            anyhow::bail!("transaction {} status tablet unavailable", self.id);
        }
        let status_tablet = request
            .groups
            .first()
            .map(|g| g.tablet_id.clone())
            .unwrap_or_default();
        Ok(TransactionMetadata {
            transaction_id: self.id,
            status_tablet,
            start_time: 1,
        })
    }

    fn flushed(
        &self,
        ops: &[OpId],
        _used_read_time: Option<ReadTime>,
        result: &Result<(), BatchError>,
    ) {
        if let Err(err) = result {
            tracing::debug!(txn = self.id, ops = ops.len(), error = %err, "transactional call failed");
        }
    }
}

/// Serialize and write the workload summary JSON.
fn write_summary(path: &PathBuf, summary: &Summary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        // Ensure the output directory exists before writing.
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(summary).context("serialize summary")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
