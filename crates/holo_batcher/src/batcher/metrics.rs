//! Client-wide batcher counters.
//!
//! Counters are best-effort and relaxed: they are shared by every batcher of a
//! client and only read for reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Atomically updated counters for `MetricsSnapshot`.
#[derive(Debug, Default)]
pub struct BatcherMetrics {
    flush_count: AtomicU64,
    flush_failed: AtomicU64,
    flush_total_us: AtomicU64,
    flush_max_us: AtomicU64,
    slow_flushes: AtomicU64,
    ops_flushed: AtomicU64,
    lookups_failed: AtomicU64,
    rpcs_sent: AtomicU64,
    rpcs_failed: AtomicU64,
    op_count_mismatches: AtomicU64,
    aborts: AtomicU64,
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub flush_count: u64,
    pub flush_failed: u64,
    pub flush_total_us: u64,
    pub flush_max_us: u64,
    pub slow_flushes: u64,
    pub ops_flushed: u64,
    pub lookups_failed: u64,
    pub rpcs_sent: u64,
    pub rpcs_failed: u64,
    pub op_count_mismatches: u64,
    pub aborts: u64,
}

impl BatcherMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            flush_count: self.flush_count.load(Ordering::Relaxed),
            flush_failed: self.flush_failed.load(Ordering::Relaxed),
            flush_total_us: self.flush_total_us.load(Ordering::Relaxed),
            flush_max_us: self.flush_max_us.load(Ordering::Relaxed),
            slow_flushes: self.slow_flushes.load(Ordering::Relaxed),
            ops_flushed: self.ops_flushed.load(Ordering::Relaxed),
            lookups_failed: self.lookups_failed.load(Ordering::Relaxed),
            rpcs_sent: self.rpcs_sent.load(Ordering::Relaxed),
            rpcs_failed: self.rpcs_failed.load(Ordering::Relaxed),
            op_count_mismatches: self.op_count_mismatches.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
        }
    }

    pub(super) fn record_flush(&self, dur: Duration, ops: usize, ok: bool, slow: bool) {
        let us = dur.as_micros().min(u128::from(u64::MAX)) as u64;
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        self.flush_total_us.fetch_add(us, Ordering::Relaxed);
        self.flush_max_us.fetch_max(us, Ordering::Relaxed);
        self.ops_flushed.fetch_add(ops as u64, Ordering::Relaxed);
        if !ok {
            self.flush_failed.fetch_add(1, Ordering::Relaxed);
        }
        if slow {
            self.slow_flushes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(super) fn record_lookup_failed(&self) {
        self.lookups_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_rpcs_sent(&self, rpcs: usize) {
        self.rpcs_sent.fetch_add(rpcs as u64, Ordering::Relaxed);
    }

    pub(super) fn record_rpc_failed(&self) {
        self.rpcs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_op_count_mismatch(&self) {
        self.op_count_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }
}
