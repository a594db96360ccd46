//! Integration tests for `Session`, the owner-facing wrapper over batchers.
//!
//! Verification:
//! - each flush swaps in a fresh gathering batcher
//! - per-op errors move from the batcher into the session after a flush,
//!   even when the caller stopped awaiting it
//! - a batcher finishes its flush even if the session is already gone

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use common::{flush_counted, wait_until, Harness, Reply, FLUSH_TIMEOUT};
use holo_batcher::batcher::{BatchError, BatchErrorKind, FlushObserver, Operation};
use holo_batcher::Session;

fn write(key: &str) -> Arc<Operation> {
    Arc::new(Operation::write("kv", key.as_bytes().to_vec(), b"v".to_vec()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flush_swaps_batcher_and_collects_errors() {
    let h = Harness::new();
    h.resolver.route(b"a", "t1");
    h.resolver.fail(b"b");

    let session = Session::new(h.client.clone());
    session.apply(write("a")).expect("apply");
    session.apply(write("b")).expect("apply");
    assert_eq!(session.count_buffered_operations(), 2);
    assert!(session.has_pending_operations());

    let result = tokio::time::timeout(FLUSH_TIMEOUT, session.flush())
        .await
        .expect("flush timed out");
    assert_eq!(result.map_err(|e| e.kind()), Err(BatchErrorKind::Flush));
    assert_eq!(session.count_buffered_operations(), 0);
    assert!(!session.has_pending_operations());
    assert_eq!(session.flushing_batchers(), 0);

    assert_eq!(session.count_pending_errors(), 1);
    let errors = session.get_and_clear_pending_errors();
    assert_eq!(errors[0].op.partition_key(), b"b");
    assert_eq!(session.count_pending_errors(), 0);

    // The fresh batcher accepts new work.
    session.apply(write("a")).expect("apply after flush");
    let result = tokio::time::timeout(FLUSH_TIMEOUT, session.flush())
        .await
        .expect("flush timed out");
    assert_eq!(result, Ok(()));
    assert_eq!(h.dispatch.call_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn session_timeout_becomes_call_deadline() {
    let h = Harness::new();
    h.resolver.route(b"a", "t1");
    let session = Session::new(h.client.clone());
    session.set_timeout(Duration::from_secs(2));
    session.apply(write("a")).expect("apply");

    let before = tokio::time::Instant::now();
    let result = tokio::time::timeout(FLUSH_TIMEOUT, session.flush())
        .await
        .expect("flush timed out");
    assert_eq!(result, Ok(()));
    let deadline = h.dispatch.calls()[0].deadline;
    assert!(deadline >= before + Duration::from_secs(2));
    assert!(deadline <= before + Duration::from_secs(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_moves_errors_to_session() {
    let h = Harness::new();
    let session = Session::new(h.client.clone());
    session.apply(write("a")).expect("apply");
    session.abort(BatchError::Aborted("shutdown".into()));

    assert_eq!(session.count_buffered_operations(), 0);
    assert_eq!(session.count_pending_errors(), 1);
    assert_eq!(h.resolver.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_flush_still_reports_errors() {
    let h = Harness::new();
    h.resolver.route(b"a", "t1");
    h.dispatch
        .reply("t1", Reply::Fail(BatchError::Remote("tablet down".into())));
    let gate = h.dispatch.hold("t1");

    let session = Session::new(h.client.clone());
    session.apply(write("a")).expect("apply");
    let cancelled = tokio::time::timeout(Duration::from_millis(50), session.flush()).await;
    assert!(cancelled.is_err(), "flush finished while its call was held");
    assert_eq!(session.flushing_batchers(), 1);

    gate.add_permits(1);
    wait_until("flush to finish", || session.flushing_batchers() == 0).await;
    assert_eq!(session.count_pending_errors(), 1);
    let errors = session.get_and_clear_pending_errors();
    assert_eq!(errors[0].error, BatchError::Remote("tablet down".into()));
}

#[derive(Default)]
struct CountingObserver {
    finished: AtomicUsize,
}

impl FlushObserver for CountingObserver {
    fn flush_finished(&self, _batcher_id: u64) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn observer_is_notified_once_per_flush() {
    let h = Harness::new();
    h.resolver.route(b"a", "t1");
    let observer = Arc::new(CountingObserver::default());
    let weak: Weak<dyn FlushObserver> = Arc::downgrade(&observer) as Weak<dyn FlushObserver>;

    let batcher = h.client.new_batcher_with(None, None, Some(weak));
    batcher.add(write("a")).expect("add");
    let (result, _) = flush_counted(&batcher, false).await;
    assert_eq!(result, Ok(()));
    assert_eq!(observer.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batcher_outlives_dropped_observer() {
    let h = Harness::new();
    h.resolver.route(b"a", "t1");
    let gate = h.dispatch.hold("t1");
    let observer = Arc::new(CountingObserver::default());
    let weak: Weak<dyn FlushObserver> = Arc::downgrade(&observer) as Weak<dyn FlushObserver>;

    let batcher = h.client.new_batcher_with(None, None, Some(weak));
    batcher.add(write("a")).expect("add");
    let (tx, rx) = tokio::sync::oneshot::channel();
    batcher.flush_async(
        move |result| {
            let _ = tx.send(result);
        },
        false,
    );
    let dispatch = h.dispatch.clone();
    wait_until("call to launch", || dispatch.call_count() == 1).await;

    drop(observer);
    // Only the in-flight call keeps the batcher alive now.
    let weak_batcher = Arc::downgrade(&batcher);
    drop(batcher);
    assert!(weak_batcher.upgrade().is_some());

    gate.add_permits(1);
    let result = tokio::time::timeout(FLUSH_TIMEOUT, rx)
        .await
        .expect("flush timed out")
        .expect("callback dropped");
    assert_eq!(result, Ok(()));
    wait_until("batcher to be released", || weak_batcher.upgrade().is_none()).await;
}
