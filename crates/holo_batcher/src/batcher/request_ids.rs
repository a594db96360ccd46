//! Retryable request ids, scoped per destination tablet.
//!
//! Every write call carries a fresh id plus the smallest id still running for
//! the same tablet; the server uses the pair to deduplicate retried sends and
//! to garbage-collect its retry state.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use super::types::{RetryIds, RetryableRequestId, TabletId};

#[derive(Debug, Default)]
struct TabletRequests {
    next_id: RetryableRequestId,
    running: BTreeSet<RetryableRequestId>,
}

/// Shared by every batcher of one client, so ids stay unique per tablet
/// across batches.
#[derive(Debug, Default)]
pub struct RequestIdTracker {
    tablets: Mutex<HashMap<TabletId, TabletRequests>>,
}

impl RequestIdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for `tablet_id` and report the minimum id still
    /// running, which includes the id just handed out.
    pub fn next_request_id_and_min_running(&self, tablet_id: &str) -> RetryIds {
        let mut tablets = self.tablets.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = tablets.entry(tablet_id.to_string()).or_default();
        let request_id = entry.next_id;
        entry.next_id += 1;
        entry.running.insert(request_id);
        let min_running_request_id = entry.running.first().copied().unwrap_or(request_id);
        RetryIds {
            request_id,
            min_running_request_id,
        }
    }

    pub fn request_finished(&self, tablet_id: &str, request_id: RetryableRequestId) {
        let mut tablets = self.tablets.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = tablets.get_mut(tablet_id) else {
            tracing::warn!(tablet = tablet_id, request_id, "finished request for unknown tablet");
            return;
        };
        if !entry.running.remove(&request_id) {
            tracing::warn!(tablet = tablet_id, request_id, "finished request was not running");
        }
    }

    pub fn running(&self, tablet_id: &str) -> usize {
        self.tablets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tablet_id)
            .map(|entry| entry.running.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_per_tablet() {
        let tracker = RequestIdTracker::new();
        let a0 = tracker.next_request_id_and_min_running("a");
        let a1 = tracker.next_request_id_and_min_running("a");
        let b0 = tracker.next_request_id_and_min_running("b");
        assert_eq!(a0.request_id, 0);
        assert_eq!(a1.request_id, 1);
        assert_eq!(b0.request_id, 0);
        assert_eq!(a1.min_running_request_id, 0);
    }

    #[test]
    fn min_running_advances_when_oldest_finishes() {
        let tracker = RequestIdTracker::new();
        let first = tracker.next_request_id_and_min_running("t");
        let second = tracker.next_request_id_and_min_running("t");
        tracker.request_finished("t", first.request_id);
        let third = tracker.next_request_id_and_min_running("t");
        assert_eq!(third.request_id, 2);
        assert_eq!(third.min_running_request_id, second.request_id);

        tracker.request_finished("t", second.request_id);
        tracker.request_finished("t", third.request_id);
        assert_eq!(tracker.running("t"), 0);
        let fourth = tracker.next_request_id_and_min_running("t");
        assert_eq!(fourth.min_running_request_id, fourth.request_id);
    }
}
