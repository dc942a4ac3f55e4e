//! Deadline wrapper for neighbor indexes that may block (e.g. remote).
//!
//! Each query runs on a worker thread. When the deadline passes the query
//! fails with `IndexTimeout`; nothing is cached, so a late answer is dropped.
//! A worker outlives its deadline until the inner index returns, so at most
//! `max_in_flight` workers exist at once. Past that limit a query fails
//! closed without spawning.

use crate::domain::error::EventcastError;
use crate::domain::event::NeighborFilter;
use crate::ports::neighbor_port::{IndexHit, NeighborIndex};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

pub struct TimeoutIndex {
    inner: Arc<dyn NeighborIndex>,
    timeout_ms: u64,
    max_in_flight: usize,
    in_flight: Arc<AtomicUsize>,
}

impl TimeoutIndex {
    pub fn new(inner: Arc<dyn NeighborIndex>, timeout_ms: u64) -> Self {
        Self {
            inner,
            timeout_ms,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Workers still running, including ones past their deadline.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn timeout(&self) -> EventcastError {
        EventcastError::IndexTimeout {
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Releases a worker slot when the worker finishes, even by panic.
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NeighborIndex for TimeoutIndex {
    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &NeighborFilter,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<IndexHit>, EventcastError> {
        let claimed = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_in_flight).then_some(n + 1)
            });
        if claimed.is_err() {
            warn!(
                max_in_flight = self.max_in_flight,
                "neighbor index saturated by unfinished queries"
            );
            return Err(self.timeout());
        }
        let slot = Slot(Arc::clone(&self.in_flight));

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let embedding = embedding.to_vec();
        let filter = filter.clone();
        thread::spawn(move || {
            let _slot = slot;
            // The receiver is gone once the deadline passed.
            let _ = tx.send(inner.query(&embedding, k, &filter, upper_bound));
        });

        match rx.recv_timeout(Duration::from_millis(self.timeout_ms)) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = self.timeout_ms, "neighbor query timed out");
                Err(self.timeout())
            }
            Err(RecvTimeoutError::Disconnected) => Err(EventcastError::Database {
                reason: "neighbor index worker exited without a result".to_string(),
            }),
        }
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct SlowIndex {
        delay_ms: u64,
        calls: AtomicUsize,
    }

    impl SlowIndex {
        fn new(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                delay_ms,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl NeighborIndex for SlowIndex {
        fn query(
            &self,
            _embedding: &[f32],
            _k: usize,
            _filter: &NeighborFilter,
            upper_bound: DateTime<Utc>,
        ) -> Result<Vec<IndexHit>, EventcastError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(self.delay_ms));
            Ok(vec![IndexHit {
                event_id: "e1".into(),
                distance: 0.1,
                at: upper_bound - chrono::Duration::hours(1),
            }])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn bound() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn fast_query_passes_through() {
        let index = TimeoutIndex::new(SlowIndex::new(0), 2_000);
        let hits = index
            .query(&[1.0, 0.0], 5, &NeighborFilter::default(), bound())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(index.dimension(), 2);
    }

    #[test]
    fn slow_query_fails_closed() {
        let index = TimeoutIndex::new(SlowIndex::new(500), 20);
        let err = index
            .query(&[1.0, 0.0], 5, &NeighborFilter::default(), bound())
            .unwrap_err();
        assert!(matches!(err, EventcastError::IndexTimeout { timeout_ms: 20 }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn unfinished_workers_are_bounded() {
        let slow = SlowIndex::new(300);
        let index = TimeoutIndex::new(slow.clone(), 20).with_max_in_flight(1);

        let first = index.query(&[1.0, 0.0], 5, &NeighborFilter::default(), bound());
        assert!(matches!(first, Err(EventcastError::IndexTimeout { .. })));
        assert_eq!(index.in_flight(), 1);

        // the timed-out worker still holds the only slot
        let second = index.query(&[1.0, 0.0], 5, &NeighborFilter::default(), bound());
        assert!(matches!(second, Err(EventcastError::IndexTimeout { .. })));
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(600));
        assert_eq!(index.in_flight(), 0);
    }
}
