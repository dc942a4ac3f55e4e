//! Nearest-neighbor index port.

use crate::domain::error::EventcastError;
use crate::domain::event::NeighborFilter;
use chrono::{DateTime, Utc};

/// One ranked hit returned by an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub event_id: String,
    pub distance: f64,
    pub at: DateTime<Utc>,
}

/// Nearest-neighbor lookup over `(vector, timestamp, tags)` records.
///
/// Implementations return at most `k` hits with `at < upper_bound`, ranked by
/// ascending distance. Callers re-validate both properties.
pub trait NeighborIndex: Send + Sync {
    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &NeighborFilter,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<IndexHit>, EventcastError>;

    /// Embedding dimensionality the index was built with.
    fn dimension(&self) -> usize;
}
