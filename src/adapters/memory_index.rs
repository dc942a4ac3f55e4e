//! Brute-force in-memory neighbor index over event embeddings.

use crate::domain::error::EventcastError;
use crate::domain::event::{Event, NeighborFilter};
use crate::domain::neighbors::DistanceMetric;
use crate::ports::neighbor_port::{IndexHit, NeighborIndex};
use chrono::{DateTime, Utc};
use tracing::debug;

pub struct InMemoryIndex {
    events: Vec<Event>,
    metric: DistanceMetric,
    dimension: usize,
}

impl InMemoryIndex {
    /// Build from events; every embedding must share one dimension.
    pub fn from_events(events: &[Event], metric: DistanceMetric) -> Result<Self, EventcastError> {
        let dimension = events.first().map(|e| e.embedding.len()).unwrap_or(0);
        if let Some(bad) = events.iter().find(|e| e.embedding.len() != dimension) {
            return Err(EventcastError::InvalidEmbedding {
                expected: dimension,
                actual: bad.embedding.len(),
            });
        }
        debug!(events = events.len(), dimension, "neighbor index built");
        Ok(Self {
            events: events.to_vec(),
            metric,
            dimension,
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl NeighborIndex for InMemoryIndex {
    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &NeighborFilter,
        upper_bound: DateTime<Utc>,
    ) -> Result<Vec<IndexHit>, EventcastError> {
        if self.events.is_empty() {
            return Ok(Vec::new());
        }
        if embedding.len() != self.dimension {
            return Err(EventcastError::InvalidEmbedding {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        let mut hits: Vec<IndexHit> = self
            .events
            .iter()
            .filter(|e| e.at < upper_bound && filter.matches(e))
            .map(|e| IndexHit {
                event_id: e.id.clone(),
                distance: self.metric.distance(embedding, &e.embedding),
                at: e.at,
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| b.at.cmp(&a.at))
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
