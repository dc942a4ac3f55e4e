//! Neighbor search over event embeddings.
//!
//! Wraps a [`NeighborIndex`] and enforces the temporal contract on whatever
//! it returns: every neighbor is strictly older than the reference time, at
//! most `k` are returned, and ties in distance go to the more recent event.

use crate::domain::config::NeighborConfig;
use crate::domain::error::EventcastError;
use crate::domain::event::NeighborFilter;
use crate::domain::temporal;
use crate::ports::neighbor_port::{IndexHit, NeighborIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Some(DistanceMetric::Cosine),
            "euclidean" | "l2" => Some(DistanceMetric::Euclidean),
            _ => None,
        }
    }

    /// Distance between equal-length vectors. Cosine distance is `1 - cos`,
    /// in `[0, 2]`; a zero vector is at distance 1 from everything.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Cosine => {
                let mut dot = 0.0_f64;
                let mut na = 0.0_f64;
                let mut nb = 0.0_f64;
                for (x, y) in a.iter().zip(b) {
                    let (x, y) = (f64::from(*x), f64::from(*y));
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                if na == 0.0 || nb == 0.0 {
                    return 1.0;
                }
                (1.0 - dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 2.0)
            }
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = f64::from(*x) - f64::from(*y);
                    d * d
                })
                .sum::<f64>()
                .sqrt(),
        }
    }
}

/// Neighbor weight as a strictly decreasing function of distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Weighting {
    /// `1 / (epsilon + d)`
    InverseDistance { epsilon: f64 },
    /// `exp(-d / scale)`
    Exponential { scale: f64 },
}

impl Default for Weighting {
    fn default() -> Self {
        Weighting::InverseDistance { epsilon: 1e-6 }
    }
}

impl Weighting {
    pub fn weight(&self, distance: f64) -> f64 {
        let d = distance.max(0.0);
        match *self {
            Weighting::InverseDistance { epsilon } => 1.0 / (epsilon + d),
            Weighting::Exponential { scale } => (-d / scale).exp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub event_id: String,
    pub distance: f64,
    pub at: DateTime<Utc>,
}

impl From<IndexHit> for Neighbor {
    fn from(hit: IndexHit) -> Self {
        Self {
            event_id: hit.event_id,
            distance: hit.distance,
            at: hit.at,
        }
    }
}

/// Closest first; equal distances put the more recent event first.
pub fn rank_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| b.at.cmp(&a.at))
        .then_with(|| a.event_id.cmp(&b.event_id))
}

pub struct NeighborSearch<'a> {
    index: &'a dyn NeighborIndex,
    config: NeighborConfig,
}

impl<'a> NeighborSearch<'a> {
    pub fn new(index: &'a dyn NeighborIndex, config: NeighborConfig) -> Self {
        Self { index, config }
    }

    pub fn k(&self) -> usize {
        self.config.k
    }

    /// Up to `k` neighbors strictly before `reference`, best first.
    ///
    /// Fails with `NoEligibleNeighbors` when none qualify. A hit at or after
    /// `reference` from the index is a lookahead defect and aborts.
    pub fn search(
        &self,
        embedding: &[f32],
        filter: &NeighborFilter,
        reference: DateTime<Utc>,
        k: usize,
    ) -> Result<Vec<Neighbor>, EventcastError> {
        let reference = temporal::guard(reference)?;
        let expected = self.index.dimension();
        // An empty index reports dimension 0 and simply has no neighbors.
        if expected > 0 && embedding.len() != expected {
            return Err(EventcastError::InvalidEmbedding {
                expected,
                actual: embedding.len(),
            });
        }
        if k == 0 {
            return Err(EventcastError::NoEligibleNeighbors { reference });
        }

        // Remote indexes may ignore the exclusion; ask for one spare hit.
        let wanted = k + usize::from(filter.exclude_id.is_some());
        let hits = self.index.query(embedding, wanted, filter, reference)?;
        let mut neighbors = Vec::with_capacity(hits.len());
        for hit in hits {
            if filter.excludes(&hit.event_id) {
                continue;
            }
            temporal::ensure_before(hit.at, reference, &format!("neighbor {}", hit.event_id))?;
            if !hit.distance.is_finite() {
                return Err(EventcastError::consistency(format!(
                    "neighbor {} has non-finite distance",
                    hit.event_id
                )));
            }
            neighbors.push(Neighbor::from(hit));
        }

        neighbors.sort_by(rank_neighbors);
        neighbors.truncate(k);

        if neighbors.is_empty() {
            debug!(%reference, "no eligible neighbors");
            return Err(EventcastError::NoEligibleNeighbors { reference });
        }
        debug!(count = neighbors.len(), k, "neighbors found");
        Ok(neighbors)
    }
}
