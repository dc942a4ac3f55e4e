//! News/event records with pre-computed embeddings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ingested event. Immutable once created; read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub at: DateTime<Utc>,
    pub embedding: Vec<f32>,
    pub text: String,
    pub domain: String,
    pub categories: Vec<String>,
    /// Symbols the event is tagged with. Empty means market-wide.
    pub symbols: Vec<String>,
    pub source: String,
}

impl Event {
    /// Tagged with `symbol`, or untagged (market-wide).
    pub fn qualifies_for(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.iter().any(|s| s == symbol)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

/// Domain/category restriction applied to neighbor lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborFilter {
    pub domain: Option<String>,
    /// Match any of these categories; empty matches all.
    pub categories: Vec<String>,
    /// The trigger itself is never its own neighbor.
    pub exclude_id: Option<String>,
}

impl NeighborFilter {
    pub fn for_event(event: &Event) -> Self {
        Self {
            domain: Some(event.domain.clone()),
            categories: event.categories.clone(),
            exclude_id: Some(event.id.clone()),
        }
    }

    pub fn excludes(&self, event_id: &str) -> bool {
        self.exclude_id.as_deref() == Some(event_id)
    }

    pub fn matches(&self, event: &Event) -> bool {
        if self.excludes(&event.id) {
            return false;
        }
        if let Some(domain) = &self.domain {
            if &event.domain != domain {
                return false;
            }
        }
        self.categories.is_empty() || self.categories.iter().any(|c| event.has_category(c))
    }
}
