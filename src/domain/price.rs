//! Price observations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub at: DateTime<Utc>,
    pub price: f64,
}

impl PricePoint {
    /// Simple return from `prev` to this point; 0 when `prev` is not positive.
    pub fn return_from(&self, prev: &PricePoint) -> f64 {
        if prev.price > 0.0 {
            (self.price - prev.price) / prev.price
        } else {
            0.0
        }
    }
}
