//! Append-only sinks for forecast snapshots and backtest records.
//!
//! Writes are idempotent upserts: a unique-key conflict is skipped, never an
//! error, and never overwrites the stored row.

use crate::domain::backtest::BacktestRecord;
use crate::domain::error::EventcastError;
use crate::domain::snapshot::ForecastSnapshot;
use chrono::{DateTime, Utc};

pub trait SnapshotStore: Send + Sync {
    /// Insert snapshots, skipping existing keys. Returns the number inserted.
    fn upsert_snapshots(&self, snapshots: &[ForecastSnapshot]) -> Result<usize, EventcastError>;

    /// Snapshots for `symbol`/`forecast_type` taken in `[start, end)`.
    fn snapshots_for(
        &self,
        symbol: &str,
        forecast_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ForecastSnapshot>, EventcastError>;
}

pub trait BacktestStore: Send + Sync {
    /// Insert records, skipping existing grid-point keys. Returns the number inserted.
    fn upsert_records(&self, records: &[BacktestRecord]) -> Result<usize, EventcastError>;

    fn records_for_model(&self, model_name: &str) -> Result<Vec<BacktestRecord>, EventcastError>;
}
