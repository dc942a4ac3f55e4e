//! Forecast snapshots for timeline reconstruction.

use crate::domain::error::EventcastError;
use crate::domain::forecast::{Direction, Forecast, ForecastMethod};
use crate::ports::store_port::SnapshotStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A persisted forecast. At most one exists per [`SnapshotKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    pub symbol: String,
    /// Method and horizon, e.g. `event_conditioned_1440m`.
    pub forecast_type: String,
    pub model_source: String,
    pub model_version: String,
    pub snapshot_at: DateTime<Utc>,
    pub horizon_minutes: u32,
    pub forecast_value: f64,
    pub confidence: f64,
    pub direction: Direction,
    pub sample_size: usize,
    pub fallback: bool,
    pub event_id: Option<String>,
    pub target_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotKey {
    pub symbol: String,
    pub forecast_type: String,
    pub model_source: String,
    pub snapshot_at: DateTime<Utc>,
}

pub fn forecast_type(method: ForecastMethod, horizon_minutes: u32) -> String {
    format!("{}_{}m", method.as_str(), horizon_minutes)
}

impl ForecastSnapshot {
    pub fn from_forecast(
        forecast: &Forecast,
        model_source: &str,
        model_version: &str,
        event_id: Option<String>,
    ) -> Self {
        Self {
            symbol: forecast.symbol.clone(),
            forecast_type: forecast_type(forecast.method, forecast.horizon_minutes),
            model_source: model_source.to_string(),
            model_version: model_version.to_string(),
            snapshot_at: forecast.as_of,
            horizon_minutes: forecast.horizon_minutes,
            forecast_value: forecast.expected_value,
            confidence: forecast.confidence,
            direction: forecast.direction,
            sample_size: forecast.sample_size,
            fallback: forecast.fallback,
            event_id,
            target_date: Some(
                forecast.as_of + Duration::minutes(i64::from(forecast.horizon_minutes)),
            ),
        }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            symbol: self.symbol.clone(),
            forecast_type: self.forecast_type.clone(),
            model_source: self.model_source.clone(),
            snapshot_at: self.snapshot_at,
        }
    }
}

/// Buffers snapshots and writes them in fixed-size batches.
pub struct SnapshotBatcher<'a> {
    store: &'a dyn SnapshotStore,
    batch_size: usize,
    buffer: Vec<ForecastSnapshot>,
    inserted: usize,
}

impl<'a> SnapshotBatcher<'a> {
    pub fn new(store: &'a dyn SnapshotStore, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            inserted: 0,
        }
    }

    pub fn push(&mut self, snapshot: ForecastSnapshot) -> Result<(), EventcastError> {
        self.buffer.push(snapshot);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write whatever is buffered. Returns rows inserted by this flush.
    pub fn flush(&mut self) -> Result<usize, EventcastError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let n = self.store.upsert_snapshots(&self.buffer)?;
        debug!(batch = self.buffer.len(), inserted = n, "snapshot batch written");
        self.buffer.clear();
        self.inserted += n;
        Ok(n)
    }

    /// Flush the remainder and return the total inserted.
    pub fn finish(mut self) -> Result<usize, EventcastError> {
        self.flush()?;
        Ok(self.inserted)
    }
}

/// One model source's snapshots for a symbol, ordered by `snapshot_at`.
pub fn reconstruct_timeline(
    store: &dyn SnapshotStore,
    symbol: &str,
    forecast_type: &str,
    model_source: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<ForecastSnapshot>, EventcastError> {
    let mut timeline: Vec<ForecastSnapshot> = store
        .snapshots_for(symbol, forecast_type, start, end)?
        .into_iter()
        .filter(|s| s.model_source == model_source)
        .collect();
    timeline.sort_by_key(|s| s.snapshot_at);
    Ok(timeline)
}
