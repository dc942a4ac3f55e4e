//! Backtest harness.
//!
//! Replays a forecaster over a `(symbol, horizon, as_of)` grid using only
//! data strictly before each `as_of`, joins every forecast to its realized
//! outcome, and aggregates accuracy. `(symbol, horizon)` partitions share no
//! mutable state and run in parallel.

use crate::domain::config::BacktestSettings;
use crate::domain::error::EventcastError;
use crate::domain::forecast::{Direction, ForecastContext, ForecastMethod, Forecaster};
use crate::domain::metrics::Metrics;
use crate::domain::outcome::{resolve_outcome, OutcomeAdapter};
use crate::domain::regime::{Regime, RegimeClassifier};
use crate::domain::temporal;
use crate::ports::data_port::DataPort;
use crate::ports::store_port::BacktestStore;
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestPlan {
    pub symbols: Vec<String>,
    pub horizons: Vec<u32>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step_days: u32,
    pub model_name: String,
}

impl BacktestPlan {
    pub fn grid(&self) -> Result<Vec<DateTime<Utc>>, EventcastError> {
        build_grid(self.start, self.end, self.step_days)
    }

    /// Every grid point, symbol-major then horizon then time.
    pub fn grid_points(&self) -> Result<Vec<GridPoint>, EventcastError> {
        let times = self.grid()?;
        let mut points = Vec::with_capacity(times.len() * self.symbols.len() * self.horizons.len());
        for symbol in &self.symbols {
            for &horizon_minutes in &self.horizons {
                points.extend(times.iter().map(|&as_of| GridPoint {
                    symbol: symbol.clone(),
                    horizon_minutes,
                    as_of,
                }));
            }
        }
        Ok(points)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPoint {
    pub symbol: String,
    pub horizon_minutes: u32,
    pub as_of: DateTime<Utc>,
}

/// `start, start + step, ...` while `< end`.
pub fn build_grid(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step_days: u32,
) -> Result<Vec<DateTime<Utc>>, EventcastError> {
    let start = temporal::guard(start)?;
    let end = temporal::guard(end)?;
    if step_days == 0 {
        return Err(EventcastError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "step_days".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    let step = Duration::days(i64::from(step_days));
    let mut grid = Vec::new();
    let mut t = start;
    while t < end {
        grid.push(t);
        t += step;
    }
    Ok(grid)
}

/// Supplies the request context for each grid point.
pub trait ContextProvider: Send + Sync {
    fn context_for(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
    ) -> Result<ForecastContext, EventcastError>;
}

/// Empty context: no trigger event.
pub struct NoContext;

impl ContextProvider for NoContext {
    fn context_for(
        &self,
        _symbol: &str,
        _as_of: DateTime<Utc>,
    ) -> Result<ForecastContext, EventcastError> {
        Ok(ForecastContext::default())
    }
}

/// Uses the most recent qualifying event in the window before `as_of` as
/// the trigger.
pub struct LatestEventContext<'a> {
    data: &'a dyn DataPort,
    window_days: u32,
}

impl<'a> LatestEventContext<'a> {
    pub fn new(data: &'a dyn DataPort, window_days: u32) -> Self {
        Self { data, window_days }
    }
}

impl ContextProvider for LatestEventContext<'_> {
    fn context_for(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
    ) -> Result<ForecastContext, EventcastError> {
        let start = as_of - Duration::days(i64::from(self.window_days));
        let events = self.data.fetch_events(start, as_of)?;
        for e in &events {
            temporal::ensure_before(e.at, as_of, &format!("trigger event {}", e.id))?;
        }
        let trigger = events
            .into_iter()
            .filter(|e| e.qualifies_for(symbol))
            .max_by(|a, b| a.at.cmp(&b.at).then_with(|| b.id.cmp(&a.id)));
        Ok(ForecastContext { trigger })
    }
}

/// One forecast joined to its realized outcome. Keyed by
/// `(model_name, symbol, as_of, horizon_minutes)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub model_name: String,
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    pub horizon_minutes: u32,
    pub method: ForecastMethod,
    pub fallback: bool,
    pub predicted_direction: Direction,
    pub expected_value: f64,
    pub confidence: f64,
    pub p_up: f64,
    pub p_down: f64,
    pub sample_size: usize,
    pub realized_at: DateTime<Utc>,
    pub realized_value: f64,
    pub realized_direction: Direction,
    pub correct: bool,
    pub regime: Option<Regime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub model_name: String,
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    pub horizon_minutes: u32,
}

impl BacktestRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            model_name: self.model_name.clone(),
            symbol: self.symbol.clone(),
            as_of: self.as_of,
            horizon_minutes: self.horizon_minutes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientData,
    NoNeighbors,
    ModelUnavailable,
    IndexTimeout,
    UnresolvedOutcome,
}

impl SkipReason {
    /// Skip reason for a recoverable error; `None` for errors that abort.
    pub fn from_error(err: &EventcastError) -> Option<Self> {
        match err {
            EventcastError::InsufficientData { .. } => Some(SkipReason::InsufficientData),
            EventcastError::NoEligibleNeighbors { .. } => Some(SkipReason::NoNeighbors),
            EventcastError::ModelUnavailable { .. } | EventcastError::ModelLoad { .. } => {
                Some(SkipReason::ModelUnavailable)
            }
            EventcastError::IndexTimeout { .. } => Some(SkipReason::IndexTimeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub plan: BacktestPlan,
    pub records: Vec<BacktestRecord>,
    pub metrics: Metrics,
    pub skipped: BTreeMap<SkipReason, usize>,
    /// Rows newly written to the store. Zero on an identical re-run.
    pub inserted: usize,
}

impl BacktestReport {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

#[derive(Default)]
struct Partition {
    records: Vec<BacktestRecord>,
    skipped: BTreeMap<SkipReason, usize>,
}

pub struct BacktestHarness<'a, A: OutcomeAdapter> {
    data: &'a dyn DataPort,
    adapter: A,
    forecaster: &'a dyn Forecaster,
    context: &'a dyn ContextProvider,
    regime: Option<&'a dyn RegimeClassifier>,
    store: Option<&'a dyn BacktestStore>,
    settings: BacktestSettings,
    buckets: usize,
}

impl<'a, A: OutcomeAdapter> BacktestHarness<'a, A> {
    pub fn new(data: &'a dyn DataPort, adapter: A, forecaster: &'a dyn Forecaster) -> Self {
        Self {
            data,
            adapter,
            forecaster,
            context: &NoContext,
            regime: None,
            store: None,
            settings: BacktestSettings::default(),
            buckets: 10,
        }
    }

    pub fn with_context(mut self, context: &'a dyn ContextProvider) -> Self {
        self.context = context;
        self
    }

    pub fn with_regime(mut self, regime: &'a dyn RegimeClassifier) -> Self {
        self.regime = Some(regime);
        self
    }

    pub fn with_store(mut self, store: &'a dyn BacktestStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: BacktestSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets.max(1);
        self
    }

    pub fn run(&self, plan: &BacktestPlan) -> Result<BacktestReport, EventcastError> {
        let grid = plan.grid()?;
        let partitions: Vec<(&str, u32)> = plan
            .symbols
            .iter()
            .flat_map(|s| plan.horizons.iter().map(move |&h| (s.as_str(), h)))
            .collect();
        info!(
            model = %plan.model_name,
            forecaster = self.forecaster.name(),
            partitions = partitions.len(),
            grid_points = grid.len(),
            "backtest started"
        );

        let results = partitions
            .par_iter()
            .map(|&(symbol, horizon)| self.run_partition(&plan.model_name, symbol, horizon, &grid))
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::new();
        let mut skipped: BTreeMap<SkipReason, usize> = BTreeMap::new();
        for part in results {
            records.extend(part.records);
            for (reason, n) in part.skipped {
                *skipped.entry(reason).or_insert(0) += n;
            }
        }
        records.sort_by(|a, b| {
            (&a.symbol, a.horizon_minutes, a.as_of).cmp(&(&b.symbol, b.horizon_minutes, b.as_of))
        });

        let mut inserted = 0;
        if let Some(store) = self.store {
            for batch in records.chunks(self.settings.batch_size.max(1)) {
                inserted += store.upsert_records(batch)?;
            }
        }

        let metrics = Metrics::compute(&records, self.buckets);
        info!(
            model = %plan.model_name,
            records = records.len(),
            skipped = skipped.values().sum::<usize>(),
            inserted,
            accuracy = metrics.overall.accuracy,
            "backtest finished"
        );
        Ok(BacktestReport {
            plan: plan.clone(),
            records,
            metrics,
            skipped,
            inserted,
        })
    }

    fn run_partition(
        &self,
        model_name: &str,
        symbol: &str,
        horizon_minutes: u32,
        grid: &[DateTime<Utc>],
    ) -> Result<Partition, EventcastError> {
        let mut part = Partition::default();
        for &as_of in grid {
            let context = self.context.context_for(symbol, as_of)?;
            let forecast = match self
                .forecaster
                .forecast(symbol, as_of, horizon_minutes, &context)
            {
                Ok(f) => f,
                Err(e) => match SkipReason::from_error(&e) {
                    Some(reason) => {
                        debug!(symbol, horizon_minutes, %as_of, error = %e, "grid point skipped");
                        *part.skipped.entry(reason).or_insert(0) += 1;
                        continue;
                    }
                    None => return Err(e),
                },
            };
            if forecast.as_of != as_of || forecast.horizon_minutes != horizon_minutes {
                return Err(EventcastError::consistency(format!(
                    "forecast for {symbol} answered a different grid point"
                )));
            }

            let Some(raw) =
                resolve_outcome(&self.adapter, self.data, symbol, as_of, horizon_minutes)?
            else {
                *part.skipped.entry(SkipReason::UnresolvedOutcome).or_insert(0) += 1;
                continue;
            };
            let realized = self.adapter.normalize(&raw);
            let regime = match self.regime {
                Some(r) => r.classify(symbol, as_of)?,
                None => None,
            };

            part.records.push(BacktestRecord {
                model_name: model_name.to_string(),
                symbol: symbol.to_string(),
                as_of,
                horizon_minutes,
                method: forecast.method,
                fallback: forecast.fallback,
                predicted_direction: forecast.direction,
                expected_value: forecast.expected_value,
                confidence: forecast.confidence,
                p_up: forecast.p_up,
                p_down: forecast.p_down,
                sample_size: forecast.sample_size,
                realized_at: self.adapter.realized_at(&raw),
                realized_value: realized.value,
                realized_direction: realized.direction,
                correct: forecast.direction == realized.direction,
                regime,
            });
        }
        Ok(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;
    use crate::domain::calibration::ConfidenceCalibrator;
    use crate::domain::config::BaselineConfig;
    use crate::domain::event::Event;
    use crate::domain::forecaster::naive::NaiveBaseline;
    use crate::domain::outcome::{Outcome, ReturnOutcomes};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn store() -> MemoryStore {
        let outcomes = (1..=40)
            .map(|d| Outcome {
                symbol: "X".into(),
                as_of: t0() + Duration::days(d),
                horizon_minutes: 1440,
                realized_return: 0.01,
            })
            .collect();
        MemoryStore::new().with_outcomes(outcomes)
    }

    fn plan() -> BacktestPlan {
        BacktestPlan {
            symbols: vec!["X".into()],
            horizons: vec![1440],
            start: t0() + Duration::days(2),
            end: t0() + Duration::days(42),
            step_days: 1,
            model_name: "naive".into(),
        }
    }

    #[test]
    fn grid_is_half_open() {
        let grid = build_grid(t0(), t0() + Duration::days(3), 1).unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[2], t0() + Duration::days(2));
        assert!(build_grid(t0(), t0() + Duration::days(3), 0).is_err());
    }

    #[test]
    fn skips_are_counted_by_reason() {
        let data = store();
        let naive = NaiveBaseline::new(
            &data,
            ReturnOutcomes::default(),
            BaselineConfig::default(),
            ConfidenceCalibrator::default(),
        );
        let harness = BacktestHarness::new(&data, ReturnOutcomes::default(), &naive);
        let report = harness.run(&plan()).unwrap();

        // Day 2 and 3 have fewer than 3 prior outcomes; days 40 and 41 have
        // no outcome realized a horizon later.
        assert_eq!(report.skipped[&SkipReason::InsufficientData], 2);
        assert_eq!(report.skipped[&SkipReason::UnresolvedOutcome], 2);
        assert_eq!(report.records.len(), 36);
        assert!((report.metrics.overall.accuracy - 1.0).abs() < f64::EPSILON);
        assert!(report.records.iter().all(|r| r.realized_at > r.as_of));
    }

    #[test]
    fn rerun_inserts_nothing_new() {
        let data = store();
        let naive = NaiveBaseline::new(
            &data,
            ReturnOutcomes::default(),
            BaselineConfig::default(),
            ConfidenceCalibrator::default(),
        );
        let harness =
            BacktestHarness::new(&data, ReturnOutcomes::default(), &naive).with_store(&data);
        let first = harness.run(&plan()).unwrap();
        let second = harness.run(&plan()).unwrap();
        assert_eq!(first.inserted, 36);
        assert_eq!(second.inserted, 0);
        assert_eq!(data.record_count(), 36);
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn latest_event_context_excludes_as_of() {
        let event = |id: &str, at| Event {
            id: id.into(),
            at,
            embedding: vec![1.0],
            text: String::new(),
            domain: "macro".into(),
            categories: vec![],
            symbols: vec![],
            source: "wire".into(),
        };
        let as_of = t0() + Duration::days(5);
        let data = MemoryStore::new().with_events(vec![
            event("old", as_of - Duration::days(2)),
            event("recent", as_of - Duration::hours(1)),
            event("now", as_of),
        ]);
        let ctx = LatestEventContext::new(&data, 7)
            .context_for("X", as_of)
            .unwrap();
        assert_eq!(ctx.trigger.map(|e| e.id), Some("recent".to_string()));
    }

    #[test]
    fn skip_reason_mapping() {
        assert_eq!(
            SkipReason::from_error(&EventcastError::IndexTimeout { timeout_ms: 5 }),
            Some(SkipReason::IndexTimeout)
        );
        assert_eq!(
            SkipReason::from_error(&EventcastError::consistency("leak")),
            None
        );
    }
}
