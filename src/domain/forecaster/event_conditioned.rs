//! Event-conditioned forecaster.
//!
//! Finds historical events semantically close to the trigger, pairs each with
//! the next outcome realized after it, and aggregates those outcomes with
//! distance weights. Falls back to the naive baseline (marked
//! `fallback = true`) when too few neighbors carry an outcome.

use crate::domain::calibration::{effective_sample_size, IsotonicCalibration};
use crate::domain::config::NeighborConfig;
use crate::domain::error::EventcastError;
use crate::domain::event::NeighborFilter;
use crate::domain::forecast::{
    Direction, Forecast, ForecastContext, ForecastMethod, ForecastRun, ForecastStage, Forecaster,
};
use crate::domain::forecaster::naive::NaiveBaseline;
use crate::domain::forecaster::weighted_mean_std;
use crate::domain::neighbors::{Neighbor, NeighborSearch};
use crate::domain::outcome::{NormalizedOutcome, OutcomeAdapter};
use crate::domain::temporal;
use crate::ports::neighbor_port::NeighborIndex;
use chrono::{DateTime, Utc};
use tracing::debug;

pub struct EventConditioned<'a, A: OutcomeAdapter> {
    baseline: NaiveBaseline<'a, A>,
    search: NeighborSearch<'a>,
    config: NeighborConfig,
    probability_calibration: Option<IsotonicCalibration>,
}

/// Scored neighbor set, before calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborEstimate {
    pub expected_value: f64,
    pub dispersion: f64,
    pub p_up: f64,
    pub p_down: f64,
    pub matched: usize,
    pub effective_sample_size: f64,
}

enum Resolution {
    Scored(Forecast),
    Fallback { found: usize, reason: &'static str },
}

impl<'a, A: OutcomeAdapter> EventConditioned<'a, A> {
    pub fn new(
        baseline: NaiveBaseline<'a, A>,
        index: &'a dyn NeighborIndex,
        config: NeighborConfig,
    ) -> Self {
        Self {
            baseline,
            search: NeighborSearch::new(index, config.clone()),
            config,
            probability_calibration: None,
        }
    }

    /// Map raw `p_up` through an empirically fitted curve.
    pub fn with_probability_calibration(mut self, calibration: IsotonicCalibration) -> Self {
        self.probability_calibration = Some(calibration);
        self
    }

    /// Pair each neighbor with the earliest outcome whose window opened at or
    /// after the neighbor and that was realized before `as_of`.
    pub fn match_outcomes(
        &self,
        symbol: &str,
        horizon_minutes: u32,
        neighbors: &[Neighbor],
        as_of: DateTime<Utc>,
    ) -> Result<Vec<(f64, NormalizedOutcome)>, EventcastError> {
        let Some(earliest) = neighbors.iter().map(|n| n.at).min() else {
            return Ok(Vec::new());
        };
        let adapter = self.baseline.adapter();
        let mut outcomes =
            adapter.fetch(self.baseline.data(), symbol, horizon_minutes, earliest, as_of)?;
        for raw in &outcomes {
            temporal::ensure_before(adapter.realized_at(raw), as_of, "neighbor outcome")?;
        }
        outcomes.sort_by(|a, b| {
            adapter
                .opened_at(a)
                .cmp(&adapter.opened_at(b))
                .then_with(|| adapter.realized_at(a).cmp(&adapter.realized_at(b)))
        });

        let mut pairs = Vec::with_capacity(neighbors.len());
        for n in neighbors {
            let idx = outcomes.partition_point(|o| adapter.opened_at(o) < n.at);
            if let Some(raw) = outcomes.get(idx) {
                pairs.push((self.config.weighting.weight(n.distance), adapter.normalize(raw)));
            }
        }
        Ok(pairs)
    }

    /// Distance-weighted mean, dispersion, and direction shares.
    pub fn estimate(pairs: &[(f64, NormalizedOutcome)]) -> NeighborEstimate {
        let values: Vec<(f64, f64)> = pairs.iter().map(|(w, o)| (*w, o.value)).collect();
        let (mean, std) = weighted_mean_std(&values);
        let total: f64 = pairs.iter().map(|(w, _)| w).sum();
        let share = |dir: Direction| {
            if total > 0.0 {
                pairs
                    .iter()
                    .filter(|(_, o)| o.direction == dir)
                    .map(|(w, _)| w)
                    .sum::<f64>()
                    / total
            } else {
                0.0
            }
        };
        let weights: Vec<f64> = pairs.iter().map(|(w, _)| *w).collect();
        NeighborEstimate {
            expected_value: mean,
            dispersion: std,
            p_up: share(Direction::Up).clamp(0.0, 1.0),
            p_down: share(Direction::Down).clamp(0.0, 1.0),
            matched: pairs.len(),
            effective_sample_size: effective_sample_size(&weights),
        }
    }

    fn calibrate_probabilities(&self, p_up: f64, p_down: f64) -> (f64, f64) {
        match &self.probability_calibration {
            None => (p_up, p_down),
            Some(cal) => {
                let up = cal.apply(p_up).clamp(0.0, 1.0);
                let rest = 1.0 - p_up;
                let down = if rest > 0.0 {
                    (1.0 - up) * (p_down / rest)
                } else {
                    0.0
                };
                (up, down.clamp(0.0, 1.0 - up))
            }
        }
    }

    fn run(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
        context: &ForecastContext,
        run: &mut ForecastRun<'_>,
    ) -> Result<Resolution, EventcastError> {
        let as_of = temporal::guard(as_of)?;
        let Some(trigger) = &context.trigger else {
            return Ok(Resolution::Fallback {
                found: 0,
                reason: "no trigger event",
            });
        };
        let filter = NeighborFilter::for_event(trigger);
        run.advance(ForecastStage::FeaturesBuilt)?;

        let neighbors = match self
            .search
            .search(&trigger.embedding, &filter, as_of, self.config.k)
        {
            Ok(found) => {
                run.advance(ForecastStage::NeighborsFound)?;
                found
            }
            Err(EventcastError::NoEligibleNeighbors { .. }) => {
                run.advance(ForecastStage::NeighborsEmpty)?;
                return Ok(Resolution::Fallback {
                    found: 0,
                    reason: "no eligible neighbors",
                });
            }
            Err(e) => return Err(e),
        };

        let pairs = self.match_outcomes(symbol, horizon_minutes, &neighbors, as_of)?;
        if pairs.len() < self.config.min_neighbors {
            return Ok(Resolution::Fallback {
                found: pairs.len(),
                reason: "too few neighbors with realized outcomes",
            });
        }

        let est = Self::estimate(&pairs);
        run.advance(ForecastStage::Scored)?;

        let (p_up, p_down) = self.calibrate_probabilities(est.p_up, est.p_down);
        let confidence = self.baseline.calibrator().confidence(
            est.effective_sample_size,
            est.dispersion,
            horizon_minutes,
        );
        run.advance(ForecastStage::Calibrated)?;

        Ok(Resolution::Scored(Forecast {
            symbol: symbol.to_string(),
            as_of,
            horizon_minutes,
            expected_value: est.expected_value,
            dispersion: est.dispersion,
            direction: self.baseline.adapter().direction_of(est.expected_value),
            confidence,
            p_up,
            p_down,
            sample_size: est.matched,
            method: ForecastMethod::EventConditioned,
            neighbors_used: est.matched,
            fallback: false,
        }))
    }
}

impl<A: OutcomeAdapter> Forecaster for EventConditioned<'_, A> {
    fn name(&self) -> &str {
        ForecastMethod::EventConditioned.as_str()
    }

    fn forecast(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
        context: &ForecastContext,
    ) -> Result<Forecast, EventcastError> {
        let mut run = ForecastRun::start(ForecastMethod::EventConditioned, symbol);
        match self.run(symbol, as_of, horizon_minutes, context, &mut run) {
            Ok(Resolution::Scored(forecast)) => run.finish(forecast),
            Ok(Resolution::Fallback { found, reason }) => {
                debug!(
                    symbol,
                    found,
                    min = self.config.min_neighbors,
                    reason,
                    "falling back to naive baseline"
                );
                let mut forecast = self
                    .baseline
                    .summarize(symbol, as_of, horizon_minutes)
                    .map_err(|e| run.fail(e))?
                    .into_fallback();
                forecast.neighbors_used = found;
                Ok(forecast)
            }
            Err(e) => Err(run.fail(e)),
        }
    }
}
