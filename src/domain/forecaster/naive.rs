//! Naive baseline: mean and dispersion of recent realized outcomes.

use crate::domain::calibration::ConfidenceCalibrator;
use crate::domain::config::BaselineConfig;
use crate::domain::error::EventcastError;
use crate::domain::forecast::{
    Direction, Forecast, ForecastContext, ForecastMethod, ForecastRun, ForecastStage, Forecaster,
};
use crate::domain::outcome::OutcomeAdapter;
use crate::domain::temporal;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

pub struct NaiveBaseline<'a, A: OutcomeAdapter> {
    data: &'a dyn DataPort,
    adapter: A,
    config: BaselineConfig,
    calibrator: ConfidenceCalibrator,
}

impl<'a, A: OutcomeAdapter> NaiveBaseline<'a, A> {
    pub fn new(
        data: &'a dyn DataPort,
        adapter: A,
        config: BaselineConfig,
        calibrator: ConfidenceCalibrator,
    ) -> Self {
        Self {
            data,
            adapter,
            config,
            calibrator,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn data(&self) -> &'a dyn DataPort {
        self.data
    }

    pub fn calibrator(&self) -> &ConfidenceCalibrator {
        &self.calibrator
    }

    fn run(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
        run: &mut ForecastRun<'_>,
    ) -> Result<Forecast, EventcastError> {
        let as_of = temporal::guard(as_of)?;
        let start = as_of - Duration::days(i64::from(self.config.lookback_days));
        let history = self
            .adapter
            .fetch(self.data, symbol, horizon_minutes, start, as_of)?;
        for raw in &history {
            temporal::ensure_before(self.adapter.realized_at(raw), as_of, "baseline outcome")?;
        }
        run.advance(ForecastStage::FeaturesBuilt)?;

        let n = history.len();
        if n < self.config.min_samples || n == 0 {
            debug!(symbol, have = n, need = self.config.min_samples, "baseline short");
            return Err(EventcastError::InsufficientData {
                symbol: symbol.to_string(),
                have: n,
                need: self.config.min_samples.max(1),
            });
        }

        let normalized: Vec<_> = history.iter().map(|r| self.adapter.normalize(r)).collect();
        let mean = normalized.iter().map(|o| o.value).sum::<f64>() / n as f64;
        let std = if n > 1 {
            let ss: f64 = normalized
                .iter()
                .map(|o| (o.value - mean) * (o.value - mean))
                .sum();
            (ss / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        let ups = normalized
            .iter()
            .filter(|o| o.direction == Direction::Up)
            .count();
        let downs = normalized
            .iter()
            .filter(|o| o.direction == Direction::Down)
            .count();
        run.advance(ForecastStage::Scored)?;

        let confidence = self.calibrator.confidence(n as f64, std, horizon_minutes);
        run.advance(ForecastStage::Calibrated)?;

        Ok(Forecast {
            symbol: symbol.to_string(),
            as_of,
            horizon_minutes,
            expected_value: mean,
            dispersion: std,
            direction: self.adapter.direction_of(mean),
            confidence,
            p_up: ups as f64 / n as f64,
            p_down: downs as f64 / n as f64,
            sample_size: n,
            method: ForecastMethod::NaiveBaseline,
            neighbors_used: 0,
            fallback: false,
        })
    }

    /// Baseline forecast from outcomes realized in the lookback before `as_of`.
    pub fn summarize(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
    ) -> Result<Forecast, EventcastError> {
        let mut run = ForecastRun::start(ForecastMethod::NaiveBaseline, symbol);
        match self.run(symbol, as_of, horizon_minutes, &mut run) {
            Ok(forecast) => run.finish(forecast),
            Err(e) => Err(run.fail(e)),
        }
    }
}

impl<A: OutcomeAdapter> Forecaster for NaiveBaseline<'_, A> {
    fn name(&self) -> &str {
        ForecastMethod::NaiveBaseline.as_str()
    }

    fn forecast(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
        _context: &ForecastContext,
    ) -> Result<Forecast, EventcastError> {
        self.summarize(symbol, as_of, horizon_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;
    use crate::domain::outcome::{GameOutcomes, GameResult, GameResultKind, Outcome, ReturnOutcomes};
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap()
    }

    fn outcome(days_before: i64, r: f64) -> Outcome {
        Outcome {
            symbol: "X".into(),
            as_of: as_of() - Duration::days(days_before),
            horizon_minutes: 1440,
            realized_return: r,
        }
    }

    fn baseline(store: &MemoryStore) -> NaiveBaseline<'_, ReturnOutcomes> {
        NaiveBaseline::new(
            store,
            ReturnOutcomes::default(),
            BaselineConfig::default(),
            ConfidenceCalibrator::default(),
        )
    }

    #[test]
    fn mean_direction_and_probabilities() {
        let store = MemoryStore::new().with_outcomes(vec![
            outcome(1, 0.03),
            outcome(2, 0.01),
            outcome(3, -0.01),
            outcome(4, 0.05),
        ]);
        let f = baseline(&store).summarize("X", as_of(), 1440).unwrap();
        assert!((f.expected_value - 0.02).abs() < 1e-12);
        assert_eq!(f.direction, Direction::Up);
        assert_eq!(f.sample_size, 4);
        assert!((f.p_up - 0.75).abs() < 1e-12);
        assert!((f.p_down - 0.25).abs() < 1e-12);
        assert!(!f.fallback);
        assert_eq!(f.method, ForecastMethod::NaiveBaseline);
    }

    #[test]
    fn outcome_realized_at_as_of_is_excluded() {
        let store = MemoryStore::new().with_outcomes(vec![
            outcome(1, 0.01),
            outcome(2, 0.01),
            outcome(3, 0.01),
            outcome(0, -0.50),
        ]);
        let f = baseline(&store).summarize("X", as_of(), 1440).unwrap();
        assert_eq!(f.sample_size, 3);
        assert!((f.expected_value - 0.01).abs() < 1e-12);
    }

    #[test]
    fn outcomes_outside_lookback_are_ignored() {
        let store = MemoryStore::new().with_outcomes(vec![
            outcome(1, 0.01),
            outcome(2, 0.01),
            outcome(3, 0.01),
            outcome(61, 0.90),
        ]);
        let f = baseline(&store).summarize("X", as_of(), 1440).unwrap();
        assert_eq!(f.sample_size, 3);
    }

    #[test]
    fn too_few_samples_is_insufficient_data() {
        let store = MemoryStore::new().with_outcomes(vec![outcome(1, 0.01), outcome(2, 0.02)]);
        let err = baseline(&store).summarize("X", as_of(), 1440).unwrap_err();
        assert!(matches!(
            err,
            EventcastError::InsufficientData { have: 2, need: 3, .. }
        ));
    }

    #[test]
    fn other_horizons_do_not_mix() {
        let mut weekly = outcome(1, -0.2);
        weekly.horizon_minutes = 10_080;
        let store = MemoryStore::new().with_outcomes(vec![
            outcome(1, 0.01),
            outcome(2, 0.01),
            outcome(3, 0.01),
            weekly,
        ]);
        let f = baseline(&store).summarize("X", as_of(), 1440).unwrap();
        assert_eq!(f.sample_size, 3);
    }

    #[test]
    fn games_give_win_rate() {
        let game = |d: i64, result| GameResult {
            game_id: format!("g{d}"),
            team_symbol: "LAL".into(),
            played_at: as_of() - Duration::days(d),
            result,
        };
        let store = MemoryStore::new().with_games(vec![
            game(1, GameResultKind::Win),
            game(2, GameResultKind::Win),
            game(3, GameResultKind::Loss),
            game(4, GameResultKind::Tie),
        ]);
        let b = NaiveBaseline::new(
            &store,
            GameOutcomes,
            BaselineConfig::default(),
            ConfidenceCalibrator::default(),
        );
        let f = b.summarize("LAL", as_of(), 180).unwrap();
        // (1 + 1 + 0 + 0.5) / 4
        assert!((f.expected_value - 0.625).abs() < 1e-12);
        assert_eq!(f.direction, Direction::Up);
        assert!((f.p_up - 0.5).abs() < 1e-12);
        assert!((f.p_down - 0.25).abs() < 1e-12);
    }
}
