//! Backtest accuracy and calibration metrics.

use super::backtest::BacktestRecord;
use super::forecast::Direction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyStat {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
}

impl AccuracyStat {
    fn record(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
        self.accuracy = self.correct as f64 / self.total as f64;
    }
}

/// Forecasts whose confidence fell in `[lower, upper)` (the last band
/// includes 1.0), with their realized hit rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub lower: f64,
    pub upper: f64,
    pub midpoint: f64,
    pub count: usize,
    pub accuracy: f64,
    pub mean_confidence: f64,
}

impl CalibrationBucket {
    /// Hit rate minus stated confidence band midpoint.
    pub fn gap(&self) -> f64 {
        self.accuracy - self.midpoint
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub overall: AccuracyStat,
    pub per_symbol: BTreeMap<String, AccuracyStat>,
    pub per_horizon: BTreeMap<u32, AccuracyStat>,
    /// Only records with a regime label at `as_of`.
    pub per_regime: BTreeMap<String, AccuracyStat>,
    /// Non-empty confidence bands, ascending.
    pub calibration: Vec<CalibrationBucket>,
    /// Mean squared error of `p_up` against realized up moves.
    pub brier_score: Option<f64>,
    pub mean_confidence: Option<f64>,
    pub fallback_rate: Option<f64>,
}

impl Metrics {
    pub fn compute(records: &[BacktestRecord], buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let mut overall = AccuracyStat::default();
        let mut per_symbol: BTreeMap<String, AccuracyStat> = BTreeMap::new();
        let mut per_horizon: BTreeMap<u32, AccuracyStat> = BTreeMap::new();
        let mut per_regime: BTreeMap<String, AccuracyStat> = BTreeMap::new();
        // (count, hits, confidence sum) per band
        let mut bands = vec![(0usize, 0usize, 0.0_f64); buckets];
        let mut brier = 0.0;
        let mut confidence = 0.0;
        let mut fallbacks = 0usize;

        for r in records {
            overall.record(r.correct);
            per_symbol.entry(r.symbol.clone()).or_default().record(r.correct);
            per_horizon
                .entry(r.horizon_minutes)
                .or_default()
                .record(r.correct);
            if let Some(regime) = r.regime {
                per_regime
                    .entry(regime.as_str().to_string())
                    .or_default()
                    .record(r.correct);
            }

            let c = r.confidence.clamp(0.0, 1.0);
            let idx = ((c * buckets as f64).floor() as usize).min(buckets - 1);
            bands[idx].0 += 1;
            if r.correct {
                bands[idx].1 += 1;
            }
            bands[idx].2 += c;

            let up = if r.realized_direction == Direction::Up { 1.0 } else { 0.0 };
            brier += (r.p_up - up) * (r.p_up - up);
            confidence += c;
            if r.fallback {
                fallbacks += 1;
            }
        }

        let width = 1.0 / buckets as f64;
        let calibration = bands
            .iter()
            .enumerate()
            .filter(|(_, (count, _, _))| *count > 0)
            .map(|(i, &(count, hits, sum))| CalibrationBucket {
                lower: i as f64 * width,
                upper: (i + 1) as f64 * width,
                midpoint: (i as f64 + 0.5) * width,
                count,
                accuracy: hits as f64 / count as f64,
                mean_confidence: sum / count as f64,
            })
            .collect();

        let n = records.len() as f64;
        let mean = |total: f64| (!records.is_empty()).then(|| total / n);
        Self {
            overall,
            per_symbol,
            per_horizon,
            per_regime,
            calibration,
            brier_score: mean(brier),
            mean_confidence: mean(confidence),
            fallback_rate: mean(fallbacks as f64),
        }
    }
}
