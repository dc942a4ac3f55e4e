//! Confidence calibration.
//!
//! [`ConfidenceCalibrator`] maps `(sample_size, dispersion, horizon)` into a
//! bounded confidence score. [`IsotonicCalibration`] is the empirical
//! probability mapping fitted against realized outcomes.

use crate::domain::backtest::BacktestRecord;
use crate::domain::config::CalibrationConfig;
use crate::domain::outcome::Direction;
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: f64 = 1440.0;

/// Smallest horizon used for normalization: one minute.
const MIN_HORIZON_DAYS: f64 = 1.0 / MINUTES_PER_DAY;

#[derive(Debug, Clone)]
pub struct ConfidenceCalibrator {
    config: CalibrationConfig,
}

impl ConfidenceCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Dispersion expressed per day of horizon (`dispersion / sqrt(days)`).
    ///
    /// Return noise grows with the square root of horizon, so this puts a
    /// 1-day and a 30-day forecast on the same scale. Horizon never enters
    /// the score any other way.
    pub fn normalized_dispersion(&self, dispersion: f64, horizon_minutes: u32) -> f64 {
        let days = (f64::from(horizon_minutes) / MINUTES_PER_DAY).max(MIN_HORIZON_DAYS);
        dispersion.abs() / days.sqrt()
    }

    /// `n / (n + half_point)`, in `[0, 1)`.
    pub fn sample_factor(&self, sample_size: f64) -> f64 {
        let n = sample_size.max(0.0);
        // Written so each rounding step is monotone in n.
        1.0 - self.config.sample_half_point / (n + self.config.sample_half_point)
    }

    /// `1 / (1 + d / scale)`, in `(0, 1]`.
    pub fn dispersion_factor(&self, normalized_dispersion: f64) -> f64 {
        1.0 / (1.0 + normalized_dispersion.max(0.0) / self.config.dispersion_scale)
    }

    /// Confidence in `[0, 1]`: non-decreasing in `sample_size`, non-increasing
    /// in `dispersion`. Non-finite inputs give 0.
    pub fn confidence(&self, sample_size: f64, dispersion: f64, horizon_minutes: u32) -> f64 {
        if !sample_size.is_finite() || !dispersion.is_finite() {
            return 0.0;
        }
        let d = self.normalized_dispersion(dispersion, horizon_minutes);
        let c = self.sample_factor(sample_size) * self.dispersion_factor(d);
        if c.is_finite() { c.clamp(0.0, 1.0) } else { 0.0 }
    }
}

impl Default for ConfidenceCalibrator {
    fn default() -> Self {
        Self::new(CalibrationConfig::default())
    }
}

/// Kish effective sample size `(Σw)² / Σw²` of a weight set.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum: f64 = weights.iter().sum();
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 { sum * sum / sum_sq } else { 0.0 }
}

/// Monotone piecewise-linear probability mapping fitted by
/// pool-adjacent-violators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicCalibration {
    /// Block centers (mean raw score), strictly increasing.
    xs: Vec<f64>,
    /// Block means of the realized indicator, non-decreasing.
    ys: Vec<f64>,
}

impl IsotonicCalibration {
    /// Fit on `(raw_probability, realized)` pairs. `None` when empty.
    pub fn fit(samples: &[(f64, bool)]) -> Option<Self> {
        let mut points: Vec<(f64, f64)> = samples
            .iter()
            .filter(|(x, _)| x.is_finite())
            .map(|&(x, y)| (x, if y { 1.0 } else { 0.0 }))
            .collect();
        if points.is_empty() {
            return None;
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        // (sum_x, sum_y, count) per block
        let mut blocks: Vec<(f64, f64, f64)> = Vec::with_capacity(points.len());
        for (x, y) in points {
            blocks.push((x, y, 1.0));
            while blocks.len() >= 2 {
                let n = blocks.len();
                let (_, ya, ca) = blocks[n - 2];
                let (_, yb, cb) = blocks[n - 1];
                if ya / ca <= yb / cb {
                    break;
                }
                let last = blocks.pop().unwrap_or((0.0, 0.0, 0.0));
                if let Some(prev) = blocks.last_mut() {
                    prev.0 += last.0;
                    prev.1 += last.1;
                    prev.2 += last.2;
                }
            }
        }

        let mut xs: Vec<f64> = Vec::with_capacity(blocks.len());
        let mut ys: Vec<f64> = Vec::with_capacity(blocks.len());
        for (sx, sy, c) in blocks {
            let x = sx / c;
            let y = sy / c;
            // Blocks with the same center collapse into one.
            if let (Some(&last_x), Some(last_y)) = (xs.last(), ys.last_mut()) {
                if x <= last_x {
                    *last_y = last_y.max(y);
                    continue;
                }
            }
            xs.push(x);
            ys.push(y);
        }
        Some(Self { xs, ys })
    }

    /// Fit `p_up` against realized up moves from past backtest records.
    pub fn fit_from_records(records: &[BacktestRecord]) -> Option<Self> {
        let samples: Vec<(f64, bool)> = records
            .iter()
            .map(|r| (r.p_up, r.realized_direction == Direction::Up))
            .collect();
        Self::fit(&samples)
    }

    /// Calibrated probability for a raw score, clamped to the fitted range.
    pub fn apply(&self, raw: f64) -> f64 {
        if self.xs.is_empty() || !raw.is_finite() {
            return raw.clamp(0.0, 1.0);
        }
        let last = self.xs.len() - 1;
        if raw <= self.xs[0] {
            return self.ys[0];
        }
        if raw >= self.xs[last] {
            return self.ys[last];
        }
        let i = self.xs.partition_point(|&x| x <= raw);
        let (x0, x1) = (self.xs[i - 1], self.xs[i]);
        let (y0, y1) = (self.ys[i - 1], self.ys[i]);
        y0 + (y1 - y0) * (raw - x0) / (x1 - x0)
    }

    pub fn knots(&self) -> usize {
        self.xs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn confidence_is_bounded() {
        let c = ConfidenceCalibrator::default();
        assert_eq!(c.confidence(0.0, 0.01, 1440), 0.0);
        let high = c.confidence(1e9, 0.0, 1440);
        assert!(high > 0.99 && high <= 1.0);
    }

    #[test]
    fn known_value() {
        // n=12, half=10 -> 12/22; d=0.01/day, scale 0.02 -> 1/1.5
        let c = ConfidenceCalibrator::default();
        assert_relative_eq!(
            c.confidence(12.0, 0.01, 1440),
            (12.0 / 22.0) * (1.0 / 1.5),
            epsilon = 1e-12
        );
    }

    #[test]
    fn fewer_samples_or_wider_dispersion_lower_confidence() {
        let c = ConfidenceCalibrator::default();
        let base = c.confidence(12.0, 0.01, 1440);
        assert!(c.confidence(3.0, 0.01, 1440) < base);
        assert!(c.confidence(12.0, 0.05, 1440) < base);
    }

    #[test]
    fn horizon_normalization_makes_sqrt_scaled_noise_comparable() {
        // Same per-day noise at 1 day and 16 days yields the same confidence.
        let c = ConfidenceCalibrator::default();
        let one_day = c.confidence(20.0, 0.01, 1440);
        let sixteen_days = c.confidence(20.0, 0.04, 16 * 1440);
        assert_relative_eq!(one_day, sixteen_days, epsilon = 1e-12);
    }

    #[test]
    fn horizon_alone_cannot_lift_confidence_above_sample_factor() {
        let c = ConfidenceCalibrator::default();
        let n = 5.0;
        let cap = c.sample_factor(n);
        for horizon in [60, 1440, 43_200, 525_600] {
            assert!(c.confidence(n, 0.02, horizon) <= cap);
        }
    }

    #[test]
    fn non_finite_inputs_give_zero() {
        let c = ConfidenceCalibrator::default();
        assert_eq!(c.confidence(f64::NAN, 0.01, 1440), 0.0);
        assert_eq!(c.confidence(10.0, f64::INFINITY, 1440), 0.0);
    }

    #[test]
    fn effective_sample_size_equal_weights() {
        assert_relative_eq!(effective_sample_size(&[2.0; 8]), 8.0, epsilon = 1e-12);
        assert_eq!(effective_sample_size(&[]), 0.0);
        assert!(effective_sample_size(&[10.0, 0.1, 0.1]) < 2.0);
    }

    #[test]
    fn isotonic_fit_is_monotone() {
        let samples = vec![
            (0.1, false),
            (0.2, true),
            (0.3, false),
            (0.4, false),
            (0.6, true),
            (0.7, false),
            (0.8, true),
            (0.9, true),
        ];
        let cal = IsotonicCalibration::fit(&samples).unwrap();
        let mut prev = -1.0;
        for i in 0..=100 {
            let p = cal.apply(i as f64 / 100.0);
            assert!(p >= prev - 1e-12, "non-monotone at {i}");
            assert!((0.0..=1.0).contains(&p));
            prev = p;
        }
    }

    #[test]
    fn isotonic_perfectly_separated() {
        let samples = vec![(0.2, false), (0.3, false), (0.7, true), (0.8, true)];
        let cal = IsotonicCalibration::fit(&samples).unwrap();
        assert_eq!(cal.apply(0.0), 0.0);
        assert_eq!(cal.apply(1.0), 1.0);
        assert_relative_eq!(cal.apply(0.5), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn isotonic_empty_is_none() {
        assert!(IsotonicCalibration::fit(&[]).is_none());
    }

    proptest! {
        #[test]
        fn monotone_in_sample_size(
            n in 0.0f64..10_000.0,
            extra in 0.0f64..1_000.0,
            d in 0.0f64..1.0,
            h in 1u32..600_000,
        ) {
            let c = ConfidenceCalibrator::default();
            prop_assert!(c.confidence(n + extra, d, h) >= c.confidence(n, d, h));
        }

        #[test]
        fn monotone_in_dispersion(
            n in 0.0f64..10_000.0,
            d in 0.0f64..1.0,
            extra in 0.0f64..1.0,
            h in 1u32..600_000,
        ) {
            let c = ConfidenceCalibrator::default();
            prop_assert!(c.confidence(n, d + extra, h) <= c.confidence(n, d, h));
        }

        #[test]
        fn always_in_unit_interval(n in 0.0f64..1e12, d in 0.0f64..1e3, h in 0u32..u32::MAX) {
            let c = ConfidenceCalibrator::default();
            let v = c.confidence(n, d, h);
            prop_assert!((0.0..=1.0).contains(&v));
        }
    }
}
