//! Engine configuration.
//!
//! One immutable [`EngineConfig`] is built from a [`ConfigPort`] and passed
//! explicitly into each component constructor, so a backtest can vary
//! thresholds per run without process-wide side effects.

use crate::domain::config_validation::validate_engine_config;
use crate::domain::error::EventcastError;
use crate::domain::neighbors::{DistanceMetric, Weighting};
use crate::ports::config_port::ConfigPort;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub lookback_days: u32,
    pub min_history_points: usize,
    pub event_window_days: u32,
    /// Symbol universe for the one-hot block, in schema order.
    pub symbols: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lookback_days: 60,
            min_history_points: 10,
            event_window_days: 7,
            symbols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborConfig {
    pub k: usize,
    pub min_neighbors: usize,
    pub metric: DistanceMetric,
    pub weighting: Weighting,
    pub timeout_ms: u64,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            k: 50,
            min_neighbors: 10,
            metric: DistanceMetric::Cosine,
            weighting: Weighting::default(),
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineConfig {
    pub lookback_days: u32,
    pub min_samples: usize,
    pub flat_threshold: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            lookback_days: 60,
            min_samples: 3,
            flat_threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Sample size at which the sample factor reaches one half.
    pub sample_half_point: f64,
    /// Per-day dispersion at which the dispersion factor reaches one half.
    pub dispersion_scale: f64,
    pub buckets: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            sample_half_point: 10.0,
            dispersion_scale: 0.02,
            buckets: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub decision_margin: f64,
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            decision_margin: 0.02,
            learning_rate: 0.1,
            epochs: 500,
            l2: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeConfig {
    pub lookback_days: u32,
    pub trend_threshold: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            trend_threshold: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    pub batch_size: usize,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self { batch_size: 500 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub neighbors: NeighborConfig,
    pub baseline: BaselineConfig,
    pub calibration: CalibrationConfig,
    pub classifier: ClassifierConfig,
    pub regime: RegimeConfig,
    pub backtest: BacktestSettings,
}

fn get_usize(config: &dyn ConfigPort, section: &str, key: &str, default: usize) -> usize {
    config.get_int(section, key, default as i64).max(0) as usize
}

fn get_u32(config: &dyn ConfigPort, section: &str, key: &str, default: u32) -> u32 {
    config
        .get_int(section, key, i64::from(default))
        .clamp(0, i64::from(u32::MAX)) as u32
}

impl EngineConfig {
    /// Validate then build. Missing keys take their defaults.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, EventcastError> {
        validate_engine_config(config)?;
        let d = EngineConfig::default();

        let metric = match config.get_string("neighbors", "metric") {
            Some(raw) => DistanceMetric::parse(&raw).ok_or_else(|| EventcastError::ConfigInvalid {
                section: "neighbors".into(),
                key: "metric".into(),
                reason: format!("unknown metric {raw:?} (expected cosine or euclidean)"),
            })?,
            None => d.neighbors.metric,
        };

        let weighting = match config
            .get_string("neighbors", "weighting")
            .as_deref()
            .map(str::trim)
        {
            None | Some("inverse_distance") => Weighting::InverseDistance {
                epsilon: config.get_double("neighbors", "epsilon", 1e-6),
            },
            Some("exponential") => Weighting::Exponential {
                scale: config.get_double("neighbors", "scale", 0.25),
            },
            Some(other) => {
                return Err(EventcastError::ConfigInvalid {
                    section: "neighbors".into(),
                    key: "weighting".into(),
                    reason: format!(
                        "unknown weighting {other:?} (expected inverse_distance or exponential)"
                    ),
                });
            }
        };

        let symbols = config
            .get_list("engine", "symbols")
            .into_iter()
            .map(|s| s.to_uppercase())
            .collect();

        Ok(EngineConfig {
            features: FeatureConfig {
                lookback_days: get_u32(config, "engine", "lookback_days", d.features.lookback_days),
                min_history_points: get_usize(
                    config,
                    "engine",
                    "min_history_points",
                    d.features.min_history_points,
                ),
                event_window_days: get_u32(
                    config,
                    "engine",
                    "event_window_days",
                    d.features.event_window_days,
                ),
                symbols,
            },
            neighbors: NeighborConfig {
                k: get_usize(config, "neighbors", "k", d.neighbors.k),
                min_neighbors: get_usize(
                    config,
                    "neighbors",
                    "min_neighbors",
                    d.neighbors.min_neighbors,
                ),
                metric,
                weighting,
                timeout_ms: config.get_int("neighbors", "timeout_ms", d.neighbors.timeout_ms as i64)
                    as u64,
            },
            baseline: BaselineConfig {
                lookback_days: get_u32(
                    config,
                    "baseline",
                    "lookback_days",
                    d.baseline.lookback_days,
                ),
                min_samples: get_usize(config, "baseline", "min_samples", d.baseline.min_samples),
                flat_threshold: config.get_double(
                    "baseline",
                    "flat_threshold",
                    d.baseline.flat_threshold,
                ),
            },
            calibration: CalibrationConfig {
                sample_half_point: config.get_double(
                    "calibration",
                    "sample_half_point",
                    d.calibration.sample_half_point,
                ),
                dispersion_scale: config.get_double(
                    "calibration",
                    "dispersion_scale",
                    d.calibration.dispersion_scale,
                ),
                buckets: get_usize(config, "calibration", "buckets", d.calibration.buckets),
            },
            classifier: ClassifierConfig {
                decision_margin: config.get_double(
                    "classifier",
                    "decision_margin",
                    d.classifier.decision_margin,
                ),
                learning_rate: config.get_double(
                    "classifier",
                    "learning_rate",
                    d.classifier.learning_rate,
                ),
                epochs: get_usize(config, "classifier", "epochs", d.classifier.epochs),
                l2: config.get_double("classifier", "l2", d.classifier.l2),
            },
            regime: RegimeConfig {
                lookback_days: get_u32(config, "regime", "lookback_days", d.regime.lookback_days),
                trend_threshold: config.get_double(
                    "regime",
                    "trend_threshold",
                    d.regime.trend_threshold,
                ),
            },
            backtest: BacktestSettings {
                batch_size: get_usize(config, "backtest", "batch_size", d.backtest.batch_size),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    #[test]
    fn empty_config_gives_defaults() {
        let adapter = FileConfigAdapter::from_string("[engine]\n").unwrap();
        let config = EngineConfig::from_config(&adapter).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn reads_all_sections() {
        let ini = r#"
[engine]
lookback_days = 90
min_history_points = 20
event_window_days = 3
symbols = btc, eth

[neighbors]
k = 25
min_neighbors = 5
metric = euclidean
weighting = exponential
scale = 0.5
timeout_ms = 500

[baseline]
min_samples = 4
flat_threshold = 0.001

[calibration]
sample_half_point = 20
dispersion_scale = 0.03
buckets = 5

[regime]
trend_threshold = 0.1

[backtest]
batch_size = 50
"#;
        let adapter = FileConfigAdapter::from_string(ini).unwrap();
        let config = EngineConfig::from_config(&adapter).unwrap();
        assert_eq!(config.features.lookback_days, 90);
        assert_eq!(config.features.min_history_points, 20);
        assert_eq!(config.features.event_window_days, 3);
        assert_eq!(config.features.symbols, vec!["BTC", "ETH"]);
        assert_eq!(config.neighbors.k, 25);
        assert_eq!(config.neighbors.min_neighbors, 5);
        assert_eq!(config.neighbors.metric, DistanceMetric::Euclidean);
        assert_eq!(config.neighbors.weighting, Weighting::Exponential { scale: 0.5 });
        assert_eq!(config.neighbors.timeout_ms, 500);
        assert_eq!(config.baseline.min_samples, 4);
        assert_eq!(config.baseline.flat_threshold, 0.001);
        assert_eq!(config.calibration.sample_half_point, 20.0);
        assert_eq!(config.calibration.buckets, 5);
        assert_eq!(config.regime.trend_threshold, 0.1);
        assert_eq!(config.backtest.batch_size, 50);
    }

    #[test]
    fn unknown_metric_is_invalid() {
        let adapter = FileConfigAdapter::from_string("[neighbors]\nmetric = manhattan\n").unwrap();
        let err = EngineConfig::from_config(&adapter).unwrap_err();
        assert!(
            matches!(err, EventcastError::ConfigInvalid { ref key, .. } if key == "metric"),
            "{err}"
        );
    }

    #[test]
    fn unknown_weighting_is_invalid() {
        let adapter = FileConfigAdapter::from_string("[neighbors]\nweighting = uniform\n").unwrap();
        assert!(matches!(
            EngineConfig::from_config(&adapter),
            Err(EventcastError::ConfigInvalid { .. })
        ));
    }
}
