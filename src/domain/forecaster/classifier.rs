//! Logistic-regression direction classifier.
//!
//! Artifacts are immutable once written. A loaded [`ClassifierModel`] is
//! shared read-only across forecasts, typically behind an `Arc`.

use crate::domain::calibration::ConfidenceCalibrator;
use crate::domain::config::ClassifierConfig;
use crate::domain::error::EventcastError;
use crate::domain::features::{FeatureExtractor, FeatureSchema};
use crate::domain::forecast::{
    Direction, Forecast, ForecastContext, ForecastMethod, ForecastRun, ForecastStage, Forecaster,
};
use crate::domain::outcome::{resolve_outcome, OutcomeAdapter};
use crate::domain::temporal;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MIN_SCALE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_name: String,
    pub model_version: String,
    pub schema_version: u32,
    pub trained_from: DateTime<Utc>,
    /// Latest realization time of any training label.
    pub trained_to: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub horizons: Vec<u32>,
    pub training_samples: usize,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub metadata: ModelMetadata,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub feature_means: Vec<f64>,
    pub feature_scales: Vec<f64>,
}

/// A validated artifact, ready for inference.
#[derive(Debug, Clone)]
pub struct ClassifierModel {
    artifact: ModelArtifact,
}

impl ClassifierModel {
    /// Validate `artifact` against the running extractor's schema.
    pub fn load(artifact: ModelArtifact, schema: &FeatureSchema) -> Result<Self, EventcastError> {
        let meta = &artifact.metadata;
        let reject = |reason: String| {
            warn!(model = %meta.model_name, version = %meta.model_version, %reason, "model rejected");
            Err(EventcastError::ModelLoad { reason })
        };

        if meta.schema_version != schema.version {
            return reject(format!(
                "schema version {} does not match extractor version {}",
                meta.schema_version, schema.version
            ));
        }
        if meta.feature_names != schema.names {
            return reject("feature list does not match extractor schema".to_string());
        }
        let n = schema.len();
        for (what, len) in [
            ("weights", artifact.weights.len()),
            ("feature_means", artifact.feature_means.len()),
            ("feature_scales", artifact.feature_scales.len()),
        ] {
            if len != n {
                return reject(format!("{what} has {len} entries, expected {n}"));
            }
        }
        let finite = artifact
            .weights
            .iter()
            .chain(&artifact.feature_means)
            .chain(&artifact.feature_scales)
            .chain(std::iter::once(&artifact.bias))
            .all(|v| v.is_finite());
        if !finite {
            return reject("non-finite parameter".to_string());
        }
        if artifact.feature_scales.iter().any(|s| *s <= 0.0) {
            return reject("feature scale must be positive".to_string());
        }
        if meta.horizons.is_empty() {
            return reject("artifact lists no trained horizons".to_string());
        }

        info!(
            model = %meta.model_name,
            version = %meta.model_version,
            samples = meta.training_samples,
            "model loaded"
        );
        Ok(Self { artifact })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.artifact.metadata
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn supports_horizon(&self, horizon_minutes: u32) -> bool {
        self.artifact.metadata.horizons.contains(&horizon_minutes)
    }

    /// Probability that the realized direction is up.
    pub fn predict_proba(&self, values: &[f64]) -> Result<f64, EventcastError> {
        let a = &self.artifact;
        if values.len() != a.weights.len() {
            return Err(EventcastError::consistency(format!(
                "feature vector has {} values, model expects {}",
                values.len(),
                a.weights.len()
            )));
        }
        let z = a.bias
            + values
                .iter()
                .zip(&a.feature_means)
                .zip(&a.feature_scales)
                .zip(&a.weights)
                .map(|(((x, m), s), w)| w * (x - m) / s)
                .sum::<f64>();
        Ok(sigmoid(z))
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

pub struct MlClassifier<'a> {
    model: Arc<ClassifierModel>,
    extractor: FeatureExtractor<'a>,
    config: ClassifierConfig,
    calibrator: ConfidenceCalibrator,
}

impl<'a> MlClassifier<'a> {
    pub fn new(
        model: Arc<ClassifierModel>,
        extractor: FeatureExtractor<'a>,
        config: ClassifierConfig,
        calibrator: ConfidenceCalibrator,
    ) -> Self {
        Self {
            model,
            extractor,
            config,
            calibrator,
        }
    }

    pub fn model(&self) -> &ClassifierModel {
        &self.model
    }

    fn run(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
        run: &mut ForecastRun<'_>,
    ) -> Result<Forecast, EventcastError> {
        let as_of = temporal::guard(as_of)?;
        let meta = self.model.metadata();
        if !self.model.supports_horizon(horizon_minutes) {
            return Err(EventcastError::ModelUnavailable {
                model: meta.model_name.clone(),
                horizon_minutes,
            });
        }
        // Labels realized at or after as_of would leak into this decision.
        if as_of <= meta.trained_to {
            debug!(model = %meta.model_name, %as_of, trained_to = %meta.trained_to, "model trained past as_of");
            return Err(EventcastError::ModelUnavailable {
                model: meta.model_name.clone(),
                horizon_minutes,
            });
        }

        let features = self.extractor.extract_default(symbol, as_of, horizon_minutes)?;
        features.check_invariants()?;
        run.advance(ForecastStage::FeaturesBuilt)?;

        let p = self.model.predict_proba(&features.values)?;
        let volatility = features.get("volatility").unwrap_or(0.0).abs();
        let horizon_days = f64::from(horizon_minutes) / 1440.0;
        let dispersion = 2.0 * (p * (1.0 - p)).sqrt() * volatility * horizon_days.sqrt();
        run.advance(ForecastStage::Scored)?;

        let samples = meta.training_samples;
        let confidence = self
            .calibrator
            .confidence(samples as f64, dispersion, horizon_minutes);
        run.advance(ForecastStage::Calibrated)?;

        Ok(Forecast {
            symbol: symbol.to_string(),
            as_of,
            horizon_minutes,
            expected_value: p - (1.0 - p),
            dispersion,
            direction: Direction::classify(p, 0.5, self.config.decision_margin),
            confidence,
            p_up: p,
            p_down: 1.0 - p,
            sample_size: samples,
            method: ForecastMethod::MlClassifier,
            neighbors_used: 0,
            fallback: false,
        })
    }
}

impl Forecaster for MlClassifier<'_> {
    fn name(&self) -> &str {
        ForecastMethod::MlClassifier.as_str()
    }

    fn forecast(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
        _context: &ForecastContext,
    ) -> Result<Forecast, EventcastError> {
        let mut run = ForecastRun::start(ForecastMethod::MlClassifier, symbol);
        match self.run(symbol, as_of, horizon_minutes, &mut run) {
            Ok(forecast) => run.finish(forecast),
            Err(e) => Err(run.fail(e)),
        }
    }
}

/// One labelled feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    pub realized_at: DateTime<Utc>,
    pub values: Vec<f64>,
    pub up: bool,
}

/// Feature vectors at each grid point labelled by realized direction.
///
/// Grid points without enough history or without a resolved outcome are
/// skipped; flat outcomes carry no direction and are skipped too.
pub fn build_training_set<A: OutcomeAdapter>(
    extractor: &FeatureExtractor<'_>,
    data: &dyn DataPort,
    adapter: &A,
    symbols: &[String],
    horizon_minutes: u32,
    grid: &[DateTime<Utc>],
) -> Result<Vec<TrainingSample>, EventcastError> {
    let mut samples = Vec::new();
    let mut skipped = 0usize;
    for symbol in symbols {
        for &as_of in grid {
            let features = match extractor.extract_default(symbol, as_of, horizon_minutes) {
                Ok(f) => f,
                Err(e) if e.is_recoverable() => {
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            features.check_invariants()?;
            let Some(raw) = resolve_outcome(adapter, data, symbol, as_of, horizon_minutes)? else {
                skipped += 1;
                continue;
            };
            let direction = adapter.normalize(&raw).direction;
            if direction == Direction::Flat {
                skipped += 1;
                continue;
            }
            samples.push(TrainingSample {
                symbol: symbol.clone(),
                as_of,
                realized_at: adapter.realized_at(&raw),
                values: features.values,
                up: direction == Direction::Up,
            });
        }
    }
    debug!(samples = samples.len(), skipped, "training set built");
    Ok(samples)
}

/// Fit a logistic model by deterministic full-batch gradient descent.
pub fn train_logistic(
    samples: &[TrainingSample],
    schema: &FeatureSchema,
    config: &ClassifierConfig,
    model_name: &str,
    model_version: &str,
    horizons: Vec<u32>,
) -> Result<ModelArtifact, EventcastError> {
    let (Some(trained_from), Some(trained_to)) = (
        samples.iter().map(|s| s.as_of).min(),
        samples.iter().map(|s| s.realized_at).max(),
    ) else {
        return Err(EventcastError::InsufficientData {
            symbol: model_name.to_string(),
            have: 0,
            need: 2,
        });
    };
    let dim = schema.len();
    if let Some(bad) = samples.iter().find(|s| s.values.len() != dim) {
        return Err(EventcastError::consistency(format!(
            "training sample for {} at {} has {} values, schema has {dim}",
            bad.symbol,
            bad.as_of.to_rfc3339(),
            bad.values.len()
        )));
    }

    let n = samples.len() as f64;
    let mut means = vec![0.0; dim];
    for s in samples {
        for (m, x) in means.iter_mut().zip(&s.values) {
            *m += x / n;
        }
    }
    let mut scales = vec![0.0; dim];
    for s in samples {
        for ((v, x), m) in scales.iter_mut().zip(&s.values).zip(&means) {
            *v += (x - m) * (x - m) / n;
        }
    }
    for v in &mut scales {
        *v = if v.sqrt() > MIN_SCALE { v.sqrt() } else { 1.0 };
    }

    let standardized: Vec<Vec<f64>> = samples
        .iter()
        .map(|s| {
            s.values
                .iter()
                .zip(&means)
                .zip(&scales)
                .map(|((x, m), sc)| (x - m) / sc)
                .collect()
        })
        .collect();
    let labels: Vec<f64> = samples.iter().map(|s| if s.up { 1.0 } else { 0.0 }).collect();

    let mut weights = vec![0.0; dim];
    let mut bias = 0.0;
    for _ in 0..config.epochs {
        let mut grad_w = vec![0.0; dim];
        let mut grad_b = 0.0;
        for (x, y) in standardized.iter().zip(&labels) {
            let z = bias + x.iter().zip(&weights).map(|(a, w)| a * w).sum::<f64>();
            let err = sigmoid(z) - y;
            grad_b += err / n;
            for (g, a) in grad_w.iter_mut().zip(x) {
                *g += err * a / n;
            }
        }
        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= config.learning_rate * (g + config.l2 * *w);
        }
        bias -= config.learning_rate * grad_b;
    }

    let mut correct = 0usize;
    let mut log_loss = 0.0;
    for (x, y) in standardized.iter().zip(&labels) {
        let z = bias + x.iter().zip(&weights).map(|(a, w)| a * w).sum::<f64>();
        let p = sigmoid(z).clamp(1e-12, 1.0 - 1e-12);
        if (p >= 0.5) == (*y >= 0.5) {
            correct += 1;
        }
        log_loss -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();
    }
    let mut metrics = BTreeMap::new();
    metrics.insert("train_accuracy".to_string(), correct as f64 / n);
    metrics.insert("train_log_loss".to_string(), log_loss / n);
    metrics.insert("up_rate".to_string(), labels.iter().sum::<f64>() / n);

    info!(
        model = model_name,
        version = model_version,
        samples = samples.len(),
        accuracy = correct as f64 / n,
        "model trained"
    );

    Ok(ModelArtifact {
        metadata: ModelMetadata {
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
            schema_version: schema.version,
            trained_from,
            trained_to,
            feature_names: schema.names.clone(),
            horizons,
            training_samples: samples.len(),
            metrics,
        },
        weights,
        bias,
        feature_means: means,
        feature_scales: scales,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;
    use crate::domain::config::FeatureConfig;
    use crate::domain::features::FEATURE_SCHEMA_VERSION;
    use crate::domain::outcome::{Outcome, ReturnOutcomes};
    use crate::domain::price::PricePoint;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn schema() -> FeatureSchema {
        FeatureSchema::for_symbols(&[])
    }

    fn artifact(schema: &FeatureSchema, trained_to: DateTime<Utc>) -> ModelArtifact {
        let n = schema.len();
        let mut weights = vec![0.0; n];
        weights[0] = 2.0; // ret_1d
        ModelArtifact {
            metadata: ModelMetadata {
                model_name: "logit".into(),
                model_version: "v1".into(),
                schema_version: FEATURE_SCHEMA_VERSION,
                trained_from: t0(),
                trained_to,
                feature_names: schema.names.clone(),
                horizons: vec![1440],
                training_samples: 200,
                metrics: BTreeMap::new(),
            },
            weights,
            bias: 0.0,
            feature_means: vec![0.0; n],
            feature_scales: vec![0.01; n],
        }
    }

    /// Noon prices alternating up and down, with the same pattern in the
    /// midnight-to-midnight outcomes.
    fn store(days: i64) -> MemoryStore {
        let mut prices = Vec::new();
        let mut outcomes = Vec::new();
        let mut price = 100.0;
        for d in 0..days {
            let r = if d % 2 == 0 { 0.01 } else { -0.01 };
            prices.push(PricePoint {
                symbol: "X".into(),
                at: t0() + Duration::days(d) + Duration::hours(12),
                price,
            });
            outcomes.push(Outcome {
                symbol: "X".into(),
                as_of: t0() + Duration::days(d + 1),
                horizon_minutes: 1440,
                realized_return: r,
            });
            price *= 1.0 + r;
        }
        MemoryStore::new().with_prices(prices).with_outcomes(outcomes)
    }

    #[test]
    fn load_rejects_schema_mismatch() {
        let s = schema();
        let mut a = artifact(&s, t0());
        a.metadata.schema_version = FEATURE_SCHEMA_VERSION + 1;
        assert!(matches!(
            ClassifierModel::load(a, &s),
            Err(EventcastError::ModelLoad { .. })
        ));
    }

    #[test]
    fn load_rejects_feature_list_and_length_mismatch() {
        let s = schema();
        let mut a = artifact(&s, t0());
        a.metadata.feature_names.swap(0, 1);
        assert!(ClassifierModel::load(a, &s).is_err());

        let mut b = artifact(&s, t0());
        b.weights.pop();
        assert!(ClassifierModel::load(b, &s).is_err());
    }

    #[test]
    fn load_rejects_non_finite_parameters() {
        let s = schema();
        let mut a = artifact(&s, t0());
        a.bias = f64::NAN;
        assert!(matches!(
            ClassifierModel::load(a, &s),
            Err(EventcastError::ModelLoad { .. })
        ));
    }

    #[test]
    fn untrained_horizon_is_unavailable() {
        let data = store(40);
        let s = schema();
        let model = Arc::new(ClassifierModel::load(artifact(&s, t0()), &s).unwrap());
        let ml = MlClassifier::new(
            model,
            FeatureExtractor::new(&data, FeatureConfig::default()),
            ClassifierConfig::default(),
            ConfidenceCalibrator::default(),
        );
        let err = ml
            .forecast("X", t0() + Duration::days(30), 60, &ForecastContext::default())
            .unwrap_err();
        assert!(matches!(
            err,
            EventcastError::ModelUnavailable {
                horizon_minutes: 60,
                ..
            }
        ));
    }

    #[test]
    fn model_trained_past_as_of_is_unavailable() {
        let data = store(40);
        let s = schema();
        let trained_to = t0() + Duration::days(35);
        let model = Arc::new(ClassifierModel::load(artifact(&s, trained_to), &s).unwrap());
        let ml = MlClassifier::new(
            model,
            FeatureExtractor::new(&data, FeatureConfig::default()),
            ClassifierConfig::default(),
            ConfidenceCalibrator::default(),
        );
        let err = ml
            .forecast("X", t0() + Duration::days(30), 1440, &ForecastContext::default())
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn predicts_coherent_forecast() {
        let data = store(40);
        let s = schema();
        let model = Arc::new(ClassifierModel::load(artifact(&s, t0()), &s).unwrap());
        let ml = MlClassifier::new(
            model,
            FeatureExtractor::new(&data, FeatureConfig::default()),
            ClassifierConfig::default(),
            ConfidenceCalibrator::default(),
        );
        let f = ml
            .forecast("X", t0() + Duration::days(30), 1440, &ForecastContext::default())
            .unwrap();
        assert_eq!(f.method, ForecastMethod::MlClassifier);
        assert!((f.p_up + f.p_down - 1.0).abs() < 1e-12);
        assert!((f.expected_value - (f.p_up - f.p_down)).abs() < 1e-12);
        assert_eq!(f.sample_size, 200);
        f.check_invariants().unwrap();
    }

    #[test]
    fn training_learns_alternating_pattern() {
        let data = store(120);
        let extractor = FeatureExtractor::new(&data, FeatureConfig::default());
        let grid: Vec<_> = (20..100).map(|d| t0() + Duration::days(d)).collect();
        let samples = build_training_set(
            &extractor,
            &data,
            &ReturnOutcomes::default(),
            &["X".to_string()],
            1440,
            &grid,
        )
        .unwrap();
        assert_eq!(samples.len(), 80);
        assert!(samples.iter().all(|s| s.realized_at > s.as_of));

        let a = train_logistic(
            &samples,
            extractor.schema(),
            &ClassifierConfig::default(),
            "logit",
            "v1",
            vec![1440],
        )
        .unwrap();
        assert_eq!(a.metadata.training_samples, 80);
        assert_eq!(a.metadata.trained_to, t0() + Duration::days(100));
        assert!(a.metadata.metrics["train_accuracy"] > 0.9);

        let model = ClassifierModel::load(a, extractor.schema()).unwrap();
        assert_eq!(model.metadata().horizons, vec![1440]);
    }

    #[test]
    fn training_is_deterministic() {
        let data = store(80);
        let extractor = FeatureExtractor::new(&data, FeatureConfig::default());
        let grid: Vec<_> = (20..60).map(|d| t0() + Duration::days(d)).collect();
        let samples = build_training_set(
            &extractor,
            &data,
            &ReturnOutcomes::default(),
            &["X".to_string()],
            1440,
            &grid,
        )
        .unwrap();
        let cfg = ClassifierConfig::default();
        let a = train_logistic(&samples, extractor.schema(), &cfg, "m", "v", vec![1440]).unwrap();
        let b = train_logistic(&samples, extractor.schema(), &cfg, "m", "v", vec![1440]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_training_set_is_insufficient() {
        let err = train_logistic(
            &[],
            &schema(),
            &ClassifierConfig::default(),
            "m",
            "v",
            vec![1440],
        )
        .unwrap_err();
        assert!(matches!(err, EventcastError::InsufficientData { .. }));
    }
}
