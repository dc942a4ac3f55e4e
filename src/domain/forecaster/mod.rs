//! Forecasting strategies sharing the [`Forecaster`] interface.
//!
//! - [`naive::NaiveBaseline`]: historical mean/dispersion of outcomes.
//! - [`event_conditioned::EventConditioned`]: k-NN over event embeddings.
//! - [`classifier::MlClassifier`]: logistic model over feature vectors.
//! - [`chain::FallbackChain`]: ML → event-conditioned → naive.
//!
//! [`Forecaster`]: crate::domain::forecast::Forecaster

pub mod chain;
pub mod classifier;
pub mod event_conditioned;
pub mod naive;

/// Population-weighted mean and standard deviation.
pub(crate) fn weighted_mean_std(pairs: &[(f64, f64)]) -> (f64, f64) {
    let total: f64 = pairs.iter().map(|(w, _)| w).sum();
    if total <= 0.0 {
        return (0.0, 0.0);
    }
    let mean = pairs.iter().map(|(w, v)| w * v).sum::<f64>() / total;
    let var = pairs
        .iter()
        .map(|(w, v)| w * (v - mean) * (v - mean))
        .sum::<f64>()
        / total;
    (mean, var.max(0.0).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_stats_equal_weights() {
        let (mean, std) = weighted_mean_std(&[(1.0, 1.0), (1.0, 3.0)]);
        assert!((mean - 2.0).abs() < 1e-12);
        assert!((std - 1.0).abs() < 1e-12);
    }

    #[test]
    fn weighted_stats_favor_heavier() {
        let (mean, _) = weighted_mean_std(&[(3.0, 1.0), (1.0, 5.0)]);
        assert!((mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn weighted_stats_empty() {
        assert_eq!(weighted_mean_std(&[]), (0.0, 0.0));
    }
}
