//! Ordered fallback across forecasters.

use crate::domain::error::EventcastError;
use crate::domain::forecast::{Forecast, ForecastContext, Forecaster};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Tries each forecaster in turn. Recoverable failures move on to the next
/// one; anything else aborts the request.
pub struct FallbackChain<'a> {
    forecasters: Vec<Box<dyn Forecaster + 'a>>,
}

impl<'a> FallbackChain<'a> {
    pub fn new(forecasters: Vec<Box<dyn Forecaster + 'a>>) -> Self {
        Self { forecasters }
    }

    pub fn len(&self) -> usize {
        self.forecasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forecasters.is_empty()
    }
}

impl Forecaster for FallbackChain<'_> {
    fn name(&self) -> &str {
        "chain"
    }

    fn forecast(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
        context: &ForecastContext,
    ) -> Result<Forecast, EventcastError> {
        let mut last_err = None;
        for (position, forecaster) in self.forecasters.iter().enumerate() {
            match forecaster.forecast(symbol, as_of, horizon_minutes, context) {
                Ok(mut forecast) => {
                    if position > 0 {
                        forecast.fallback = true;
                    }
                    return Ok(forecast);
                }
                Err(e) if e.is_recoverable() => {
                    match &e {
                        EventcastError::ModelUnavailable { .. } | EventcastError::ModelLoad { .. } => {
                            warn!(forecaster = forecaster.name(), symbol, error = %e, "falling back")
                        }
                        _ => debug!(forecaster = forecaster.name(), symbol, error = %e, "falling back"),
                    }
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(EventcastError::InsufficientData {
            symbol: symbol.to_string(),
            have: 0,
            need: 1,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::forecast::{Direction, ForecastMethod};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        result: fn() -> Result<Forecast, EventcastError>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(result: fn() -> Result<Forecast, EventcastError>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Forecaster for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn forecast(
            &self,
            _symbol: &str,
            _as_of: DateTime<Utc>,
            _horizon_minutes: u32,
            _context: &ForecastContext,
        ) -> Result<Forecast, EventcastError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap()
    }

    fn naive() -> Result<Forecast, EventcastError> {
        Ok(Forecast {
            symbol: "X".into(),
            as_of: as_of(),
            horizon_minutes: 1440,
            expected_value: 0.01,
            dispersion: 0.01,
            direction: Direction::Up,
            confidence: 0.3,
            p_up: 0.6,
            p_down: 0.4,
            sample_size: 10,
            method: ForecastMethod::NaiveBaseline,
            neighbors_used: 0,
            fallback: false,
        })
    }

    fn unavailable() -> Result<Forecast, EventcastError> {
        Err(EventcastError::ModelUnavailable {
            model: "m".into(),
            horizon_minutes: 1440,
        })
    }

    fn violation() -> Result<Forecast, EventcastError> {
        Err(EventcastError::consistency("feature at as_of"))
    }

    #[test]
    fn first_success_is_not_fallback() {
        let chain = FallbackChain::new(vec![Box::new(Scripted::new(naive))]);
        let f = chain
            .forecast("X", as_of(), 1440, &ForecastContext::default())
            .unwrap();
        assert!(!f.fallback);
    }

    #[test]
    fn model_unavailable_falls_through() {
        let chain = FallbackChain::new(vec![
            Box::new(Scripted::new(unavailable)),
            Box::new(Scripted::new(naive)),
        ]);
        let f = chain
            .forecast("X", as_of(), 1440, &ForecastContext::default())
            .unwrap();
        assert!(f.fallback);
        assert_eq!(f.method, ForecastMethod::NaiveBaseline);
    }

    #[test]
    fn consistency_violation_aborts() {
        let chain = FallbackChain::new(vec![
            Box::new(Scripted::new(violation)),
            Box::new(Scripted::new(naive)),
        ]);
        let err = chain
            .forecast("X", as_of(), 1440, &ForecastContext::default())
            .unwrap_err();
        assert!(matches!(err, EventcastError::ConsistencyViolation { .. }));
    }

    #[test]
    fn exhausted_chain_returns_last_error() {
        let chain = FallbackChain::new(vec![
            Box::new(Scripted::new(unavailable)),
            Box::new(Scripted::new(unavailable)),
        ]);
        let err = chain
            .forecast("X", as_of(), 1440, &ForecastContext::default())
            .unwrap_err();
        assert!(matches!(err, EventcastError::ModelUnavailable { .. }));
    }

    #[test]
    fn later_forecasters_are_not_called_after_success() {
        let first = Scripted::new(naive);
        let second = Scripted::new(naive);
        {
            let forecasters: Vec<Box<dyn Forecaster + '_>> =
                vec![Box::new(&first), Box::new(&second)];
            let chain = FallbackChain::new(forecasters);
            chain
                .forecast("X", as_of(), 1440, &ForecastContext::default())
                .unwrap();
        }
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }
}
