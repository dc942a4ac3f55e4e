//! Forecast records and the per-request state machine.

use crate::domain::error::EventcastError;
use crate::domain::event::Event;
pub use crate::domain::outcome::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    NaiveBaseline,
    EventConditioned,
    MlClassifier,
}

impl ForecastMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastMethod::NaiveBaseline => "naive_baseline",
            ForecastMethod::EventConditioned => "event_conditioned",
            ForecastMethod::MlClassifier => "ml_classifier",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "naive_baseline" => Some(ForecastMethod::NaiveBaseline),
            "event_conditioned" => Some(ForecastMethod::EventConditioned),
            "ml_classifier" => Some(ForecastMethod::MlClassifier),
            _ => None,
        }
    }
}

impl fmt::Display for ForecastMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A forecast. Produced fresh per request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    pub horizon_minutes: u32,
    pub expected_value: f64,
    pub dispersion: f64,
    pub direction: Direction,
    pub confidence: f64,
    pub p_up: f64,
    pub p_down: f64,
    pub sample_size: usize,
    pub method: ForecastMethod,
    pub neighbors_used: usize,
    pub fallback: bool,
}

impl Forecast {
    /// Internal invariants every returned forecast satisfies.
    pub fn check_invariants(&self) -> Result<(), EventcastError> {
        let fail = |what: &str| {
            Err(EventcastError::consistency(format!(
                "forecast for {} at {}: {what}",
                self.symbol,
                self.as_of.to_rfc3339()
            )))
        };
        if !self.expected_value.is_finite() || !self.dispersion.is_finite() {
            return fail("non-finite expected value or dispersion");
        }
        if self.dispersion < 0.0 {
            return fail("negative dispersion");
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return fail("confidence outside [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.p_up) || !(0.0..=1.0).contains(&self.p_down) {
            return fail("probability outside [0, 1]");
        }
        if self.p_up + self.p_down > 1.0 + 1e-9 {
            return fail("p_up + p_down exceeds 1");
        }
        Ok(())
    }

    pub(crate) fn into_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }
}

/// Request context passed to every forecaster.
#[derive(Debug, Clone, Default)]
pub struct ForecastContext {
    /// Triggering event for event-conditioned forecasting.
    pub trigger: Option<Event>,
}

impl ForecastContext {
    pub fn with_trigger(event: Event) -> Self {
        Self {
            trigger: Some(event),
        }
    }
}

/// Shared forecaster interface.
pub trait Forecaster: Send + Sync {
    fn name(&self) -> &str;

    fn forecast(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
        context: &ForecastContext,
    ) -> Result<Forecast, EventcastError>;
}

impl<T: Forecaster + ?Sized> Forecaster for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn forecast(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
        context: &ForecastContext,
    ) -> Result<Forecast, EventcastError> {
        (**self).forecast(symbol, as_of, horizon_minutes, context)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastStage {
    Requested,
    FeaturesBuilt,
    NeighborsFound,
    NeighborsEmpty,
    Scored,
    Calibrated,
    Returned,
    Error,
}

impl ForecastStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastStage::Requested => "REQUESTED",
            ForecastStage::FeaturesBuilt => "FEATURES_BUILT",
            ForecastStage::NeighborsFound => "NEIGHBORS_FOUND",
            ForecastStage::NeighborsEmpty => "NEIGHBORS_EMPTY",
            ForecastStage::Scored => "SCORED",
            ForecastStage::Calibrated => "CALIBRATED",
            ForecastStage::Returned => "RETURNED",
            ForecastStage::Error => "ERROR",
        }
    }

    /// Legal forward transitions. `Error` is reachable from any live stage.
    pub fn can_advance_to(&self, next: ForecastStage) -> bool {
        use ForecastStage::*;
        match (self, next) {
            (Returned | Error, _) => false,
            (_, Error) => true,
            (Requested, FeaturesBuilt) => true,
            (FeaturesBuilt, NeighborsFound | NeighborsEmpty | Scored) => true,
            (NeighborsFound | NeighborsEmpty, Scored) => true,
            (Scored, Calibrated) => true,
            (Calibrated, Returned) => true,
            _ => false,
        }
    }
}

/// Tracks one request through its stages. Nothing is retried; a failed
/// request ends in `Error` and callers issue a fresh one.
#[derive(Debug)]
pub struct ForecastRun<'a> {
    method: ForecastMethod,
    symbol: &'a str,
    stage: ForecastStage,
}

impl<'a> ForecastRun<'a> {
    pub fn start(method: ForecastMethod, symbol: &'a str) -> Self {
        debug!(%method, symbol, stage = ForecastStage::Requested.as_str(), "forecast stage");
        Self {
            method,
            symbol,
            stage: ForecastStage::Requested,
        }
    }

    pub fn stage(&self) -> ForecastStage {
        self.stage
    }

    pub fn advance(&mut self, next: ForecastStage) -> Result<(), EventcastError> {
        if !self.stage.can_advance_to(next) {
            return Err(EventcastError::consistency(format!(
                "illegal forecast transition {} -> {}",
                self.stage.as_str(),
                next.as_str()
            )));
        }
        debug!(
            method = %self.method,
            symbol = self.symbol,
            stage = next.as_str(),
            "forecast stage"
        );
        self.stage = next;
        Ok(())
    }

    /// Record a failure and hand the error back for propagation.
    pub fn fail(&mut self, err: EventcastError) -> EventcastError {
        debug!(
            method = %self.method,
            symbol = self.symbol,
            from = self.stage.as_str(),
            error = %err,
            "forecast stage ERROR"
        );
        self.stage = ForecastStage::Error;
        err
    }

    /// Validate, mark `Returned`, and hand the forecast out.
    pub fn finish(mut self, forecast: Forecast) -> Result<Forecast, EventcastError> {
        if let Err(e) = forecast.check_invariants() {
            return Err(self.fail(e));
        }
        self.advance(ForecastStage::Returned)?;
        Ok(forecast)
    }
}
