//! Market regime labels for regime-conditioned accuracy.

use crate::domain::config::RegimeConfig;
use crate::domain::error::EventcastError;
use crate::domain::temporal;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Uptrend,
    Downtrend,
    Chop,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Uptrend => "uptrend",
            Regime::Downtrend => "downtrend",
            Regime::Chop => "chop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uptrend" => Some(Regime::Uptrend),
            "downtrend" => Some(Regime::Downtrend),
            "chop" => Some(Regime::Chop),
            _ => None,
        }
    }
}

pub trait RegimeClassifier: Send + Sync {
    /// Label at `as_of`, or `None` when there is not enough history.
    fn classify(&self, symbol: &str, as_of: DateTime<Utc>)
    -> Result<Option<Regime>, EventcastError>;
}

/// Labels by the simple return over the lookback window.
pub struct TrendRegimeClassifier<'a> {
    data: &'a dyn DataPort,
    config: RegimeConfig,
}

impl<'a> TrendRegimeClassifier<'a> {
    pub fn new(data: &'a dyn DataPort, config: RegimeConfig) -> Self {
        Self { data, config }
    }
}

impl RegimeClassifier for TrendRegimeClassifier<'_> {
    fn classify(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<Regime>, EventcastError> {
        let as_of = temporal::guard(as_of)?;
        let start = as_of - Duration::days(i64::from(self.config.lookback_days));
        let mut prices = self.data.fetch_prices(symbol, start, as_of)?;
        for p in &prices {
            temporal::ensure_before(p.at, as_of, "regime price")?;
        }
        prices.sort_by_key(|p| p.at);

        let (Some(first), Some(last)) = (prices.first(), prices.last()) else {
            return Ok(None);
        };
        if prices.len() < 2 || first.price <= 0.0 {
            return Ok(None);
        }
        let change = last.price / first.price - 1.0;
        let threshold = self.config.trend_threshold;
        Ok(Some(if change > threshold {
            Regime::Uptrend
        } else if change < -threshold {
            Regime::Downtrend
        } else {
            Regime::Chop
        }))
    }
}
