//! Feature extraction.
//!
//! Builds a fixed-schema numeric vector for `(symbol, as_of, horizon)` from
//! price history and event flow observed strictly before `as_of`. The same
//! code path serves live inference and historical backtests, so identical
//! inputs over an unchanged store produce bit-identical vectors.

use crate::domain::config::FeatureConfig;
use crate::domain::error::EventcastError;
use crate::domain::event::Event;
use crate::domain::price::PricePoint;
use crate::domain::temporal;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const FEATURE_SCHEMA_VERSION: u32 = 2;

pub const RETURN_WINDOWS_DAYS: [i64; 5] = [1, 3, 7, 14, 30];
pub const EVENT_WINDOWS_DAYS: [i64; 3] = [1, 3, 7];

pub const BASE_FEATURES: [&str; 14] = [
    "ret_1d",
    "ret_3d",
    "ret_7d",
    "ret_14d",
    "ret_30d",
    "volatility",
    "ret_1d_z",
    "max_drawdown",
    "events_1d",
    "events_3d",
    "events_7d",
    "source_diversity",
    "category_share",
    "hours_since_event",
];

/// Versioned, ordered list of feature names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub names: Vec<String>,
}

impl FeatureSchema {
    pub fn for_symbols(symbols: &[String]) -> Self {
        let mut names: Vec<String> = BASE_FEATURES.iter().map(|s| s.to_string()).collect();
        names.extend(symbols.iter().map(|s| format!("sym_{s}")));
        Self {
            version: FEATURE_SCHEMA_VERSION,
            names,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: u32,
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    pub horizon_minutes: u32,
    pub names: Vec<String>,
    pub values: Vec<f64>,
    /// Latest source timestamp consulted; always before `as_of`.
    pub latest_source_at: DateTime<Utc>,
    pub price_points: usize,
    pub event_count: usize,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i).copied())
    }

    /// Lookahead and finiteness checks on a constructed vector.
    pub fn check_invariants(&self) -> Result<(), EventcastError> {
        temporal::ensure_before(self.latest_source_at, self.as_of, "feature source")?;
        if self.names.len() != self.values.len() {
            return Err(EventcastError::consistency(format!(
                "feature vector has {} names but {} values",
                self.names.len(),
                self.values.len()
            )));
        }
        if let Some((name, _)) = self
            .names
            .iter()
            .zip(&self.values)
            .find(|(_, v)| !v.is_finite())
        {
            return Err(EventcastError::consistency(format!(
                "feature {name} is not finite"
            )));
        }
        Ok(())
    }
}

pub struct FeatureExtractor<'a> {
    data: &'a dyn DataPort,
    config: FeatureConfig,
    schema: FeatureSchema,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(data: &'a dyn DataPort, config: FeatureConfig) -> Self {
        let schema = FeatureSchema::for_symbols(&config.symbols);
        Self {
            data,
            config,
            schema,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Extract with the configured lookback.
    pub fn extract_default(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
    ) -> Result<FeatureVector, EventcastError> {
        self.extract(symbol, as_of, horizon_minutes, self.config.lookback_days)
    }

    pub fn extract(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        horizon_minutes: u32,
        lookback_days: u32,
    ) -> Result<FeatureVector, EventcastError> {
        let as_of = temporal::guard(as_of)?;
        let start = as_of - Duration::days(i64::from(lookback_days));

        let mut prices = self.data.fetch_prices(symbol, start, as_of)?;
        for p in &prices {
            temporal::ensure_before(p.at, as_of, &format!("price for {}", p.symbol))?;
        }
        prices.sort_by_key(|p| p.at);

        // Price features need at least one observation whatever the config says.
        let need = self.config.min_history_points.max(1);
        if prices.len() < need {
            debug!(symbol, have = prices.len(), need, "insufficient price history");
            return Err(EventcastError::InsufficientData {
                symbol: symbol.to_string(),
                have: prices.len(),
                need,
            });
        }

        let mut events = self.data.fetch_events(start, as_of)?;
        for e in &events {
            temporal::ensure_before(e.at, as_of, &format!("event {}", e.id))?;
        }
        events.retain(|e| e.qualifies_for(symbol));
        events.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.id.cmp(&b.id)));

        let mut values = Vec::with_capacity(self.schema.len());
        values.extend(price_features(&prices));
        values.extend(event_features(
            &events,
            as_of,
            self.config.event_window_days,
            lookback_days,
        ));
        values.extend(
            self.config
                .symbols
                .iter()
                .map(|s| if s == symbol { 1.0 } else { 0.0 }),
        );

        let latest_price = prices.last().map(|p| p.at);
        let latest_event = events.last().map(|e| e.at);
        let latest_source_at = match (latest_price, latest_event) {
            (Some(p), Some(e)) => p.max(e),
            (Some(p), None) => p,
            (None, Some(e)) => e,
            (None, None) => start,
        };

        let vector = FeatureVector {
            schema_version: self.schema.version,
            symbol: symbol.to_string(),
            as_of,
            horizon_minutes,
            names: self.schema.names.clone(),
            values,
            latest_source_at,
            price_points: prices.len(),
            event_count: events.len(),
        };
        vector.check_invariants()?;
        Ok(vector)
    }
}

/// Price at or before `cutoff`, else the earliest point in the window.
fn price_at_or_before(prices: &[PricePoint], cutoff: DateTime<Utc>) -> Option<f64> {
    let idx = prices.partition_point(|p| p.at <= cutoff);
    prices.get(idx.saturating_sub(1)).map(|p| p.price)
}

fn simple_return(from: f64, to: f64) -> f64 {
    if from > 0.0 { (to - from) / from } else { 0.0 }
}

/// `ret_*`, `volatility`, `ret_1d_z`, `max_drawdown`. `prices` is ascending.
///
/// Return windows are anchored at the latest observation, so `ret_1d`
/// compares it to the last price at least one day older.
fn price_features(prices: &[PricePoint]) -> Vec<f64> {
    let Some(last) = prices.last() else {
        return vec![0.0; RETURN_WINDOWS_DAYS.len() + 3];
    };
    let mut out: Vec<f64> = RETURN_WINDOWS_DAYS
        .iter()
        .map(|&days| {
            price_at_or_before(prices, last.at - Duration::days(days))
                .map_or(0.0, |reference| simple_return(reference, last.price))
        })
        .collect();

    let step_returns: Vec<f64> = prices
        .windows(2)
        .map(|w| w[1].return_from(&w[0]))
        .collect();
    let (mean, std) = mean_std(&step_returns);
    let ret_1d = out[0];
    let z = if std > 0.0 { (ret_1d - mean) / std } else { 0.0 };

    out.push(std);
    out.push(z);
    out.push(max_drawdown(prices));
    out
}

/// Population mean and standard deviation.
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn max_drawdown(prices: &[PricePoint]) -> f64 {
    let Some(first) = prices.first() else {
        return 0.0;
    };
    let mut peak = first.price;
    let mut max_dd = 0.0_f64;
    for p in prices {
        if p.price > peak {
            peak = p.price;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - p.price) / peak);
        }
    }
    max_dd
}

/// `events_*`, `source_diversity`, `category_share`, `hours_since_event`.
/// `events` are qualifying, ascending, and before `as_of`.
fn event_features(
    events: &[Event],
    as_of: DateTime<Utc>,
    window_days: u32,
    lookback_days: u32,
) -> Vec<f64> {
    let mut out: Vec<f64> = EVENT_WINDOWS_DAYS
        .iter()
        .map(|&days| {
            let cutoff = as_of - Duration::days(days);
            events.iter().filter(|e| e.at >= cutoff).count() as f64
        })
        .collect();

    let cutoff = as_of - Duration::days(i64::from(window_days));
    let window: Vec<&Event> = events.iter().filter(|e| e.at >= cutoff).collect();

    let sources: BTreeSet<&str> = window.iter().map(|e| e.source.as_str()).collect();
    out.push(sources.len() as f64);

    let mut category_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for e in &window {
        let distinct: BTreeSet<&str> = e.categories.iter().map(String::as_str).collect();
        for c in distinct {
            *category_counts.entry(c).or_insert(0) += 1;
        }
    }
    let top = category_counts.values().copied().max().unwrap_or(0);
    out.push(if window.is_empty() {
        0.0
    } else {
        top as f64 / window.len() as f64
    });

    let cap_hours = f64::from(lookback_days) * 24.0;
    let hours = events
        .last()
        .map(|e| (as_of - e.at).num_seconds() as f64 / 3600.0)
        .unwrap_or(cap_hours)
        .min(cap_hours);
    out.push(hours);
    out
}
