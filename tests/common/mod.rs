#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use eventcast::adapters::memory_store::MemoryStore;
use eventcast::domain::calibration::ConfidenceCalibrator;
use eventcast::domain::config::{BaselineConfig, CalibrationConfig};
use eventcast::domain::event::Event;
use eventcast::domain::features::{FeatureSchema, FEATURE_SCHEMA_VERSION};
use eventcast::domain::forecaster::classifier::{ModelArtifact, ModelMetadata};
use eventcast::domain::forecaster::naive::NaiveBaseline;
use eventcast::domain::outcome::{GameResult, GameResultKind, Outcome, ReturnOutcomes};
use eventcast::domain::price::PricePoint;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DAY: u32 = 1440;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub fn day(d: i64) -> DateTime<Utc> {
    t0() + Duration::days(d)
}

pub fn outcome(symbol: &str, realized_at: DateTime<Utc>, r: f64) -> Outcome {
    Outcome {
        symbol: symbol.to_string(),
        as_of: realized_at,
        horizon_minutes: DAY,
        realized_return: r,
    }
}

/// Daily outcomes realized at midnight of days `1..=days`.
pub fn daily_outcomes(symbol: &str, days: i64, r: impl Fn(i64) -> f64) -> Vec<Outcome> {
    (1..=days).map(|d| outcome(symbol, day(d), r(d))).collect()
}

/// Noon prices for days `0..days`, rising by one per day from 100.
pub fn daily_prices(symbol: &str, days: i64) -> Vec<PricePoint> {
    (0..days)
        .map(|d| PricePoint {
            symbol: symbol.to_string(),
            at: day(d) + Duration::hours(12),
            price: 100.0 + d as f64,
        })
        .collect()
}

pub fn event(id: &str, at: DateTime<Utc>, embedding: Vec<f32>) -> Event {
    Event {
        id: id.to_string(),
        at,
        embedding,
        text: format!("headline {id}"),
        domain: "macro".to_string(),
        categories: vec!["rates".to_string()],
        symbols: vec![],
        source: "wire".to_string(),
    }
}

/// `n` historical macro events at noon of days `0..n`.
pub fn historical_events(n: i64) -> Vec<Event> {
    (0..n)
        .map(|i| {
            event(
                &format!("e{i:02}"),
                day(i) + Duration::hours(12),
                vec![1.0, 0.01 * i as f32],
            )
        })
        .collect()
}

pub fn trigger(as_of: DateTime<Utc>) -> Event {
    event("trigger", as_of - Duration::hours(1), vec![1.0, 0.0])
}

pub fn game(id: &str, team: &str, at: DateTime<Utc>, result: GameResultKind) -> GameResult {
    GameResult {
        game_id: id.to_string(),
        team_symbol: team.to_string(),
        played_at: at,
        result,
    }
}

pub fn calibrator() -> ConfidenceCalibrator {
    ConfidenceCalibrator::new(CalibrationConfig::default())
}

pub fn baseline(store: &MemoryStore) -> NaiveBaseline<'_, ReturnOutcomes> {
    NaiveBaseline::new(
        store,
        ReturnOutcomes::default(),
        BaselineConfig::default(),
        calibrator(),
    )
}

/// A loadable artifact with zero weights, so every prediction is 0.5.
pub fn flat_artifact(
    schema: &FeatureSchema,
    trained_to: DateTime<Utc>,
    horizons: Vec<u32>,
) -> ModelArtifact {
    let n = schema.len();
    ModelArtifact {
        metadata: ModelMetadata {
            model_name: "logit".to_string(),
            model_version: "test".to_string(),
            schema_version: FEATURE_SCHEMA_VERSION,
            trained_from: t0(),
            trained_to,
            feature_names: schema.names.clone(),
            horizons,
            training_samples: 100,
            metrics: BTreeMap::new(),
        },
        weights: vec![0.0; n],
        bias: 0.0,
        feature_means: vec![0.0; n],
        feature_scales: vec![1.0; n],
    }
}

/// Writes prices, outcomes and events CSV files for symbol X over 40 days.
pub fn write_data_dir(dir: &Path) {
    let mut prices = String::from("symbol,timestamp,price\n");
    for p in daily_prices("X", 40) {
        prices.push_str(&format!("X,{},{}\n", p.at.to_rfc3339(), p.price));
    }
    fs::write(dir.join("prices.csv"), prices).unwrap();

    let mut outcomes = String::from("symbol,as_of,horizon_minutes,realized_return\n");
    for o in daily_outcomes("X", 40, |d| if d % 4 == 0 { -0.01 } else { 0.01 }) {
        outcomes.push_str(&format!(
            "X,{},{},{}\n",
            o.as_of.to_rfc3339(),
            o.horizon_minutes,
            o.realized_return
        ));
    }
    fs::write(dir.join("outcomes.csv"), outcomes).unwrap();

    let mut events = String::from("id,timestamp,source,domain,categories,symbols,embedding,text\n");
    for e in historical_events(30) {
        events.push_str(&format!(
            "{},{},wire,macro,rates,,{} {},{}\n",
            e.id,
            e.at.to_rfc3339(),
            e.embedding[0],
            e.embedding[1],
            e.text
        ));
    }
    fs::write(dir.join("events.csv"), events).unwrap();
}
