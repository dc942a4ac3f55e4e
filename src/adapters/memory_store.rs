//! In-memory data source and sinks.
//!
//! Holds immutable historical inputs loaded up front (from CSV or tests) and
//! keeps snapshot/backtest sinks behind mutexes with insert-or-ignore
//! semantics.

use crate::domain::backtest::{BacktestRecord, RecordKey};
use crate::domain::error::EventcastError;
use crate::domain::event::Event;
use crate::domain::outcome::{GameResult, Outcome};
use crate::domain::price::PricePoint;
use crate::domain::snapshot::{ForecastSnapshot, SnapshotKey};
use crate::ports::data_port::DataPort;
use crate::ports::store_port::{BacktestStore, SnapshotStore};
use chrono::{DateTime, Utc};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct MemoryStore {
    prices: Vec<PricePoint>,
    outcomes: Vec<Outcome>,
    events: Vec<Event>,
    games: Vec<GameResult>,
    snapshots: Mutex<BTreeMap<SnapshotKey, ForecastSnapshot>>,
    records: Mutex<BTreeMap<RecordKey, BacktestRecord>>,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, EventcastError> {
    m.lock().map_err(|_| EventcastError::Database {
        reason: "memory store lock poisoned".to_string(),
    })
}

fn in_range(t: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    start <= t && t < end
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prices(mut self, mut prices: Vec<PricePoint>) -> Self {
        prices.sort_by(|a, b| a.symbol.cmp(&b.symbol).then_with(|| a.at.cmp(&b.at)));
        self.prices = prices;
        self
    }

    pub fn with_outcomes(mut self, mut outcomes: Vec<Outcome>) -> Self {
        outcomes.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then_with(|| a.horizon_minutes.cmp(&b.horizon_minutes))
                .then_with(|| a.as_of.cmp(&b.as_of))
        });
        self.outcomes = outcomes;
        self
    }

    pub fn with_events(mut self, mut events: Vec<Event>) -> Self {
        events.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.id.cmp(&b.id)));
        self.events = events;
        self
    }

    pub fn with_games(mut self, mut games: Vec<GameResult>) -> Self {
        games.sort_by(|a, b| {
            a.team_symbol
                .cmp(&b.team_symbol)
                .then_with(|| a.played_at.cmp(&b.played_at))
        });
        self.games = games;
        self
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl DataPort for MemoryStore {
    fn fetch_prices(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, EventcastError> {
        Ok(self
            .prices
            .iter()
            .filter(|p| p.symbol == symbol && in_range(p.at, start, end))
            .cloned()
            .collect())
    }

    fn fetch_outcomes(
        &self,
        symbol: &str,
        horizon_minutes: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Outcome>, EventcastError> {
        Ok(self
            .outcomes
            .iter()
            .filter(|o| {
                o.symbol == symbol
                    && o.horizon_minutes == horizon_minutes
                    && in_range(o.as_of, start, end)
            })
            .cloned()
            .collect())
    }

    fn fetch_game_results(
        &self,
        team_symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GameResult>, EventcastError> {
        Ok(self
            .games
            .iter()
            .filter(|g| g.team_symbol == team_symbol && in_range(g.played_at, start, end))
            .cloned()
            .collect())
    }

    fn fetch_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventcastError> {
        Ok(self
            .events
            .iter()
            .filter(|e| in_range(e.at, start, end))
            .cloned()
            .collect())
    }

    fn get_event(&self, id: &str) -> Result<Option<Event>, EventcastError> {
        Ok(self.events.iter().find(|e| e.id == id).cloned())
    }

    fn list_symbols(&self) -> Result<Vec<String>, EventcastError> {
        let symbols: BTreeSet<&str> = self
            .prices
            .iter()
            .map(|p| p.symbol.as_str())
            .chain(self.outcomes.iter().map(|o| o.symbol.as_str()))
            .chain(self.games.iter().map(|g| g.team_symbol.as_str()))
            .collect();
        Ok(symbols.into_iter().map(String::from).collect())
    }
}

impl SnapshotStore for MemoryStore {
    fn upsert_snapshots(&self, snapshots: &[ForecastSnapshot]) -> Result<usize, EventcastError> {
        let mut stored = lock(&self.snapshots)?;
        let mut inserted = 0;
        for s in snapshots {
            if let Entry::Vacant(slot) = stored.entry(s.key()) {
                slot.insert(s.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn snapshots_for(
        &self,
        symbol: &str,
        forecast_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ForecastSnapshot>, EventcastError> {
        let stored = lock(&self.snapshots)?;
        Ok(stored
            .values()
            .filter(|s| {
                s.symbol == symbol
                    && s.forecast_type == forecast_type
                    && in_range(s.snapshot_at, start, end)
            })
            .cloned()
            .collect())
    }
}

impl BacktestStore for MemoryStore {
    fn upsert_records(&self, records: &[BacktestRecord]) -> Result<usize, EventcastError> {
        let mut stored = lock(&self.records)?;
        let mut inserted = 0;
        for r in records {
            if let Entry::Vacant(slot) = stored.entry(r.key()) {
                slot.insert(r.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn records_for_model(&self, model_name: &str) -> Result<Vec<BacktestRecord>, EventcastError> {
        let stored = lock(&self.records)?;
        Ok(stored
            .values()
            .filter(|r| r.model_name == model_name)
            .cloned()
            .collect())
    }
}
