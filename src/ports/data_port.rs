//! Historical data access port (events, prices, outcomes).
//!
//! All range queries are half-open: `start <= t < end`. The engine treats
//! these sources as read-only.

use crate::domain::error::EventcastError;
use crate::domain::event::Event;
use crate::domain::outcome::{GameResult, Outcome};
use crate::domain::price::PricePoint;
use chrono::{DateTime, Utc};

pub trait DataPort: Send + Sync {
    /// Prices for `symbol` observed in `[start, end)`, ascending by time.
    fn fetch_prices(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, EventcastError>;

    /// Outcomes for `symbol`/`horizon_minutes` realized in `[start, end)`,
    /// ascending by realization time.
    fn fetch_outcomes(
        &self,
        symbol: &str,
        horizon_minutes: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Outcome>, EventcastError>;

    /// Game results for `team_symbol` played in `[start, end)`.
    fn fetch_game_results(
        &self,
        team_symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GameResult>, EventcastError>;

    /// Events timestamped in `[start, end)`, ascending by time.
    fn fetch_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, EventcastError>;

    fn get_event(&self, id: &str) -> Result<Option<Event>, EventcastError>;

    fn list_symbols(&self) -> Result<Vec<String>, EventcastError>;
}
