//! CSV data directory loader.
//!
//! Reads `prices.csv`, `outcomes.csv`, `events.csv` and the optional
//! `games.csv` from one directory into a [`MemoryStore`]. Timestamps must be
//! RFC 3339 with an explicit offset.

use crate::adapters::memory_store::MemoryStore;
use crate::domain::error::EventcastError;
use crate::domain::event::Event;
use crate::domain::outcome::{GameResult, GameResultKind, Outcome};
use crate::domain::price::PricePoint;
use crate::domain::temporal;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct CsvAdapter {
    base_path: PathBuf,
}

#[derive(Deserialize)]
struct PriceRow {
    symbol: String,
    timestamp: String,
    price: f64,
}

#[derive(Deserialize)]
struct OutcomeRow {
    symbol: String,
    as_of: String,
    horizon_minutes: u32,
    realized_return: f64,
}

#[derive(Deserialize)]
struct EventRow {
    id: String,
    timestamp: String,
    source: String,
    domain: String,
    categories: String,
    symbols: String,
    embedding: String,
    text: String,
}

#[derive(Deserialize)]
struct GameRow {
    game_id: String,
    team_symbol: String,
    played_at: String,
    result: String,
}

fn format_err(file: &str, reason: impl Into<String>) -> EventcastError {
    EventcastError::DataFormat {
        source_name: file.to_string(),
        reason: reason.into(),
    }
}

fn timestamp(file: &str, line: usize, raw: &str) -> Result<DateTime<Utc>, EventcastError> {
    temporal::parse_timestamp(raw).map_err(|e| format_err(file, format!("line {line}: {e}")))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_embedding(file: &str, line: usize, raw: &str) -> Result<Vec<f32>, EventcastError> {
    raw.split_whitespace()
        .map(|c| {
            c.parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| format_err(file, format!("line {line}: invalid embedding component {c:?}")))
        })
        .collect()
}

/// Deserialize every row of `path`, numbering lines from 2 (after the header).
fn read_rows<T: for<'de> Deserialize<'de>>(
    path: &Path,
    file: &str,
) -> Result<Vec<(usize, T)>, EventcastError> {
    let content = fs::read_to_string(path).map_err(|e| EventcastError::DataFormat {
        source_name: file.to_string(),
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize().enumerate() {
        let row: T = result.map_err(|e| format_err(file, format!("CSV parse error: {e}")))?;
        rows.push((i + 2, row));
    }
    Ok(rows)
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn load_prices(&self) -> Result<Vec<PricePoint>, EventcastError> {
        let file = "prices.csv";
        read_rows::<PriceRow>(&self.base_path.join(file), file)?
            .into_iter()
            .map(|(line, row)| {
                if !row.price.is_finite() || row.price <= 0.0 {
                    return Err(format_err(file, format!("line {line}: price must be positive")));
                }
                Ok(PricePoint {
                    symbol: row.symbol.to_uppercase(),
                    at: timestamp(file, line, &row.timestamp)?,
                    price: row.price,
                })
            })
            .collect()
    }

    pub fn load_outcomes(&self) -> Result<Vec<Outcome>, EventcastError> {
        let file = "outcomes.csv";
        read_rows::<OutcomeRow>(&self.base_path.join(file), file)?
            .into_iter()
            .map(|(line, row)| {
                if row.horizon_minutes == 0 || !row.realized_return.is_finite() {
                    return Err(format_err(
                        file,
                        format!("line {line}: horizon must be positive and return finite"),
                    ));
                }
                Ok(Outcome {
                    symbol: row.symbol.to_uppercase(),
                    as_of: timestamp(file, line, &row.as_of)?,
                    horizon_minutes: row.horizon_minutes,
                    realized_return: row.realized_return,
                })
            })
            .collect()
    }

    pub fn load_events(&self) -> Result<Vec<Event>, EventcastError> {
        let file = "events.csv";
        read_rows::<EventRow>(&self.base_path.join(file), file)?
            .into_iter()
            .map(|(line, row)| {
                Ok(Event {
                    id: row.id,
                    at: timestamp(file, line, &row.timestamp)?,
                    embedding: parse_embedding(file, line, &row.embedding)?,
                    text: row.text,
                    domain: row.domain,
                    categories: split_list(&row.categories),
                    symbols: split_list(&row.symbols)
                        .into_iter()
                        .map(|s| s.to_uppercase())
                        .collect(),
                    source: row.source,
                })
            })
            .collect()
    }

    /// Game results; an absent `games.csv` yields no games.
    pub fn load_games(&self) -> Result<Vec<GameResult>, EventcastError> {
        let file = "games.csv";
        let path = self.base_path.join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_rows::<GameRow>(&path, file)?
            .into_iter()
            .map(|(line, row)| {
                let result = GameResultKind::parse(&row.result).ok_or_else(|| {
                    format_err(file, format!("line {line}: unknown result {:?}", row.result))
                })?;
                Ok(GameResult {
                    game_id: row.game_id,
                    team_symbol: row.team_symbol.to_uppercase(),
                    played_at: timestamp(file, line, &row.played_at)?,
                    result,
                })
            })
            .collect()
    }

    /// Load the whole directory into an in-memory store.
    pub fn load(&self) -> Result<MemoryStore, EventcastError> {
        let prices = self.load_prices()?;
        let outcomes = self.load_outcomes()?;
        let events = self.load_events()?;
        let games = self.load_games()?;
        info!(
            dir = %self.base_path.display(),
            prices = prices.len(),
            outcomes = outcomes.len(),
            events = events.len(),
            games = games.len(),
            "data directory loaded"
        );
        Ok(MemoryStore::new()
            .with_prices(prices)
            .with_outcomes(outcomes)
            .with_events(events)
            .with_games(games))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::data_port::DataPort;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        fs::write(
            path.join("prices.csv"),
            "symbol,timestamp,price\n\
             aapl,2025-01-02T00:00:00Z,100.0\n\
             AAPL,2025-01-03T00:00:00Z,101.5\n\
             MSFT,2025-01-02T00:00:00+01:00,300.0\n",
        )
        .unwrap();
        fs::write(
            path.join("outcomes.csv"),
            "symbol,as_of,horizon_minutes,realized_return\n\
             AAPL,2025-01-03T00:00:00Z,1440,0.015\n",
        )
        .unwrap();
        fs::write(
            path.join("events.csv"),
            "id,timestamp,source,domain,categories,symbols,embedding,text\n\
             e1,2025-01-02T12:00:00Z,wire,macro,rates;central-bank,,0.1 0.2 0.3,\"Fed holds, again\"\n\
             e2,2025-01-02T13:00:00Z,blog,equities,earnings,aapl;MSFT,1 0 0,Beat\n",
        )
        .unwrap();

        (dir, path)
    }

    #[test]
    fn loads_prices_outcomes_and_events() {
        let (_dir, path) = setup_test_data();
        let store = CsvAdapter::new(path).load().unwrap();

        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let prices = store.fetch_prices("AAPL", t0, t1).unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[1].price, 101.5);

        // +01:00 offset normalized to UTC
        let msft = store.fetch_prices("MSFT", t0, t1).unwrap();
        assert_eq!(msft[0].at, Utc.with_ymd_and_hms(2025, 1, 1, 23, 0, 0).unwrap());

        assert_eq!(store.fetch_outcomes("AAPL", 1440, t0, t1).unwrap().len(), 1);

        let events = store.fetch_events(t0, t1).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].categories, vec!["rates", "central-bank"]);
        assert!(events[0].symbols.is_empty());
        assert_eq!(events[0].text, "Fed holds, again");
        assert_eq!(events[1].symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(events[1].embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(store.list_symbols().unwrap(), vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn games_file_is_optional() {
        let (_dir, path) = setup_test_data();
        assert!(CsvAdapter::new(path.clone()).load_games().unwrap().is_empty());

        fs::write(
            path.join("games.csv"),
            "game_id,team_symbol,played_at,result\n\
             g1,bos,2025-01-02T01:00:00Z,W\n\
             g2,BOS,2025-01-04T01:00:00Z,tie\n",
        )
        .unwrap();
        let games = CsvAdapter::new(path).load_games().unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].team_symbol, "BOS");
        assert_eq!(games[1].result, GameResultKind::Tie);
    }

    #[test]
    fn naive_timestamp_is_rejected() {
        let (_dir, path) = setup_test_data();
        fs::write(
            path.join("prices.csv"),
            "symbol,timestamp,price\nAAPL,2025-01-02 00:00:00,100.0\n",
        )
        .unwrap();
        let err = CsvAdapter::new(path).load_prices().unwrap_err();
        match err {
            EventcastError::DataFormat { source_name, reason } => {
                assert_eq!(source_name, "prices.csv");
                assert!(reason.contains("line 2"), "{reason}");
            }
            other => panic!("expected DataFormat, got {other}"),
        }
    }

    #[test]
    fn bad_embedding_component_is_rejected() {
        let (_dir, path) = setup_test_data();
        fs::write(
            path.join("events.csv"),
            "id,timestamp,source,domain,categories,symbols,embedding,text\n\
             e1,2025-01-02T12:00:00Z,wire,macro,,,0.1 abc,x\n",
        )
        .unwrap();
        assert!(matches!(
            CsvAdapter::new(path).load_events(),
            Err(EventcastError::DataFormat { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(CsvAdapter::new(dir.path().to_path_buf()).load().is_err());
    }
}
