//! SQLite sink for forecast snapshots and backtest records.
//!
//! Unique constraints carry the idempotency keys; every insert is
//! `INSERT OR IGNORE`, so retries and re-runs never duplicate or overwrite.

use crate::domain::backtest::BacktestRecord;
use crate::domain::error::EventcastError;
use crate::domain::forecast::{Direction, ForecastMethod};
use crate::domain::regime::Regime;
use crate::domain::snapshot::ForecastSnapshot;
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{BacktestStore, SnapshotStore};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};
use tracing::debug;

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> EventcastError {
    EventcastError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> EventcastError {
    EventcastError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// Fixed-width UTC text so lexical order matches time order.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err(idx: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        reason.into(),
    )
}

fn read_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e.to_string()))
}

fn read_direction(row: &Row<'_>, idx: usize) -> rusqlite::Result<Direction> {
    let raw: String = row.get(idx)?;
    Direction::parse(&raw).ok_or_else(|| conversion_err(idx, format!("unknown direction {raw}")))
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, EventcastError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| EventcastError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;
        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, EventcastError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(pool_err)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, EventcastError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), EventcastError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS forecast_snapshots (
                    symbol TEXT NOT NULL,
                    forecast_type TEXT NOT NULL,
                    model_source TEXT NOT NULL,
                    model_version TEXT NOT NULL,
                    snapshot_at TEXT NOT NULL,
                    horizon_minutes INTEGER NOT NULL,
                    forecast_value REAL NOT NULL,
                    confidence REAL NOT NULL,
                    direction TEXT NOT NULL,
                    sample_size INTEGER NOT NULL,
                    fallback INTEGER NOT NULL,
                    event_id TEXT,
                    target_date TEXT,
                    UNIQUE (symbol, forecast_type, model_source, snapshot_at)
                );
                CREATE INDEX IF NOT EXISTS idx_snapshots_symbol_type
                    ON forecast_snapshots(symbol, forecast_type, snapshot_at);
                CREATE TABLE IF NOT EXISTS backtest_records (
                    model_name TEXT NOT NULL,
                    symbol TEXT NOT NULL,
                    as_of TEXT NOT NULL,
                    horizon_minutes INTEGER NOT NULL,
                    method TEXT NOT NULL,
                    fallback INTEGER NOT NULL,
                    predicted_direction TEXT NOT NULL,
                    expected_value REAL NOT NULL,
                    confidence REAL NOT NULL,
                    p_up REAL NOT NULL,
                    p_down REAL NOT NULL,
                    sample_size INTEGER NOT NULL,
                    realized_at TEXT NOT NULL,
                    realized_value REAL NOT NULL,
                    realized_direction TEXT NOT NULL,
                    correct INTEGER NOT NULL,
                    regime TEXT,
                    UNIQUE (model_name, symbol, as_of, horizon_minutes)
                );",
            )
            .map_err(query_err)
    }
}

impl SnapshotStore for SqliteStore {
    fn upsert_snapshots(&self, snapshots: &[ForecastSnapshot]) -> Result<usize, EventcastError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO forecast_snapshots
                     (symbol, forecast_type, model_source, model_version, snapshot_at,
                      horizon_minutes, forecast_value, confidence, direction, sample_size,
                      fallback, event_id, target_date)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                )
                .map_err(query_err)?;
            for s in snapshots {
                inserted += stmt
                    .execute(params![
                        s.symbol,
                        s.forecast_type,
                        s.model_source,
                        s.model_version,
                        ts(s.snapshot_at),
                        s.horizon_minutes,
                        s.forecast_value,
                        s.confidence,
                        s.direction.as_str(),
                        s.sample_size as i64,
                        s.fallback,
                        s.event_id,
                        s.target_date.map(ts),
                    ])
                    .map_err(query_err)?;
            }
        }
        tx.commit().map_err(query_err)?;
        debug!(batch = snapshots.len(), inserted, "snapshots upserted");
        Ok(inserted)
    }

    fn snapshots_for(
        &self,
        symbol: &str,
        forecast_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ForecastSnapshot>, EventcastError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT symbol, forecast_type, model_source, model_version, snapshot_at,
                        horizon_minutes, forecast_value, confidence, direction, sample_size,
                        fallback, event_id, target_date
                 FROM forecast_snapshots
                 WHERE symbol = ?1 AND forecast_type = ?2 AND snapshot_at >= ?3 AND snapshot_at < ?4
                 ORDER BY snapshot_at ASC, model_source ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![symbol, forecast_type, ts(start), ts(end)], |row| {
                let target_date = match row.get::<_, Option<String>>(12)? {
                    Some(_) => Some(read_ts(row, 12)?),
                    None => None,
                };
                Ok(ForecastSnapshot {
                    symbol: row.get(0)?,
                    forecast_type: row.get(1)?,
                    model_source: row.get(2)?,
                    model_version: row.get(3)?,
                    snapshot_at: read_ts(row, 4)?,
                    horizon_minutes: row.get(5)?,
                    forecast_value: row.get(6)?,
                    confidence: row.get(7)?,
                    direction: read_direction(row, 8)?,
                    sample_size: row.get::<_, i64>(9)? as usize,
                    fallback: row.get(10)?,
                    event_id: row.get(11)?,
                    target_date,
                })
            })
            .map_err(query_err)?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row.map_err(query_err)?);
        }
        Ok(snapshots)
    }
}

impl BacktestStore for SqliteStore {
    fn upsert_records(&self, records: &[BacktestRecord]) -> Result<usize, EventcastError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO backtest_records
                     (model_name, symbol, as_of, horizon_minutes, method, fallback,
                      predicted_direction, expected_value, confidence, p_up, p_down,
                      sample_size, realized_at, realized_value, realized_direction,
                      correct, regime)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                             ?15, ?16, ?17)",
                )
                .map_err(query_err)?;
            for r in records {
                inserted += stmt
                    .execute(params![
                        r.model_name,
                        r.symbol,
                        ts(r.as_of),
                        r.horizon_minutes,
                        r.method.as_str(),
                        r.fallback,
                        r.predicted_direction.as_str(),
                        r.expected_value,
                        r.confidence,
                        r.p_up,
                        r.p_down,
                        r.sample_size as i64,
                        ts(r.realized_at),
                        r.realized_value,
                        r.realized_direction.as_str(),
                        r.correct,
                        r.regime.map(|g| g.as_str()),
                    ])
                    .map_err(query_err)?;
            }
        }
        tx.commit().map_err(query_err)?;
        debug!(batch = records.len(), inserted, "backtest records upserted");
        Ok(inserted)
    }

    fn records_for_model(&self, model_name: &str) -> Result<Vec<BacktestRecord>, EventcastError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT model_name, symbol, as_of, horizon_minutes, method, fallback,
                        predicted_direction, expected_value, confidence, p_up, p_down,
                        sample_size, realized_at, realized_value, realized_direction,
                        correct, regime
                 FROM backtest_records
                 WHERE model_name = ?1
                 ORDER BY symbol ASC, horizon_minutes ASC, as_of ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![model_name], |row| {
                let method: String = row.get(4)?;
                let method = ForecastMethod::parse(&method)
                    .ok_or_else(|| conversion_err(4, format!("unknown method {method}")))?;
                let regime = match row.get::<_, Option<String>>(16)? {
                    Some(raw) => Some(
                        Regime::parse(&raw)
                            .ok_or_else(|| conversion_err(16, format!("unknown regime {raw}")))?,
                    ),
                    None => None,
                };
                Ok(BacktestRecord {
                    model_name: row.get(0)?,
                    symbol: row.get(1)?,
                    as_of: read_ts(row, 2)?,
                    horizon_minutes: row.get(3)?,
                    method,
                    fallback: row.get(5)?,
                    predicted_direction: read_direction(row, 6)?,
                    expected_value: row.get(7)?,
                    confidence: row.get(8)?,
                    p_up: row.get(9)?,
                    p_down: row.get(10)?,
                    sample_size: row.get::<_, i64>(11)? as usize,
                    realized_at: read_ts(row, 12)?,
                    realized_value: row.get(13)?,
                    realized_direction: read_direction(row, 14)?,
                    correct: row.get(15)?,
                    regime,
                })
            })
            .map_err(query_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(query_err)?);
        }
        Ok(records)
    }
}
