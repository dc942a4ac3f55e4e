//! Realized outcomes and their normalized encoding.
//!
//! Forecasters never see raw domain values. An [`OutcomeAdapter`] translates
//! price returns or game results into a [`NormalizedOutcome`] so the k-NN and
//! baseline logic stay domain-agnostic.

use crate::domain::error::EventcastError;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "flat" => Some(Direction::Flat),
            _ => None,
        }
    }

    /// Direction of `value` relative to `neutral`, with a dead band of `band`.
    pub fn classify(value: f64, neutral: f64, band: f64) -> Self {
        if value > neutral + band {
            Direction::Up
        } else if value < neutral - band {
            Direction::Down
        } else {
            Direction::Flat
        }
    }
}

/// Realized return. `as_of` is the realization time: the end of the
/// `horizon_minutes` window the return was measured over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub symbol: String,
    pub as_of: DateTime<Utc>,
    pub horizon_minutes: u32,
    pub realized_return: f64,
}

impl Outcome {
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.as_of - Duration::minutes(i64::from(self.horizon_minutes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResultKind {
    Win,
    Loss,
    Tie,
}

impl GameResultKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "win" | "w" => Some(GameResultKind::Win),
            "loss" | "l" => Some(GameResultKind::Loss),
            "tie" | "t" | "draw" => Some(GameResultKind::Tie),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    pub game_id: String,
    pub team_symbol: String,
    pub played_at: DateTime<Utc>,
    pub result: GameResultKind,
}

/// Domain-independent outcome: a scalar value and its direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedOutcome {
    pub value: f64,
    pub direction: Direction,
}

/// Translates one domain's raw outcomes into [`NormalizedOutcome`]s.
pub trait OutcomeAdapter: Send + Sync {
    type Raw: Clone + Send + Sync;

    /// Raw outcomes realized in `[start, end)`, ascending by realization time.
    fn fetch(
        &self,
        data: &dyn DataPort,
        symbol: &str,
        horizon_minutes: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Self::Raw>, EventcastError>;

    /// When the outcome became known.
    fn realized_at(&self, raw: &Self::Raw) -> DateTime<Utc>;

    /// When the measured window began.
    fn opened_at(&self, raw: &Self::Raw) -> DateTime<Utc>;

    fn normalize(&self, raw: &Self::Raw) -> NormalizedOutcome;

    /// Value that separates up from down for aggregated expectations.
    fn neutral(&self) -> f64;

    /// Half-width of the flat band around [`neutral`](Self::neutral).
    fn flat_band(&self) -> f64;

    fn direction_of(&self, expected: f64) -> Direction {
        Direction::classify(expected, self.neutral(), self.flat_band())
    }
}

/// The outcome of a decision taken at `as_of` over `horizon_minutes`: the
/// earliest raw outcome whose window opens at or after `as_of` and that is
/// realized no later than `as_of + horizon`.
///
/// For returns this is exactly the outcome realized at `as_of + horizon`.
pub fn resolve_outcome<A: OutcomeAdapter>(
    adapter: &A,
    data: &dyn DataPort,
    symbol: &str,
    as_of: DateTime<Utc>,
    horizon_minutes: u32,
) -> Result<Option<A::Raw>, EventcastError> {
    let target = as_of + Duration::minutes(i64::from(horizon_minutes));
    let candidates = adapter.fetch(
        data,
        symbol,
        horizon_minutes,
        as_of,
        target + Duration::seconds(1),
    )?;
    Ok(candidates
        .into_iter()
        .filter(|raw| adapter.opened_at(raw) >= as_of && adapter.realized_at(raw) <= target)
        .min_by_key(|raw| (adapter.realized_at(raw), adapter.opened_at(raw))))
}

/// Continuous price returns: value is the return itself, neutral at 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReturnOutcomes {
    pub flat_band: f64,
}

impl OutcomeAdapter for ReturnOutcomes {
    type Raw = Outcome;

    fn fetch(
        &self,
        data: &dyn DataPort,
        symbol: &str,
        horizon_minutes: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Outcome>, EventcastError> {
        data.fetch_outcomes(symbol, horizon_minutes, start, end)
    }

    fn realized_at(&self, raw: &Outcome) -> DateTime<Utc> {
        raw.as_of
    }

    fn opened_at(&self, raw: &Outcome) -> DateTime<Utc> {
        raw.opened_at()
    }

    fn normalize(&self, raw: &Outcome) -> NormalizedOutcome {
        NormalizedOutcome {
            value: raw.realized_return,
            direction: Direction::classify(raw.realized_return, 0.0, self.flat_band),
        }
    }

    fn neutral(&self) -> f64 {
        0.0
    }

    fn flat_band(&self) -> f64 {
        self.flat_band
    }
}

/// Game results: win = 1.0, tie = 0.5, loss = 0.0, neutral at 0.5.
///
/// Aggregated values are therefore win rates, never signed scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct GameOutcomes;

impl GameOutcomes {
    pub const WIN: f64 = 1.0;
    pub const TIE: f64 = 0.5;
    pub const LOSS: f64 = 0.0;
}

impl OutcomeAdapter for GameOutcomes {
    type Raw = GameResult;

    fn fetch(
        &self,
        data: &dyn DataPort,
        symbol: &str,
        _horizon_minutes: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GameResult>, EventcastError> {
        data.fetch_game_results(symbol, start, end)
    }

    fn realized_at(&self, raw: &GameResult) -> DateTime<Utc> {
        raw.played_at
    }

    fn opened_at(&self, raw: &GameResult) -> DateTime<Utc> {
        raw.played_at
    }

    fn normalize(&self, raw: &GameResult) -> NormalizedOutcome {
        match raw.result {
            GameResultKind::Win => NormalizedOutcome {
                value: Self::WIN,
                direction: Direction::Up,
            },
            GameResultKind::Tie => NormalizedOutcome {
                value: Self::TIE,
                direction: Direction::Flat,
            },
            GameResultKind::Loss => NormalizedOutcome {
                value: Self::LOSS,
                direction: Direction::Down,
            },
        }
    }

    fn neutral(&self) -> f64 {
        Self::TIE
    }

    fn flat_band(&self) -> f64 {
        0.0
    }
}
