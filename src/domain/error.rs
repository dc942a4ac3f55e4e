//! Domain error types.
//!
//! Data-availability conditions (`InsufficientData`, `NoEligibleNeighbors`,
//! `ModelUnavailable`, `ModelLoad`) are recoverable through fallback chains.
//! `ConsistencyViolation` and `InvalidTimestamp` never are.

use chrono::{DateTime, Utc};

/// Top-level error type for eventcast.
#[derive(Debug, thiserror::Error)]
pub enum EventcastError {
    #[error("invalid timestamp {input:?}: {reason}")]
    InvalidTimestamp { input: String, reason: String },

    #[error("insufficient data for {symbol}: have {have} points, need {need}")]
    InsufficientData {
        symbol: String,
        have: usize,
        need: usize,
    },

    #[error("no eligible neighbors before {reference}")]
    NoEligibleNeighbors { reference: DateTime<Utc> },

    #[error("model {model} unavailable for horizon {horizon_minutes}m")]
    ModelUnavailable { model: String, horizon_minutes: u32 },

    #[error("model load error: {reason}")]
    ModelLoad { reason: String },

    #[error("consistency violation: {reason}")]
    ConsistencyViolation { reason: String },

    #[error("invalid embedding: expected {expected} components, got {actual}")]
    InvalidEmbedding { expected: usize, actual: usize },

    #[error("neighbor index timed out after {timeout_ms}ms")]
    IndexTimeout { timeout_ms: u64 },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("data format error in {source_name}: {reason}")]
    DataFormat { source_name: String, reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EventcastError {
    /// Conditions a fallback chain may absorb by trying a simpler method.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EventcastError::InsufficientData { .. }
                | EventcastError::NoEligibleNeighbors { .. }
                | EventcastError::ModelUnavailable { .. }
                | EventcastError::ModelLoad { .. }
                | EventcastError::IndexTimeout { .. }
        )
    }

    /// Correctness defects: surfaced, never recovered.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EventcastError::ConsistencyViolation { .. } | EventcastError::InvalidTimestamp { .. }
        )
    }

    pub fn consistency(reason: impl Into<String>) -> Self {
        EventcastError::ConsistencyViolation {
            reason: reason.into(),
        }
    }
}

impl From<&EventcastError> for std::process::ExitCode {
    fn from(err: &EventcastError) -> Self {
        let code: u8 = match err {
            EventcastError::Io(_) => 1,
            EventcastError::ConfigParse { .. }
            | EventcastError::ConfigMissing { .. }
            | EventcastError::ConfigInvalid { .. } => 2,
            EventcastError::Database { .. }
            | EventcastError::DatabaseQuery { .. }
            | EventcastError::DataFormat { .. } => 3,
            EventcastError::ModelUnavailable { .. } | EventcastError::ModelLoad { .. } => 4,
            EventcastError::InsufficientData { .. }
            | EventcastError::NoEligibleNeighbors { .. }
            | EventcastError::InvalidEmbedding { .. }
            | EventcastError::IndexTimeout { .. } => 5,
            EventcastError::ConsistencyViolation { .. }
            | EventcastError::InvalidTimestamp { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
