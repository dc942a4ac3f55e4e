//! eventcast: event-conditioned forecasting and backtesting.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], and a thin driver in [`cli`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
