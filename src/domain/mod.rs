//! Core domain types and logic.

pub mod backtest;
pub mod calibration;
pub mod config;
pub mod config_validation;
pub mod error;
pub mod event;
pub mod features;
pub mod forecast;
pub mod forecaster;
pub mod metrics;
pub mod neighbors;
pub mod outcome;
pub mod price;
pub mod regime;
pub mod snapshot;
pub mod temporal;
