//! Configuration validation.
//!
//! Validates raw config values before any component is constructed.

use crate::domain::error::EventcastError;
use crate::domain::temporal;
use crate::ports::config_port::ConfigPort;

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    validate_lookbacks(config)?;
    validate_minimums(config)?;
    validate_neighbors(config)?;
    validate_calibration(config)?;
    validate_regime(config)?;
    validate_batch_size(config)?;
    Ok(())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    validate_engine_config(config)?;
    validate_dates(config)?;
    validate_horizons(config)?;
    validate_symbols(config)?;
    validate_step(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: &str) -> EventcastError {
    EventcastError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn validate_lookbacks(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    for (section, key) in [
        ("engine", "lookback_days"),
        ("engine", "event_window_days"),
        ("baseline", "lookback_days"),
        ("regime", "lookback_days"),
    ] {
        let value = config.get_int(section, key, 1);
        if value <= 0 {
            return Err(invalid(section, key, &format!("{key} must be positive")));
        }
        if value > 3650 {
            return Err(invalid(section, key, &format!("{key} must be at most 3650")));
        }
    }
    Ok(())
}

fn validate_minimums(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    if config.get_int("engine", "min_history_points", 2) < 2 {
        return Err(invalid(
            "engine",
            "min_history_points",
            "min_history_points must be at least 2",
        ));
    }
    if config.get_int("baseline", "min_samples", 1) < 1 {
        return Err(invalid(
            "baseline",
            "min_samples",
            "min_samples must be at least 1",
        ));
    }
    if config.get_double("baseline", "flat_threshold", 0.0) < 0.0 {
        return Err(invalid(
            "baseline",
            "flat_threshold",
            "flat_threshold must be non-negative",
        ));
    }
    Ok(())
}

fn validate_neighbors(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    let k = config.get_int("neighbors", "k", 1);
    if k < 1 {
        return Err(invalid("neighbors", "k", "k must be at least 1"));
    }
    let min = config.get_int("neighbors", "min_neighbors", 1);
    if min < 1 {
        return Err(invalid(
            "neighbors",
            "min_neighbors",
            "min_neighbors must be at least 1",
        ));
    }
    if min > k {
        return Err(invalid(
            "neighbors",
            "min_neighbors",
            "min_neighbors must not exceed k",
        ));
    }
    if config.get_double("neighbors", "epsilon", 1e-6) <= 0.0 {
        return Err(invalid("neighbors", "epsilon", "epsilon must be positive"));
    }
    if config.get_double("neighbors", "scale", 0.25) <= 0.0 {
        return Err(invalid("neighbors", "scale", "scale must be positive"));
    }
    if config.get_int("neighbors", "timeout_ms", 1) <= 0 {
        return Err(invalid(
            "neighbors",
            "timeout_ms",
            "timeout_ms must be positive",
        ));
    }
    Ok(())
}

fn validate_calibration(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    if config.get_double("calibration", "sample_half_point", 1.0) <= 0.0 {
        return Err(invalid(
            "calibration",
            "sample_half_point",
            "sample_half_point must be positive",
        ));
    }
    if config.get_double("calibration", "dispersion_scale", 1.0) <= 0.0 {
        return Err(invalid(
            "calibration",
            "dispersion_scale",
            "dispersion_scale must be positive",
        ));
    }
    let buckets = config.get_int("calibration", "buckets", 10);
    if !(1..=100).contains(&buckets) {
        return Err(invalid(
            "calibration",
            "buckets",
            "buckets must be between 1 and 100",
        ));
    }
    let margin = config.get_double("classifier", "decision_margin", 0.0);
    if !(0.0..0.5).contains(&margin) {
        return Err(invalid(
            "classifier",
            "decision_margin",
            "decision_margin must be in [0, 0.5)",
        ));
    }
    Ok(())
}

fn validate_regime(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    if config.get_double("regime", "trend_threshold", 0.05) <= 0.0 {
        return Err(invalid(
            "regime",
            "trend_threshold",
            "trend_threshold must be positive",
        ));
    }
    Ok(())
}

fn validate_batch_size(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    if config.get_int("backtest", "batch_size", 1) < 1 {
        return Err(invalid(
            "backtest",
            "batch_size",
            "batch_size must be at least 1",
        ));
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    let mut parsed = Vec::with_capacity(2);
    for key in ["start", "end"] {
        let raw = config
            .get_string("backtest", key)
            .ok_or_else(|| EventcastError::ConfigMissing {
                section: "backtest".into(),
                key: key.into(),
            })?;
        let ts = temporal::parse_timestamp(&raw).map_err(|e| {
            invalid(
                "backtest",
                key,
                &format!("{e} (expected RFC 3339 with offset, e.g. 2025-01-10T00:00:00Z)"),
            )
        })?;
        parsed.push(ts);
    }
    if parsed[0] >= parsed[1] {
        return Err(invalid("backtest", "end", "end must be after start"));
    }
    Ok(())
}

fn validate_horizons(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    let horizons = config.get_list("backtest", "horizons");
    if horizons.is_empty() {
        return Err(EventcastError::ConfigMissing {
            section: "backtest".into(),
            key: "horizons".into(),
        });
    }
    for h in &horizons {
        match h.parse::<u32>() {
            Ok(v) if v > 0 => {}
            _ => {
                return Err(invalid(
                    "backtest",
                    "horizons",
                    &format!("horizon {h:?} must be a positive number of minutes"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_symbols(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    let explicit = config.get_list("backtest", "symbols");
    let universe = config.get_list("engine", "symbols");
    if explicit.is_empty() && universe.is_empty() {
        return Err(EventcastError::ConfigMissing {
            section: "backtest".into(),
            key: "symbols".into(),
        });
    }
    Ok(())
}

fn validate_step(config: &dyn ConfigPort) -> Result<(), EventcastError> {
    if config.get_int("backtest", "step_days", 1) < 1 {
        return Err(invalid(
            "backtest",
            "step_days",
            "step_days must be at least 1",
        ));
    }
    Ok(())
}
