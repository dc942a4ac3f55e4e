//! INI file configuration adapter with environment overrides.
//!
//! `EVENTCAST__<SECTION>__<KEY>=value` overrides `[section] key` from the
//! file. Sections and keys are case-insensitive.

use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::collections::HashMap;
use std::path::Path;

pub const ENV_PREFIX: &str = "EVENTCAST";

#[derive(Debug)]
pub struct FileConfigAdapter {
    config: Ini,
    overrides: HashMap<(String, String), String>,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut config = Ini::new();
        config.load(path).map_err(std::io::Error::other)?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new();
        config.read(content.to_string())?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    /// Apply `EVENTCAST__SECTION__KEY` variables from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs; names without the
    /// `EVENTCAST__` prefix or without both a section and a key are ignored.
    pub fn with_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = format!("{ENV_PREFIX}__");
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some((section, key)) = rest.split_once("__") else {
                continue;
            };
            if section.is_empty() || key.is_empty() {
                continue;
            }
            self.overrides
                .insert((section.to_lowercase(), key.to_lowercase()), value);
        }
        self
    }

    fn lookup(&self, section: &str, key: &str) -> Option<String> {
        self.overrides
            .get(&(section.to_lowercase(), key.to_lowercase()))
            .cloned()
            .or_else(|| self.config.get(section, key))
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.lookup(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.lookup(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.lookup(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.lookup(section, key)
            .as_deref()
            .and_then(Self::parse_bool)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[engine]
symbols = AAPL, MSFT

[neighbors]
metric = cosine
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("engine", "symbols"),
            Some("AAPL, MSFT".to_string())
        );
        assert_eq!(
            adapter.get_list("engine", "symbols"),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );
        assert_eq!(
            adapter.get_string("neighbors", "metric"),
            Some("cosine".to_string())
        );
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[neighbors]\nk = 50\n").unwrap();
        assert_eq!(adapter.get_string("neighbors", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_and_defaults() {
        let adapter =
            FileConfigAdapter::from_string("[neighbors]\nk = 25\nmin_neighbors = abc\n").unwrap();
        assert_eq!(adapter.get_int("neighbors", "k", 0), 25);
        assert_eq!(adapter.get_int("neighbors", "min_neighbors", 10), 10);
        assert_eq!(adapter.get_int("neighbors", "missing", 42), 42);
    }

    #[test]
    fn get_double_and_defaults() {
        let adapter = FileConfigAdapter::from_string(
            "[calibration]\ndispersion_scale = 0.03\nsample_half_point = x\n",
        )
        .unwrap();
        assert_eq!(adapter.get_double("calibration", "dispersion_scale", 0.0), 0.03);
        assert_eq!(adapter.get_double("calibration", "sample_half_point", 10.0), 10.0);
    }

    #[test]
    fn get_bool_values() {
        let adapter =
            FileConfigAdapter::from_string("[output]\na = true\nb = no\nc = 1\n").unwrap();
        assert!(adapter.get_bool("output", "a", false));
        assert!(!adapter.get_bool("output", "b", true));
        assert!(adapter.get_bool("output", "c", false));
        assert!(adapter.get_bool("output", "missing", true));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let adapter = FileConfigAdapter::from_string("[neighbors]\nk = 50\n")
            .unwrap()
            .with_overrides(vars(&[
                ("EVENTCAST__NEIGHBORS__K", "20"),
                ("EVENTCAST__BASELINE__MIN_SAMPLES", "5"),
            ]));
        assert_eq!(adapter.get_int("neighbors", "k", 0), 20);
        assert_eq!(adapter.get_int("baseline", "min_samples", 3), 5);
    }

    #[test]
    fn malformed_override_names_are_ignored() {
        let adapter = FileConfigAdapter::from_string("[neighbors]\nk = 50\n")
            .unwrap()
            .with_overrides(vars(&[
                ("EVENTCAST__NEIGHBORS", "1"),
                ("EVENTCAST____K", "2"),
                ("OTHER__NEIGHBORS__K", "3"),
            ]));
        assert_eq!(adapter.get_int("neighbors", "k", 0), 50);
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[backtest]\nstart = 2024-01-01T00:00:00Z\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("backtest", "start"),
            Some("2024-01-01T00:00:00Z".to_string())
        );
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(result.is_err());
    }
}
