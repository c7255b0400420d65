//! Runtime configuration from environment variables
//!
//! Missing or invalid required settings are fatal at startup: the binaries
//! print usage text and exit instead of running against a guessed hierarchy.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the synchronizer and calculation engine
///
/// Defaults match the sizing the system was tuned for (hundreds of thousands
/// of leaf nodes against a paged external store).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Target asset database location (graph store label)
    pub db_path: String,

    /// Ordered hierarchy level names, leaf first (e.g. Leaf|Branch|SubTree)
    pub levels: Vec<String>,

    /// Leaf status value that triggers interval recording
    pub target_mode: String,

    /// Rolling rollup window length in hours (default two weeks)
    pub rollup_hours: u32,

    /// Fluctuation window length in days
    pub fluctuation_days: u32,

    /// Node/attribute chunk size for paged scans and point resolution
    pub chunk_size: usize,

    /// Group size for summary queries (smaller than `chunk_size`)
    pub page_size: usize,

    /// Max degree of parallelism for bulk store operations
    pub max_parallel: usize,

    /// Reconciliation refresh timer interval
    pub refresh_interval: Duration,

    /// Subscription pump backoff when no events are available
    pub poll_backoff: Duration,

    /// Directory for fluctuation/outlier report files
    pub report_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{} is missing from the environment", key),
            ConfigError::Invalid(key, value) => {
                write!(f, "{} has an invalid value: {}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw.clone())),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Load and validate settings from the environment
    ///
    /// Environment variables:
    /// - `ASSETFLOW_DB_PATH` (required) - target asset database location
    /// - `ASSETFLOW_LEVELS` (required) - pipe-separated level names, leaf first
    /// - `ASSETFLOW_TARGET_MODE` (default: Prog-Auto)
    /// - `ASSETFLOW_ROLLUP_HOURS` (default: 336)
    /// - `ASSETFLOW_FLUCTUATION_DAYS` (default: 7)
    /// - `ASSETFLOW_CHUNK_SIZE` (default: 10000)
    /// - `ASSETFLOW_PAGE_SIZE` (default: 1000)
    /// - `ASSETFLOW_MAX_PARALLEL` (default: 4)
    /// - `ASSETFLOW_REFRESH_INTERVAL_MS` (default: 10000)
    /// - `ASSETFLOW_POLL_BACKOFF_MS` (default: 5000)
    /// - `ASSETFLOW_REPORT_DIR` (default: current directory)
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = env::var("ASSETFLOW_DB_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("ASSETFLOW_DB_PATH"))?;

        let raw_levels = env::var("ASSETFLOW_LEVELS")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("ASSETFLOW_LEVELS"))?;

        let levels: Vec<String> = raw_levels
            .split('|')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // A single level means there is no hierarchy to build
        if levels.len() < 2 {
            return Err(ConfigError::Invalid("ASSETFLOW_LEVELS", raw_levels));
        }

        let settings = Self {
            db_path,
            levels,
            target_mode: env::var("ASSETFLOW_TARGET_MODE")
                .unwrap_or_else(|_| "Prog-Auto".to_string()),
            rollup_hours: env_parse("ASSETFLOW_ROLLUP_HOURS", 336)?,
            fluctuation_days: env_parse("ASSETFLOW_FLUCTUATION_DAYS", 7)?,
            chunk_size: env_parse("ASSETFLOW_CHUNK_SIZE", 10_000)?,
            page_size: env_parse("ASSETFLOW_PAGE_SIZE", 1_000)?,
            max_parallel: env_parse("ASSETFLOW_MAX_PARALLEL", 4)?,
            refresh_interval: Duration::from_millis(env_parse(
                "ASSETFLOW_REFRESH_INTERVAL_MS",
                10_000,
            )?),
            poll_backoff: Duration::from_millis(env_parse("ASSETFLOW_POLL_BACKOFF_MS", 5_000)?),
            report_dir: PathBuf::from(
                env::var("ASSETFLOW_REPORT_DIR").unwrap_or_else(|_| ".".to_string()),
            ),
        };

        if settings.rollup_hours == 0 {
            return Err(ConfigError::Invalid(
                "ASSETFLOW_ROLLUP_HOURS",
                "0".to_string(),
            ));
        }
        // A zero-day fluctuation window has nothing to summarize and would
        // divide every index by zero
        if settings.fluctuation_days == 0 {
            return Err(ConfigError::Invalid(
                "ASSETFLOW_FLUCTUATION_DAYS",
                "0".to_string(),
            ));
        }
        if settings.chunk_size == 0 || settings.page_size == 0 || settings.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "ASSETFLOW_CHUNK_SIZE",
                "chunk/page/parallel settings must be non-zero".to_string(),
            ));
        }

        Ok(settings)
    }

    /// Leaf level template name (level 0)
    pub fn leaf_template(&self) -> &str {
        &self.levels[0]
    }

    /// Top level template name (level N)
    pub fn top_template(&self) -> &str {
        self.levels.last().map(String::as_str).unwrap_or_default()
    }

    /// Flush threshold for the rollup pass accumulator
    pub fn flush_threshold(&self) -> usize {
        self.chunk_size * self.max_parallel
    }

    /// Settings for tests: small chunks, short timers
    pub fn for_tests(levels: &[&str]) -> Self {
        Self {
            db_path: "test-db".to_string(),
            levels: levels.iter().map(|s| s.to_string()).collect(),
            target_mode: "Prog-Auto".to_string(),
            rollup_hours: 336,
            fluctuation_days: 7,
            chunk_size: 4,
            page_size: 2,
            max_parallel: 2,
            refresh_interval: Duration::from_millis(50),
            poll_backoff: Duration::from_millis(20),
            report_dir: PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing_drops_blank_segments() {
        let levels: Vec<String> = "Leaf| Branch ||SubTree"
            .split('|')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(levels, vec!["Leaf", "Branch", "SubTree"]);
    }

    #[test]
    fn test_test_settings_shape() {
        let settings = Settings::for_tests(&["Leaf", "Branch", "SubTree"]);
        assert_eq!(settings.leaf_template(), "Leaf");
        assert_eq!(settings.top_template(), "SubTree");
        assert_eq!(settings.flush_threshold(), 8);
    }

    #[test]
    fn test_zero_fluctuation_days_is_rejected() {
        env::set_var("ASSETFLOW_DB_PATH", "test-db");
        env::set_var("ASSETFLOW_LEVELS", "Leaf|Branch");
        env::set_var("ASSETFLOW_FLUCTUATION_DAYS", "0");

        let result = Settings::from_env();
        assert_eq!(
            result.err(),
            Some(ConfigError::Invalid(
                "ASSETFLOW_FLUCTUATION_DAYS",
                "0".to_string()
            ))
        );

        env::remove_var("ASSETFLOW_DB_PATH");
        env::remove_var("ASSETFLOW_LEVELS");
        env::remove_var("ASSETFLOW_FLUCTUATION_DAYS");
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        env::set_var("ASSETFLOW_TEST_PARSE", "not-a-number");
        let result: Result<usize, _> = env_parse("ASSETFLOW_TEST_PARSE", 7);
        assert!(result.is_err());
        env::remove_var("ASSETFLOW_TEST_PARSE");

        let result: Result<usize, _> = env_parse("ASSETFLOW_TEST_PARSE", 7);
        assert_eq!(result.unwrap(), 7);
    }
}
