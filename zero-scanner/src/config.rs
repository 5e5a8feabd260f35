//! Scanner engine configuration.
//!
//! Loaded from `~/.codecoder/scanner.json`; every field has a default so a
//! missing file or a partial file is valid. Environment variables override
//! the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Main Scanner Configuration
// ============================================================================

/// Configuration for the scanner engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Python interpreter used for worker processes
    #[serde(default = "default_python_bin")]
    pub python_bin: String,

    /// Default wall-clock ceiling per execution
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra time a worker gets to flush its snapshot before it is killed
    #[serde(default = "default_abort_grace_secs")]
    pub abort_grace_secs: u64,

    /// Maximum number of workers running at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Hand blocking calls made from inside a running runtime to an owned
    /// worker thread instead of failing with a loop conflict
    #[serde(default = "default_true")]
    pub delegate_on_host_loop: bool,

    /// Rewrite `asyncio.run` calls nested in `async def` bodies of bare scripts
    #[serde(default = "default_true")]
    pub neutralize_nested_asyncio_run: bool,

    /// How long finished jobs stay queryable
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,

    /// Lines of scanner output kept in diagnostics
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,

    /// Parameter extraction settings
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Symbol universe used by Enhanced mode
    #[serde(default)]
    pub universe: UniverseConfig,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            python_bin: default_python_bin(),
            timeout_secs: default_timeout_secs(),
            abort_grace_secs: default_abort_grace_secs(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            delegate_on_host_loop: true,
            neutralize_nested_asyncio_run: true,
            job_retention_secs: default_job_retention_secs(),
            stderr_tail_lines: default_stderr_tail_lines(),
            extractor: ExtractorConfig::default(),
            universe: UniverseConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Load from the default location, falling back to defaults, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::info!(path = %path.display(), "Scanner config not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scanner config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse scanner config from {}", path.display()))
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(python) = std::env::var("ZERO_SCANNER_PYTHON") {
            if !python.trim().is_empty() {
                self.python_bin = python;
            }
        }
        if let Ok(timeout) = std::env::var("ZERO_SCANNER_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                self.timeout_secs = secs;
            }
        }
        if let Ok(jobs) = std::env::var("ZERO_SCANNER_MAX_JOBS") {
            if let Ok(n) = jobs.parse::<usize>() {
                self.max_concurrent_jobs = n.max(1);
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn abort_grace(&self) -> Duration {
        Duration::from_secs(self.abort_grace_secs)
    }
}

/// Directory holding Zero configuration files.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".codecoder"),
        |dirs| dirs.home_dir().join(".codecoder"),
    )
}

/// Path of the scanner configuration file.
pub fn config_path() -> PathBuf {
    config_dir().join("scanner.json")
}

fn default_python_bin() -> String {
    "python3".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_abort_grace_secs() -> u64 {
    5
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_job_retention_secs() -> u64 {
    3600
}

fn default_stderr_tail_lines() -> usize {
    40
}

// ============================================================================
// Extractor Configuration
// ============================================================================

/// Parameter extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Descriptors below this confidence are not surfaced by `format`
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.5
}

// ============================================================================
// Universe Configuration
// ============================================================================

/// Symbol universe for Enhanced mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Symbols substituted when a request carries no explicit override
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Outbound market-data calls allowed per minute across all workers
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_requests_per_minute() -> u32 {
    60
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ScannerConfig::default();
        assert_eq!(config.python_bin, "python3");
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert!(config.delegate_on_host_loop);
        assert!(config.neutralize_nested_asyncio_run);
        assert!((config.extractor.min_confidence - 0.5).abs() < f64::EPSILON);
        assert!(config.universe.symbols.is_empty());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"timeout_secs": 30, "universe": {{"symbols": ["AAPL", "NVDA"]}}}}"#
        )
        .unwrap();

        let config = ScannerConfig::load_from(file.path()).unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.universe.symbols.len(), 2);
        assert_eq!(config.universe.requests_per_minute, 60);
        assert_eq!(config.abort_grace_secs, 5);
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(ScannerConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn test_timeout_never_zero() {
        let config = ScannerConfig {
            timeout_secs: 0,
            ..ScannerConfig::default()
        };
        assert_eq!(config.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_path_file_name() {
        assert!(config_path().ends_with("scanner.json"));
    }
}
