//! Configuration loading and path resolution
//!
//! Settings come from four tiers, highest priority first:
//! 1. Command-line argument
//! 2. Environment variable
//! 3. TOML config file
//! 4. Built-in defaults
//!
//! Every TOML section is optional; missing fields take the built-in default so
//! a missing or partial config file never prevents startup.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "SBE_CONFIG";
/// Environment variable overriding the data directory
pub const DATA_DIR_ENV_VAR: &str = "SBE_DATA_DIR";
/// Environment variable holding the analyzer API key
pub const API_KEY_ENV_VAR: &str = "SBE_ANALYZER_API_KEY";

/// Top-level TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Directory holding the cache database and per-job state
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Batch engine parameters
    #[serde(default)]
    pub engine: EngineConfig,

    /// External analysis service
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Batch engine parameters
///
/// One parameterized engine serves every collection size; nothing branches
/// on how many samples a job holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum samples per external call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Persist the checkpoint after every N completed batches
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    /// Bounded wait for one Analyze response
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Group samples by local category label before chunking
    #[serde(default = "default_true")]
    pub cluster_by_category: bool,

    /// Worker threads for local hashing during catalog scans
    #[serde(default = "default_scan_workers")]
    pub scan_workers: usize,

    /// Provider call budget
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Backoff for recoverable analysis failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Backoff for cache/checkpoint write failures
    #[serde(default)]
    pub storage_retry: StorageRetryConfig,
}

/// Provider call budget: `max_calls` per rolling `window_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

/// Retry policy for recoverable analysis failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt before members become skippable
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `base * 2^n`
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    /// Upper bound for a single backoff wait
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

/// Retry policy for storage writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_storage_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_storage_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_storage_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// External analysis service settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Analyze endpoint URL
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API key (prefer SBE_ANALYZER_API_KEY over storing it here)
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_batch_size() -> usize {
    5
}

fn default_checkpoint_interval() -> usize {
    1
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_scan_workers() -> usize {
    4
}

fn default_max_calls() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    60
}

fn default_max_delay_secs() -> u64 {
    960
}

fn default_storage_attempts() -> u32 {
    4
}

fn default_storage_initial_backoff_ms() -> u64 {
    50
}

fn default_storage_max_backoff_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            checkpoint_interval: default_checkpoint_interval(),
            call_timeout_secs: default_call_timeout_secs(),
            cluster_by_category: true,
            scan_workers: default_scan_workers(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            storage_retry: StorageRetryConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            window_secs: default_window_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl Default for StorageRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_storage_attempts(),
            initial_backoff_ms: default_storage_initial_backoff_ms(),
            max_backoff_ms: default_storage_max_backoff_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls,
            window_secs: window.as_secs(),
        }
    }

    /// Rolling window length
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Steady-state spacing between calls (`window / max_calls`)
    ///
    /// 5 calls per 60s gives one call every 12s.
    pub fn interval(&self) -> Duration {
        self.window() / self.max_calls.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_calls == 0 {
            return Err(Error::Config("rate_limit.max_calls must be at least 1".to_string()));
        }
        if self.window_secs == 0 {
            return Err(Error::Config("rate_limit.window_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Reject parameter combinations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("engine.batch_size must be at least 1".to_string()));
        }
        if self.checkpoint_interval == 0 {
            return Err(Error::Config(
                "engine.checkpoint_interval must be at least 1".to_string(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(Error::Config("engine.call_timeout_secs must be at least 1".to_string()));
        }
        if self.storage_retry.max_attempts == 0 {
            return Err(Error::Config(
                "engine.storage_retry.max_attempts must be at least 1".to_string(),
            ));
        }
        self.rate_limit.validate()
    }
}

/// Default config file location: `<config_dir>/sbe/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sbe").join("config.toml"))
}

/// Resolve which config file to read
///
/// **Priority:** CLI → ENV (`SBE_CONFIG`) → platform default (only if it exists)
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path().filter(|p| p.exists())
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load configuration, falling back to defaults when no file is configured
///
/// An explicitly requested file (CLI or ENV) that fails to load is an error.
/// A missing platform-default file is not.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            let config = load_toml_config(&path)?;
            info!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        None => {
            warn!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Resolve the data directory
///
/// **Priority:** CLI → ENV (`SBE_DATA_DIR`) → TOML `data_dir` → OS default
pub fn resolve_data_dir(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATA_DIR_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.data_dir {
        return path.clone();
    }

    default_data_dir()
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("sbe"))
        .unwrap_or_else(|| PathBuf::from("./sbe_data"))
}

/// Resolve the analyzer API key
///
/// **Priority:** ENV (`SBE_ANALYZER_API_KEY`) → TOML
pub fn resolve_api_key(config: &TomlConfig) -> Option<String> {
    let env_key = std::env::var(API_KEY_ENV_VAR).ok().filter(|k| is_valid_key(k));
    let toml_key = config.analyzer.api_key.clone().filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!("Analyzer API key found in environment and TOML. Using environment.");
    }

    match (env_key, toml_key) {
        (Some(key), _) => {
            debug!("Analyzer API key loaded from environment variable");
            Some(key)
        }
        (None, Some(key)) => {
            debug!("Analyzer API key loaded from TOML config");
            Some(key)
        }
        (None, None) => None,
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Write config atomically (temp file + rename), mode 0600 on Unix
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    crate::atomic_file::write_atomic(path, content.as_bytes(), Some(0o600))?;
    Ok(())
}
