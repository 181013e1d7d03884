//! Configuration parsing
//!
//! Reads worker and pipeline settings from `~/.tally/config.toml`. Every field
//! has a default, so a missing file or an empty section is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tally_plan::DEFAULT_MAX_BREAKDOWN_ENTRIES;
use tally_protocol::defaults::{
    DEFAULT_ERROR_BACKOFF_SECS, DEFAULT_KPI_PROPOSALS, DEFAULT_LLM_API_KEY_ENV,
    DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL, DEFAULT_LLM_PROVIDER, DEFAULT_LLM_TIMEOUT_SECS,
    DEFAULT_POLL_WAIT_MS, DEFAULT_VISIBILITY_TIMEOUT_SECS,
};

/// Error type for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type for config operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root of config.toml
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TallyConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub interpreter: InterpreterConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; `~/.tally/tally.db` when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(tally_logging::default_db_path)
    }
}

/// `[worker]` section
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// How long one receive call waits for a message
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,

    /// Seconds before an unacked message is delivered again
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Pause after a loop-level failure
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_wait_ms: default_poll_wait_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

impl WorkerSettings {
    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// `[llm]` section
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// "openai" (default) or "disabled"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Any OpenAI-compatible chat completions endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Upper bound on a single model call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// KPI proposals requested per round
    #[serde(default = "default_kpi_proposals")]
    pub kpi_proposals: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            kpi_proposals: default_kpi_proposals(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// API key from the configured environment variable, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// `[interpreter]` section
#[derive(Debug, Clone, Deserialize)]
pub struct InterpreterConfig {
    /// Breakdown entries kept before the rest fold into "Other"
    #[serde(default = "default_max_breakdown_entries")]
    pub max_breakdown_entries: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_breakdown_entries: default_max_breakdown_entries(),
        }
    }
}

fn default_poll_wait_ms() -> u64 { DEFAULT_POLL_WAIT_MS }
fn default_visibility_timeout_secs() -> u64 { DEFAULT_VISIBILITY_TIMEOUT_SECS }
fn default_error_backoff_secs() -> u64 { DEFAULT_ERROR_BACKOFF_SECS }
fn default_provider() -> String { DEFAULT_LLM_PROVIDER.to_string() }
fn default_model() -> String { DEFAULT_LLM_MODEL.to_string() }
fn default_base_url() -> String { DEFAULT_LLM_BASE_URL.to_string() }
fn default_api_key_env() -> String { DEFAULT_LLM_API_KEY_ENV.to_string() }
fn default_timeout_secs() -> u64 { DEFAULT_LLM_TIMEOUT_SECS }
fn default_kpi_proposals() -> usize { DEFAULT_KPI_PROPOSALS }
fn default_max_breakdown_entries() -> usize { DEFAULT_MAX_BREAKDOWN_ENTRIES }

impl TallyConfig {
    fn check(&self) -> Result<()> {
        if self.interpreter.max_breakdown_entries < 2 {
            return Err(ConfigError::Invalid {
                field: "interpreter.max_breakdown_entries",
                reason: "must be at least 2".to_string(),
            });
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "llm.timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.worker.visibility_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "worker.visibility_timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Load configuration from a file; a missing file yields the defaults.
pub fn load_config(config_path: &Path) -> Result<TallyConfig> {
    if !config_path.exists() {
        return Ok(TallyConfig::default());
    }

    let content = std::fs::read_to_string(config_path)?;
    let config: TallyConfig = toml::from_str(&content)?;
    config.check()?;
    Ok(config)
}

/// Load configuration from `~/.tally/config.toml` (or `$TALLY_HOME`).
pub fn load_default_config() -> Result<TallyConfig> {
    load_config(&tally_logging::default_config_path())
}
