//! Canonical default values shared by the worker, the CLI and the config layer.

pub const DEFAULT_HOME_DIR: &str = ".tally";
pub const HOME_ENV_VAR: &str = "TALLY_HOME";
pub const DEFAULT_DB_FILE: &str = "tally.db";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_POLL_WAIT_MS: u64 = 1_000;
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 5;

pub const DEFAULT_LLM_PROVIDER: &str = "openai";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

/// Proposals asked of the model per round.
pub const DEFAULT_KPI_PROPOSALS: usize = 8;
