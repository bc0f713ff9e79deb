//! Configuration infrastructure
//!
//! Layered configuration for a fare sweep run:
//! 1. Built-in defaults (the [`defaults`] module)
//! 2. Optional config file (TOML/JSON/YAML, picked by extension)
//! 3. `FARE_SWEEP__SECTION__KEY` environment variables
//!
//! CLI flags are applied on top by the binary.

#![allow(clippy::module_name_repetitions)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crawling::session::SessionPolicy;
use crate::domain::{SearchParams, ValidationError};

/// Environment variable prefix, e.g. `FARE_SWEEP__RUN__CONCURRENCY=3`
pub const ENV_PREFIX: &str = "FARE_SWEEP";
const ENV_SEPARATOR: &str = "__";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid search parameters: {0}")]
    Invalid(#[from] ValidationError),
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub search: SearchParams,
    pub run: RunConfig,
    pub session: SessionConfig,
    pub timing: TimingConfig,
    pub logging: LoggingConfig,
    pub output: OutputConfig,
}

/// Orchestration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Concurrent sessions and runners (동시 세션 수)
    pub concurrency: usize,
    /// Run the reconciliation pass for missing dates
    pub reconcile: bool,
    /// Per-task bound in the reconciliation pass
    pub retry_join_timeout_secs: u64,
}

/// Remote session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub init_attempts: u32,
    pub init_retry_delay_ms: u64,
    pub navigation_timeout_secs: u64,
    /// Wait after clearing a blocked session's state (차단 후 대기 시간)
    pub recovery_cooldown_secs: u64,
    pub request_timeout_secs: u64,
    /// Shared across all sessions of a run
    pub max_requests_per_second: u32,
    pub user_agents: Vec<String>,
}

/// Pacing and extraction timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub settle_min_ms: u64,
    pub settle_max_ms: u64,
    pub load_timeout_min_secs: u64,
    pub load_timeout_max_secs: u64,
    pub load_poll_interval_ms: u64,
    pub post_load_scrolls: u32,
    pub extract_attempts: u32,
    pub extract_retry_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    pub file_name: String,

    /// Log directory; defaults to `logs/` next to the executable
    pub directory: Option<PathBuf>,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    pub auto_cleanup_logs: bool,

    /// Module-specific level overrides (e.g., "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub pretty: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::CONCURRENCY,
            reconcile: true,
            retry_join_timeout_secs: defaults::RETRY_JOIN_TIMEOUT_SECS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_attempts: defaults::SESSION_INIT_ATTEMPTS,
            init_retry_delay_ms: defaults::SESSION_INIT_RETRY_DELAY_MS,
            navigation_timeout_secs: defaults::NAVIGATION_TIMEOUT_SECS,
            recovery_cooldown_secs: defaults::RECOVERY_COOLDOWN_SECS,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            user_agents: defaults::USER_AGENTS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_min_ms: defaults::SETTLE_MIN_MS,
            settle_max_ms: defaults::SETTLE_MAX_MS,
            load_timeout_min_secs: defaults::LOAD_TIMEOUT_MIN_SECS,
            load_timeout_max_secs: defaults::LOAD_TIMEOUT_MAX_SECS,
            load_poll_interval_ms: defaults::LOAD_POLL_INTERVAL_MS,
            post_load_scrolls: defaults::POST_LOAD_SCROLLS,
            extract_attempts: defaults::EXTRACT_ATTEMPTS,
            extract_retry_delay_ms: defaults::EXTRACT_RETRY_DELAY_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            directory: None,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
            module_filters: HashMap::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(defaults::OUTPUT_DIRECTORY),
            pretty: true,
        }
    }
}

impl RunConfig {
    #[must_use]
    pub const fn retry_join_timeout(&self) -> Duration {
        Duration::from_secs(self.retry_join_timeout_secs)
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            init_attempts: self.init_attempts,
            init_retry_delay: Duration::from_millis(self.init_retry_delay_ms),
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            recovery_cooldown: Duration::from_secs(self.recovery_cooldown_secs),
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub const fn settle_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.settle_min_ms),
            Duration::from_millis(self.settle_max_ms),
        )
    }

    #[must_use]
    pub const fn load_timeout_range(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.load_timeout_min_secs),
            Duration::from_secs(self.load_timeout_max_secs),
        )
    }

    #[must_use]
    pub const fn load_poll_interval(&self) -> Duration {
        Duration::from_millis(self.load_poll_interval_ms)
    }

    #[must_use]
    pub const fn extract_retry_delay(&self) -> Duration {
        Duration::from_millis(self.extract_retry_delay_ms)
    }
}

impl AppConfig {
    /// Loads defaults, then `path` (required), then environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Loads defaults, then an optional file, then environment overrides.
    ///
    /// Search parameters are not validated here; CLI flags may still fill them in.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate_settings()?;
        Ok(config)
    }

    /// `~/.config/fare-sweep/config.toml` when the platform has a config dir
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fare-sweep").join("config.toml"))
    }

    /// Full validation: run settings plus search parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_settings()?;
        self.search.validate()?;
        Ok(())
    }

    /// 검색 파라미터를 제외한 설정값 검증
    fn validate_settings(&self) -> Result<(), ConfigError> {
        if self.run.concurrency == 0 {
            return Err(ConfigError::Invalid(ValidationError::InvalidConcurrency));
        }
        if self.run.retry_join_timeout_secs == 0 {
            return Err(validation("run.retry_join_timeout_secs must be greater than 0"));
        }
        if self.session.init_attempts == 0 {
            return Err(validation("session.init_attempts must be greater than 0"));
        }
        if self.session.max_requests_per_second == 0 {
            return Err(validation("session.max_requests_per_second must be greater than 0"));
        }
        if self.session.user_agents.is_empty() {
            return Err(validation("session.user_agents must not be empty"));
        }
        if self.timing.settle_min_ms > self.timing.settle_max_ms {
            return Err(validation("timing.settle_min_ms cannot be greater than settle_max_ms"));
        }
        if self.timing.load_timeout_min_secs == 0
            || self.timing.load_timeout_min_secs > self.timing.load_timeout_max_secs
        {
            return Err(validation(
                "timing.load_timeout_min_secs must be in 1..=load_timeout_max_secs",
            ));
        }
        if self.timing.extract_attempts == 0 {
            return Err(validation("timing.extract_attempts must be greater than 0"));
        }
        if !self.logging.console_output && !self.logging.file_output {
            return Err(validation("logging needs console_output or file_output"));
        }
        Ok(())
    }
}

fn validation(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}

/// Default configuration values
pub mod defaults {
    /// Default concurrent sessions
    pub const CONCURRENCY: usize = 5;

    pub const RETRY_JOIN_TIMEOUT_SECS: u64 = 180;

    pub const SESSION_INIT_ATTEMPTS: u32 = 3;

    pub const SESSION_INIT_RETRY_DELAY_MS: u64 = 5_000;

    pub const NAVIGATION_TIMEOUT_SECS: u64 = 60;

    pub const RECOVERY_COOLDOWN_SECS: u64 = 60;

    pub const REQUEST_TIMEOUT_SECS: u64 = 30;

    pub const MAX_REQUESTS_PER_SECOND: u32 = 2;

    pub const USER_AGENTS: &[&str] = &[
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.131 Safari/537.36",
    ];

    // Pacing
    pub const SETTLE_MIN_MS: u64 = 1_000;
    pub const SETTLE_MAX_MS: u64 = 2_000;
    pub const LOAD_TIMEOUT_MIN_SECS: u64 = 45;
    pub const LOAD_TIMEOUT_MAX_SECS: u64 = 48;
    pub const LOAD_POLL_INTERVAL_MS: u64 = 2_000;
    pub const POST_LOAD_SCROLLS: u32 = 2;

    pub const EXTRACT_ATTEMPTS: u32 = 3;
    pub const EXTRACT_RETRY_DELAY_MS: u64 = 1_000;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "fare-sweep.log";
    pub const LOG_MAX_FILES: u32 = 10;

    pub const OUTPUT_DIRECTORY: &str = ".";
}
