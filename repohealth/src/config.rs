//! Service configuration.
//!
//! Configuration is read from JSON, with every field optional, and then
//! overridden from `REPOHEALTH_*` environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding [`ServiceConfig::storage_root`].
pub const ENV_STORAGE_ROOT: &str = "REPOHEALTH_STORAGE_ROOT";
/// Environment variable overriding [`ServiceConfig::workers`].
pub const ENV_WORKERS: &str = "REPOHEALTH_WORKERS";
/// Environment variable overriding [`LogConfig::level`].
pub const ENV_LOG: &str = "REPOHEALTH_LOG";
/// Environment variable overriding [`LogConfig::format`].
pub const ENV_LOG_FORMAT: &str = "REPOHEALTH_LOG_FORMAT";
/// Environment variable overriding [`GithubConfig::api_base`].
pub const ENV_GITHUB_API: &str = "REPOHEALTH_GITHUB_API";

/// Error raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// The file that was read.
        path: PathBuf,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment override could not be parsed.
    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv {
        /// The variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A field failed validation.
    #[error("Invalid config field `{field}`: {message}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Top-level configuration for [`crate::service::RepoHealthService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory holding one storage root per key.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    /// Number of worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
    /// GitHub API configuration.
    #[serde(default)]
    pub github: GithubConfig,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("ephemeral_storage")
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            workers: default_workers(),
            log: LogConfig::default(),
            github: GithubConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable values.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for unparseable values.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_STORAGE_ROOT) {
            self.storage_root = PathBuf::from(root);
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.workers = workers.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_WORKERS,
                value: workers.clone(),
            })?;
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.log.level = level;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.log.format = format.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_LOG_FORMAT,
                value: format.clone(),
            })?;
        }
        if let Some(api) = lookup(ENV_GITHUB_API) {
            self.github.api_base = api;
        }
        Ok(self)
    }

    /// Sets the storage root.
    #[must_use]
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Sets the GitHub configuration.
    #[must_use]
    pub fn with_github(mut self, github: GithubConfig) -> Self {
        self.github = github;
        self
    }

    /// Checks the configuration for values the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_root.as_os_str().is_empty() {
            return Err(ConfigError::invalid("storage_root", "must not be empty"));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        self.github.validate()
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// An `EnvFilter` directive such as `info` or `repohealth=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    /// Sets the filter directive.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// GitHub REST API configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubConfig {
    /// API base URL, without a trailing slash.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Page size for paginated endpoints.
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_user_agent() -> String {
    concat!("repohealth/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_per_page() -> u32 {
    100
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            user_agent: default_user_agent(),
            timeout_seconds: default_timeout_seconds(),
            per_page: default_per_page(),
        }
    }
}

impl GithubConfig {
    /// Sets the API base URL.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    /// Gets the timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.per_page == 0 {
            return Err(ConfigError::invalid("github.per_page", "must be at least 1"));
        }
        if self.api_base.trim().is_empty() {
            return Err(ConfigError::invalid("github.api_base", "must not be empty"));
        }
        Ok(())
    }
}
