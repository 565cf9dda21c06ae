//! Configuration module for the aggregator.

use serde::Deserialize;
use std::path::Path;

use crate::{AggregatorError, Result};

/// Upper bound for any fetch timeout.
pub const MAX_FETCH_TIMEOUT_SECS: u64 = 60;

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string.
    #[serde(default = "default_db_url")]
    pub url: String,
    /// Maximum number of pooled connections.
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
}

fn default_db_url() -> String {
    "sqlite://data/aggregator.db".to_string()
}

fn default_db_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            max_connections: default_db_max_connections(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/aggregator.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Feed fetching and reconciliation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RssConfig {
    /// Whether the background updater runs.
    #[serde(default = "default_rss_enabled")]
    pub enabled: bool,
    /// Seconds between reconciliation passes.
    #[serde(default = "default_rss_update_interval")]
    pub update_interval_secs: u64,
    /// Connection timeout in seconds.
    #[serde(default = "default_rss_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Total request timeout in seconds, applied to every fetch.
    #[serde(default = "default_rss_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_rss_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_rss_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Send `If-Modified-Since` when refreshing an already fetched feed.
    #[serde(default = "default_rss_conditional_requests")]
    pub conditional_requests: bool,
    /// Allow feed links that point at loopback or private addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,
    /// User agent sent with every fetch.
    #[serde(default = "default_rss_user_agent")]
    pub user_agent: String,
}

fn default_rss_enabled() -> bool {
    true
}

fn default_rss_update_interval() -> u64 {
    300 // 5 minutes
}

fn default_rss_connect_timeout() -> u64 {
    10
}

fn default_rss_total_timeout() -> u64 {
    30
}

fn default_rss_max_redirects() -> usize {
    5
}

fn default_rss_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_rss_conditional_requests() -> bool {
    true
}

fn default_rss_user_agent() -> String {
    concat!("aggregator/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            enabled: default_rss_enabled(),
            update_interval_secs: default_rss_update_interval(),
            connect_timeout_secs: default_rss_connect_timeout(),
            total_timeout_secs: default_rss_total_timeout(),
            max_redirects: default_rss_max_redirects(),
            max_feed_size_bytes: default_rss_max_feed_size(),
            conditional_requests: default_rss_conditional_requests(),
            allow_private_hosts: false,
            user_agent: default_rss_user_agent(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Feed configuration.
    #[serde(default)]
    pub rss: RssConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(AggregatorError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| AggregatorError::Config(format!("parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `AGGREGATOR_DATABASE_URL`: Override the database connection string
    /// - `AGGREGATOR_LOG_LEVEL`: Override the log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("AGGREGATOR_DATABASE_URL") {
            if !url.is_empty() {
                self.database.url = url;
            }
        }
        if let Ok(level) = std::env::var("AGGREGATOR_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(AggregatorError::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.rss.update_interval_secs == 0 {
            return Err(AggregatorError::Config(
                "rss.update_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.rss.total_timeout_secs == 0 || self.rss.connect_timeout_secs == 0 {
            return Err(AggregatorError::Config(
                "rss timeouts must be greater than 0".to_string(),
            ));
        }
        if self.rss.total_timeout_secs > MAX_FETCH_TIMEOUT_SECS
            || self.rss.connect_timeout_secs > MAX_FETCH_TIMEOUT_SECS
        {
            return Err(AggregatorError::Config(format!(
                "rss timeouts must not exceed {MAX_FETCH_TIMEOUT_SECS} seconds"
            )));
        }
        Ok(())
    }
}
