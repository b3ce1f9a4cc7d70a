//! Application settings loaded from `config.toml`.
//!
//! Every section and field has a default, so an empty (or missing) file is a
//! valid configuration. Environment variables override the file for values
//! that differ per deployment: `DATABASE_URL`, `BUDGET_API_URL` and
//! `BUDGET_API_TOKEN`.

use crate::config::database::DEFAULT_DATABASE_URL;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

/// Default location of the settings file
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Entire `config.toml`
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Local store settings
    pub database: DatabaseSettings,
    /// Remote API settings
    pub api: ApiSettings,
    /// Sync engine tuning
    pub sync: SyncSettings,
}

/// `[database]`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `SeaORM` connection string
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

/// `[api]`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiSettings {
    /// Base URL the collection paths are appended to, e.g. `https://host/api/v1`
    pub base_url: String,
    /// Bearer token; normally supplied via `BUDGET_API_TOKEN` rather than the file
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

/// `[sync]`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    /// Failed attempts before an operation becomes terminal
    pub max_retries: i32,
    /// Completed queue entries older than this are purged after each pass
    pub purge_completed_after_days: i64,
    /// How often the connectivity monitor refreshes the pending count
    pub pending_poll_interval_secs: u64,
    /// Treat non-retryable 4xx responses as terminal instead of consuming retry budget
    pub permanent_client_errors: bool,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: crate::core::queue::MAX_RETRIES,
            purge_completed_after_days: 7,
            pending_poll_interval_secs: 30,
            permanent_client_errors: true,
            event_buffer: 64,
        }
    }
}

impl AppConfig {
    /// Applies environment overrides through `lookup`, which is `std::env::var` in production.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("DATABASE_URL") {
            debug!("DATABASE_URL overrides [database].url");
            self.database.url = url;
        }
        if let Some(url) = non_empty("BUDGET_API_URL") {
            debug!("BUDGET_API_URL overrides [api].base_url");
            self.api.base_url = url;
        }
        if let Some(token) = non_empty("BUDGET_API_TOKEN") {
            self.api.token = Some(token);
        }
        self
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_retries < 1 {
            return Err(Error::config("[sync].max_retries must be at least 1"));
        }
        if self.sync.purge_completed_after_days < 0 {
            return Err(Error::config(
                "[sync].purge_completed_after_days must not be negative",
            ));
        }
        if self.sync.event_buffer == 0 {
            return Err(Error::config("[sync].event_buffer must be positive"));
        }
        let base = self.api.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::config(
                "[api].base_url must include http:// or https://",
            ));
        }
        Ok(())
    }
}

/// Parses settings from TOML text.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads settings from a TOML file.
///
/// # Errors
/// Returns an error if:
/// - The file exists but cannot be read
/// - The TOML syntax is invalid
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;
    parse_config(&contents)
}

/// Loads `./config.toml` (falling back to defaults when it is absent), then
/// applies environment overrides and validates the result.
pub fn load_app_configuration() -> Result<AppConfig> {
    let path = Path::new(DEFAULT_CONFIG_PATH);
    let config = if path.exists() {
        info!("Loading configuration from {}", path.display());
        load_config(path)?
    } else {
        info!("No {DEFAULT_CONFIG_PATH} found, using defaults");
        AppConfig::default()
    };

    let config = config.with_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
