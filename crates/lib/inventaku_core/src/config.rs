//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::auth::storage::FileStorage;

/// Default API base URL.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api";

/// Default HTTP request timeout: 15 seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Delay before a published error message is cleared: 5 seconds.
pub const DEFAULT_ERROR_CLEAR_MS: u64 = 5_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Settings for the session authority and its HTTP collaborator.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Base URL of the Inventaku API (the `/auth/*` routes hang off it).
    pub api_url: String,
    /// File holding the persisted session snapshot.
    pub session_file: PathBuf,
    /// Per-request timeout.
    pub http_timeout: Duration,
    /// How long an error message stays published.
    pub error_clear_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            session_file: FileStorage::default_path(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            error_clear_delay: Duration::from_millis(DEFAULT_ERROR_CLEAR_MS),
        }
    }
}

impl SessionConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                      | Default                                   |
    /// |-------------------------------|-------------------------------------------|
    /// | `INVENTAKU_API_URL`           | `http://127.0.0.1:3000/api`               |
    /// | `INVENTAKU_SESSION_FILE`      | `<data_dir>/inventaku/session.json`       |
    /// | `INVENTAKU_HTTP_TIMEOUT_SECS` | `15`                                      |
    /// | `INVENTAKU_ERROR_CLEAR_MS`    | `5000`                                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("INVENTAKU_API_URL") {
            config.api_url = url;
        }
        if let Some(path) = get("INVENTAKU_SESSION_FILE") {
            config.session_file = PathBuf::from(path);
        }
        if let Some(raw) = get("INVENTAKU_HTTP_TIMEOUT_SECS") {
            config.http_timeout = Duration::from_secs(parse_u64("INVENTAKU_HTTP_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = get("INVENTAKU_ERROR_CLEAR_MS") {
            config.error_clear_delay = Duration::from_millis(parse_u64("INVENTAKU_ERROR_CLEAR_MS", &raw)?);
        }
        Ok(config)
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}
