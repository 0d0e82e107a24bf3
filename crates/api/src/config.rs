//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use reservation::EngineConfig;
use reservation::config::{
    DEFAULT_GUEST_SESSION_MAX_AGE_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_USER_SESSION_MAX_AGE_SECS,
};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset runs on the seeded in-memory store
/// - `GUEST_SESSION_MAX_AGE_SECS`: guest cart lifetime (default: one day)
/// - `USER_SESSION_MAX_AGE_SECS`: user session lifetime (default: thirty days)
/// - `SWEEP_INTERVAL_SECS`: expiry sweep period (default: fifteen minutes)
/// - `SWEEP_ON_WRITE`: sweep before every quantity change (default: `false`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub guest_session_max_age_secs: i64,
    pub user_session_max_age_secs: i64,
    pub sweep_interval_secs: u64,
    pub sweep_on_write: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(lookup("PORT")).unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            guest_session_max_age_secs: parse(lookup("GUEST_SESSION_MAX_AGE_SECS"))
                .filter(|secs: &i64| *secs > 0)
                .unwrap_or(defaults.guest_session_max_age_secs),
            user_session_max_age_secs: parse(lookup("USER_SESSION_MAX_AGE_SECS"))
                .filter(|secs: &i64| *secs > 0)
                .unwrap_or(defaults.user_session_max_age_secs),
            sweep_interval_secs: parse(lookup("SWEEP_INTERVAL_SECS"))
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(defaults.sweep_interval_secs),
            sweep_on_write: parse(lookup("SWEEP_ON_WRITE")).unwrap_or(defaults.sweep_on_write),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The engine's share of the configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            guest_session_max_age: chrono::Duration::seconds(self.guest_session_max_age_secs),
            user_session_max_age: chrono::Duration::seconds(self.user_session_max_age_secs),
            sweep_on_write: self.sweep_on_write,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn parse<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            guest_session_max_age_secs: DEFAULT_GUEST_SESSION_MAX_AGE_SECS,
            user_session_max_age_secs: DEFAULT_USER_SESSION_MAX_AGE_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            sweep_on_write: false,
        }
    }
}
