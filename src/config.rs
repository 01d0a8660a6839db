//! Service configuration.
//!
//! Values come from `BUDDYLENS_*` environment variables; anything unset
//! falls back to the defaults below.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Outbound e-mail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailConfig {
    /// HTTP endpoint of the mail API. `None` logs messages instead of sending.
    pub api_url: Option<String>,

    /// Bearer token for the mail API.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Sender address.
    pub from: String,

    /// Bound on a single delivery attempt in milliseconds.
    pub timeout_ms: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            from: "BuddyLens <noreply@buddylens.local>".to_string(),
            timeout_ms: 5000,
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// TCP port the HTTP server binds to.
    pub port: u16,

    /// SQLite database file.
    pub db_path: PathBuf,

    /// Pooled database connections.
    pub db_max_connections: u32,

    /// Public base URL, prefixed to links in e-mails.
    pub base_url: String,

    pub mail: MailConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./buddylens.db"),
            db_max_connections: crate::db::pool::DEFAULT_MAX_CONNECTIONS,
            base_url: "http://localhost:8080".to_string(),
            mail: MailConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let base_url = lookup("BUDDYLENS_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);

        Ok(Self {
            port: parse_or(&lookup, "BUDDYLENS_PORT", defaults.port)?,
            db_path: lookup("BUDDYLENS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            db_max_connections: parse_or(
                &lookup,
                "BUDDYLENS_DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            base_url,
            mail: MailConfig {
                api_url: lookup("BUDDYLENS_MAIL_API_URL").filter(|v| !v.is_empty()),
                api_key: lookup("BUDDYLENS_MAIL_API_KEY").filter(|v| !v.is_empty()),
                from: lookup("BUDDYLENS_MAIL_FROM").unwrap_or(defaults.mail.from),
                timeout_ms: parse_or(
                    &lookup,
                    "BUDDYLENS_MAIL_TIMEOUT_MS",
                    defaults.mail.timeout_ms,
                )?,
            },
        })
    }
}

/// Parse `key` if set, otherwise log and use `default`.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            AppError::invalid_input_field(format!("Invalid value '{}': {}", raw, e), key)
        }),
        None => {
            log::debug!("[config] {} not set, using default: {}", key, default);
            Ok(default)
        }
    }
}
