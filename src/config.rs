// ABOUTME: Env-var-backed configuration, loaded once at startup
// ABOUTME: Covers the core's required settings plus the ambient knobs the binary needs to run
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration
//!
//! A single typed `Config`, loaded via [`Config::from_env`]. The core only
//! cares about `encryption_key`, the GitHub OAuth client pair, the two
//! token durations, `dev_mode`, and `admins`; the rest (bind address, log
//! format) belongs to the binary that wires the core up.

use std::collections::HashSet;
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::logging::LogFormat;

const DEFAULT_TOKEN_DURATION_SECS: u64 = 3600;
const DEFAULT_MAX_TOKEN_DURATION_SECS: u64 = 30 * 24 * 3600;
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";

/// Process-wide configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub encryption_key: String,
    pub github_client_id: String,
    pub github_client_secret: String,
    pub tokens_default_duration: Duration,
    pub tokens_max_duration: Duration,
    pub dev_mode: bool,
    pub admins: HashSet<String>,
    pub http_port: u16,
    pub bind_address: String,
    pub database_url: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub github_api_base: String,
}

fn env_var(name: &str) -> AppResult<String> {
    std::env::var(name).map_err(|_| AppError::internal(format!("missing required env var {name}")))
}

fn env_var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_duration_secs(raw: &str, default_secs: u64) -> AppResult<Duration> {
    if raw.is_empty() {
        return Ok(Duration::from_secs(default_secs));
    }
    let secs: u64 = raw
        .parse()
        .map_err(|_| AppError::internal(format!("invalid duration (seconds) value: {raw}")))?;
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if `ENCRYPTION_KEY` is absent or any
    /// numeric/bool field fails to parse. The encryption key's *length* is
    /// validated separately by [`crate::crypto::Crypto::from_hex`].
    pub fn from_env() -> AppResult<Self> {
        let encryption_key = env_var("ENCRYPTION_KEY")?;
        let github_client_id = env_var_or("GITHUB_CLIENT_ID", "");
        let github_client_secret = env_var_or("GITHUB_CLIENT_SECRET", "");

        let tokens_default_duration = parse_duration_secs(
            &env_var_or("TOKENS_DEFAULT_DURATION", ""),
            DEFAULT_TOKEN_DURATION_SECS,
        )?;
        let tokens_max_duration = parse_duration_secs(
            &env_var_or("TOKENS_MAX_DURATION", ""),
            DEFAULT_MAX_TOKEN_DURATION_SECS,
        )?;

        let dev_mode = parse_bool(&env_var_or("DEV_MODE", "false"));

        let admins = env_var_or("ADMINS", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();

        let http_port = env_var_or("HTTP_PORT", &DEFAULT_HTTP_PORT.to_string())
            .parse()
            .map_err(|_| AppError::internal("invalid HTTP_PORT"))?;
        let bind_address = env_var_or("BIND_ADDRESS", "0.0.0.0");
        let database_url = env_var_or("DATABASE_URL", "sqlite://ghp-reverse-proxy.db");
        // Overridable so tests can point dispatch at a local mock upstream
        // instead of the real GitHub API; production never sets this.
        let github_api_base = env_var_or("GITHUB_API_BASE", DEFAULT_GITHUB_API_BASE);

        let log_level = env_var_or("RUST_LOG", "info");
        let log_format = match env_var_or("LOG_FORMAT", "").as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            "pretty" => LogFormat::Pretty,
            _ if dev_mode => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        Ok(Self {
            encryption_key,
            github_client_id,
            github_client_secret,
            tokens_default_duration,
            tokens_max_duration,
            dev_mode,
            admins,
            http_port,
            bind_address,
            database_url,
            log_level,
            log_format,
            github_api_base,
        })
    }

    /// Case-insensitive admin allowlist check.
    #[must_use]
    pub fn is_admin_username(&self, username: &str) -> bool {
        self.admins.contains(&username.to_ascii_lowercase())
    }

    /// `tokens_default_duration` as a `chrono::Duration`, for handing to a
    /// [`crate::token_service::CreateTokenRequest`].
    #[must_use]
    pub fn tokens_default_duration_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.tokens_default_duration).unwrap_or(chrono::Duration::hours(1))
    }

    /// `tokens_max_duration` as a `chrono::Duration`, for handing to
    /// [`crate::token_service::TokenService::new`].
    #[must_use]
    pub fn tokens_max_duration_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.tokens_max_duration).unwrap_or(chrono::Duration::days(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "ENCRYPTION_KEY",
            "GITHUB_CLIENT_ID",
            "GITHUB_CLIENT_SECRET",
            "TOKENS_DEFAULT_DURATION",
            "TOKENS_MAX_DURATION",
            "DEV_MODE",
            "ADMINS",
            "HTTP_PORT",
            "BIND_ADDRESS",
            "DATABASE_URL",
            "RUST_LOG",
            "LOG_FORMAT",
            "GITHUB_API_BASE",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn missing_encryption_key_is_fatal() {
        clear_env();
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn defaults_are_applied_when_optional_vars_absent() {
        clear_env();
        std::env::set_var("ENCRYPTION_KEY", "ab".repeat(32));
        let config = Config::from_env().expect("load");
        assert_eq!(config.tokens_default_duration, Duration::from_secs(DEFAULT_TOKEN_DURATION_SECS));
        assert!(!config.dev_mode);
        assert!(config.admins.is_empty());
        clear_env();
    }

    #[test]
    #[serial]
    fn admin_check_is_case_insensitive() {
        clear_env();
        std::env::set_var("ENCRYPTION_KEY", "ab".repeat(32));
        std::env::set_var("ADMINS", "Alice, bob");
        let config = Config::from_env().expect("load");
        assert!(config.is_admin_username("alice"));
        assert!(config.is_admin_username("BOB"));
        assert!(!config.is_admin_username("carol"));
        clear_env();
    }
}
