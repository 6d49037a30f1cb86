//! TOML configuration schema types for hublink.
//!
//! All structs derive `Deserialize` and `Serialize` with defaults via
//! `#[serde(default)]`, so a partial or empty file is valid.
//!
//! Duration fields use human-readable strings (e.g. `"10s"`, `"1500ms"`)
//! parsed by the `humantime` crate on access.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::error::ConfigError;

/// Environment variable consulted for the token when none is configured.
pub const DEFAULT_TOKEN_ENV: &str = "HUBLINK_TOKEN";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
///
/// ```toml
/// [hub]
/// [logging]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Hub connection settings.
    pub hub: HubConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

impl Config {
    /// Checks every field that can parse but still be unusable.
    ///
    /// The access token is not checked here; it may legitimately come from
    /// the environment or the command line.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hub.validate_url()?;
        self.hub.connect_timeout()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Connection settings from the `[hub]` section.
///
/// `Debug` never prints the access token.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// WebSocket endpoint of the hub.
    pub url: String,
    /// Long-lived access token. Empty means "read `access_token_env`".
    pub access_token: String,
    /// Environment variable holding the token.
    pub access_token_env: String,
    /// Budget for opening the socket and completing the handshake.
    pub connect_timeout: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: "ws://homeassistant.local:8123/api/websocket".to_string(),
            access_token: String::new(),
            access_token_env: DEFAULT_TOKEN_ENV.to_string(),
            connect_timeout: "10s".to_string(),
        }
    }
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.access_token.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("HubConfig")
            .field("url", &self.url)
            .field("access_token", &format_args!("{token}"))
            .field("access_token_env", &self.access_token_env)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl HubConfig {
    /// Parses `connect_timeout`.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` if the string is not a duration or is zero.
    pub fn connect_timeout(&self) -> Result<Duration, ConfigError> {
        let timeout = humantime::parse_duration(&self.connect_timeout).map_err(|e| {
            ConfigError::InvalidValue {
                field: "hub.connect_timeout",
                value: self.connect_timeout.clone(),
                message: e.to_string(),
            }
        })?;
        if timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "hub.connect_timeout",
                value: self.connect_timeout.clone(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(timeout)
    }

    /// Resolves the access token.
    ///
    /// Uses `access_token` when set, otherwise the environment variable
    /// named by `access_token_env`. Blank values count as unset.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if !self.access_token.trim().is_empty() {
            return Ok(self.access_token.trim().to_string());
        }
        match std::env::var(&self.access_token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(ConfigError::MissingToken {
                env_var: self.access_token_env.clone(),
            }),
        }
    }

    fn validate_url(&self) -> Result<(), ConfigError> {
        let scheme_ok = self.url.starts_with("ws://") || self.url.starts_with("wss://");
        if !scheme_ok {
            return Err(ConfigError::InvalidValue {
                field: "hub.url",
                value: self.url.clone(),
                message: "expected a ws:// or wss:// URL".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Settings from the `[logging]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Verbosity used when `HUBLINK_LOG` is not set.
    pub level: LogLevel,
}

/// Log verbosity levels (kebab-case in TOML).
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    /// Only errors.
    Error,
    /// Errors and warnings.
    Warn,
    /// Informational messages (default).
    #[default]
    Info,
    /// Debug-level detail.
    Debug,
    /// Full trace output.
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
