//! Default configuration template and file creation.
//!
//! The template is commented TOML whose values match `Config::default()`.

use std::fs;
use std::path::Path;

use crate::config::error::ConfigError;
use crate::config::xdg;

// ---------------------------------------------------------------------------
// Default TOML template
// ---------------------------------------------------------------------------

/// Commented TOML template with all default values.
///
/// Every value here must match `Config::default()` from `schema.rs`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# hublink configuration
#
# This file was generated with the built-in defaults.
# Location: $XDG_CONFIG_HOME/hublink/config.toml

# ==============================================================================
# Hub connection
# ==============================================================================

[hub]

# WebSocket endpoint of the hub.
# Use wss:// when the hub sits behind TLS.
url = "ws://homeassistant.local:8123/api/websocket"

# Long-lived access token.
# Leave empty to read the token from the variable named below instead;
# keeping secrets out of this file is recommended.
access_token = ""

# Environment variable holding the access token.
access_token_env = "HUBLINK_TOKEN"

# Time allowed to open the socket and finish authentication.
# Examples: "10s", "30s", "1500ms"
connect_timeout = "10s"

# ==============================================================================
# Logging
# ==============================================================================

[logging]

# Verbosity when HUBLINK_LOG is not set.
# Options: "error", "warn", "info", "debug", "trace"
#   info  - connection lifecycle and service calls (recommended)
#   debug - every resync, subscription ack and dropped reply
level = "info"
"#;

// ---------------------------------------------------------------------------
// File creation
// ---------------------------------------------------------------------------

/// Writes the template to `path`.
///
/// - If the file exists and `force` is `false`, returns `ConfigError::AlreadyExists`.
/// - If the file exists and `force` is `true`, backs it up to `.toml.backup` first.
pub fn create_default_config(path: &Path, force: bool) -> Result<(), ConfigError> {
    if path.exists() {
        if !force {
            return Err(ConfigError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let backup_path = path.with_extension("toml.backup");
        fs::rename(path, &backup_path).map_err(|e| ConfigError::WriteError {
            path: backup_path.clone(),
            source: e,
        })?;
        tracing::info!("Backed up existing config to {}", backup_path.display());
    }

    write_default_config(path)?;
    tracing::info!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Writes the template, creating parent dirs and setting 0600 permissions.
fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    let write_error = |e| ConfigError::WriteError {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        xdg::ensure_dir(parent).map_err(write_error)?;
    }

    fs::write(path, DEFAULT_CONFIG_TEMPLATE).map_err(write_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(write_error)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
