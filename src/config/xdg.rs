//! Platform-aware path resolution for hublink.
//!
//! On **Linux**, follows the XDG Base Directory Specification:
//! `$XDG_CONFIG_HOME/hublink` or `~/.config/hublink`.
//!
//! On **macOS**, uses Apple conventions with the XDG env var override:
//! `$XDG_CONFIG_HOME/hublink` or `~/Library/Application Support/hublink`.

use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "hublink";

/// Returns the configuration directory for hublink.
///
/// Resolution order:
/// 1. `$XDG_CONFIG_HOME/hublink` (if env var set, any platform)
/// 2. Platform default (see module docs)
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join(APP_NAME);
        }
    }
    platform_config_dir().join(APP_NAME)
}

/// Platform-native config base directory (without XDG override).
///
/// Falls back to a relative `.config` when no home directory is known.
fn platform_config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::home_dir()
            .map(|home| home.join(".config"))
            .unwrap_or_else(|| PathBuf::from(".config"))
    }
}

/// Returns the path to the main configuration file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Creates a directory and all parent directories with mode 0700.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}
