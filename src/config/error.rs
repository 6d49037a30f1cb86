//! Configuration error types for loading, validating and writing TOML config files.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading or parsing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read configuration file: {path}")]
    ReadError {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("Invalid configuration at {path}:{line}:{column}: {message}")]
    ParseError {
        /// Path to the file containing the error.
        path: PathBuf,
        /// One-based line index of the error (0 if unknown).
        line: usize,
        /// One-based column index of the error (0 if unknown).
        column: usize,
        /// Human-readable description of the parse failure.
        message: String,
    },

    /// An explicitly requested configuration file does not exist.
    #[error("{message}\nPath: {path}")]
    NotFound {
        /// Path that was requested but does not exist.
        path: PathBuf,
        /// Custom error message.
        message: String,
    },

    /// A configuration file already exists at the target path.
    #[error("Configuration file already exists: {path}")]
    AlreadyExists {
        /// Path where the file already exists.
        path: PathBuf,
    },

    /// Failed to write a configuration file to disk.
    #[error("Failed to write configuration file: {path}")]
    WriteError {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A field parsed but holds a value the client cannot use.
    #[error("Invalid value for {field} ({value:?}): {message}")]
    InvalidValue {
        /// Dotted field name, e.g. `hub.connect_timeout`.
        field: &'static str,
        /// The offending value as written.
        value: String,
        /// Why it was refused.
        message: String,
    },

    /// No access token in the file or in the named environment variable.
    #[error("No access token configured. Set hub.access_token or ${env_var}.")]
    MissingToken {
        /// Environment variable that was consulted.
        env_var: String,
    },
}
