//! Error types for hub client operations.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the caller of `HubClient::connect`.
///
/// Everything after a successful connect is absorbed and logged instead of
/// being returned.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The address could not be turned into a WebSocket request.
    #[error("Invalid hub address '{address}': {reason}")]
    InvalidAddress {
        /// Address as given by the caller.
        address: String,
        /// Why the address was refused.
        reason: String,
    },

    /// The connection never opened or dropped before authentication finished.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The hub rejected the credential.
    #[error("Authentication rejected by hub: {}", .0.as_deref().unwrap_or("no reason given"))]
    AuthInvalid(Option<String>),

    /// The hub did not authenticate the connection within the budget.
    #[error("Hub did not authenticate within {0:?}")]
    Timeout(Duration),

    /// The connection was closed before authentication finished.
    #[error("Connection closed before authentication completed")]
    Closed,
}
