//! Authentication state machine.
//!
//! A strict FSM over [`Phase`]. The machine only decides transitions; the
//! connection task performs the side effects named by the returned
//! [`AuthStep`].
//!
//! ```text
//! Connecting --auth_required--> AwaitingAuth --auth_ok--> Authenticated
//!     |                              |
//!     +------auth_invalid / error----+--> Failed
//! any state --close--> Closed
//! ```

use std::fmt;

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Transport opening, or open but no handshake message seen yet.
    Connecting,
    /// The hub asked for credentials and they have been sent.
    AwaitingAuth,
    /// Handshake complete; correlated requests are allowed.
    Authenticated,
    /// Closed cleanly or by the application.
    Closed,
    /// Rejected, timed out, or the transport failed.
    Failed,
}

impl Phase {
    /// Returns `true` for `Closed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Connecting => "connecting",
            Phase::AwaitingAuth => "awaiting_auth",
            Phase::Authenticated => "authenticated",
            Phase::Closed => "closed",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Handshake messages the hub initiates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// `auth_required`
    AuthRequired {
        /// Hub version, when reported.
        hub_version: Option<String>,
    },
    /// `auth_ok`
    AuthOk {
        /// Hub version, when reported.
        hub_version: Option<String>,
    },
    /// `auth_invalid`
    AuthInvalid,
}

/// What the connection must do after a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    /// Send the credential now.
    SendCredential,
    /// Handshake finished; start the resync engine.
    Authenticated,
    /// Credential refused; tear the connection down.
    Rejected,
    /// Message not valid in the current phase.
    Ignored,
}

/// Handshake state for one connection.
#[derive(Debug)]
pub struct AuthMachine {
    phase: Phase,
    hub_version: Option<String>,
}

impl AuthMachine {
    /// Starts in `Connecting`.
    pub fn new() -> Self {
        Self {
            phase: Phase::Connecting,
            hub_version: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Hub version reported during the handshake.
    pub fn hub_version(&self) -> Option<&str> {
        self.hub_version.as_deref()
    }

    /// Whether correlated replies may be routed to the registry.
    pub fn accepts_replies(&self) -> bool {
        self.phase == Phase::Authenticated
    }

    /// Applies a handshake message.
    pub fn on_control(&mut self, control: Control) -> AuthStep {
        match (self.phase, control) {
            (Phase::Connecting, Control::AuthRequired { hub_version }) => {
                self.remember_version(hub_version);
                self.phase = Phase::AwaitingAuth;
                AuthStep::SendCredential
            }
            (Phase::AwaitingAuth, Control::AuthOk { hub_version }) => {
                self.remember_version(hub_version);
                self.phase = Phase::Authenticated;
                AuthStep::Authenticated
            }
            (Phase::Connecting | Phase::AwaitingAuth, Control::AuthInvalid) => {
                self.phase = Phase::Failed;
                AuthStep::Rejected
            }
            (phase, control) => {
                tracing::warn!(%phase, ?control, "ignoring handshake message out of sequence");
                AuthStep::Ignored
            }
        }
    }

    /// Transport error or budget expiry. Returns `true` if the phase changed.
    pub fn fail(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = Phase::Failed;
        true
    }

    /// Clean close by the peer. Returns `true` if the phase changed.
    pub fn closed_by_peer(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = Phase::Closed;
        true
    }

    /// Application-requested close; always ends in `Closed`.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    fn remember_version(&mut self, hub_version: Option<String>) {
        if hub_version.is_some() {
            self.hub_version = hub_version;
        }
    }
}

impl Default for AuthMachine {
    fn default() -> Self {
        Self::new()
    }
}
