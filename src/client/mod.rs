//! Hub client.
//!
//! [`HubClient`] is the application-facing handle. Each successful
//! [`HubClient::connect`] starts one connection task that authenticates,
//! fetches the full state and keeps it fresh; refreshed snapshots arrive on
//! the receiver returned by [`HubClient::snapshots`].
//!
//! # Modules
//!
//! - [`transport`]: the WebSocket and its pump task
//! - [`auth`]: the handshake state machine
//! - [`registry`]: id allocation and reply correlation
//! - [`resync`]: the `state_changed` subscription and full refetch
//! - [`dispatch`]: fire-and-forget service calls
//! - [`supervisor`]: connect deadline and teardown
//!
//! # Failure model
//!
//! `connect()` is the only call that reports handshake failures. Once
//! authenticated, a dropped transport silently stops snapshot delivery and
//! [`HubClient::is_connected`] turns `false`; reconnecting is the caller's
//! decision.

pub mod auth;
mod connection;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod resync;
pub mod supervisor;
pub mod transport;

pub use auth::Phase;
pub use dispatch::ServiceCall;
pub use error::ClientError;
pub use resync::SnapshotReceiver;

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use connection::{Command, Connection, Outcome};
use registry::Registry;
use resync::SnapshotSender;
use supervisor::Supervisor;
use transport::{Transport, TransportEvents, TransportSender};

/// Handle to a running connection task.
struct ConnectionHandle {
    phase: watch::Receiver<Phase>,
    registry: Arc<Registry>,
    sender: TransportSender,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Application-facing client for one hub.
///
/// Holds at most one connection at a time. The snapshot channel outlives
/// individual connections, so a reconnect keeps feeding the same receiver.
pub struct HubClient {
    connect_timeout: Duration,
    snapshots_tx: SnapshotSender,
    snapshots_rx: Option<SnapshotReceiver>,
    connection: Option<ConnectionHandle>,
}

impl HubClient {
    /// Creates a disconnected client.
    ///
    /// # Arguments
    ///
    /// * `connect_timeout` - Budget for reaching `Authenticated`, counted
    ///   from the start of `connect()`.
    pub fn new(connect_timeout: Duration) -> Self {
        let (snapshots_tx, snapshots_rx) = mpsc::unbounded_channel();
        Self {
            connect_timeout,
            snapshots_tx,
            snapshots_rx: Some(snapshots_rx),
            connection: None,
        }
    }

    /// Takes the snapshot receiver.
    ///
    /// Returns `None` after the first call; there is a single consumer.
    pub fn snapshots(&mut self) -> Option<SnapshotReceiver> {
        self.snapshots_rx.take()
    }

    /// Opens a connection and waits until it is authenticated.
    ///
    /// Any existing connection is closed first.
    ///
    /// # Arguments
    ///
    /// * `address` - WebSocket URL, e.g. `ws://hub.local:8123/api/websocket`.
    /// * `credential` - Long-lived access token.
    ///
    /// # Errors
    ///
    /// * `ClientError::InvalidAddress` if `address` is not a WebSocket URL.
    /// * `ClientError::Transport` if the socket cannot be opened or fails
    ///   during the handshake.
    /// * `ClientError::AuthInvalid` if the hub rejects the credential.
    /// * `ClientError::Timeout` if the budget runs out first.
    /// * `ClientError::Closed` if the hub closes the socket during the handshake.
    pub async fn connect(&mut self, address: &str, credential: &str) -> Result<(), ClientError> {
        self.disconnect().await;

        let started = Instant::now();
        tracing::info!(address, "connecting");

        let (transport, events) =
            match timeout_at(started + self.connect_timeout, Transport::open(address)).await {
                Ok(opened) => opened?,
                Err(_) => {
                    tracing::warn!(address, "transport did not open within {:?}", self.connect_timeout);
                    return Err(ClientError::Timeout(self.connect_timeout));
                }
            };

        let outcome = self.attach(transport, events, credential, started);
        outcome.await.unwrap_or(Err(ClientError::Closed))
    }

    /// Starts a connection task over an already-open transport.
    pub(crate) fn attach(
        &mut self,
        transport: Transport,
        events: TransportEvents,
        credential: &str,
        started: Instant,
    ) -> Outcome {
        let registry = Arc::new(Registry::new());
        let sender = transport.sender();
        let supervisor = Supervisor::new(Arc::clone(&registry), self.connect_timeout, started);

        let parts = Connection::new(
            transport,
            events,
            Arc::clone(&registry),
            self.snapshots_tx.clone(),
            credential.to_string(),
            supervisor,
        );
        let task = tokio::spawn(parts.connection.run());

        self.connection = Some(ConnectionHandle {
            phase: parts.phase,
            registry,
            sender,
            commands: parts.commands,
            task,
        });
        parts.outcome
    }

    /// Closes the current connection, if any, and waits for its task to end.
    ///
    /// Outstanding requests are discarded; replies that arrive later are
    /// ignored.
    pub async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.commands.send(Command::Disconnect);
            if let Err(e) = connection.task.await {
                tracing::error!("connection task failed: {}", e);
            }
            tracing::info!("disconnected");
        }
    }

    /// Current phase; `Closed` when no connection exists.
    pub fn phase(&self) -> Phase {
        self.connection
            .as_ref()
            .map(|c| *c.phase.borrow())
            .unwrap_or(Phase::Closed)
    }

    /// Waits until the current connection reaches a terminal phase.
    ///
    /// Returns immediately with `Closed` when there is no connection.
    pub async fn closed(&self) -> Phase {
        let Some(connection) = &self.connection else {
            return Phase::Closed;
        };
        let mut phase = connection.phase.clone();
        let reached = phase.wait_for(|p| p.is_terminal()).await.map(|p| *p);
        reached.unwrap_or_else(|_| *phase.borrow())
    }

    /// Whether the current connection is authenticated.
    pub fn is_connected(&self) -> bool {
        self.phase() == Phase::Authenticated
    }

    /// Sends a fire-and-forget service call.
    ///
    /// Returns `false` without sending when not authenticated (a warning is
    /// logged) or when the transport refuses the message.
    pub fn dispatch(
        &self,
        domain: &str,
        service: &str,
        target: &str,
        params: Map<String, Value>,
    ) -> bool {
        let call = ServiceCall::new(domain, service, target).with_params(params);
        match &self.connection {
            Some(connection) => {
                let phase = *connection.phase.borrow();
                dispatch::dispatch(phase, &connection.registry, &connection.sender, call)
            }
            None => {
                tracing::warn!(
                    domain,
                    service,
                    target,
                    "dropping service call: no connection"
                );
                false
            }
        }
    }
}

impl Default for HubClient {
    fn default() -> Self {
        Self::new(supervisor::DEFAULT_CONNECT_TIMEOUT)
    }
}
