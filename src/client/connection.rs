//! Per-connection actor.
//!
//! One task owns the transport events, the handshake machine, the connect
//! deadline and the resync engine. Events are handled strictly in arrival
//! order; the application talks to the task through [`Command`]s and reads
//! the published [`Phase`].

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use crate::client::auth::{AuthMachine, AuthStep, Control, Phase};
use crate::client::registry::Registry;
use crate::client::resync::{ResyncEngine, SnapshotSender};
use crate::client::supervisor::Supervisor;
use crate::client::transport::{Transport, TransportEvent, TransportEvents};
use crate::client::ClientError;
use crate::protocol::{Inbound, Outbound, Reply};

/// Resolves once with the result of the handshake.
pub(crate) type Outcome = oneshot::Receiver<Result<(), ClientError>>;

/// Requests from the application to the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// State owned by the connection task.
pub(crate) struct Connection {
    transport: Transport,
    events: TransportEvents,
    auth: AuthMachine,
    registry: Arc<Registry>,
    supervisor: Supervisor,
    engine: ResyncEngine,
    credential: String,
    phase: watch::Sender<Phase>,
    outcome: Option<oneshot::Sender<Result<(), ClientError>>>,
    commands: mpsc::UnboundedReceiver<Command>,
}

/// Everything the application keeps to talk to a running connection.
pub(crate) struct Parts {
    pub connection: Connection,
    pub phase: watch::Receiver<Phase>,
    pub commands: mpsc::UnboundedSender<Command>,
    pub outcome: Outcome,
}

impl Connection {
    /// Wires up a connection around an open transport.
    ///
    /// # Arguments
    ///
    /// * `transport` / `events` - An open transport and its event receiver.
    /// * `registry` - Correlation registry shared with the dispatcher.
    /// * `snapshots` - Where refreshed snapshots are delivered.
    /// * `credential` - Access token sent in answer to `auth_required`.
    /// * `supervisor` - Armed connect deadline for this connection.
    pub fn new(
        transport: Transport,
        events: TransportEvents,
        registry: Arc<Registry>,
        snapshots: SnapshotSender,
        credential: String,
        supervisor: Supervisor,
    ) -> Parts {
        let (phase_tx, phase_rx) = watch::channel(Phase::Connecting);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let engine = ResyncEngine::new(Arc::clone(&registry), transport.sender(), snapshots);

        let connection = Self {
            transport,
            events,
            auth: AuthMachine::new(),
            registry,
            supervisor,
            engine,
            credential,
            phase: phase_tx,
            outcome: Some(outcome_tx),
            commands: commands_rx,
        };

        Parts {
            connection,
            phase: phase_rx,
            commands: commands_tx,
            outcome: outcome_rx,
        }
    }

    /// Processes events until the connection reaches a terminal phase.
    pub async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                biased;
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Disconnect) => tracing::debug!("disconnect requested"),
                        None => tracing::debug!("client handle dropped, disconnecting"),
                    }
                    self.disconnect();
                    Flow::Stop
                }
                _ = self.supervisor.expired() => self.on_timeout(),
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => self.on_transport_error("transport task exited".to_string()),
                },
            };

            if flow == Flow::Stop {
                break;
            }
        }

        self.transport.join().await;
        tracing::debug!(phase = %self.auth.phase(), "connection task finished");
    }

    fn on_event(&mut self, event: TransportEvent) -> Flow {
        match event {
            TransportEvent::Open => {
                tracing::debug!("transport open, waiting for auth_required");
                Flow::Continue
            }
            TransportEvent::Message(raw) => self.on_message(&raw),
            TransportEvent::Error(cause) => self.on_transport_error(cause),
            TransportEvent::Close { code, reason } => self.on_peer_close(code, reason),
        }
    }

    fn on_message(&mut self, raw: &str) -> Flow {
        let message = match Inbound::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("dropping unparseable frame: {}", e);
                return Flow::Continue;
            }
        };

        match message {
            Inbound::AuthRequired { ha_version } => self.on_control(
                Control::AuthRequired {
                    hub_version: ha_version,
                },
                None,
            ),
            Inbound::AuthOk { ha_version } => self.on_control(
                Control::AuthOk {
                    hub_version: ha_version,
                },
                None,
            ),
            Inbound::AuthInvalid { message } => self.on_control(Control::AuthInvalid, message),
            Inbound::Unknown => {
                tracing::debug!("dropping message of unknown type");
                Flow::Continue
            }
            correlated => {
                self.on_reply(correlated);
                Flow::Continue
            }
        }
    }

    fn on_control(&mut self, control: Control, reason: Option<String>) -> Flow {
        match self.auth.on_control(control) {
            AuthStep::SendCredential => {
                tracing::debug!(
                    hub_version = self.auth.hub_version().unwrap_or("unknown"),
                    "hub requested authentication"
                );
                self.publish();
                self.transport.send(&Outbound::Auth {
                    access_token: self.credential.clone(),
                });
                Flow::Continue
            }
            AuthStep::Authenticated => {
                self.supervisor.cancel();
                tracing::info!(
                    hub_version = self.auth.hub_version().unwrap_or("unknown"),
                    "authenticated"
                );
                // Subscription requests go out before the phase becomes visible
                // to dispatchers.
                self.engine.start();
                self.publish();
                self.settle(Ok(()));
                Flow::Continue
            }
            AuthStep::Rejected => {
                tracing::error!(
                    "authentication rejected: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.supervisor.teardown(&mut self.transport);
                self.publish();
                self.settle(Err(ClientError::AuthInvalid(reason)));
                Flow::Stop
            }
            AuthStep::Ignored => Flow::Continue,
        }
    }

    fn on_reply(&mut self, message: Inbound) {
        if !self.auth.accepts_replies() {
            tracing::debug!(
                id = ?message.id(),
                phase = %self.auth.phase(),
                "dropping reply received before authentication"
            );
            return;
        }

        if let Some((id, reply)) = Reply::from_inbound(message) {
            if !self.registry.resolve(id, reply) {
                tracing::debug!(id, "dropping unmatched reply");
            }
        }
    }

    fn on_timeout(&mut self) -> Flow {
        let budget = self.supervisor.budget();
        tracing::warn!(phase = %self.auth.phase(), "not authenticated within {:?}", budget);
        self.auth.fail();
        self.supervisor.teardown(&mut self.transport);
        self.publish();
        self.settle(Err(ClientError::Timeout(budget)));
        Flow::Stop
    }

    fn on_transport_error(&mut self, cause: String) -> Flow {
        if self.auth.fail() {
            tracing::error!(phase = %self.auth.phase(), "transport failed: {}", cause);
        }
        self.supervisor.teardown(&mut self.transport);
        self.publish();
        self.settle(Err(ClientError::Transport(cause)));
        Flow::Stop
    }

    fn on_peer_close(&mut self, code: u16, reason: String) -> Flow {
        if self.auth.closed_by_peer() {
            tracing::info!(code, %reason, "hub closed the connection");
        }
        self.supervisor.teardown(&mut self.transport);
        self.publish();
        self.settle(Err(ClientError::Closed));
        Flow::Stop
    }

    fn disconnect(&mut self) {
        self.auth.close();
        self.supervisor.teardown(&mut self.transport);
        self.publish();
        self.settle(Err(ClientError::Closed));
    }

    fn publish(&self) {
        self.phase.send_replace(self.auth.phase());
    }

    /// Resolves the pending `connect()` the first time only.
    fn settle(&mut self, result: Result<(), ClientError>) {
        if let Some(outcome) = self.outcome.take() {
            let _ = outcome.send(result);
        }
    }
}
