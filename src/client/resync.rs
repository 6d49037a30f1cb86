//! Subscription and resync engine.
//!
//! After authentication the engine fetches the full state once, then holds a
//! standing `state_changed` subscription. Every notification triggers another
//! full fetch; the result replaces the application's snapshot wholesale.
//! There is no filtering by entity and no coalescing, so a busy hub produces
//! one full fetch per event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

use crate::client::registry::{Completion, Registry, RequestKind};
use crate::client::transport::TransportSender;
use crate::protocol::{Outbound, Reply, STATE_CHANGED};
use crate::Snapshot;

/// Sending side of the application's snapshot channel.
pub type SnapshotSender = mpsc::UnboundedSender<Snapshot>;

/// Receiving side of the application's snapshot channel.
pub type SnapshotReceiver = mpsc::UnboundedReceiver<Snapshot>;

struct Engine {
    registry: Arc<Registry>,
    sender: TransportSender,
    snapshots: SnapshotSender,
    fetches: AtomicU64,
    delivered: AtomicU64,
}

/// Resync engine for one connection.
///
/// Completions stored in the registry hold only a weak reference, so
/// dropping the engine turns late replies into no-ops.
pub struct ResyncEngine {
    inner: Arc<Engine>,
}

impl ResyncEngine {
    /// Creates an engine that sends through `sender` and delivers to `snapshots`.
    pub fn new(registry: Arc<Registry>, sender: TransportSender, snapshots: SnapshotSender) -> Self {
        Self {
            inner: Arc::new(Engine {
                registry,
                sender,
                snapshots,
                fetches: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
            }),
        }
    }

    /// Sends the initial `get_states` followed by the `state_changed` subscription.
    pub fn start(&self) {
        self.inner.request_states();
        self.inner.subscribe();
    }

    /// Number of `get_states` requests issued so far.
    pub fn fetches(&self) -> u64 {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    /// Number of snapshots handed to the application so far.
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::SeqCst)
    }
}

impl Engine {
    fn request_states(self: &Arc<Self>) {
        let engine = Arc::downgrade(self);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.registry.send_registered(
            RequestKind::OneShot,
            move |id| -> Completion {
                Arc::new(move |reply| with_engine(&engine, |e| e.on_states(id, reply)))
            },
            |id| {
                tracing::debug!(id, "requesting full state");
                self.sender.send(&Outbound::GetStates { id })
            },
        );
    }

    fn subscribe(self: &Arc<Self>) {
        let engine = Arc::downgrade(self);
        self.registry.send_registered(
            RequestKind::Subscription,
            move |id| -> Completion {
                Arc::new(move |reply| with_engine(&engine, |e| e.on_notification(id, reply)))
            },
            |id| {
                tracing::debug!(id, "subscribing to {}", STATE_CHANGED);
                self.sender.send(&Outbound::SubscribeEvents {
                    id,
                    event_type: STATE_CHANGED.to_string(),
                })
            },
        );
    }

    fn on_states(&self, id: u64, reply: Reply) {
        let result = match reply {
            Reply::Result {
                success: true,
                result,
                ..
            } => result.unwrap_or_default(),
            Reply::Result {
                success: false,
                error,
                ..
            } => {
                match error {
                    Some(error) => tracing::warn!(
                        id,
                        code = %error.code,
                        "get_states failed, keeping previous snapshot: {}",
                        error.message
                    ),
                    None => tracing::warn!(id, "get_states failed, keeping previous snapshot"),
                }
                return;
            }
            Reply::Event(_) => {
                tracing::warn!(id, "unexpected event on a get_states request");
                return;
            }
        };

        let snapshot = match Snapshot::from_result(result) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(id, "unreadable get_states result, keeping previous snapshot: {}", e);
                return;
            }
        };

        tracing::debug!(id, entities = snapshot.len(), "snapshot refreshed");
        if self.snapshots.send(snapshot).is_err() {
            tracing::debug!("snapshot receiver dropped, discarding snapshot");
            return;
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }

    fn on_notification(self: &Arc<Self>, id: u64, reply: Reply) {
        match reply {
            Reply::Event(event) => {
                tracing::debug!(
                    id,
                    event_type = %event.event_type,
                    entity_id = event.entity_id().unwrap_or("-"),
                    "change notification, resyncing"
                );
                self.request_states();
            }
            Reply::Result { success: true, .. } => {
                tracing::debug!(id, "subscription confirmed");
            }
            Reply::Result { error, .. } => {
                tracing::warn!(
                    id,
                    code = error.as_ref().map(|e| e.code.as_str()).unwrap_or("unknown"),
                    "hub rejected the {} subscription",
                    STATE_CHANGED
                );
            }
        }
    }
}

fn with_engine(engine: &Weak<Engine>, f: impl FnOnce(&Arc<Engine>)) {
    match engine.upgrade() {
        Some(engine) => f(&engine),
        None => tracing::debug!("reply arrived after the resync engine stopped"),
    }
}
