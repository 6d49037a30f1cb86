//! Connect budget and teardown.
//!
//! The supervisor owns the single connect deadline of a connection and the
//! teardown sequence every terminal transition goes through.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant, Sleep};

use crate::client::registry::Registry;
use crate::client::transport::Transport;

/// Default time allowed to reach `Authenticated`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline and teardown owner for one connection.
#[derive(Debug)]
pub struct Supervisor {
    budget: Duration,
    deadline: Option<Pin<Box<Sleep>>>,
    registry: Arc<Registry>,
}

impl Supervisor {
    /// Creates a supervisor whose deadline is already armed.
    ///
    /// `started` is when the caller began connecting; the budget runs from
    /// there so the transport open and the handshake share one timer.
    pub fn new(registry: Arc<Registry>, budget: Duration, started: Instant) -> Self {
        Self {
            budget,
            deadline: Some(Box::pin(sleep_until(started + budget))),
            registry,
        }
    }

    /// The configured budget.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Whether the deadline is still pending.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarms the deadline. Returns `true` if it was armed.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Completes when the deadline fires; never completes once cancelled.
    pub async fn expired(&mut self) {
        match self.deadline.as_mut() {
            Some(deadline) => {
                deadline.as_mut().await;
                self.deadline = None;
            }
            None => pending::<()>().await,
        }
    }

    /// Stops the transport, disarms the deadline and clears the registry.
    pub fn teardown(&mut self, transport: &mut Transport) {
        transport.close();
        if self.cancel() {
            tracing::debug!("connect deadline cancelled by teardown");
        }
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::registry::RequestKind;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_deadline_fires_after_budget() {
        let registry = Arc::new(Registry::new());
        let mut supervisor =
            Supervisor::new(registry, Duration::from_millis(20), Instant::now());
        assert!(supervisor.is_armed());

        let fired = timeout(Duration::from_secs(1), supervisor.expired()).await;
        assert!(fired.is_ok(), "deadline should fire within the test window");
        assert!(!supervisor.is_armed());
    }

    #[tokio::test]
    async fn test_cancelled_deadline_never_fires() {
        let registry = Arc::new(Registry::new());
        let mut supervisor =
            Supervisor::new(registry, Duration::from_millis(10), Instant::now());
        assert!(supervisor.cancel());
        assert!(!supervisor.cancel(), "second cancel is a no-op");

        let fired = timeout(Duration::from_millis(50), supervisor.expired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_budget_counts_from_start() {
        let registry = Arc::new(Registry::new());
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut supervisor = Supervisor::new(registry, Duration::from_millis(200), started);

        let fired = timeout(Duration::from_millis(100), supervisor.expired()).await;
        assert!(fired.is_ok(), "a budget already spent should fire immediately");
    }

    #[tokio::test]
    async fn test_teardown_clears_everything() {
        let registry = Arc::new(Registry::new());
        let id = registry.next_id();
        registry.register(id, RequestKind::Subscription, Arc::new(|_| {}));

        let (mut transport, _events, mut peer) = Transport::loopback();
        let mut supervisor = Supervisor::new(
            Arc::clone(&registry),
            DEFAULT_CONNECT_TIMEOUT,
            Instant::now(),
        );

        supervisor.teardown(&mut transport);

        assert!(!supervisor.is_armed());
        assert!(!transport.is_open());
        assert!(peer.was_closed());
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.next_id(), 1);
    }
}
