//! Message correlation registry.
//!
//! Hands out request identifiers and keeps the completion for every request
//! that expects a reply. The counter and the pending map sit behind a single
//! mutex so that `clear()` resets both as one unit.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::protocol::Reply;

/// Completion invoked with the reply for a registered request.
pub type Completion = Arc<dyn Fn(Reply) + Send + Sync>;

/// Whether a pending entry survives its first reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Removed after the first matching reply.
    OneShot,
    /// Kept until the registry is cleared; may fire many times.
    Subscription,
}

struct Pending {
    kind: RequestKind,
    completion: Completion,
}

struct RegistryState {
    next_id: u64,
    pending: HashMap<u64, Pending>,
}

impl RegistryState {
    fn fresh() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }
}

/// Id allocator and pending-request table for one connection.
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Creates an empty registry whose first id is 1.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::fresh()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // A panicking completion never runs under the lock, so a poisoned
        // guard still holds consistent data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the next request identifier. Never repeats until `clear()`.
    pub fn next_id(&self) -> u64 {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    /// Allocates the next id and passes it to `send` with the lock held.
    ///
    /// Concurrent callers therefore enqueue their frames in id order. `send`
    /// must not block or call back into the registry.
    pub fn send_next(&self, send: impl FnOnce(u64) -> bool) -> bool {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        send(id)
    }

    /// Like [`Registry::send_next`], but registers the completion built by
    /// `completion` before the frame is sent.
    pub fn send_registered(
        &self,
        kind: RequestKind,
        completion: impl FnOnce(u64) -> Completion,
        send: impl FnOnce(u64) -> bool,
    ) -> bool {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let pending = Pending {
            kind,
            completion: completion(id),
        };
        if state.pending.insert(id, pending).is_some() {
            tracing::warn!(id, "replaced an existing pending request");
        }
        send(id)
    }

    /// Stores the completion for `id`, replacing any previous entry.
    pub fn register(&self, id: u64, kind: RequestKind, completion: Completion) {
        let mut state = self.lock();
        if state.pending.insert(id, Pending { kind, completion }).is_some() {
            tracing::warn!(id, "replaced an existing pending request");
        }
    }

    /// Routes a reply to the completion registered for `id`.
    ///
    /// Returns `false` when no entry exists (never registered, already
    /// resolved, or cleared by teardown). One-shot entries are removed before
    /// their completion runs; the completion itself runs without the lock
    /// held, so it may register further requests.
    pub fn resolve(&self, id: u64, reply: Reply) -> bool {
        let completion = {
            let mut state = self.lock();
            let kind = match state.pending.get(&id) {
                Some(pending) => pending.kind,
                None => return false,
            };
            match kind {
                RequestKind::OneShot => state.pending.remove(&id).map(|p| p.completion),
                RequestKind::Subscription => {
                    state.pending.get(&id).map(|p| Arc::clone(&p.completion))
                }
            }
        };
        match completion {
            Some(completion) => {
                completion(reply);
                true
            }
            None => false,
        }
    }

    /// Drops every pending entry and resets the counter to 1.
    pub fn clear(&self) {
        let mut state = self.lock();
        *state = RegistryState::fresh();
    }

    /// Number of entries still awaiting a reply (subscriptions included).
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of standing subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock()
            .pending
            .values()
            .filter(|p| p.kind == RequestKind::Subscription)
            .count()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Registry")
            .field("next_id", &state.next_id)
            .field("pending", &state.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HubEvent;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok_reply() -> Reply {
        Reply::Result {
            success: true,
            result: None,
            error: None,
        }
    }

    fn event_reply() -> Reply {
        Reply::Event(HubEvent {
            event_type: "state_changed".to_string(),
            data: serde_json::Value::Null,
            time_fired: None,
        })
    }

    /// Completion that counts its invocations.
    fn counting() -> (Completion, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let completion: Completion = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (completion, count)
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let registry = Registry::new();
        let ids: Vec<u64> = (0..100).map(|_| registry.next_id()).collect();
        assert_eq!(ids[0], 1);
        for pair in ids.windows(2) {
            assert!(pair[1] > pair[0], "ids must be strictly increasing");
        }
    }

    #[test]
    fn test_ids_unique_under_concurrency() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || (0..250).map(|_| registry.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {} handed out twice", id);
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn test_one_shot_fires_once() {
        let registry = Registry::new();
        let (completion, count) = counting();
        let id = registry.next_id();
        registry.register(id, RequestKind::OneShot, completion);

        assert!(registry.resolve(id, ok_reply()));
        assert!(!registry.resolve(id, ok_reply()), "duplicate delivery must be dropped");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_subscription_is_retained() {
        let registry = Registry::new();
        let (completion, count) = counting();
        let id = registry.next_id();
        registry.register(id, RequestKind::Subscription, completion);

        for _ in 0..5 {
            assert!(registry.resolve(id, event_reply()));
        }
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert_eq!(registry.subscription_count(), 1);
    }

    #[test]
    fn test_unknown_id_returns_false() {
        let registry = Registry::new();
        assert!(!registry.resolve(7, ok_reply()));
    }

    #[test]
    fn test_clear_drops_pending_and_resets_counter() {
        let registry = Registry::new();
        let (completion, count) = counting();
        let id = registry.next_id();
        registry.register(id, RequestKind::OneShot, completion);
        registry.next_id();

        registry.clear();

        assert!(!registry.resolve(id, ok_reply()), "stale reply must be ignored");
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.next_id(), 1);
    }

    #[test]
    fn test_completion_may_register_without_deadlock() {
        let registry = Arc::new(Registry::new());
        let inner = Arc::clone(&registry);
        let id = registry.next_id();
        registry.register(
            id,
            RequestKind::Subscription,
            Arc::new(move |_| {
                let next = inner.next_id();
                inner.register(next, RequestKind::OneShot, Arc::new(|_| {}));
            }),
        );

        assert!(registry.resolve(id, event_reply()));
        assert!(registry.resolve(id, event_reply()));
        assert_eq!(registry.pending_count(), 3);
    }

    #[test]
    fn test_send_registered_registers_then_sends() {
        let registry = Registry::new();
        let (completion, count) = counting();
        let mut seen = None;

        let sent = registry.send_registered(
            RequestKind::OneShot,
            |_| completion,
            |id| {
                seen = Some(id);
                true
            },
        );
        assert!(sent);
        assert_eq!(seen, Some(1));
        assert_eq!(registry.pending_count(), 1);

        assert!(registry.resolve(1, event_reply()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_next_reports_refusal_and_still_consumes_id() {
        let registry = Registry::new();
        assert!(!registry.send_next(|id| {
            assert_eq!(id, 1);
            false
        }));
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.next_id(), 2);
    }

    #[test]
    fn test_debug_format() {
        let registry = Registry::new();
        registry.next_id();
        let debug_str = format!("{:?}", registry);
        assert!(debug_str.contains("next_id: 2"));
    }
}
