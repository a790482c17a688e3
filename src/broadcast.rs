//! Subscriber registry and snapshot fan-out.
//!
//! The registry is owned by the store actor, so registration, removal and
//! broadcast are serialized with state mutations: a subscriber always sees
//! the snapshot that was current when it registered, then every later one.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::StateSnapshot;

/// Identifies one subscriber endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Message pushed to subscribers.
///
/// Serializes as `{"type": "stateUpdate", "state": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Push {
    StateUpdate { state: StateSnapshot },
}

impl Push {
    /// The snapshot carried by this push.
    pub fn snapshot(&self) -> &StateSnapshot {
        match self {
            Push::StateUpdate { state } => state,
        }
    }
}

type Endpoint = mpsc::UnboundedSender<Push>;

/// Registry of live endpoints.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    endpoints: HashMap<SubscriberId, Endpoint>,
}

impl Subscribers {
    /// Register a new endpoint and push `current` to it alone.
    pub(crate) fn register(
        &mut self,
        current: &StateSnapshot,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<Push>) {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is still in hand, so this cannot fail.
        let _ = tx.send(Push::StateUpdate {
            state: current.clone(),
        });
        self.endpoints.insert(id, tx);
        tracing::debug!(subscriber = %id, total = self.endpoints.len(), "subscriber registered");
        (id, rx)
    }

    /// Remove an endpoint. Returns `false` if it was not registered.
    pub(crate) fn remove(&mut self, id: SubscriberId) -> bool {
        let removed = self.endpoints.remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = %id, total = self.endpoints.len(), "subscriber removed");
        }
        removed
    }

    /// Push `snapshot` to every endpoint.
    ///
    /// An endpoint whose receiver is gone is logged and pruned; delivery to
    /// the remaining endpoints continues. Returns the number of successful
    /// deliveries.
    pub(crate) fn broadcast(&mut self, snapshot: &StateSnapshot) -> usize {
        let mut delivered = 0;
        self.endpoints.retain(|id, endpoint| {
            let push = Push::StateUpdate {
                state: snapshot.clone(),
            };
            match endpoint.send(push) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    tracing::debug!(subscriber = %id, "failed to push state, pruning endpoint");
                    false
                }
            }
        });
        delivered
    }

    pub(crate) fn len(&self) -> usize {
        self.endpoints.len()
    }
}

/// Callback run when a [`Subscription`] is dropped.
pub(crate) type UnsubscribeHook = Box<dyn FnOnce(SubscriberId) + Send>;

/// Receiving side of one subscriber endpoint.
///
/// The first message is always the snapshot at registration time. Dropping
/// the subscription unregisters the endpoint.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Push>,
    on_drop: Option<UnsubscribeHook>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        rx: mpsc::UnboundedReceiver<Push>,
        on_drop: UnsubscribeHook,
    ) -> Self {
        Self {
            id,
            rx,
            on_drop: Some(on_drop),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next push.
    ///
    /// Returns `None` once the store has shut down or this endpoint has been
    /// unregistered.
    pub async fn recv(&mut self) -> Option<Push> {
        self.rx.recv().await
    }

    /// Take the next push if one is already queued.
    pub fn try_recv(&mut self) -> Option<Push> {
        self.rx.try_recv().ok()
    }

    /// Drain every queued push, returning the most recent one.
    pub fn latest(&mut self) -> Option<Push> {
        let mut last = None;
        while let Some(push) = self.try_recv() {
            last = Some(push);
        }
        last
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            hook(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SharedState;

    fn snapshot(active: bool) -> StateSnapshot {
        let mut state = SharedState::default();
        state.set_app_active(active);
        StateSnapshot::capture(&state, "test")
    }

    #[test]
    fn register_pushes_current_snapshot_to_new_endpoint_only() {
        let mut subs = Subscribers::default();
        let (_a, mut rx_a) = subs.register(&snapshot(false));
        // Drain A's initial push.
        assert!(rx_a.try_recv().is_ok());

        let (_b, mut rx_b) = subs.register(&snapshot(true));
        let first = rx_b.try_recv().expect("B should get an initial push");
        assert!(first.snapshot().state.app_active);
        assert!(rx_a.try_recv().is_err(), "A must not see B's initial push");
    }

    #[test]
    fn broadcast_reaches_every_endpoint() {
        let mut subs = Subscribers::default();
        let (_a, mut rx_a) = subs.register(&snapshot(false));
        let (_b, mut rx_b) = subs.register(&snapshot(false));

        assert_eq!(subs.broadcast(&snapshot(true)), 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let _initial = rx.try_recv().unwrap();
            let update = rx.try_recv().unwrap();
            assert!(update.snapshot().state.app_active);
        }
    }

    #[test]
    fn closed_endpoint_is_pruned_without_blocking_others() {
        let mut subs = Subscribers::default();
        let (_a, rx_a) = subs.register(&snapshot(false));
        let (_b, mut rx_b) = subs.register(&snapshot(false));
        drop(rx_a);

        assert_eq!(subs.broadcast(&snapshot(true)), 1);
        assert_eq!(subs.len(), 1);

        let _initial = rx_b.try_recv().unwrap();
        assert!(rx_b.try_recv().unwrap().snapshot().state.app_active);
    }

    #[test]
    fn remove_unregisters_endpoint() {
        let mut subs = Subscribers::default();
        let (id, _rx) = subs.register(&snapshot(false));
        assert!(subs.remove(id));
        assert!(!subs.remove(id));
        assert_eq!(subs.broadcast(&snapshot(true)), 0);
    }

    #[test]
    fn push_serializes_with_state_update_tag() {
        let push = Push::StateUpdate {
            state: snapshot(true),
        };
        let value = serde_json::to_value(&push).unwrap();
        assert_eq!(value["type"], "stateUpdate");
        assert_eq!(value["state"]["appActive"], true);
        assert_eq!(value["state"]["connectionStatus"], "connected");
    }

    #[test]
    fn dropping_subscription_runs_hook_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU64, Ordering};

        let mut subs = Subscribers::default();
        let (id, rx) = subs.register(&snapshot(false));
        let seen = Arc::new(AtomicU64::new(u64::MAX));
        let seen_hook = Arc::clone(&seen);
        let sub = Subscription::new(
            id,
            rx,
            Box::new(move |id| seen_hook.store(id.0, Ordering::SeqCst)),
        );
        drop(sub);
        assert_eq!(seen.load(Ordering::SeqCst), id.0);
    }
}
