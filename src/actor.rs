//! State store actor: the single owner of [`SharedState`].
//!
//! The actor runs on a dedicated thread and processes messages from an
//! `mpsc` channel one at a time. It exclusively owns the live state, the
//! subscriber registry and the storage backend, so mutation bodies never
//! interleave and every broadcast reflects a fully applied mutation.
//!
//! Public API: [`StoreHandle`] (cloneable async handle) and [`Commit`]
//! (which side effects follow a successful mutation).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::broadcast::{Push, SubscriberId, Subscribers, Subscription};
use crate::error::{CommandError, PersistenceError};
use crate::state::{PersistedRecord, SharedState, StateSnapshot};
use crate::storage::StateStorage;

/// Capacity of the actor's inbox.
const INBOX_CAPACITY: usize = 32;

/// Side effects performed after a mutator returns `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Push the new snapshot to subscribers only.
    Broadcast,
    /// Save the durable subset, then push the new snapshot.
    Persist,
}

/// A type-erased mutation. Returns `true` when the mutation succeeded and
/// its commit should run.
type Job = Box<dyn FnOnce(&mut SharedState) -> bool + Send>;

/// Messages sent from [`StoreHandle`] to the actor loop.
pub(crate) enum StoreMessage {
    /// Run a mutation, then its commit.
    Apply {
        job: Job,
        commit: Commit,
        /// Signalled after the commit's side effects have completed.
        done: oneshot::Sender<()>,
    },

    /// Take a snapshot of the current state.
    Snapshot {
        reply: oneshot::Sender<StateSnapshot>,
    },

    /// Register a subscriber endpoint.
    Subscribe {
        reply: oneshot::Sender<(SubscriberId, mpsc::UnboundedReceiver<Push>)>,
    },

    /// Unregister a subscriber endpoint.
    Unsubscribe { id: SubscriberId },
}

/// Static settings for the actor.
#[derive(Debug, Clone)]
pub(crate) struct StoreConfig {
    /// Logical key the durable record is saved under.
    pub storage_key: String,
    /// Version string stamped on every snapshot.
    pub version: String,
}

struct StoreActor {
    state: SharedState,
    subscribers: Subscribers,
    storage: Arc<dyn StateStorage>,
    config: StoreConfig,
}

impl StoreActor {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::capture(&self.state, &self.config.version)
    }

    /// Save the durable subset. Failures are logged and swallowed: the
    /// in-memory state stays authoritative.
    fn persist(&self) {
        let record = PersistedRecord::from_state(&self.state);
        let result = serde_json::to_value(&record)
            .map_err(PersistenceError::from)
            .and_then(|value| self.storage.save(&self.config.storage_key, &value));
        if let Err(e) = result {
            tracing::error!(
                key = %self.config.storage_key,
                error = %e,
                "failed to persist state; continuing with in-memory state"
            );
        }
    }

    fn broadcast(&mut self) {
        let snapshot = self.snapshot();
        let delivered = self.subscribers.broadcast(&snapshot);
        tracing::trace!(delivered, "state broadcast");
    }

    fn handle(&mut self, msg: StoreMessage) {
        match msg {
            StoreMessage::Apply { job, commit, done } => {
                let _span = tracing::debug_span!("apply", ?commit).entered();
                if job(&mut self.state) {
                    if commit == Commit::Persist {
                        self.persist();
                    }
                    self.broadcast();
                }
                // The caller may have stopped waiting; nothing to do then.
                let _ = done.send(());
            }
            StoreMessage::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            StoreMessage::Subscribe { reply } => {
                let current = self.snapshot();
                let registration = self.subscribers.register(&current);
                if reply.send(registration).is_err() {
                    tracing::debug!("subscriber vanished before registration completed");
                }
            }
            StoreMessage::Unsubscribe { id } => {
                self.subscribers.remove(id);
            }
        }
    }
}

/// Runs the store actor loop on a blocking thread.
///
/// The loop exits when the channel closes (all handles dropped). On exit the
/// subscriber registry is dropped, which ends every open subscription.
fn run_store(mut actor: StoreActor, mut rx: mpsc::Receiver<StoreMessage>) {
    while let Some(msg) = rx.blocking_recv() {
        actor.handle(msg);
    }
    tracing::debug!(
        subscribers = actor.subscribers.len(),
        "state store shutting down"
    );
}

/// Build the startup state: defaults overlaid with the persisted record.
///
/// Calls [`StateStorage::load`] exactly once. A missing record leaves the
/// defaults untouched; an unreadable or malformed one is logged and treated
/// as missing.
pub(crate) fn restore_state(
    storage: &dyn StateStorage,
    key: &str,
    mut defaults: SharedState,
    history_cap: usize,
) -> SharedState {
    let stored = match storage.load(key) {
        Ok(stored) => stored,
        Err(e) => {
            tracing::error!(key, error = %e, "failed to restore state; starting from defaults");
            None
        }
    };

    if let Some(value) = stored {
        match serde_json::from_value::<PersistedRecord>(value) {
            Ok(record) => {
                record.restore_into(&mut defaults, history_cap);
                tracing::info!(
                    key,
                    app_active = defaults.app_active,
                    bets = defaults.bet_history.len(),
                    "state restored"
                );
            }
            Err(e) => {
                tracing::warn!(
                    key,
                    error = %e,
                    "stored record is malformed; starting from defaults"
                );
            }
        }
    }

    defaults
}

/// Async handle to the running state store.
///
/// Lightweight, cloneable, and `Send + Sync`. Communicates with the actor
/// thread over a bounded channel; the actor exits once every handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    sender: mpsc::Sender<StoreMessage>,
}

impl std::fmt::Debug for StoreMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreMessage::Apply { .. } => "Apply",
            StoreMessage::Snapshot { .. } => "Snapshot",
            StoreMessage::Subscribe { .. } => "Subscribe",
            StoreMessage::Unsubscribe { .. } => "Unsubscribe",
        };
        f.write_str(name)
    }
}

impl StoreHandle {
    /// Read a snapshot of the current state.
    ///
    /// # Errors
    ///
    /// [`CommandError::StoreUnavailable`] if the actor has exited.
    pub async fn snapshot(&self) -> Result<StateSnapshot, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreMessage::Snapshot { reply: tx }).await?;
        rx.await.map_err(|_| CommandError::StoreUnavailable)
    }

    /// Apply a state transition atomically.
    ///
    /// `mutator` runs on the actor thread with exclusive access to the
    /// state. If it returns `Ok`, the `commit` side effects run before this
    /// call resolves; if it returns `Err`, nothing is persisted or
    /// broadcast, so a rejected mutator must leave the state untouched.
    ///
    /// # Errors
    ///
    /// * Whatever `mutator` returns.
    /// * [`CommandError::StoreUnavailable`] if the actor has exited.
    pub async fn apply<R, F>(&self, commit: Commit, mutator: F) -> Result<R, CommandError>
    where
        F: FnOnce(&mut SharedState) -> Result<R, CommandError> + Send + 'static,
        R: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job: Job = Box::new(move |state| {
            let result = mutator(state);
            let committed = result.is_ok();
            let _ = result_tx.send(result);
            committed
        });

        let (done_tx, done_rx) = oneshot::channel();
        self.send(StoreMessage::Apply {
            job,
            commit,
            done: done_tx,
        })
        .await?;
        done_rx.await.map_err(|_| CommandError::StoreUnavailable)?;
        result_rx.await.map_err(|_| CommandError::StoreUnavailable)?
    }

    /// Open a subscriber endpoint.
    ///
    /// The returned subscription immediately holds one push with the
    /// current state, followed by a push after every later mutation.
    ///
    /// # Errors
    ///
    /// [`CommandError::StoreUnavailable`] if the actor has exited.
    pub async fn subscribe(&self) -> Result<Subscription, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreMessage::Subscribe { reply: tx }).await?;
        let (id, pushes) = rx.await.map_err(|_| CommandError::StoreUnavailable)?;

        // A weak sender, so open subscriptions do not keep the actor alive.
        let weak = self.sender.downgrade();
        let hook = Box::new(move |id: SubscriberId| {
            if let Some(sender) = weak.upgrade()
                && sender.try_send(StoreMessage::Unsubscribe { id }).is_err()
            {
                // The endpoint is pruned on the next failed push instead.
                tracing::debug!(subscriber = %id, "unsubscribe signal dropped");
            }
        });
        Ok(Subscription::new(id, pushes, hook))
    }

    /// Unregister a subscriber endpoint explicitly.
    ///
    /// # Errors
    ///
    /// [`CommandError::StoreUnavailable`] if the actor has exited.
    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<(), CommandError> {
        self.send(StoreMessage::Unsubscribe { id }).await
    }

    async fn send(&self, msg: StoreMessage) -> Result<(), CommandError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| CommandError::StoreUnavailable)
    }
}

/// Spawn the store actor owning `initial`.
pub(crate) fn spawn_store(
    initial: SharedState,
    storage: Arc<dyn StateStorage>,
    config: StoreConfig,
) -> StoreHandle {
    let (tx, rx) = mpsc::channel::<StoreMessage>(INBOX_CAPACITY);
    let actor = StoreActor {
        state: initial,
        subscribers: Subscribers::default(),
        storage,
        config,
    };

    std::thread::spawn(move || run_store(actor, rx));

    StoreHandle { sender: tx }
}
