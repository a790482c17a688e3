//! Top-level entry point that composes the state store, risk simulator,
//! placer and notifier into a single [`Engine`] that executes commands.
//!
//! The engine is opened via [`EngineBuilder`], which restores persisted state,
//! spawns the store actor and, if automation was active when the previous
//! process stopped, re-arms the risk simulator.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::Instrument as _;

use crate::actor::{Commit, StoreConfig, StoreHandle, restore_state, spawn_store};
use crate::broadcast::Subscription;
use crate::command::{Command, SHORTCUT_ORIGIN, Shortcut};
use crate::error::{CommandError, PlacementError};
use crate::notify::{LogNotifier, Notification, Notifier, Sound};
use crate::placement::{BetIds, BetPlacer, BetTicket, SimulatedPlacer};
use crate::random::Dice;
use crate::risk::{DEFAULT_RISK_INTERVAL, RiskSimulator};
use crate::state::{
    Bet, DEFAULT_HISTORY_CAP, DangerLevel, License, PrepType, ProxySettings, SharedState,
    StateSnapshot,
};
use crate::storage::{MemoryStorage, StateStorage};

/// Default simulated placement latency.
pub const DEFAULT_PLACEMENT_LATENCY: Duration = Duration::from_millis(600);

/// Default key the durable record is stored under.
pub const DEFAULT_STORAGE_KEY: &str = "betState";

/// Tunable settings for an [`Engine`].
///
/// All fields have defaults accessible via [`EngineConfig::default()`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use betflow::EngineConfig;
///
/// let config = EngineConfig {
///     risk_interval: Duration::from_secs(1),
///     ..EngineConfig::default()
/// };
/// assert_eq!(config.history_cap, 10);
/// assert_eq!(config.storage_key, "betState");
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between risk-level draws while armed.
    ///
    /// Default: 7 seconds.
    pub risk_interval: Duration,

    /// Latency of the built-in simulated placer. Ignored when a custom
    /// placer is supplied.
    ///
    /// Default: 600 milliseconds.
    pub placement_latency: Duration,

    /// Maximum number of bets kept in history.
    ///
    /// Default: 10.
    pub history_cap: usize,

    /// Storage key of the durable record.
    ///
    /// Default: `"betState"`.
    pub storage_key: String,

    /// Version stamped on every snapshot.
    ///
    /// Default: this crate's version.
    pub version: String,

    /// License shown to the user; fixed for the engine's lifetime.
    pub license: License,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_interval: DEFAULT_RISK_INTERVAL,
            placement_latency: DEFAULT_PLACEMENT_LATENCY,
            history_cap: DEFAULT_HISTORY_CAP,
            storage_key: DEFAULT_STORAGE_KEY.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            license: License::default(),
        }
    }
}

impl EngineConfig {
    /// Build a config from environment-style lookups, falling back to the
    /// defaults for anything absent or unparsable.
    ///
    /// Recognised keys: `BETFLOW_INSTANCE_ID`, `BETFLOW_LICENSE_EXPIRES`,
    /// `BETFLOW_RISK_INTERVAL_MS`, `BETFLOW_PLACEMENT_LATENCY_MS`,
    /// `BETFLOW_HISTORY_CAP`, `BETFLOW_STORAGE_KEY`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        if let Some(id) = lookup("BETFLOW_INSTANCE_ID").filter(|v| !v.is_empty()) {
            config.license.id = id;
        }
        if let Some(expires) = lookup("BETFLOW_LICENSE_EXPIRES").filter(|v| !v.is_empty()) {
            config.license.expires_at = expires;
        }
        if let Some(interval) = millis("BETFLOW_RISK_INTERVAL_MS").filter(|d| !d.is_zero()) {
            config.risk_interval = interval;
        }
        if let Some(latency) = millis("BETFLOW_PLACEMENT_LATENCY_MS") {
            config.placement_latency = latency;
        }
        if let Some(cap) = lookup("BETFLOW_HISTORY_CAP").and_then(|v| v.trim().parse().ok()) {
            config.history_cap = cap;
        }
        if let Some(key) = lookup("BETFLOW_STORAGE_KEY").filter(|v| !v.is_empty()) {
            config.storage_key = key;
        }
        config
    }

    /// [`from_lookup`](EngineConfig::from_lookup) over the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Builder for configuring and starting an [`Engine`].
///
/// Every collaborator has a default: in-memory storage, a logging notifier,
/// an entropy-seeded random source and the simulated placer.
///
/// # Examples
///
/// ```no_run
/// use betflow::{Engine, FileStorage};
///
/// # async fn example() {
/// let engine = Engine::builder()
///     .storage(FileStorage::new("/tmp/betflow"))
///     .start()
///     .await;
/// let snapshot = engine.get_state().await.expect("store is running");
/// # }
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    storage: Option<Arc<dyn StateStorage>>,
    notifier: Option<Arc<dyn Notifier>>,
    placer: Option<Arc<dyn BetPlacer>>,
    dice: Option<Arc<Dice>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(mut self, storage: impl StateStorage) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn notifier(mut self, notifier: impl Notifier) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// Replace the simulated placer.
    pub fn placer(mut self, placer: impl BetPlacer) -> Self {
        self.placer = Some(Arc::new(placer));
        self
    }

    /// Random source shared by the risk simulator and the simulated placer.
    pub fn dice(mut self, dice: Dice) -> Self {
        self.dice = Some(Arc::new(dice));
        self
    }

    /// Restore state, spawn the store actor and start the engine.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(self) -> Engine {
        let EngineBuilder {
            config,
            storage,
            notifier,
            placer,
            dice,
        } = self;

        let storage = storage.unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let notifier = notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let dice = dice.unwrap_or_else(|| Arc::new(Dice::from_entropy()));
        let placer = placer.unwrap_or_else(|| {
            Arc::new(SimulatedPlacer::new(
                config.placement_latency,
                Arc::clone(&dice),
            ))
        });

        let initial = restore_state(
            storage.as_ref(),
            &config.storage_key,
            SharedState::new(config.license.clone()),
            config.history_cap,
        );
        let resume_active = initial.app_active;

        let store = spawn_store(
            initial,
            storage,
            StoreConfig {
                storage_key: config.storage_key.clone(),
                version: config.version.clone(),
            },
        );
        let risk = RiskSimulator::new(store.clone(), dice, config.risk_interval);

        let engine = Engine {
            inner: Arc::new(EngineInner {
                store,
                risk,
                notifier,
                placer,
                ids: BetIds::new(),
                history_cap: config.history_cap,
                toggle_lock: Mutex::new(()),
            }),
        };

        if resume_active {
            tracing::info!("automation was active before restart; re-arming risk simulator");
            engine.inner.risk.arm().await;
        }
        tracing::info!(version = %config.version, license = %config.license.id, "engine started");
        engine
    }
}

struct EngineInner {
    store: StoreHandle,
    risk: RiskSimulator,
    notifier: Arc<dyn Notifier>,
    placer: Arc<dyn BetPlacer>,
    ids: BetIds,
    history_cap: usize,
    /// Serializes `toggle-app` so the simulator's armed state always matches
    /// `appActive`.
    toggle_lock: Mutex<()>,
}

/// The command processor.
///
/// `Clone` is cheap: all state is `Arc`-wrapped.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.inner.store)
            .field("history_cap", &self.inner.history_cap)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Handle to the underlying state store.
    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    /// Open a subscriber endpoint; see [`StoreHandle::subscribe`].
    pub async fn subscribe(&self) -> Result<Subscription, CommandError> {
        self.inner.store.subscribe().await
    }

    /// Execute a named command with a JSON payload.
    ///
    /// # Returns
    ///
    /// The command's result as JSON: the snapshot for `get-state`, the bet
    /// for `place-bet`, the new value for every other command.
    ///
    /// # Errors
    ///
    /// Any [`CommandError`]. Failures are also surfaced to the user through
    /// an "Error" notification.
    pub async fn execute(&self, name: &str, payload: Value) -> Result<Value, CommandError> {
        match Command::parse(name, &payload) {
            Ok(cmd) => self.dispatch(cmd).await,
            Err(e) => Err(self.report_failure(name, e)),
        }
    }

    /// Execute a parsed command.
    ///
    /// # Errors
    ///
    /// Any [`CommandError`]. Failures are also surfaced to the user through
    /// an "Error" notification.
    pub async fn dispatch(&self, cmd: Command) -> Result<Value, CommandError> {
        let name = cmd.name();
        let span = tracing::info_span!("command", command = name);
        let inner = &self.inner;
        let result: Result<Value, CommandError> = async {
            match cmd {
                Command::GetState => to_json(inner.store.snapshot().await?),
                Command::ToggleApp { active } => to_json(inner.toggle_app(active).await?),
                Command::PlaceBet { origin } => to_json(inner.place_bet(origin).await?),
                Command::SetPrepareBet { enabled } => {
                    to_json(inner.set_prepare_bet(enabled).await?)
                }
                Command::SetPrepType { prep_type } => {
                    to_json(inner.set_prep_type(prep_type).await?)
                }
                Command::UpdateProxy { proxy } => to_json(inner.update_proxy(proxy).await?),
            }
        }
        .instrument(span)
        .await;
        result.map_err(|e| self.report_failure(name, e))
    }

    /// Current snapshot with version and a fresh timestamp.
    pub async fn get_state(&self) -> Result<StateSnapshot, CommandError> {
        self.reported("get-state", self.inner.store.snapshot()).await
    }

    /// Start or stop automation.
    ///
    /// No-op when `active` already matches. Activation arms the risk
    /// simulator; deactivation disarms it and clears the busy flag.
    ///
    /// # Returns
    ///
    /// The new `appActive`.
    pub async fn toggle_app(&self, active: bool) -> Result<bool, CommandError> {
        self.reported("toggle-app", self.inner.toggle_app(active)).await
    }

    /// Place one bet.
    ///
    /// The active/busy checks and the in-flight marker are applied in a
    /// single store mutation, so a concurrent second call is rejected with
    /// [`CommandError::Busy`] instead of being queued. The placement itself
    /// runs in its own task: dropping this future does not abandon it.
    ///
    /// # Errors
    ///
    /// * [`CommandError::NotActive`] if automation is stopped.
    /// * [`CommandError::Busy`] if another placement is in flight, including
    ///   one started before the last deactivation.
    /// * [`CommandError::PlacementFailed`] if the placer fails.
    pub async fn place_bet(&self, origin: impl Into<String>) -> Result<Bet, CommandError> {
        self.reported("place-bet", self.inner.place_bet(origin.into()))
            .await
    }

    /// Toggle the warm-up flag, playing the warm-up cue when enabling.
    pub async fn set_prepare_bet(&self, enabled: bool) -> Result<bool, CommandError> {
        self.reported("set-prepare-bet", self.inner.set_prepare_bet(enabled))
            .await
    }

    /// Select the preparation mode.
    pub async fn set_prep_type(&self, prep_type: PrepType) -> Result<PrepType, CommandError> {
        self.reported("set-prep-type", self.inner.set_prep_type(prep_type))
            .await
    }

    /// Replace the proxy settings wholesale.
    pub async fn update_proxy(&self, proxy: ProxySettings) -> Result<ProxySettings, CommandError> {
        self.reported("update-proxy", self.inner.update_proxy(proxy))
            .await
    }

    /// Run a keyboard shortcut.
    ///
    /// Failures are logged only; shortcuts never raise the error
    /// notification.
    pub async fn shortcut(&self, shortcut: Shortcut) {
        let inner = &self.inner;
        let result = match shortcut {
            Shortcut::DoBet => inner.place_bet(SHORTCUT_ORIGIN.to_owned()).await.map(|_| ()),
            Shortcut::DangerMoment => {
                inner
                    .store
                    .apply(Commit::Broadcast, |s| {
                        s.danger = DangerLevel::manual_signal();
                        Ok(())
                    })
                    .await
            }
        };
        if let Err(e) = result {
            tracing::warn!(?shortcut, error = %e, "shortcut failed");
        }
    }

    /// Stop background activity. The persisted state is left untouched, so
    /// a restarted engine resumes where this one stopped.
    pub async fn shutdown(&self) {
        if let Err(e) = self.inner.risk.disarm().await {
            tracing::warn!(error = %e, "failed to disarm risk simulator during shutdown");
        }
        tracing::info!("engine stopped");
    }

    async fn reported<T>(
        &self,
        name: &'static str,
        op: impl Future<Output = Result<T, CommandError>>,
    ) -> Result<T, CommandError> {
        op.instrument(tracing::info_span!("command", command = name))
            .await
            .map_err(|e| self.report_failure(name, e))
    }

    fn report_failure(&self, name: &str, err: CommandError) -> CommandError {
        tracing::warn!(command = name, code = err.code(), error = %err, "command failed");
        self.inner
            .notifier
            .notify(Notification::new("Error", err.to_string(), Sound::Error));
        err
    }
}

impl EngineInner {
    async fn toggle_app(&self, active: bool) -> Result<bool, CommandError> {
        let _toggle = self.toggle_lock.lock().await;

        let current = self.store.snapshot().await?.state.app_active;
        if current == active {
            return Ok(current);
        }

        if active {
            self.store
                .apply(Commit::Persist, |s| {
                    s.set_app_active(true);
                    Ok(())
                })
                .await?;
            self.risk.arm().await;
            self.notifier.notify(Notification::new(
                "Automation activated",
                "The betting workflow is now active.",
                Sound::Activated,
            ));
        } else {
            self.risk.disarm().await?;
            // The in-flight marker stays with its placement; only the
            // displayed flag is cleared.
            self.store
                .apply(Commit::Persist, |s| {
                    s.set_app_active(false);
                    s.is_processing = false;
                    Ok(())
                })
                .await?;
            self.notifier.notify(Notification::new(
                "Automation deactivated",
                "The betting workflow has been stopped.",
                Sound::Notification,
            ));
        }

        tracing::info!(active, "automation toggled");
        Ok(active)
    }

    async fn place_bet(self: &Arc<Self>, origin: String) -> Result<Bet, CommandError> {
        let ticket = self
            .store
            .apply(Commit::Broadcast, move |s| {
                if !s.app_active {
                    return Err(CommandError::NotActive);
                }
                if s.placement_in_flight || s.is_processing {
                    return Err(CommandError::Busy);
                }
                s.placement_in_flight = true;
                s.is_processing = true;
                Ok(BetTicket {
                    origin,
                    mode: s.prep_type,
                    prepared: s.prepare_bet,
                })
            })
            .await?;

        let inner = Arc::clone(self);
        let placement = tokio::spawn(async move { inner.complete_placement(ticket).await });
        match placement.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "placement task panicked");
                self.release_gate().await;
                Err(PlacementError::Transport(format!("placement task failed: {e}")).into())
            }
        }
    }

    /// Second half of `place-bet`: run the placer, then commit or release.
    async fn complete_placement(&self, ticket: BetTicket) -> Result<Bet, CommandError> {
        let quote = match self.placer.place(&ticket).await {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!(origin = %ticket.origin, error = %e, "placement failed");
                self.release_gate().await;
                return Err(e.into());
            }
        };

        let bet = self.ids.assemble(ticket, quote);
        let recorded = bet.clone();
        let cap = self.history_cap;
        self.store
            .apply(Commit::Persist, move |s| {
                s.record_bet(recorded, cap);
                s.placement_in_flight = false;
                s.is_processing = false;
                Ok(())
            })
            .await?;

        tracing::info!(id = %bet.id, origin = %bet.origin, "bet placed");
        self.notifier.notify(Notification::new(
            "Bet placed",
            format!("{} placed successfully.", bet.id),
            Sound::Success,
        ));
        Ok(bet)
    }

    /// Release the gate after a failed placement.
    async fn release_gate(&self) {
        let released = self
            .store
            .apply(Commit::Broadcast, |s| {
                s.placement_in_flight = false;
                s.is_processing = false;
                Ok(())
            })
            .await;
        if let Err(e) = released {
            tracing::error!(error = %e, "failed to clear processing flag");
        }
    }

    async fn set_prepare_bet(&self, enabled: bool) -> Result<bool, CommandError> {
        let value = self
            .store
            .apply(Commit::Persist, move |s| {
                s.prepare_bet = enabled;
                Ok(s.prepare_bet)
            })
            .await?;
        if value {
            self.notifier.play(Sound::Warmup);
        }
        Ok(value)
    }

    async fn set_prep_type(&self, prep_type: PrepType) -> Result<PrepType, CommandError> {
        self.store
            .apply(Commit::Persist, move |s| {
                s.prep_type = prep_type;
                Ok(s.prep_type)
            })
            .await
    }

    async fn update_proxy(&self, proxy: ProxySettings) -> Result<ProxySettings, CommandError> {
        self.store
            .apply(Commit::Persist, move |s| {
                s.proxy = proxy;
                Ok(s.proxy.clone())
            })
            .await
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value, CommandError> {
    Ok(serde_json::to_value(value)?)
}
