//! Shared-state engine for an automated betting workflow.
//!
//! A single actor owns the [`SharedState`]; every mutation goes through it,
//! is persisted when durable fields change, and is broadcast as a
//! [`StateSnapshot`] to every open [`Subscription`].

mod actor;
pub use actor::{Commit, StoreHandle};
mod broadcast;
pub use broadcast::{Push, SubscriberId, Subscription};
mod command;
mod engine;
mod error;
mod notify;
mod placement;
pub mod protocol;
mod random;
mod risk;
mod state;
mod storage;

pub use command::{Command, DEFAULT_ORIGIN, SHORTCUT_ORIGIN, Shortcut, truthy};
pub use engine::{
    DEFAULT_PLACEMENT_LATENCY, DEFAULT_STORAGE_KEY, Engine, EngineBuilder, EngineConfig,
};
pub use error::{CommandError, PersistenceError, PlacementError};
pub use notify::{LogNotifier, Notification, Notifier, Recorded, RecordingNotifier, Sound};
pub use placement::{BetIds, BetPlacer, BetTicket, PlaceFuture, Quote, SimulatedPlacer};
pub use random::Dice;
pub use risk::{DEFAULT_RISK_INTERVAL, RISK_TABLE, RiskSimulator, draw_level};
pub use state::{
    Bet, ConnectionStatus, DEFAULT_HISTORY_CAP, DangerLevel, License, PersistedRecord, PrepType,
    ProxyProtocol, ProxySettings, SharedState, StateSnapshot,
};
pub use storage::{FileStorage, MemoryStorage, StateStorage};
