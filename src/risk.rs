//! Risk-level simulator.
//!
//! While armed, a background task writes a randomly drawn [`DangerLevel`]
//! into the store immediately and then once per interval. Disarming stops
//! the task, waits for it to exit, and resets the level to idle, so no
//! draw can land after a disarm returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::actor::{Commit, StoreHandle};
use crate::error::CommandError;
use crate::random::Dice;
use crate::state::DangerLevel;

/// Default time between draws.
pub const DEFAULT_RISK_INTERVAL: Duration = Duration::from_secs(7);

/// The fixed risk table: `(label, command, safe)`.
pub const RISK_TABLE: [(&str, &str, bool); 5] = [
    ("Calm phase", "Monitor opportunities", true),
    ("Low risk", "Look for value bets", true),
    ("Medium risk", "Reduce stake size", false),
    ("High risk", "Hold fire", false),
    ("Critical", "Abort betting", false),
];

/// Draw one level uniformly from [`RISK_TABLE`].
pub fn draw_level(dice: &Dice) -> DangerLevel {
    let (label, command, safe) = RISK_TABLE[dice.index(RISK_TABLE.len())];
    DangerLevel::new(label, command, safe)
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Arms and disarms the periodic draw task.
///
/// At most one task exists at a time; arming an armed simulator and
/// disarming a disarmed one are no-ops.
pub struct RiskSimulator {
    store: StoreHandle,
    dice: Arc<Dice>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for RiskSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskSimulator")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl RiskSimulator {
    pub fn new(store: StoreHandle, dice: Arc<Dice>, interval: Duration) -> Self {
        Self {
            store,
            dice,
            interval,
            running: Mutex::new(None),
        }
    }

    /// Start the draw task.
    ///
    /// # Returns
    ///
    /// `true` if a task was started, `false` if one was already running.
    pub async fn arm(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_draws(
            self.store.clone(),
            Arc::clone(&self.dice),
            self.interval,
            shutdown_rx,
        ));
        *running = Some(Running { shutdown_tx, task });
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "risk simulator armed");
        true
    }

    /// Stop the draw task and reset the level to idle.
    ///
    /// # Returns
    ///
    /// `true` if a running task was stopped, `false` if none was running.
    ///
    /// # Errors
    ///
    /// [`CommandError::StoreUnavailable`] if the reset cannot be applied.
    pub async fn disarm(&self) -> Result<bool, CommandError> {
        let mut running = self.running.lock().await;
        let Some(Running { shutdown_tx, task }) = running.take() else {
            return Ok(false);
        };

        // The receiver may already be gone if the task exited on its own.
        let _ = shutdown_tx.send(true);
        if let Err(e) = task.await {
            tracing::error!(error = %e, "risk simulator task panicked");
        }

        self.store
            .apply(Commit::Broadcast, |s| {
                s.danger = DangerLevel::idle();
                Ok(())
            })
            .await?;
        tracing::info!("risk simulator disarmed");
        Ok(true)
    }

    pub async fn is_armed(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

/// Body of the draw task. The first tick fires immediately.
async fn run_draws(
    store: StoreHandle,
    dice: Arc<Dice>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                let level = draw_level(&dice);
                tracing::debug!(label = %level.label, "risk level drawn");
                let applied = store
                    .apply(Commit::Broadcast, move |s| {
                        s.danger = level;
                        Ok(())
                    })
                    .await;
                if let Err(e) = applied {
                    tracing::warn!(error = %e, "risk simulator stopping: store unavailable");
                    break;
                }
            }
        }
    }
}
