//! Periodic expiry of lapsed reservations.
//!
//! Availability already ignores lapsed rows, so the sweeper only keeps the
//! stored statuses truthful for auditing. Running it late or not at all never
//! lets stock be oversold.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{Result, store::ReservationStore};

/// Runs `expire_stale` on a fixed period.
pub struct ExpirySweeper {
    store: Arc<dyn ReservationStore>,
    period: Duration,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn ReservationStore>, period: Duration) -> Self {
        Self { store, period }
    }

    /// Runs one sweep and logs the outcome.
    pub async fn sweep_once(&self) -> Result<u64> {
        let expired = self.store.expire_stale().await?;
        if expired > 0 {
            tracing::info!(expired, "expired stale reservations");
        } else {
            tracing::debug!("no stale reservations");
        }
        Ok(expired)
    }

    /// Sweeps until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "reservation sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("expiry sweeper stopped");
    }

    /// Spawns the sweeper onto the runtime.
    pub fn spawn(self) -> SweeperHandle {
        let (tx, rx) = watch::channel(false);
        let period = self.period;
        let task = tokio::spawn(self.run(rx));
        tracing::info!(period_secs = period.as_secs(), "expiry sweeper started");
        SweeperHandle { shutdown: tx, task }
    }
}

/// Handle to a spawned sweeper.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "expiry sweeper task panicked");
        }
    }
}
