//! Background expiry sweeper.
//!
//! A tokio task that calls [`OrderSettlementOrchestrator::sweep`] on a fixed
//! interval until shut down. Sweeps run on the blocking pool because event
//! delivery may sleep between retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::OrderSettlementOrchestrator;

pub struct ExpirySweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Start sweeping every `period` on the current runtime.
    #[must_use]
    pub fn spawn(orchestrator: Arc<OrderSettlementOrchestrator>, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(period = ?period, "Expiry sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let orch = Arc::clone(&orchestrator);
                        match tokio::task::spawn_blocking(move || orch.sweep()).await {
                            Ok(report) if report.escrow.failed > 0 => tracing::warn!(
                                expired = report.escrow.expired,
                                failed = report.escrow.failed,
                                "Sweep left undelivered events"
                            ),
                            Ok(report) => tracing::debug!(
                                expired = report.escrow.expired,
                                released = report.escrow.released,
                                redelivered = report.escrow.redelivered,
                                pruned = report.escrow.pruned,
                                quotes_purged = report.quotes_purged,
                                "Sweep complete"
                            ),
                            Err(e) => tracing::error!(error = %e, "Sweep task failed"),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Expiry sweeper stopped");
        });

        Self { shutdown, handle }
    }

    /// Sweep at the configured `escrow.sweep_interval_secs`.
    #[must_use]
    pub fn from_config(orchestrator: Arc<OrderSettlementOrchestrator>) -> Self {
        let period = Duration::from_secs(orchestrator.config().escrow.sweep_interval_secs);
        Self::spawn(orchestrator, period)
    }

    /// Signal the task and wait for the in-flight sweep to finish.
    pub async fn shutdown(self) {
        // Err only if the task already exited.
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Expiry sweeper did not stop cleanly");
        }
    }
}
