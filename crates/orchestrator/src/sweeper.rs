//! Background maintenance loop for persisted sagas.

use std::sync::Arc;

use chrono::Utc;
use state_store::SagaStateStore;
use tokio::sync::watch;

use crate::orchestrator::SagaOrchestrator;

/// Tuning knobs for the background sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often the sweep runs.
    pub interval: std::time::Duration,
    /// How long terminal records are kept before cleanup deletes them.
    pub retention: chrono::Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(30),
            retention: chrono::Duration::days(7),
        }
    }
}

/// Periodically sweeps timeouts, the retry queue, and expired records.
///
/// Runs until the shutdown channel flips to `true`. Each sweep phase is
/// guarded independently so one failing phase never starves the others.
pub struct BackgroundSweeper<St> {
    orchestrator: Arc<SagaOrchestrator<St>>,
    config: SweeperConfig,
    shutdown: watch::Receiver<bool>,
}

impl<St: SagaStateStore> BackgroundSweeper<St> {
    pub fn new(
        orchestrator: Arc<SagaOrchestrator<St>>,
        config: SweeperConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            orchestrator,
            config,
            shutdown,
        }
    }

    /// Runs the sweep loop until shutdown is signalled.
    pub async fn run(mut self) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            retention_days = self.config.retention.num_days(),
            "saga sweeper started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_once().await;
                }
                result = self.shutdown.changed() => {
                    if result.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("saga sweeper stopped");
    }

    /// Runs a single sweep: timeouts, then due retries, then cleanup.
    pub async fn tick_once(&self) {
        let now = Utc::now();
        match self.orchestrator.process_timeouts(now).await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "sweeper marked timed out sagas");
            }
            Ok(_) => {}
            Err(e) => {
                metrics::counter!("sweeper_phase_errors", "phase" => "timeouts").increment(1);
                tracing::warn!(error = %e, "timeout sweep failed");
            }
        }

        match self.orchestrator.process_retry_queue(now).await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "sweeper processed retries");
            }
            Ok(_) => {}
            Err(e) => {
                metrics::counter!("sweeper_phase_errors", "phase" => "retries").increment(1);
                tracing::warn!(error = %e, "retry sweep failed");
            }
        }

        let cutoff = now - self.config.retention;
        match self.orchestrator.cleanup(cutoff).await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "sweeper cleaned up terminal sagas");
            }
            Ok(_) => {}
            Err(e) => {
                metrics::counter!("sweeper_phase_errors", "phase" => "cleanup").increment(1);
                tracing::warn!(error = %e, "cleanup sweep failed");
            }
        }
    }
}
