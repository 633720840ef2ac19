use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use super::AgentReloader;
use crate::config::FailureSeverity;
use crate::lifecycle::QuitReceiver;
use crate::metrics::ServiceMetrics;
use crate::types::ChangeEvent;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadState {
    Idle,
    ReloadPending,
}

pub type SharedReloadState = Arc<Mutex<ReloadState>>;

/// Turns any number of change events into at most one agent reload per
/// tick.
pub struct ReloadCoordinator {
    events: mpsc::Receiver<ChangeEvent>,
    reloader: Arc<dyn AgentReloader>,
    state: SharedReloadState,
    metrics: Arc<ServiceMetrics>,
    interval: Duration,
    suppressed: bool,
    on_failure: FailureSeverity,
}

impl ReloadCoordinator {
    pub fn new(
        events: mpsc::Receiver<ChangeEvent>,
        reloader: Arc<dyn AgentReloader>,
        metrics: Arc<ServiceMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            events,
            reloader,
            state: Arc::new(Mutex::new(ReloadState::Idle)),
            metrics,
            interval,
            suppressed: false,
            on_failure: FailureSeverity::Fatal,
        }
    }

    /// With suppression on, ticks still clear the pending flag but the
    /// reloader is never called.
    pub fn suppressed(mut self, suppressed: bool) -> Self {
        self.suppressed = suppressed;
        self
    }

    pub fn with_failure_severity(mut self, severity: FailureSeverity) -> Self {
        self.on_failure = severity;
        self
    }

    pub fn state_handle(&self) -> SharedReloadState {
        self.state.clone()
    }

    pub async fn mark_pending(&self, event: &ChangeEvent) {
        let mut state = self.state.lock().await;
        tracing::info!(change = %event, "Marking datadog-agent for reloading");
        *state = ReloadState::ReloadPending;
    }

    /// Returns whether a reload was due on this tick.
    ///
    /// The state lock is not held while the reload command runs; only this
    /// task marks the state pending, so nothing can slip in between.
    pub async fn on_tick(&self) -> Result<bool> {
        if *self.state.lock().await == ReloadState::Idle {
            return Ok(false);
        }

        let result = self.reload().await;
        *self.state.lock().await = ReloadState::Idle;

        if let Err(e) = result {
            self.metrics.inc_reload_failure();
            match self.on_failure {
                FailureSeverity::Fatal => return Err(e),
                FailureSeverity::Recoverable => {
                    tracing::error!(error = %e, "Failed to reload datadog-agent");
                }
            }
        }
        Ok(true)
    }

    async fn reload(&self) -> Result<()> {
        self.metrics.inc_reload();

        if self.suppressed {
            tracing::info!("Not reloading datadog-agent (env: DONT_RELOAD_DATADOG)");
            return Ok(());
        }

        tracing::warn!("Reloading datadog-agent");
        self.reloader.reload().await?;
        tracing::info!("Successfully reloaded datadog-agent");
        Ok(())
    }

    pub async fn run(mut self, mut quit: QuitReceiver) -> Result<()> {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = quit.recv() => {
                    tracing::warn!("Stopping reloader");
                    return Ok(());
                }
                Some(event) = self.events.recv() => {
                    self.mark_pending(&event).await;
                }
                _ = ticker.tick() => {
                    tracing::trace!("Reloader tick");
                    self.on_tick().await?;
                }
            }
        }
    }
}
