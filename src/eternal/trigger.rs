use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::orchestrations::{COORDINATOR, EternalInput};
use super::EternalConfig;
use crate::runtime::{OrchestrationStatus, Runtime};

/// Periodic entry point that (re)starts the eternal instance whenever its
/// last run has ended.
pub struct TriggerAdapter {
    runtime: Arc<Runtime>,
    config: EternalConfig,
}

impl TriggerAdapter {
    pub fn new(runtime: Arc<Runtime>, config: EternalConfig) -> Self {
        Self { runtime, config }
    }

    /// One trigger tick. Returns whether a new run was started; a running
    /// instance makes this a no-op.
    pub async fn poll_and_maybe_start(&self) -> Result<bool, String> {
        let instance = &self.config.instance_id;
        let status = self.runtime.instances().get_status(instance).await;
        let startable = matches!(status, OrchestrationStatus::NotFound | OrchestrationStatus::NotStarted)
            || status.is_terminal();
        if !startable {
            debug!(instance = %instance, status = ?status, "eternal instance busy");
            return Ok(false);
        }
        let input = EternalInput::with_new_root().to_json()?;
        let started = self.runtime.start_orchestration(instance, COORDINATOR, input).await?;
        if started {
            info!(instance = %instance, previous = ?status, "started eternal orchestration");
        }
        Ok(started)
    }

    /// Tick every `poll_interval_ms` until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.poll_and_maybe_start().await {
                        error!(instance = %self.config.instance_id, error = %e, "trigger tick failed");
                    }
                }
            }
        }
        debug!(instance = %self.config.instance_id, "trigger stopped");
    }
}
