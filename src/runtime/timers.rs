use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::router::{InstanceRouter, OrchestratorMsg};

/// Wall-clock milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// In-process durable timer driver. Timers are armed from history, so a
/// restarted process re-arms whatever has no `TimerFired` yet.
#[derive(Clone)]
pub struct TimerService {
    router: Arc<InstanceRouter>,
}

impl TimerService {
    pub fn new(router: Arc<InstanceRouter>) -> Self {
        Self { router }
    }

    /// Sleep until `fire_at_ms` then deliver `TimerFired` to the instance.
    /// Cancelling `cancel` drops the timer without delivering anything.
    pub fn schedule(
        &self,
        instance: &str,
        execution_id: u64,
        id: u64,
        fire_at_ms: u64,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let router = self.router.clone();
        let instance = instance.to_string();
        let delay = Duration::from_millis(fire_at_ms.saturating_sub(now_ms()));
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(instance = %instance, execution_id, id, "timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    router
                        .forward(OrchestratorMsg::TimerFired {
                            instance,
                            execution_id,
                            id,
                            fire_at_ms,
                        })
                        .await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_into_inbox_and_respects_cancellation() {
        let router = Arc::new(InstanceRouter::default());
        let svc = TimerService::new(router.clone());
        let mut rx = router.register("I").await;

        let fire_at_ms = now_ms() + 10;
        svc.schedule("I", 1, 1, fire_at_ms, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            OrchestratorMsg::TimerFired {
                instance: "I".into(),
                execution_id: 1,
                id: 1,
                fire_at_ms,
            }
        );

        let token = CancellationToken::new();
        let handle = svc.schedule("I", 1, 2, now_ms() + 60_000, token.clone());
        token.cancel();
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
