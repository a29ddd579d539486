use std::collections::HashMap;
use tokio::sync::Mutex;

use super::OrchestrationStatus;

/// Process-wide view of instance status used to enforce single-active-instance
/// exclusivity. Every read-modify-write happens under one lock.
#[derive(Default)]
pub struct InstanceRegistry {
    inner: Mutex<HashMap<String, OrchestrationStatus>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status, `NotFound` when the id was never seen.
    pub async fn get_status(&self, instance: &str) -> OrchestrationStatus {
        self.inner
            .lock()
            .await
            .get(instance)
            .cloned()
            .unwrap_or(OrchestrationStatus::NotFound)
    }

    /// Compare-and-swap into `Running`. Succeeds only if the instance is
    /// absent or its last run is terminal; a busy id returns false.
    pub async fn try_start(&self, instance: &str) -> bool {
        let mut g = self.inner.lock().await;
        let startable = g.get(instance).is_none_or(|s| s.is_terminal() || *s == OrchestrationStatus::NotStarted);
        if startable {
            g.insert(instance.to_string(), OrchestrationStatus::Running);
        }
        startable
    }

    /// Record a status transition observed by the runtime.
    pub async fn record(&self, instance: &str, status: OrchestrationStatus) {
        self.inner.lock().await.insert(instance.to_string(), status);
    }

    /// Drop a finished instance's entry. Running entries are kept.
    pub async fn forget(&self, instance: &str) -> bool {
        let mut g = self.inner.lock().await;
        if g.get(instance).is_some_and(|s| *s == OrchestrationStatus::Running) {
            return false;
        }
        g.remove(instance).is_some()
    }

    /// Ids currently marked `Running`, sorted.
    pub async fn running(&self) -> Vec<String> {
        let g = self.inner.lock().await;
        let mut out: Vec<String> = g
            .iter()
            .filter(|(_, s)| **s == OrchestrationStatus::Running)
            .map(|(k, _)| k.clone())
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_start_is_exclusive_until_terminal() {
        let reg = InstanceRegistry::new();
        assert_eq!(reg.get_status("A").await, OrchestrationStatus::NotFound);
        assert!(reg.try_start("A").await);
        assert!(!reg.try_start("A").await);
        assert_eq!(reg.running().await, vec!["A".to_string()]);

        reg.record("A", OrchestrationStatus::Terminated { reason: "stop".into() })
            .await;
        assert!(reg.running().await.is_empty());
        assert!(reg.try_start("A").await);
        assert_eq!(reg.get_status("A").await, OrchestrationStatus::Running);

        assert!(!reg.forget("A").await, "running entries stay");
        reg.record("A", OrchestrationStatus::Completed { output: "ok".into() })
            .await;
        assert!(reg.forget("A").await);
        assert_eq!(reg.get_status("A").await, OrchestrationStatus::NotFound);
    }
}
