use std::collections::HashMap;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Messages delivered to a running instance's inbox. Completions carry the
/// execution they belong to so stale deliveries can be discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorMsg {
    TimerFired {
        instance: String,
        execution_id: u64,
        id: u64,
        fire_at_ms: u64,
    },
    SubOrchCompleted {
        instance: String,
        execution_id: u64,
        id: u64,
        child: String,
        result: String,
    },
    SubOrchFailed {
        instance: String,
        execution_id: u64,
        id: u64,
        child: String,
        error: String,
    },
    Terminate {
        instance: String,
        reason: String,
    },
}

impl OrchestratorMsg {
    pub fn instance(&self) -> &str {
        match self {
            OrchestratorMsg::TimerFired { instance, .. }
            | OrchestratorMsg::SubOrchCompleted { instance, .. }
            | OrchestratorMsg::SubOrchFailed { instance, .. }
            | OrchestratorMsg::Terminate { instance, .. } => instance,
        }
    }

    /// Target execution, `None` for instance-wide control messages.
    pub fn execution_id(&self) -> Option<u64> {
        match self {
            OrchestratorMsg::TimerFired { execution_id, .. }
            | OrchestratorMsg::SubOrchCompleted { execution_id, .. }
            | OrchestratorMsg::SubOrchFailed { execution_id, .. } => Some(*execution_id),
            OrchestratorMsg::Terminate { .. } => None,
        }
    }
}

/// Per-instance inboxes for in-process delivery.
#[derive(Default)]
pub struct InstanceRouter {
    inboxes: Mutex<HashMap<String, mpsc::UnboundedSender<OrchestratorMsg>>>,
}

impl InstanceRouter {
    pub async fn register(&self, instance: &str) -> mpsc::UnboundedReceiver<OrchestratorMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.lock().await.insert(instance.to_string(), tx);
        rx
    }

    pub async fn unregister(&self, instance: &str) {
        self.inboxes.lock().await.remove(instance);
    }

    pub async fn is_registered(&self, instance: &str) -> bool {
        self.inboxes.lock().await.contains_key(instance)
    }

    /// Deliver to the owning inbox; false when the instance is not active here.
    pub async fn forward(&self, msg: OrchestratorMsg) -> bool {
        let g = self.inboxes.lock().await;
        match g.get(msg.instance()) {
            Some(tx) => tx.send(msg).is_ok(),
            None => {
                debug!(instance = %msg.instance(), "no inbox for message; dropping");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_only_to_registered_inboxes() {
        let router = InstanceRouter::default();
        let mut rx = router.register("a").await;
        assert!(router.is_registered("a").await);

        let msg = OrchestratorMsg::TimerFired {
            instance: "a".into(),
            execution_id: 2,
            id: 1,
            fire_at_ms: 10,
        };
        assert!(router.forward(msg.clone()).await);
        let got = rx.recv().await.unwrap();
        assert_eq!(got.execution_id(), Some(2));
        assert_eq!(got, msg);

        let stop = OrchestratorMsg::Terminate {
            instance: "b".into(),
            reason: "x".into(),
        };
        assert_eq!(stop.execution_id(), None);
        assert!(!router.forward(stop).await);

        router.unregister("a").await;
        assert!(!router.is_registered("a").await);
        assert!(!router.forward(msg).await);
    }
}
