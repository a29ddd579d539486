use super::{OrchestrationStatus, Runtime};
use crate::Event;

/// Status of one execution as recorded in its history.
pub fn status_from_history(history: &[Event]) -> OrchestrationStatus {
    if history.is_empty() {
        return OrchestrationStatus::NotStarted;
    }
    for e in history.iter().rev() {
        match e {
            Event::OrchestrationCompleted { output } => {
                return OrchestrationStatus::Completed { output: output.clone() };
            }
            Event::OrchestrationFailed { error } => {
                return OrchestrationStatus::Failed { error: error.clone() };
            }
            Event::OrchestrationTerminated { reason } => {
                return OrchestrationStatus::Terminated { reason: reason.clone() };
            }
            _ => {}
        }
    }
    // Includes a trailing ContinuedAsNew: the next execution is about to open.
    OrchestrationStatus::Running
}

impl Runtime {
    /// Status of the latest execution as persisted in the history store.
    pub async fn get_orchestration_status(&self, instance: &str) -> OrchestrationStatus {
        if self.history_store.latest_execution_id(instance).await.is_none() {
            return OrchestrationStatus::NotFound;
        }
        status_from_history(&self.history_store.read(instance).await)
    }

    /// Status and history of a specific execution.
    pub async fn get_execution_status(&self, instance: &str, execution_id: u64) -> (OrchestrationStatus, Vec<Event>) {
        let hist = self.history_store.read_with_execution(instance, execution_id).await;
        (status_from_history(&hist), hist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_status_from_last_terminal() {
        assert_eq!(status_from_history(&[]), OrchestrationStatus::NotStarted);
        let started = Event::OrchestrationStarted {
            name: "O".into(),
            input: String::new(),
            parent_instance: None,
            parent_id: None,
            started_at_ms: 0,
        };
        assert_eq!(status_from_history(&[started.clone()]), OrchestrationStatus::Running);
        assert_eq!(
            status_from_history(&[started.clone(), Event::OrchestrationContinuedAsNew { input: "x".into() }]),
            OrchestrationStatus::Running
        );
        assert_eq!(
            status_from_history(&[started, Event::OrchestrationTerminated { reason: "r".into() }]),
            OrchestrationStatus::Terminated { reason: "r".into() }
        );
    }
}
