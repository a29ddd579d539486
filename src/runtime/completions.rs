use std::collections::HashSet;
use tracing::warn;

use super::router::OrchestratorMsg;
use crate::Event;

/// A scheduled child that has no recorded completion yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChild {
    pub id: u64,
    pub name: String,
    pub instance: String,
    pub input: String,
}

/// Outstanding work of one execution derived from its history.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingWork {
    /// `(id, fire_at_ms)` of timers without `TimerFired`.
    pub timers: Vec<(u64, u64)>,
    pub children: Vec<PendingChild>,
}

/// Scan history for scheduling events whose completion is not recorded yet.
pub fn pending_work(history: &[Event]) -> PendingWork {
    let completed: HashSet<u64> = history
        .iter()
        .filter_map(|e| match e {
            Event::TimerFired { id, .. }
            | Event::SubOrchestrationCompleted { id, .. }
            | Event::SubOrchestrationFailed { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    let mut out = PendingWork::default();
    for e in history {
        match e {
            Event::TimerCreated { id, fire_at_ms } if !completed.contains(id) => {
                out.timers.push((*id, *fire_at_ms));
            }
            Event::SubOrchestrationScheduled {
                id,
                name,
                instance,
                input,
            } if !completed.contains(id) => out.children.push(PendingChild {
                id: *id,
                name: name.clone(),
                instance: instance.clone(),
                input: input.clone(),
            }),
            _ => {}
        }
    }
    out
}

/// Append the completion carried by `msg` if it matches a scheduling event of
/// the same kind that is still open. Returns true when history changed.
pub fn append_completion(history: &mut Vec<Event>, msg: OrchestratorMsg) -> bool {
    let open = pending_work(history);
    match msg {
        OrchestratorMsg::TimerFired {
            instance, id, fire_at_ms, ..
        } => {
            if open.timers.iter().any(|(tid, _)| *tid == id) {
                history.push(Event::TimerFired { id, fire_at_ms });
                true
            } else {
                warn!(instance = %instance, id, "dropping TimerFired with no open timer");
                false
            }
        }
        OrchestratorMsg::SubOrchCompleted {
            instance,
            id,
            child,
            result,
            ..
        } => {
            if open.children.iter().any(|c| c.id == id && c.instance == child) {
                history.push(Event::SubOrchestrationCompleted { id, result });
                true
            } else {
                warn!(instance = %instance, id, child = %child, "dropping sub-orchestration completion with no open schedule");
                false
            }
        }
        OrchestratorMsg::SubOrchFailed {
            instance,
            id,
            child,
            error,
            ..
        } => {
            if open.children.iter().any(|c| c.id == id && c.instance == child) {
                history.push(Event::SubOrchestrationFailed { id, error });
                true
            } else {
                warn!(instance = %instance, id, child = %child, "dropping sub-orchestration failure with no open schedule");
                false
            }
        }
        OrchestratorMsg::Terminate { .. } => false,
    }
}
