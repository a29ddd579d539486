use std::collections::HashSet;

use crate::Event;

/// Storage abstraction for append-only orchestration history per instance.
///
/// An instance owns an ordered list of executions (ids start at 1); a new
/// execution is opened on continue-as-new or when a finished instance is
/// started again. `read` and `append` address the latest execution.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Read the latest execution's history for an instance.
    async fn read(&self, instance: &str) -> Vec<Event>;
    /// Append events to the latest execution; fails if the instance is missing
    /// or provider limits would be exceeded.
    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), String>;
    /// Clear provider data (test utility).
    async fn reset(&self);
    /// Enumerate known instances.
    async fn list_instances(&self) -> Vec<String>;
    /// Return a pretty-printed dump of all instances (test utility).
    async fn dump_all_pretty(&self) -> String;

    /// Create a new instance with one empty execution. Errors if it already exists.
    async fn create_instance(&self, instance: &str) -> Result<(), String>;
    /// Remove an existing instance and all of its executions.
    async fn remove_instance(&self, instance: &str) -> Result<(), String>;

    /// Latest execution id, or `None` for unknown instances.
    async fn latest_execution_id(&self, instance: &str) -> Option<u64>;
    /// All execution ids in order.
    async fn list_executions(&self, instance: &str) -> Vec<u64>;
    /// Read a specific execution's history.
    async fn read_with_execution(&self, instance: &str, execution_id: u64) -> Vec<Event>;
    /// Append to a specific execution.
    async fn append_with_execution(
        &self,
        instance: &str,
        execution_id: u64,
        new_events: Vec<Event>,
    ) -> Result<(), String>;
    /// Open a new execution seeded with `OrchestrationStarted` and return its id.
    async fn create_new_execution(
        &self,
        instance: &str,
        started: Event,
    ) -> Result<u64, String>;
    /// Delete old finished executions. The latest execution and any execution
    /// without a terminal event are never removed.
    async fn prune_executions(&self, instance: &str, options: PruneOptions) -> Result<PruneResult, String>;
}

/// Which historical executions `prune_executions` may delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOptions {
    /// Keep the newest N executions (the latest always counts as one).
    /// `None` keeps only the latest.
    pub keep_last: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneResult {
    pub executions_deleted: u64,
    pub events_deleted: u64,
}

/// Execution ids outside the retention window, oldest first. `ids` must be sorted.
pub(crate) fn prune_candidates(ids: &[u64], options: PruneOptions) -> &[u64] {
    let keep = options.keep_last.unwrap_or(1).max(1);
    &ids[..ids.len().saturating_sub(keep)]
}

/// An execution may be pruned once it ended (including continue-as-new).
pub(crate) fn is_finished(history: &[Event]) -> bool {
    history.last().is_some_and(Event::is_terminal)
}

/// Per-execution history cap shared by the bundled providers.
pub const HISTORY_CAP: usize = 1024;

/// Drop completion/terminal events already present in `existing` (or earlier
/// in `new_events`) so redelivered completions never duplicate history.
pub(crate) fn filter_duplicates(existing: &[Event], new_events: Vec<Event>) -> Vec<Event> {
    let mut seen: HashSet<(u64, &'static str)> = existing.iter().filter_map(Event::dedupe_key).collect();
    new_events
        .into_iter()
        .filter(|e| match e.dedupe_key() {
            Some(k) => seen.insert(k),
            None => true,
        })
        .collect()
}

pub(crate) fn check_cap(cap: usize, have: usize, append: usize) -> Result<(), String> {
    if have + append > cap {
        return Err(format!("history cap exceeded (cap={cap}, have={have}, append={append})"));
    }
    Ok(())
}

/// Filesystem-backed provider (JSONL, durable across restarts).
pub mod fs;
/// In-memory provider for tests.
pub mod in_memory;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_completions_and_terminals_are_filtered() {
        let existing = vec![
            Event::TimerCreated { id: 1, fire_at_ms: 5 },
            Event::TimerFired { id: 1, fire_at_ms: 5 },
        ];
        let out = filter_duplicates(
            &existing,
            vec![
                Event::TimerFired { id: 1, fire_at_ms: 5 },
                Event::SubOrchestrationCompleted {
                    id: 2,
                    result: "a".into(),
                },
                Event::SubOrchestrationFailed {
                    id: 2,
                    error: "late".into(),
                },
                Event::OrchestrationCompleted { output: "x".into() },
                Event::OrchestrationFailed { error: "y".into() },
            ],
        );
        assert_eq!(
            out,
            vec![
                Event::SubOrchestrationCompleted {
                    id: 2,
                    result: "a".into()
                },
                Event::OrchestrationCompleted { output: "x".into() },
            ]
        );
    }

    #[test]
    fn prune_window_always_keeps_the_latest() {
        let ids = [1, 2, 3, 4];
        assert_eq!(prune_candidates(&ids, PruneOptions { keep_last: Some(2) }), &[1, 2]);
        assert_eq!(prune_candidates(&ids, PruneOptions::default()), &[1, 2, 3]);
        assert_eq!(prune_candidates(&ids, PruneOptions { keep_last: Some(0) }), &[1, 2, 3]);
        assert!(prune_candidates(&ids, PruneOptions { keep_last: Some(9) }).is_empty());
        assert!(prune_candidates(&[], PruneOptions::default()).is_empty());
    }

    #[test]
    fn cap_is_enforced() {
        assert!(check_cap(HISTORY_CAP, HISTORY_CAP - 1, 1).is_ok());
        assert!(check_cap(HISTORY_CAP, HISTORY_CAP, 1).is_err());
    }
}
