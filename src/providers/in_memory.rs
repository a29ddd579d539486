use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::{
    HISTORY_CAP, HistoryStore, PruneOptions, PruneResult, check_cap, filter_duplicates, is_finished, prune_candidates,
};
use crate::Event;

type Executions = BTreeMap<u64, Vec<Event>>;

/// In-memory history store. Each instance maps execution ids to histories;
/// ids keep increasing even after older executions are pruned.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    inner: Mutex<HashMap<String, Executions>>,
}

impl InMemoryHistoryStore {
    fn append_to(exec: &mut Vec<Event>, new_events: Vec<Event>) -> Result<(), String> {
        let fresh = filter_duplicates(exec, new_events);
        check_cap(HISTORY_CAP, exec.len(), fresh.len())?;
        exec.extend(fresh);
        Ok(())
    }
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn read(&self, instance: &str) -> Vec<Event> {
        let g = self.inner.lock().await;
        g.get(instance)
            .and_then(|execs| execs.last_key_value())
            .map(|(_, h)| h.clone())
            .unwrap_or_default()
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), String> {
        let mut g = self.inner.lock().await;
        let exec = g
            .get_mut(instance)
            .and_then(|execs| execs.last_entry())
            .ok_or_else(|| format!("instance not found: {instance}"))?;
        Self::append_to(exec.into_mut(), new_events)
    }

    async fn reset(&self) {
        self.inner.lock().await.clear();
    }

    async fn list_instances(&self) -> Vec<String> {
        let mut out: Vec<String> = self.inner.lock().await.keys().cloned().collect();
        out.sort();
        out
    }

    async fn dump_all_pretty(&self) -> String {
        let g = self.inner.lock().await;
        let mut names: Vec<&String> = g.keys().collect();
        names.sort();
        let mut out = String::new();
        for inst in names {
            out.push_str(&format!("instance={inst}\n"));
            for (eid, exec) in &g[inst] {
                for ev in exec {
                    out.push_str(&format!("  exec#{eid} {ev:#?}\n"));
                }
            }
        }
        out
    }

    async fn create_instance(&self, instance: &str) -> Result<(), String> {
        let mut g = self.inner.lock().await;
        if g.contains_key(instance) {
            return Err(format!("instance already exists: {instance}"));
        }
        g.insert(instance.to_string(), BTreeMap::from([(1, Vec::new())]));
        Ok(())
    }

    async fn remove_instance(&self, instance: &str) -> Result<(), String> {
        match self.inner.lock().await.remove(instance) {
            Some(_) => Ok(()),
            None => Err(format!("instance not found: {instance}")),
        }
    }

    async fn latest_execution_id(&self, instance: &str) -> Option<u64> {
        let g = self.inner.lock().await;
        g.get(instance).and_then(|e| e.last_key_value()).map(|(id, _)| *id)
    }

    async fn list_executions(&self, instance: &str) -> Vec<u64> {
        let g = self.inner.lock().await;
        g.get(instance).map(|e| e.keys().copied().collect()).unwrap_or_default()
    }

    async fn read_with_execution(&self, instance: &str, execution_id: u64) -> Vec<Event> {
        let g = self.inner.lock().await;
        g.get(instance)
            .and_then(|execs| execs.get(&execution_id))
            .cloned()
            .unwrap_or_default()
    }

    async fn append_with_execution(
        &self,
        instance: &str,
        execution_id: u64,
        new_events: Vec<Event>,
    ) -> Result<(), String> {
        let mut g = self.inner.lock().await;
        let exec = g
            .get_mut(instance)
            .and_then(|execs| execs.get_mut(&execution_id))
            .ok_or_else(|| format!("execution not found: {instance}#{execution_id}"))?;
        Self::append_to(exec, new_events)
    }

    async fn create_new_execution(&self, instance: &str, started: Event) -> Result<u64, String> {
        if !matches!(started, Event::OrchestrationStarted { .. }) {
            return Err(format!("new execution must begin with OrchestrationStarted, got {started:?}"));
        }
        let mut g = self.inner.lock().await;
        let execs = g.entry(instance.to_string()).or_default();
        let next = execs.last_key_value().map_or(1, |(id, _)| id + 1);
        execs.insert(next, vec![started]);
        Ok(next)
    }

    async fn prune_executions(&self, instance: &str, options: PruneOptions) -> Result<PruneResult, String> {
        let mut g = self.inner.lock().await;
        let execs = g
            .get_mut(instance)
            .ok_or_else(|| format!("instance not found: {instance}"))?;
        let ids: Vec<u64> = execs.keys().copied().collect();
        let mut result = PruneResult::default();
        for id in prune_candidates(&ids, options) {
            if execs.get(id).is_some_and(|h| is_finished(h))
                && let Some(h) = execs.remove(id)
            {
                result.executions_deleted += 1;
                result.events_deleted += h.len() as u64;
            }
        }
        Ok(result)
    }
}
