use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::{fs, io::AsyncWriteExt};

use super::{
    HISTORY_CAP, HistoryStore, PruneOptions, PruneResult, check_cap, filter_duplicates, is_finished, prune_candidates,
};
use crate::Event;

/// Filesystem-backed history store: one directory per instance and one JSONL
/// file per execution (`<root>/<instance>/<execution_id>.jsonl`).
#[derive(Clone)]
pub struct FsHistoryStore {
    root: PathBuf,
    cap: usize,
    // Serializes read-modify-write per instance directory
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FsHistoryStore {
    /// Open a store under `root`, wiping previous contents when `reset_on_create` is set.
    pub fn new(root: impl AsRef<Path>, reset_on_create: bool) -> Self {
        let path = root.as_ref().to_path_buf();
        if reset_on_create {
            let _ = std::fs::remove_dir_all(&path);
        }
        let _ = std::fs::create_dir_all(&path);
        Self {
            root: path,
            cap: HISTORY_CAP,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Same as [`FsHistoryStore::new`] with a per-execution cap other than [`HISTORY_CAP`].
    pub fn new_with_cap(root: impl AsRef<Path>, reset_on_create: bool, cap: usize) -> Self {
        let mut s = Self::new(root, reset_on_create);
        s.cap = cap;
        s
    }

    async fn lock_instance(&self, instance: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().await.entry(instance.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    fn inst_root(&self, instance: &str) -> PathBuf {
        self.root.join(instance)
    }

    fn exec_path(&self, instance: &str, execution_id: u64) -> PathBuf {
        self.inst_root(instance).join(format!("{execution_id}.jsonl"))
    }

    async fn write_events(&self, path: &Path, events: &[Event]) -> Result<(), String> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|e| e.to_string())?;
        for ev in events {
            let mut line = serde_json::to_string(ev).map_err(|e| e.to_string())?;
            line.push('\n');
            file.write_all(line.as_bytes()).await.map_err(|e| e.to_string())?;
        }
        file.flush().await.map_err(|e| e.to_string())
    }
}

#[async_trait::async_trait]
impl HistoryStore for FsHistoryStore {
    async fn read(&self, instance: &str) -> Vec<Event> {
        match self.latest_execution_id(instance).await {
            Some(latest) => self.read_with_execution(instance, latest).await,
            None => Vec::new(),
        }
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), String> {
        let Some(latest) = self.latest_execution_id(instance).await else {
            return Err(format!("instance not found: {instance}"));
        };
        self.append_with_execution(instance, latest, new_events).await
    }

    async fn reset(&self) {
        let _ = fs::remove_dir_all(&self.root).await;
        let _ = fs::create_dir_all(&self.root).await;
    }

    async fn list_instances(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Ok(mut rd) = fs::read_dir(&self.root).await {
            while let Ok(Some(ent)) = rd.next_entry().await {
                let is_dir = ent.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if is_dir && let Some(name) = ent.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        out
    }

    async fn dump_all_pretty(&self) -> String {
        let mut out = String::new();
        for inst in self.list_instances().await {
            out.push_str(&format!("instance={inst}\n"));
            for eid in self.list_executions(&inst).await {
                for ev in self.read_with_execution(&inst, eid).await {
                    out.push_str(&format!("  exec#{eid} {ev:#?}\n"));
                }
            }
        }
        out
    }

    async fn create_instance(&self, instance: &str) -> Result<(), String> {
        let _guard = self.lock_instance(instance).await;
        let inst_dir = self.inst_root(instance);
        if fs::try_exists(&inst_dir).await.map_err(|e| e.to_string())? {
            return Err(format!("instance already exists: {instance}"));
        }
        fs::create_dir_all(&inst_dir).await.map_err(|e| e.to_string())?;
        fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(self.exec_path(instance, 1))
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn remove_instance(&self, instance: &str) -> Result<(), String> {
        let _guard = self.lock_instance(instance).await;
        let inst_dir = self.inst_root(instance);
        if !fs::try_exists(&inst_dir).await.map_err(|e| e.to_string())? {
            return Err(format!("instance not found: {instance}"));
        }
        fs::remove_dir_all(&inst_dir).await.map_err(|e| e.to_string())?;
        self.locks.lock().await.remove(instance);
        Ok(())
    }

    async fn latest_execution_id(&self, instance: &str) -> Option<u64> {
        self.list_executions(instance).await.last().copied()
    }

    async fn list_executions(&self, instance: &str) -> Vec<u64> {
        let mut ids = Vec::new();
        if let Ok(mut rd) = fs::read_dir(self.inst_root(instance)).await {
            while let Ok(Some(ent)) = rd.next_entry().await {
                if let Some(name) = ent.file_name().to_str()
                    && let Some(stem) = name.strip_suffix(".jsonl")
                    && let Ok(id) = stem.parse::<u64>()
                {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        ids
    }

    async fn read_with_execution(&self, instance: &str, execution_id: u64) -> Vec<Event> {
        let data = fs::read_to_string(self.exec_path(instance, execution_id))
            .await
            .unwrap_or_default();
        data.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<Event>(l).ok())
            .collect()
    }

    async fn append_with_execution(
        &self,
        instance: &str,
        execution_id: u64,
        new_events: Vec<Event>,
    ) -> Result<(), String> {
        let _guard = self.lock_instance(instance).await;
        let path = self.exec_path(instance, execution_id);
        if !fs::try_exists(&path).await.map_err(|e| e.to_string())? {
            return Err(format!("execution not found: {instance}#{execution_id}"));
        }
        let existing = self.read_with_execution(instance, execution_id).await;
        let fresh = filter_duplicates(&existing, new_events);
        if fresh.is_empty() {
            return Ok(());
        }
        check_cap(self.cap, existing.len(), fresh.len())?;
        self.write_events(&path, &fresh).await
    }

    async fn create_new_execution(&self, instance: &str, started: Event) -> Result<u64, String> {
        if !matches!(started, Event::OrchestrationStarted { .. }) {
            return Err(format!("new execution must begin with OrchestrationStarted, got {started:?}"));
        }
        let _guard = self.lock_instance(instance).await;
        fs::create_dir_all(self.inst_root(instance))
            .await
            .map_err(|e| e.to_string())?;
        let next = self.latest_execution_id(instance).await.unwrap_or(0) + 1;
        let path = self.exec_path(instance, next);
        fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .await
            .map_err(|e| e.to_string())?;
        self.write_events(&path, &[started]).await?;
        Ok(next)
    }

    async fn prune_executions(&self, instance: &str, options: PruneOptions) -> Result<PruneResult, String> {
        let _guard = self.lock_instance(instance).await;
        if !fs::try_exists(self.inst_root(instance)).await.map_err(|e| e.to_string())? {
            return Err(format!("instance not found: {instance}"));
        }
        let ids = self.list_executions(instance).await;
        let mut result = PruneResult::default();
        for &id in prune_candidates(&ids, options) {
            let history = self.read_with_execution(instance, id).await;
            if !is_finished(&history) {
                continue;
            }
            fs::remove_file(self.exec_path(instance, id))
                .await
                .map_err(|e| e.to_string())?;
            result.executions_deleted += 1;
            result.events_deleted += history.len() as u64;
        }
        Ok(result)
    }
}
