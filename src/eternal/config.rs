use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::providers::PruneOptions;
use crate::runtime::RuntimeOptions;

/// Settings shared by the coordinator registration, the trigger and the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EternalConfig {
    /// Identity of the single eternal instance.
    pub instance_id: String,
    /// Trigger period.
    pub poll_interval_ms: u64,
    /// Timer length of each sub-orchestration cycle.
    pub cycle_delay_ms: u64,
    /// Filesystem store root; in-memory when unset.
    pub store_dir: Option<PathBuf>,
    /// Executions retained per instance; older ones and their cycles are deleted.
    pub keep_executions: usize,
}

impl Default for EternalConfig {
    fn default() -> Self {
        Self {
            instance_id: "MyInstance2".to_string(),
            poll_interval_ms: 5_000,
            cycle_delay_ms: 5_000,
            store_dir: None,
            keep_executions: 3,
        }
    }
}

impl EternalConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Runtime settings implied by this config.
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            execution_retention: Some(PruneOptions {
                keep_last: Some(self.keep_executions),
            }),
        }
    }

    /// Read a JSON config file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| format!("read {}: {e}", path.display()))?;
        serde_json::from_str(&data).map_err(|e| format!("parse {}: {e}", path.display()))
    }

    /// Defaults, then `ETERNAL_CONFIG` (JSON file), then individual
    /// `ETERNAL_*` variables.
    pub fn from_env() -> Result<Self, String> {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    pub(crate) fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut cfg = match get("ETERNAL_CONFIG") {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        if let Some(id) = get("ETERNAL_INSTANCE_ID") {
            cfg.instance_id = id;
        }
        if let Some(v) = get("ETERNAL_POLL_INTERVAL_MS") {
            cfg.poll_interval_ms = parse_ms("ETERNAL_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("ETERNAL_CYCLE_DELAY_MS") {
            cfg.cycle_delay_ms = parse_ms("ETERNAL_CYCLE_DELAY_MS", &v)?;
        }
        if let Some(v) = get("ETERNAL_KEEP_EXECUTIONS") {
            cfg.keep_executions = v
                .trim()
                .parse()
                .map_err(|e| format!("ETERNAL_KEEP_EXECUTIONS={v:?}: {e}"))?;
        }
        if let Some(dir) = get("ETERNAL_STORE_DIR") {
            cfg.store_dir = Some(PathBuf::from(dir));
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.instance_id.trim().is_empty() {
            return Err("instance_id must not be empty".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be positive".into());
        }
        if self.keep_executions == 0 {
            return Err("keep_executions must be at least 1".into());
        }
        Ok(())
    }
}

fn parse_ms(key: &str, v: &str) -> Result<u64, String> {
    v.trim().parse::<u64>().map_err(|e| format!("{key}={v:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_hosted_sample() {
        let c = EternalConfig::default();
        assert_eq!(c.instance_id, "MyInstance2");
        assert_eq!(c.poll_interval(), Duration::from_secs(5));
        assert_eq!(c.cycle_delay_ms, 5000);
        assert!(c.store_dir.is_none());
        assert_eq!(
            c.runtime_options().execution_retention,
            Some(PruneOptions { keep_last: Some(3) })
        );
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("eternal.json");
        std::fs::write(&file, r#"{"instance_id":"FromFile","cycle_delay_ms":20}"#).unwrap();

        let vars: HashMap<&str, String> = [
            ("ETERNAL_CONFIG", file.display().to_string()),
            ("ETERNAL_POLL_INTERVAL_MS", "250".to_string()),
        ]
        .into_iter()
        .collect();
        let c = EternalConfig::from_vars(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(c.instance_id, "FromFile");
        assert_eq!(c.cycle_delay_ms, 20);
        assert_eq!(c.poll_interval_ms, 250);

        let bad = EternalConfig::from_vars(|k| (k == "ETERNAL_CYCLE_DELAY_MS").then(|| "soon".to_string()));
        assert!(bad.is_err());
        let empty = EternalConfig::from_vars(|k| (k == "ETERNAL_INSTANCE_ID").then(|| " ".to_string()));
        assert!(empty.is_err());
        let keep = EternalConfig::from_vars(|k| (k == "ETERNAL_KEEP_EXECUTIONS").then(|| "5".to_string())).unwrap();
        assert_eq!(keep.keep_executions, 5);
        let none = EternalConfig::from_vars(|k| (k == "ETERNAL_KEEP_EXECUTIONS").then(|| "0".to_string()));
        assert!(none.is_err());
    }
}
