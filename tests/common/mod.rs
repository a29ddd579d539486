#![allow(dead_code)]

use eternal_dtf::Event;
use eternal_dtf::OrchestrationStatus;
use eternal_dtf::correlation::{MemoryTelemetrySink, TelemetrySink};
use eternal_dtf::eternal::{EternalConfig, orchestrations};
use eternal_dtf::providers::HistoryStore;
use eternal_dtf::runtime::Runtime;
use eternal_dtf::OrchestrationRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Poll the latest execution of `instance` until `pred` holds or the timeout elapses.
pub async fn wait_for_history<F>(store: Arc<dyn HistoryStore>, instance: &str, pred: F, timeout_ms: u64) -> bool
where
    F: Fn(&Vec<Event>) -> bool,
{
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let hist = store.read(instance).await;
        if pred(&hist) {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until `instance` has at least `min_execution` executions.
pub async fn wait_for_execution(store: Arc<dyn HistoryStore>, instance: &str, min_execution: u64, timeout_ms: u64) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if store.latest_execution_id(instance).await.unwrap_or(0) >= min_execution {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the runtime's registry reports a terminal status for `instance`.
pub async fn wait_for_registry_terminal(rt: &Runtime, instance: &str, timeout_ms: u64) -> Option<OrchestrationStatus> {
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let st = rt.instances().get_status(instance).await;
        if st.is_terminal() {
            return Some(st);
        }
        if std::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Child instance ids scheduled by any execution of `instance`.
pub async fn scheduled_children(store: &Arc<dyn HistoryStore>, instance: &str) -> Vec<String> {
    let mut out = Vec::new();
    for eid in store.list_executions(instance).await {
        for e in store.read_with_execution(instance, eid).await {
            if let Event::SubOrchestrationScheduled { instance: child, .. } = e {
                out.push(child);
            }
        }
    }
    out
}

/// Config with short timings for tests.
pub fn fast_config(cycle_delay_ms: u64) -> EternalConfig {
    EternalConfig {
        poll_interval_ms: 20,
        cycle_delay_ms,
        ..EternalConfig::default()
    }
}

/// Runtime hosting the eternal orchestrations over `store`, with an in-memory telemetry sink.
pub async fn eternal_runtime(
    store: Arc<dyn HistoryStore>,
    config: &EternalConfig,
) -> (Arc<Runtime>, Arc<MemoryTelemetrySink>) {
    let sink = Arc::new(MemoryTelemetrySink::default());
    let telemetry: Arc<dyn TelemetrySink> = sink.clone();
    let registry = orchestrations::register(OrchestrationRegistry::builder(), config, telemetry)
        .build_result()
        .unwrap();
    let rt = Runtime::start_with_options(store, registry, config.runtime_options()).await;
    (rt, sink)
}
