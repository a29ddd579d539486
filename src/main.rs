use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use eternal_dtf::correlation::{TelemetrySink, TracingTelemetrySink};
use eternal_dtf::eternal::{EternalConfig, TriggerAdapter, orchestrations};
use eternal_dtf::providers::HistoryStore;
use eternal_dtf::providers::fs::FsHistoryStore;
use eternal_dtf::providers::in_memory::InMemoryHistoryStore;
use eternal_dtf::runtime::Runtime;
use eternal_dtf::OrchestrationRegistry;

#[tokio::main]
async fn main() {
    eternal_dtf::logging::init_tracing();

    let config = match EternalConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };
    info!(?config, "starting eternal host");

    let store: Arc<dyn HistoryStore> = match &config.store_dir {
        Some(dir) => Arc::new(FsHistoryStore::new(dir, false)),
        None => Arc::new(InMemoryHistoryStore::default()),
    };
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetrySink);
    let registry = match orchestrations::register(OrchestrationRegistry::builder(), &config, telemetry).build_result() {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "orchestration registration failed");
            std::process::exit(2);
        }
    };

    let rt = Runtime::start_with_options(store, registry, config.runtime_options()).await;
    let shutdown = CancellationToken::new();
    let trigger = TriggerAdapter::new(rt.clone(), config);
    let trigger_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { trigger.run(shutdown).await })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutting down");
    shutdown.cancel();
    let _ = trigger_task.await;
    rt.shutdown().await;
}
