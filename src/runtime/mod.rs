use crate::_typed_codec::{Codec, Json};
use crate::providers::in_memory::InMemoryHistoryStore;
use crate::providers::{HistoryStore, PruneOptions, is_finished, prune_candidates};
use crate::{Action, Event, OrchestrationContext, TurnInfo};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod completions;
pub mod instances;
pub mod registry;
pub mod replay;
pub mod router;
pub mod status;
pub mod timers;

pub use instances::InstanceRegistry;
pub use registry::{OrchestrationRegistry, OrchestrationRegistryBuilder};
pub use replay::{DefaultReplayEngine, ReplayEngine, ReplayOutcome};
pub use router::{InstanceRouter, OrchestratorMsg};
pub use timers::TimerService;

/// Configuration options for the Runtime.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Retention applied each time an instance opens a new execution. Pruned
    /// executions take their finished children with them. `None` keeps all.
    pub execution_retention: Option<PruneOptions>,
}

/// Lifecycle status of an orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationStatus {
    NotFound,
    NotStarted,
    Running,
    Completed { output: String },
    Failed { error: String },
    Terminated { reason: String },
}

impl OrchestrationStatus {
    /// True once the run has ended and a new one may start.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed { .. }
                | OrchestrationStatus::Failed { .. }
                | OrchestrationStatus::Terminated { .. }
        )
    }
}

/// Error type returned by orchestration wait helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    Timeout,
    Other(String),
}

/// Trait implemented by orchestration handlers that can be invoked by the runtime.
#[async_trait]
pub trait OrchestrationHandler: Send + Sync {
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, String>;
}

/// Function wrapper that implements `OrchestrationHandler`.
pub struct FnOrchestration<F, Fut>(pub F)
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static;

#[async_trait]
impl<F, Fut> OrchestrationHandler for FnOrchestration<F, Fut>
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
{
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, String> {
        (self.0)(ctx, input).await
    }
}

/// How one execution of an instance ended.
enum ExecutionEnd {
    ContinuedAsNew,
    Finished {
        status: OrchestrationStatus,
        parent: Option<(String, u64)>,
    },
    Stopped,
}

/// Name, input and parent linkage from an execution's `OrchestrationStarted`.
struct StartInfo {
    name: String,
    input: String,
    parent: Option<(String, u64)>,
}

fn start_info(history: &[Event]) -> Option<StartInfo> {
    history.iter().find_map(|e| match e {
        Event::OrchestrationStarted {
            name,
            input,
            parent_instance,
            parent_id,
            ..
        } => Some(StartInfo {
            name: name.clone(),
            input: input.clone(),
            parent: parent_instance.clone().zip(*parent_id),
        }),
        _ => None,
    })
}

/// In-process runtime that hosts orchestration instances, drives timers and
/// sub-orchestrations, and persists history via a `HistoryStore`.
pub struct Runtime {
    router: Arc<InstanceRouter>,
    timers: TimerService,
    instance_joins: Mutex<Vec<JoinHandle<()>>>,
    history_store: Arc<dyn HistoryStore>,
    orchestration_registry: OrchestrationRegistry,
    instances: InstanceRegistry,
    replay_engine: Arc<dyn ReplayEngine>,
    active_instances: Mutex<HashSet<String>>,
    current_execution_ids: Mutex<HashMap<String, u64>>,
    shutdown_token: CancellationToken,
    options: RuntimeOptions,
}

impl Runtime {
    const COMPLETION_BATCH_LIMIT: usize = 128;

    /// Start a new runtime using the in-memory history store.
    pub async fn start(orchestration_registry: OrchestrationRegistry) -> Arc<Self> {
        let history_store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::default());
        Self::start_with_store(history_store, orchestration_registry).await
    }

    /// Start a new runtime over `history_store`, resuming every instance whose
    /// latest execution is still running.
    pub async fn start_with_store(
        history_store: Arc<dyn HistoryStore>,
        orchestration_registry: OrchestrationRegistry,
    ) -> Arc<Self> {
        Self::start_with_options(history_store, orchestration_registry, RuntimeOptions::default()).await
    }

    pub async fn start_with_options(
        history_store: Arc<dyn HistoryStore>,
        orchestration_registry: OrchestrationRegistry,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        crate::logging::init_tracing();

        let router = Arc::new(InstanceRouter::default());
        let runtime = Arc::new(Self {
            timers: TimerService::new(router.clone()),
            router,
            instance_joins: Mutex::new(Vec::new()),
            history_store,
            orchestration_registry,
            instances: InstanceRegistry::new(),
            replay_engine: Arc::new(DefaultReplayEngine::new()),
            active_instances: Mutex::new(HashSet::new()),
            current_execution_ids: Mutex::new(HashMap::new()),
            shutdown_token: CancellationToken::new(),
            options,
        });
        runtime.resume_pending().await;
        runtime
    }

    /// Shared instance registry (status + exclusivity).
    pub fn instances(&self) -> &InstanceRegistry {
        &self.instances
    }

    /// Underlying history store.
    pub fn history_store(&self) -> Arc<dyn HistoryStore> {
        self.history_store.clone()
    }

    /// Seed the registry from durable history and respawn running instances.
    async fn resume_pending(self: &Arc<Self>) {
        let mut resumed = Vec::new();
        for instance in self.history_store.list_instances().await {
            let st = self.get_orchestration_status(&instance).await;
            match st {
                OrchestrationStatus::NotFound | OrchestrationStatus::NotStarted => continue,
                OrchestrationStatus::Running => resumed.push(instance.clone()),
                _ => {}
            }
            self.instances.record(&instance, st).await;
        }
        for instance in resumed {
            info!(instance = %instance, "resuming running instance from history");
            self.ensure_instance_active(&instance).await;
        }
    }

    /// Start `name` under `instance` unless a run is already active. Returns
    /// `Ok(false)` when the instance is busy.
    pub async fn start_orchestration(
        self: &Arc<Self>,
        instance: &str,
        orchestration_name: &str,
        input: impl Into<String>,
    ) -> Result<bool, String> {
        if self.orchestration_registry.get(orchestration_name).is_none() {
            return Err(format!("unregistered:{orchestration_name}"));
        }
        if !self.instances.try_start(instance).await {
            debug!(instance, "start skipped; instance already running");
            return Ok(false);
        }
        match self.launch(instance, orchestration_name, input.into(), None).await {
            Ok(()) => Ok(true),
            Err(e) => {
                error!(instance, error = %e, "failed to launch orchestration");
                self.instances
                    .record(instance, OrchestrationStatus::Failed { error: e.clone() })
                    .await;
                Err(e)
            }
        }
    }

    /// Start a typed orchestration; input is serialized internally.
    pub async fn start_orchestration_typed<In: Serialize>(
        self: &Arc<Self>,
        instance: &str,
        orchestration_name: &str,
        input: &In,
    ) -> Result<bool, String> {
        let payload = Json::encode(input).map_err(|e| format!("encode: {e}"))?;
        self.start_orchestration(instance, orchestration_name, payload).await
    }

    /// Persist `OrchestrationStarted` for a fresh execution and spawn the loop.
    async fn launch(
        self: &Arc<Self>,
        instance: &str,
        orchestration_name: &str,
        input: String,
        parent: Option<(String, u64)>,
    ) -> Result<(), String> {
        let (parent_instance, parent_id) = parent.unzip();
        let started = Event::OrchestrationStarted {
            name: orchestration_name.to_string(),
            input,
            parent_instance,
            parent_id,
            started_at_ms: timers::now_ms(),
        };
        match self.history_store.latest_execution_id(instance).await {
            None => {
                self.history_store.create_instance(instance).await?;
                self.history_store.append(instance, vec![started]).await?;
            }
            Some(_) if self.history_store.read(instance).await.is_empty() => {
                self.history_store.append(instance, vec![started]).await?;
            }
            Some(_) => {
                self.history_store.create_new_execution(instance, started).await?;
                self.retain_history(instance).await;
            }
        }
        self.ensure_instance_active(instance).await;
        Ok(())
    }

    /// Spawn the instance loop unless one is already running in this process.
    async fn ensure_instance_active(self: &Arc<Self>, instance: &str) -> bool {
        if self.shutdown_token.is_cancelled() {
            return false;
        }
        if !self.active_instances.lock().await.insert(instance.to_string()) {
            return false;
        }
        // Register before spawning so completions and terminate requests are never missed
        let inbox = self.router.register(instance).await;
        let handle = self.clone().spawn_instance(instance.to_string(), inbox);
        self.instance_joins.lock().await.push(handle);
        true
    }

    fn spawn_instance(
        self: Arc<Self>,
        instance: String,
        inbox: mpsc::UnboundedReceiver<OrchestratorMsg>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_instance(instance, inbox).await })
    }

    /// Drive every execution of `instance` until the run ends or the runtime stops.
    async fn run_instance(self: Arc<Self>, instance: String, mut inbox: mpsc::UnboundedReceiver<OrchestratorMsg>) {
        let end = loop {
            let Some(execution_id) = self.history_store.latest_execution_id(&instance).await else {
                error!(instance = %instance, "instance vanished from history store");
                break ExecutionEnd::Finished {
                    status: OrchestrationStatus::Failed {
                        error: "instance not found".into(),
                    },
                    parent: None,
                };
            };
            self.current_execution_ids
                .lock()
                .await
                .insert(instance.clone(), execution_id);
            let token = self.shutdown_token.child_token();
            let end = self.run_execution(&instance, execution_id, &mut inbox, &token).await;
            // Drops pending timers of this execution
            token.cancel();
            match end {
                ExecutionEnd::ContinuedAsNew => continue,
                other => break other,
            }
        };

        self.router.unregister(&instance).await;
        self.current_execution_ids.lock().await.remove(&instance);
        self.active_instances.lock().await.remove(&instance);

        if let ExecutionEnd::Finished { status, parent } = end {
            info!(instance = %instance, status = ?status, "orchestration finished");
            self.instances.record(&instance, status.clone()).await;
            if let Some((parent_instance, parent_id)) = parent {
                self.notify_parent(&parent_instance, parent_id, &instance, status).await;
            }
        }
    }

    async fn run_execution(
        self: &Arc<Self>,
        instance: &str,
        execution_id: u64,
        inbox: &mut mpsc::UnboundedReceiver<OrchestratorMsg>,
        token: &CancellationToken,
    ) -> ExecutionEnd {
        let mut history = self.history_store.read_with_execution(instance, execution_id).await;
        let Some(StartInfo { name, input, parent }) = start_info(&history) else {
            error!(instance, execution_id, "no OrchestrationStarted in history; state corruption");
            return ExecutionEnd::Finished {
                status: OrchestrationStatus::Failed {
                    error: "corrupt history: missing OrchestrationStarted".into(),
                },
                parent: None,
            };
        };

        // Crash between the continue-as-new marker and the next execution
        if let Some(Event::OrchestrationContinuedAsNew { input: next }) = history.last() {
            let next = next.clone();
            return self.open_next_execution(instance, &name, next, parent).await;
        }
        let status = status::status_from_history(&history);
        if status.is_terminal() {
            return ExecutionEnd::Finished { status, parent };
        }

        let Some(handler) = self.orchestration_registry.get(&name) else {
            let error = format!("unregistered:{name}");
            return self
                .finish_execution(instance, execution_id, Event::OrchestrationFailed { error }, parent)
                .await;
        };

        self.rehydrate_pending(instance, execution_id, &history, token).await;

        let mut turn_index: u64 = 0;
        loop {
            let baseline_len = history.len();
            let outcome = self.replay_engine.replay(
                history,
                TurnInfo {
                    instance: instance.to_string(),
                    execution_id,
                    turn_index,
                },
                handler.clone(),
                input.clone(),
            );
            let continue_input = outcome.continue_as_new().map(str::to_string);
            if let Some(err) = outcome.nondeterminism {
                error!(instance, execution_id, turn_index, error = %err, "nondeterminism detected");
                return self
                    .finish_execution(instance, execution_id, Event::OrchestrationFailed { error: err }, parent)
                    .await;
            }
            history = outcome.history;

            if history.len() > baseline_len
                && let Err(e) = self
                    .history_store
                    .append_with_execution(instance, execution_id, history[baseline_len..].to_vec())
                    .await
            {
                return self.store_failure(instance, turn_index, e, parent);
            }

            if let Some(next) = continue_input {
                if let Err(e) = self
                    .history_store
                    .append_with_execution(
                        instance,
                        execution_id,
                        vec![Event::OrchestrationContinuedAsNew { input: next.clone() }],
                    )
                    .await
                {
                    return self.store_failure(instance, turn_index, e, parent);
                }
                return self.open_next_execution(instance, &name, next, parent).await;
            }

            if let Some(out) = outcome.output {
                let term = match out {
                    Ok(output) => Event::OrchestrationCompleted { output },
                    Err(error) => Event::OrchestrationFailed { error },
                };
                return self.finish_execution(instance, execution_id, term, parent).await;
            }

            self.apply_decisions(instance, execution_id, outcome.decisions, token).await;

            // Wait for at least one completion that changes history
            let len_before = history.len();
            while history.len() == len_before {
                let first = tokio::select! {
                    _ = token.cancelled() => return ExecutionEnd::Stopped,
                    msg = inbox.recv() => match msg {
                        Some(m) => m,
                        None => return ExecutionEnd::Stopped,
                    },
                };
                let mut batch = vec![first];
                while batch.len() < Self::COMPLETION_BATCH_LIMIT {
                    match inbox.try_recv() {
                        Ok(msg) => batch.push(msg),
                        Err(_) => break,
                    }
                }
                for msg in batch {
                    if let OrchestratorMsg::Terminate { reason, .. } = msg {
                        return self.terminate_execution(instance, execution_id, &history, reason, parent).await;
                    }
                    if let Some(eid) = msg.execution_id()
                        && eid != execution_id
                    {
                        warn!(instance, execution_id, msg_execution_id = eid, "ignoring message for another execution");
                        continue;
                    }
                    completions::append_completion(&mut history, msg);
                }
            }

            if let Err(e) = self
                .history_store
                .append_with_execution(instance, execution_id, history[len_before..].to_vec())
                .await
            {
                return self.store_failure(instance, turn_index, e, parent);
            }
            turn_index = turn_index.saturating_add(1);
        }
    }

    /// Materialize timers and child starts decided in the last turn.
    async fn apply_decisions(
        self: &Arc<Self>,
        instance: &str,
        execution_id: u64,
        decisions: Vec<Action>,
        token: &CancellationToken,
    ) {
        debug!(instance, execution_id, ?decisions, "apply_decisions");
        for d in decisions {
            match d {
                Action::CreateTimer { id, fire_at_ms, .. } => {
                    self.timers.schedule(instance, execution_id, id, fire_at_ms, token.clone());
                }
                Action::StartSubOrchestration {
                    id,
                    name,
                    instance: child,
                    input,
                } => {
                    self.start_child(instance, execution_id, id, &name, &child, input).await;
                }
                // Handled by the caller before decisions are applied
                Action::ContinueAsNew { .. } => {}
            }
        }
    }

    /// Re-arm timers and re-drive children that have no completion recorded.
    async fn rehydrate_pending(
        self: &Arc<Self>,
        instance: &str,
        execution_id: u64,
        history: &[Event],
        token: &CancellationToken,
    ) {
        let pending = completions::pending_work(history);
        for (id, fire_at_ms) in pending.timers {
            debug!(instance, execution_id, id, fire_at_ms, "re-arming timer");
            self.timers.schedule(instance, execution_id, id, fire_at_ms, token.clone());
        }
        for child in pending.children {
            match self.get_orchestration_status(&child.instance).await {
                OrchestrationStatus::NotFound | OrchestrationStatus::NotStarted => {
                    info!(instance, child = %child.instance, "re-launching child that was never started");
                    self.start_child(instance, execution_id, child.id, &child.name, &child.instance, child.input)
                        .await;
                }
                OrchestrationStatus::Running => {
                    // Its own loop reports back when it finishes
                    self.ensure_instance_active(&child.instance).await;
                }
                done => {
                    if let Some(msg) = completion_msg(instance, execution_id, child.id, &child.instance, done) {
                        self.router.forward(msg).await;
                    }
                }
            }
        }
    }

    async fn start_child(
        self: &Arc<Self>,
        parent_instance: &str,
        parent_execution_id: u64,
        parent_id: u64,
        name: &str,
        child: &str,
        input: String,
    ) {
        if !self.instances.try_start(child).await {
            debug!(parent = parent_instance, child, "child already running");
            return;
        }
        if let Err(e) = self
            .launch(child, name, input, Some((parent_instance.to_string(), parent_id)))
            .await
        {
            error!(parent = parent_instance, child, error = %e, "failed to start sub-orchestration");
            let status = OrchestrationStatus::Failed {
                error: format!("failed to start: {e}"),
            };
            self.instances.record(child, status.clone()).await;
            if let Some(msg) = completion_msg(parent_instance, parent_execution_id, parent_id, child, status) {
                self.router.forward(msg).await;
            }
        }
    }

    /// Report a finished child to its parent's current execution.
    async fn notify_parent(&self, parent_instance: &str, parent_id: u64, child: &str, status: OrchestrationStatus) {
        let execution_id = match self.current_execution_ids.lock().await.get(parent_instance).copied() {
            Some(eid) => eid,
            None => self
                .history_store
                .latest_execution_id(parent_instance)
                .await
                .unwrap_or(1),
        };
        if let Some(msg) = completion_msg(parent_instance, execution_id, parent_id, child, status)
            && !self.router.forward(msg).await
        {
            debug!(parent = parent_instance, child, "parent not active; result is re-delivered on recovery");
        }
    }

    /// Open the execution that follows an `OrchestrationContinuedAsNew` marker.
    async fn open_next_execution(
        &self,
        instance: &str,
        name: &str,
        input: String,
        parent: Option<(String, u64)>,
    ) -> ExecutionEnd {
        let (parent_instance, parent_id) = parent.clone().unzip();
        let started = Event::OrchestrationStarted {
            name: name.to_string(),
            input,
            parent_instance,
            parent_id,
            started_at_ms: timers::now_ms(),
        };
        match self.history_store.create_new_execution(instance, started).await {
            Ok(next) => {
                info!(instance, execution_id = next, "continued as new");
                self.retain_history(instance).await;
                ExecutionEnd::ContinuedAsNew
            }
            Err(e) => self.store_failure(instance, 0, e, parent),
        }
    }

    /// Apply execution retention to `instance`. Children scheduled by the
    /// executions being dropped are removed once they have finished.
    async fn retain_history(&self, instance: &str) {
        let Some(options) = self.options.execution_retention else {
            return;
        };
        let ids = self.history_store.list_executions(instance).await;
        for &eid in prune_candidates(&ids, options) {
            let history = self.history_store.read_with_execution(instance, eid).await;
            if !is_finished(&history) {
                continue;
            }
            for e in history {
                if let Event::SubOrchestrationScheduled { instance: child, .. } = e {
                    self.forget_finished_child(instance, &child).await;
                }
            }
        }
        match self.history_store.prune_executions(instance, options).await {
            Ok(r) if r.executions_deleted > 0 => {
                debug!(instance, executions = r.executions_deleted, events = r.events_deleted, "pruned history");
            }
            Ok(_) => {}
            Err(e) => warn!(instance, error = %e, "execution pruning failed"),
        }
    }

    async fn forget_finished_child(&self, parent: &str, child: &str) {
        if self.active_instances.lock().await.contains(child) {
            debug!(parent, child, "child still active; keeping it");
            return;
        }
        match self.get_orchestration_status(child).await {
            OrchestrationStatus::NotFound => {}
            st if st.is_terminal() => {
                if let Err(e) = self.history_store.remove_instance(child).await {
                    warn!(parent, child, error = %e, "failed to remove finished child");
                    return;
                }
            }
            _ => return,
        }
        self.instances.forget(child).await;
    }

    async fn finish_execution(
        &self,
        instance: &str,
        execution_id: u64,
        term: Event,
        parent: Option<(String, u64)>,
    ) -> ExecutionEnd {
        let status = status::status_from_history(std::slice::from_ref(&term));
        if let Err(e) = self
            .history_store
            .append_with_execution(instance, execution_id, vec![term])
            .await
        {
            return self.store_failure(instance, 0, e, parent);
        }
        ExecutionEnd::Finished { status, parent }
    }

    async fn terminate_execution(
        &self,
        instance: &str,
        execution_id: u64,
        history: &[Event],
        reason: String,
        parent: Option<(String, u64)>,
    ) -> ExecutionEnd {
        warn!(instance, execution_id, reason = %reason, "terminating orchestration");
        for child in completions::pending_work(history).children {
            self.router
                .forward(OrchestratorMsg::Terminate {
                    instance: child.instance,
                    reason: format!("parent {instance} terminated"),
                })
                .await;
        }
        self.finish_execution(instance, execution_id, Event::OrchestrationTerminated { reason }, parent)
            .await
    }

    fn store_failure(&self, instance: &str, turn_index: u64, e: String, parent: Option<(String, u64)>) -> ExecutionEnd {
        error!(instance, turn_index, error = %e, "history append failed");
        ExecutionEnd::Finished {
            status: OrchestrationStatus::Failed {
                error: format!("history append failed: {e}"),
            },
            parent,
        }
    }

    /// Terminate a running instance. Returns `Ok(false)` when nothing is running.
    pub async fn terminate_instance(&self, instance: &str, reason: impl Into<String>) -> Result<bool, String> {
        let reason = reason.into();
        if self.instances.get_status(instance).await != OrchestrationStatus::Running {
            return Ok(false);
        }
        let msg = OrchestratorMsg::Terminate {
            instance: instance.to_string(),
            reason: reason.clone(),
        };
        if self.router.forward(msg).await {
            return Ok(true);
        }
        // Not hosted by this process: record the termination directly
        if self.history_store.latest_execution_id(instance).await.is_none() {
            return Ok(false);
        }
        self.history_store
            .append(instance, vec![Event::OrchestrationTerminated { reason: reason.clone() }])
            .await?;
        self.instances
            .record(instance, OrchestrationStatus::Terminated { reason })
            .await;
        Ok(true)
    }

    /// Wait until the orchestration reaches a terminal state or the timeout elapses.
    pub async fn wait_for_orchestration(
        &self,
        instance: &str,
        timeout: std::time::Duration,
    ) -> Result<OrchestrationStatus, WaitError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut delay_ms: u64 = 5;
        loop {
            match self.get_orchestration_status(instance).await {
                s if s.is_terminal() => return Ok(s),
                _ if std::time::Instant::now() >= deadline => return Err(WaitError::Timeout),
                _ => {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    delay_ms = delay_ms.saturating_mul(2).min(100);
                }
            }
        }
    }

    /// Typed variant: `Ok(Ok(T))` on Completed with decoded output, `Ok(Err(_))` on Failed or Terminated.
    pub async fn wait_for_orchestration_typed<Out: serde::de::DeserializeOwned>(
        &self,
        instance: &str,
        timeout: std::time::Duration,
    ) -> Result<Result<Out, String>, WaitError> {
        match self.wait_for_orchestration(instance, timeout).await? {
            OrchestrationStatus::Completed { output } => Json::decode::<Out>(&output)
                .map(Ok)
                .map_err(|e| WaitError::Other(format!("decode failed: {e}"))),
            OrchestrationStatus::Failed { error } => Ok(Err(error)),
            OrchestrationStatus::Terminated { reason } => Ok(Err(format!("terminated: {reason}"))),
            other => Err(WaitError::Other(format!("unexpected status {other:?}"))),
        }
    }

    /// Stop all instance loops and pending timers. Durable state is left as-is
    /// so a later runtime over the same store resumes it.
    pub async fn shutdown(self: Arc<Self>) {
        self.shutdown_token.cancel();
        let joins = std::mem::take(&mut *self.instance_joins.lock().await);
        for j in joins {
            let _ = j.await;
        }
        for j in self.instance_joins.lock().await.drain(..) {
            j.abort();
        }
    }
}

/// Completion message for a parent, derived from the child's final status.
fn completion_msg(
    parent_instance: &str,
    execution_id: u64,
    id: u64,
    child: &str,
    status: OrchestrationStatus,
) -> Option<OrchestratorMsg> {
    let instance = parent_instance.to_string();
    let child = child.to_string();
    match status {
        OrchestrationStatus::Completed { output } => Some(OrchestratorMsg::SubOrchCompleted {
            instance,
            execution_id,
            id,
            child,
            result: output,
        }),
        OrchestrationStatus::Failed { error } => Some(OrchestratorMsg::SubOrchFailed {
            instance,
            execution_id,
            id,
            child,
            error,
        }),
        OrchestrationStatus::Terminated { reason } => Some(OrchestratorMsg::SubOrchFailed {
            instance,
            execution_id,
            id,
            child,
            error: format!("terminated: {reason}"),
        }),
        _ => None,
    }
}
