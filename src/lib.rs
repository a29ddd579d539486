//! Deterministic, replay-driven orchestration core for eternal workflows.
//!
//! An orchestration is plain async Rust code driven by an append-only history
//! of `Event`s. Each turn replays the history from the start: scheduling calls
//! that are already recorded are adopted instead of re-executed, recorded
//! completions resolve their futures immediately, and only work past the end
//! of history surfaces as new `Action`s for the host. The crate provides:
//!
//! - Public data model: `Event`, `Action`
//! - Turn driver: `run_turn`, `run_turn_with`, and `Executor`
//! - An `OrchestrationContext` with durable timers, sub-orchestrations,
//!   continue-as-new and replay-safe GUIDs/time
//! - A `runtime` that hosts instances, enforces single-active-instance
//!   exclusivity and recovers from a durable `HistoryStore`
//! - The `eternal` coordinator and its periodic trigger
use std::future::Future;
use std::pin::pin;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

pub mod correlation;
pub mod error;
pub mod eternal;
pub mod futures;
pub mod logging;
pub mod providers;
pub mod runtime;

pub use crate::error::OrchestrationError;
pub use crate::futures::{DurableFuture, DurableOutput};
pub use runtime::{OrchestrationHandler, OrchestrationRegistry, OrchestrationRegistryBuilder, OrchestrationStatus};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Internal codec utilities for typed I/O (kept private; public API remains ergonomic)
pub(crate) mod _typed_codec {
    use serde::{Serialize, de::DeserializeOwned};
    use serde_json::Value;
    pub trait Codec {
        fn encode<T: Serialize>(v: &T) -> Result<String, String>;
        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String>;
    }
    pub struct Json;
    impl Codec for Json {
        fn encode<T: Serialize>(v: &T) -> Result<String, String> {
            // Bare strings travel unquoted
            match serde_json::to_value(v) {
                Ok(Value::String(s)) => Ok(s),
                Ok(val) => serde_json::to_string(&val).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }
        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String> {
            match serde_json::from_str::<T>(s) {
                Ok(v) => Ok(v),
                Err(_) => {
                    let val = Value::String(s.to_string());
                    serde_json::from_value(val).map_err(|e| e.to_string())
                }
            }
        }
    }
}

/// Append-only orchestration history entries persisted by a provider and
/// consumed during replay. Scheduling events and their completions are paired
/// by a per-execution correlation `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    /// Execution started by orchestration name with input. Parent linkage is
    /// present when this is a child orchestration. `started_at_ms` seeds the
    /// replay-safe logical clock.
    OrchestrationStarted {
        name: String,
        input: String,
        parent_instance: Option<String>,
        parent_id: Option<u64>,
        started_at_ms: u64,
    },
    /// Orchestration completed with a final result.
    OrchestrationCompleted { output: String },
    /// Orchestration failed with a final error.
    OrchestrationFailed { error: String },
    /// Orchestration was torn down by the host.
    OrchestrationTerminated { reason: String },

    /// Timer was created and will logically fire at `fire_at_ms`.
    TimerCreated { id: u64, fire_at_ms: u64 },
    /// Timer fired at logical time `fire_at_ms`.
    TimerFired { id: u64, fire_at_ms: u64 },

    /// Sub-orchestration was scheduled; `instance` is the persisted child id.
    SubOrchestrationScheduled {
        id: u64,
        name: String,
        instance: String,
        input: String,
    },
    /// Sub-orchestration completed and returned a result to the parent.
    SubOrchestrationCompleted { id: u64, result: String },
    /// Sub-orchestration failed and returned an error to the parent.
    SubOrchestrationFailed { id: u64, error: String },

    /// Execution rolled over into a new one with fresh input (terminal for this execution).
    OrchestrationContinuedAsNew { input: String },
}

impl Event {
    /// Correlation id for scheduling and completion events.
    pub fn correlation_id(&self) -> Option<u64> {
        match self {
            Event::TimerCreated { id, .. }
            | Event::TimerFired { id, .. }
            | Event::SubOrchestrationScheduled { id, .. }
            | Event::SubOrchestrationCompleted { id, .. }
            | Event::SubOrchestrationFailed { id, .. } => Some(*id),
            Event::OrchestrationStarted { .. }
            | Event::OrchestrationCompleted { .. }
            | Event::OrchestrationFailed { .. }
            | Event::OrchestrationTerminated { .. }
            | Event::OrchestrationContinuedAsNew { .. } => None,
        }
    }

    /// True for timer fires and child results.
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            Event::TimerFired { .. } | Event::SubOrchestrationCompleted { .. } | Event::SubOrchestrationFailed { .. }
        )
    }

    /// True for events recording a decision that suspends the orchestration.
    pub fn is_scheduling(&self) -> bool {
        matches!(self, Event::TimerCreated { .. } | Event::SubOrchestrationScheduled { .. })
    }

    /// True for events that end an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::OrchestrationCompleted { .. }
                | Event::OrchestrationFailed { .. }
                | Event::OrchestrationTerminated { .. }
                | Event::OrchestrationContinuedAsNew { .. }
        )
    }

    /// Identity used by providers to drop duplicate completions and terminals.
    /// Terminal events share slot 0 so only the first one is kept.
    pub(crate) fn dedupe_key(&self) -> Option<(u64, &'static str)> {
        match self {
            Event::TimerFired { id, .. } => Some((*id, "tf")),
            Event::SubOrchestrationCompleted { id, .. } | Event::SubOrchestrationFailed { id, .. } => {
                Some((*id, "sc"))
            }
            e if e.is_terminal() => Some((0, "term")),
            _ => None,
        }
    }
}

/// Declarative decisions produced by an orchestration turn. The history
/// already contains the matching scheduling event; the host materializes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Create a timer that fires at logical time `fire_at_ms` (`delay_ms` after decision time).
    CreateTimer { id: u64, delay_ms: u64, fire_at_ms: u64 },
    /// Start a sub-orchestration by name under the given child instance id.
    StartSubOrchestration {
        id: u64,
        name: String,
        instance: String,
        input: String,
    },
    /// Continue the current orchestration as a new execution with new input.
    ContinueAsNew { input: String },
}

/// Identity and position of the turn being replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnInfo {
    pub instance: String,
    pub execution_id: u64,
    pub turn_index: u64,
}

impl Default for TurnInfo {
    fn default() -> Self {
        Self {
            instance: String::new(),
            execution_id: 1,
            turn_index: 0,
        }
    }
}

#[derive(Debug)]
struct CtxInner {
    history: Vec<Event>,
    actions: Vec<Action>,
    turn: TurnInfo,

    next_correlation_id: u64,
    guid_counter: u64,

    // Scheduling events recorded before this turn vs. adopted so far
    baseline_scheduled: usize,
    claimed_scheduled: usize,
    // Ids with a recorded completion vs. those the code has already observed
    baseline_completed: HashSet<u64>,
    consumed_completions: HashSet<u64>,

    logical_now_ms: u64,
    nondeterminism: Option<String>,
}

impl CtxInner {
    fn new(history: Vec<Event>, turn: TurnInfo) -> Self {
        let baseline_scheduled = history.iter().filter(|e| e.is_scheduling()).count();
        let baseline_completed = history
            .iter()
            .filter(|e| e.is_completion())
            .filter_map(Event::correlation_id)
            .collect();
        let logical_now_ms = history
            .iter()
            .find_map(|e| match e {
                Event::OrchestrationStarted { started_at_ms, .. } => Some(*started_at_ms),
                _ => None,
            })
            .unwrap_or(0);
        Self {
            history,
            actions: Vec::new(),
            turn,
            next_correlation_id: 1,
            guid_counter: 0,
            baseline_scheduled,
            claimed_scheduled: 0,
            baseline_completed,
            consumed_completions: HashSet::new(),
            logical_now_ms,
            nondeterminism: None,
        }
    }

    fn record_action(&mut self, a: Action) {
        self.actions.push(a);
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_correlation_id;
        self.next_correlation_id += 1;
        id
    }

    fn scheduled_event(&self, id: u64) -> Option<Event> {
        self.history
            .iter()
            .find(|e| e.is_scheduling() && e.correlation_id() == Some(id))
            .cloned()
    }

    fn flag_nondeterminism(&mut self, msg: String) {
        if self.nondeterminism.is_none() {
            self.nondeterminism = Some(msg);
        }
    }

    pub(crate) fn consume_completion(&mut self, id: u64) {
        self.consumed_completions.insert(id);
    }

    fn schedules_pending(&self) -> bool {
        self.claimed_scheduled < self.baseline_scheduled
    }

    fn is_replaying(&self) -> bool {
        self.schedules_pending() || self.consumed_completions.len() < self.baseline_completed.len()
    }
}

/// User-facing orchestration context for scheduling and replay-safe helpers.
#[derive(Clone)]
pub struct OrchestrationContext {
    inner: Arc<Mutex<CtxInner>>,
}

impl OrchestrationContext {
    /// Construct a new context from an existing history vector.
    pub fn new(history: Vec<Event>) -> Self {
        Self::with_turn(history, TurnInfo::default())
    }

    /// Construct a context bound to an instance/execution for one turn.
    pub fn with_turn(history: Vec<Event>, turn: TurnInfo) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CtxInner::new(history, turn))),
        }
    }

    fn take_actions(&self) -> Vec<Action> {
        std::mem::take(&mut self.inner.lock().unwrap().actions)
    }

    /// Instance id this orchestration executes under.
    pub fn instance_id(&self) -> String {
        self.inner.lock().unwrap().turn.instance.clone()
    }

    /// Execution id within the instance (increments on continue-as-new).
    pub fn execution_id(&self) -> u64 {
        self.inner.lock().unwrap().turn.execution_id
    }

    /// The zero-based turn counter assigned by the host for diagnostics.
    pub fn turn_index(&self) -> u64 {
        self.inner.lock().unwrap().turn.turn_index
    }

    /// True while the code is re-walking decisions already recorded in history.
    /// Flips to false once every recorded scheduling event has been adopted and
    /// every recorded completion has been observed by its future.
    pub fn is_replaying(&self) -> bool {
        self.inner.lock().unwrap().is_replaying()
    }

    /// Replay-safe logical time: the execution start time advanced by fired timers.
    pub fn current_time_ms(&self) -> u64 {
        self.inner.lock().unwrap().logical_now_ms
    }

    /// Replay-safe GUID derived from instance, execution and call position.
    pub fn new_guid(&self) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.guid_counter += 1;
        let name = format!(
            "{}/{}/{}",
            inner.turn.instance, inner.turn.execution_id, inner.guid_counter
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    /// Schedule a timer and return a `DurableFuture` correlated to it.
    pub fn schedule_timer(&self, delay_ms: u64) -> DurableFuture {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        match inner.scheduled_event(id) {
            Some(Event::TimerCreated { .. }) => inner.claimed_scheduled += 1,
            Some(other) => inner.flag_nondeterminism(format!(
                "nondeterministic: timer scheduled as id {id} but history recorded {other:?}"
            )),
            None => {
                let fire_at_ms = inner.logical_now_ms.saturating_add(delay_ms);
                inner.history.push(Event::TimerCreated { id, fire_at_ms });
                inner.record_action(Action::CreateTimer {
                    id,
                    delay_ms,
                    fire_at_ms,
                });
            }
        }
        drop(inner);
        DurableFuture::timer(id, self.clone())
    }

    /// Schedule a sub-orchestration under an explicit child instance id. When
    /// the call is replayed, the child id recorded in history wins.
    pub fn schedule_sub_orchestration(
        &self,
        name: impl Into<String>,
        instance: impl Into<String>,
        input: impl Into<String>,
    ) -> DurableFuture {
        let name: String = name.into();
        let instance: String = instance.into();
        let input: String = input.into();
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        let child = match inner.scheduled_event(id) {
            Some(Event::SubOrchestrationScheduled {
                name: recorded_name,
                instance: recorded,
                ..
            }) if recorded_name == name => {
                inner.claimed_scheduled += 1;
                recorded
            }
            Some(other) => {
                inner.flag_nondeterminism(format!(
                    "nondeterministic: sub-orchestration '{name}' scheduled as id {id} but history recorded {other:?}"
                ));
                instance
            }
            None => {
                inner.history.push(Event::SubOrchestrationScheduled {
                    id,
                    name: name.clone(),
                    instance: instance.clone(),
                    input: input.clone(),
                });
                inner.record_action(Action::StartSubOrchestration {
                    id,
                    name,
                    instance: instance.clone(),
                    input,
                });
                instance
            }
        };
        drop(inner);
        DurableFuture::sub_orchestration(id, child, self.clone())
    }

    /// Finish this execution and start a fresh one with `input` under the same instance id.
    pub fn continue_as_new(&self, input: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.record_action(Action::ContinueAsNew { input: input.into() });
    }
}

fn poll_once<F: Future>(fut: F) -> Poll<F::Output> {
    let mut cx = Context::from_waker(Waker::noop());
    let mut pinned = pin!(fut);
    pinned.as_mut().poll(&mut cx)
}

/// Tuple returned by `run_turn`: history after the turn, actions to execute,
/// and the output when the orchestration finished in this turn.
pub type TurnResult<O> = (Vec<Event>, Vec<Action>, Option<O>);

/// Full result of one replayed turn.
#[derive(Debug)]
pub struct TurnOutcome<O> {
    pub history: Vec<Event>,
    pub actions: Vec<Action>,
    pub output: Option<O>,
    /// Set when the code diverged from the recorded history.
    pub nondeterminism: Option<String>,
    /// False when the poll ended while still inside recorded history.
    pub replay_complete: bool,
}

/// Poll the orchestrator once with the provided history.
pub fn run_turn<O, F>(history: Vec<Event>, orchestrator: impl Fn(OrchestrationContext) -> F) -> TurnResult<O>
where
    F: Future<Output = O>,
{
    let t = run_turn_with(history, TurnInfo::default(), orchestrator);
    (t.history, t.actions, t.output)
}

/// Same as `run_turn` but binds the context to an instance, execution and
/// turn index, and reports nondeterminism and replay position.
pub fn run_turn_with<O, F>(
    history: Vec<Event>,
    turn: TurnInfo,
    orchestrator: impl Fn(OrchestrationContext) -> F,
) -> TurnOutcome<O>
where
    F: Future<Output = O>,
{
    let ctx = OrchestrationContext::with_turn(history, turn);
    let output = match poll_once(orchestrator(ctx.clone())) {
        Poll::Ready(out) => Some(out),
        Poll::Pending => None,
    };
    let actions = ctx.take_actions();
    let mut inner = ctx.inner.lock().unwrap();
    if output.is_some() && inner.nondeterminism.is_none() && inner.schedules_pending() {
        let left = inner.baseline_scheduled - inner.claimed_scheduled;
        inner.flag_nondeterminism(format!(
            "nondeterministic: orchestration finished with {left} recorded schedule event(s) not replayed"
        ));
    }
    TurnOutcome {
        history: std::mem::take(&mut inner.history),
        actions,
        output,
        nondeterminism: inner.nondeterminism.take(),
        replay_complete: !inner.is_replaying(),
    }
}

/// Helper for single-threaded, host-driven execution in tests and samples.
pub struct Executor;

impl Executor {
    /// Drives an orchestrator by alternately replaying one turn and invoking
    /// the provided `execute_actions` to materialize requested actions into
    /// history, until the orchestrator completes.
    pub fn drive_to_completion<O, F, X>(
        mut history: Vec<Event>,
        orchestrator: impl Fn(OrchestrationContext) -> F,
        mut execute_actions: X,
    ) -> (Vec<Event>, O)
    where
        F: Future<Output = O>,
        X: FnMut(Vec<Action>, &mut Vec<Event>),
    {
        loop {
            let (hist_after_replay, actions, output) = run_turn(history, &orchestrator);
            history = hist_after_replay;
            if let Some(out) = output {
                return (history, out);
            }
            execute_actions(actions, &mut history);
        }
    }
}
