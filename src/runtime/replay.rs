use std::sync::Arc;

use crate::runtime::OrchestrationHandler;
use crate::{Action, Event, TurnInfo};

/// Decisions are the same as public Actions; we emit them directly from the replay core.
pub type Decision = Action;

/// Result of replaying one turn.
#[derive(Debug)]
pub struct ReplayOutcome {
    pub history: Vec<Event>,
    pub decisions: Vec<Decision>,
    pub output: Option<Result<String, String>>,
    pub nondeterminism: Option<String>,
    pub replay_complete: bool,
}

impl ReplayOutcome {
    /// First decision of the turn, if any.
    pub fn next_action(&self) -> Option<&Decision> {
        self.decisions.first()
    }

    /// Input of a continue-as-new decision, if one was made.
    pub fn continue_as_new(&self) -> Option<&str> {
        self.decisions.iter().find_map(|d| match d {
            Action::ContinueAsNew { input } => Some(input.as_str()),
            _ => None,
        })
    }
}

pub trait ReplayEngine: Send + Sync {
    /// Replays one turn of `handler` over `history`.
    fn replay(
        &self,
        history: Vec<Event>,
        turn: TurnInfo,
        handler: Arc<dyn OrchestrationHandler>,
        input: String,
    ) -> ReplayOutcome;
}

#[derive(Default)]
pub struct DefaultReplayEngine;

impl DefaultReplayEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ReplayEngine for DefaultReplayEngine {
    fn replay(
        &self,
        history: Vec<Event>,
        turn: TurnInfo,
        handler: Arc<dyn OrchestrationHandler>,
        input: String,
    ) -> ReplayOutcome {
        let orchestrator = |ctx: crate::OrchestrationContext| {
            let h = handler.clone();
            let inp = input.clone();
            async move { h.invoke(ctx, inp).await }
        };
        let t = crate::run_turn_with(history, turn, orchestrator);
        ReplayOutcome {
            history: t.history,
            decisions: t.actions,
            output: t.output,
            nondeterminism: t.nondeterminism,
            replay_complete: t.replay_complete,
        }
    }
}
