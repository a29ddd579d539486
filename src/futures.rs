use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::{Event, OrchestrationContext};

/// Output of a `DurableFuture`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurableOutput {
    Timer,
    SubOrchestration(Result<String, String>),
}

/// Future correlated to a scheduling event by id. Resolves only from a
/// completion recorded in the turn's history; otherwise stays pending and the
/// host resumes the orchestration by replaying with more history.
pub struct DurableFuture(pub(crate) Kind);

pub(crate) enum Kind {
    Timer {
        id: u64,
        ctx: OrchestrationContext,
    },
    SubOrch {
        id: u64,
        instance: String,
        ctx: OrchestrationContext,
    },
}

impl DurableFuture {
    pub(crate) fn timer(id: u64, ctx: OrchestrationContext) -> Self {
        DurableFuture(Kind::Timer { id, ctx })
    }

    pub(crate) fn sub_orchestration(id: u64, instance: String, ctx: OrchestrationContext) -> Self {
        DurableFuture(Kind::SubOrch { id, instance, ctx })
    }

    /// Correlation id of the scheduling event behind this future.
    pub fn correlation_id(&self) -> u64 {
        match &self.0 {
            Kind::Timer { id, .. } | Kind::SubOrch { id, .. } => *id,
        }
    }

    /// Child instance id for sub-orchestration futures.
    pub fn child_instance(&self) -> Option<&str> {
        match &self.0 {
            Kind::SubOrch { instance, .. } => Some(instance),
            Kind::Timer { .. } => None,
        }
    }

    /// Resolve when the correlated timer fires.
    pub async fn into_timer(self) {
        match self.await {
            DurableOutput::Timer => {}
            other => panic!("into_timer used on non-timer future: {other:?}"),
        }
    }

    /// Resolve with the child's raw result or error string.
    pub async fn into_sub_orchestration(self) -> Result<String, String> {
        match self.await {
            DurableOutput::SubOrchestration(r) => r,
            other => panic!("into_sub_orchestration used on non-sub-orch future: {other:?}"),
        }
    }
}

impl Future for DurableFuture {
    type Output = DurableOutput;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &self.get_mut().0 {
            Kind::Timer { id, ctx } => {
                let mut inner = ctx.inner.lock().unwrap();
                if inner.nondeterminism.is_some() {
                    return Poll::Pending;
                }
                let fired = inner.history.iter().find_map(|e| match e {
                    Event::TimerFired { id: fid, fire_at_ms } if fid == id => Some(*fire_at_ms),
                    _ => None,
                });
                match fired {
                    Some(at) => {
                        inner.logical_now_ms = inner.logical_now_ms.max(at);
                        inner.consume_completion(*id);
                        Poll::Ready(DurableOutput::Timer)
                    }
                    None => Poll::Pending,
                }
            }
            Kind::SubOrch { id, ctx, .. } => {
                let mut inner = ctx.inner.lock().unwrap();
                if inner.nondeterminism.is_some() {
                    return Poll::Pending;
                }
                // First recorded completion wins; later duplicates are ignored
                let done = inner.history.iter().find_map(|e| match e {
                    Event::SubOrchestrationCompleted { id: cid, result } if cid == id => Some(Ok(result.clone())),
                    Event::SubOrchestrationFailed { id: cid, error } if cid == id => Some(Err(error.clone())),
                    _ => None,
                });
                match done {
                    Some(r) => {
                        inner.consume_completion(*id);
                        Poll::Ready(DurableOutput::SubOrchestration(r))
                    }
                    None => Poll::Pending,
                }
            }
        }
    }
}
