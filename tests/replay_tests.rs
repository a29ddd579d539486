use eternal_dtf::eternal::EternalInput;
use eternal_dtf::eternal::orchestrations::coordinator;
use eternal_dtf::runtime::{DefaultReplayEngine, FnOrchestration, ReplayEngine};
use eternal_dtf::{
    Action, DurableOutput, Event, Executor, OrchestrationContext, TurnInfo, durable_debug, durable_error, durable_info,
    durable_warn, run_turn, run_turn_with,
};
use futures::future::join;
use std::io::Write;
use std::sync::{Arc, Mutex};

fn started(at: u64) -> Event {
    Event::OrchestrationStarted {
        name: "O".into(),
        input: String::new(),
        parent_instance: None,
        parent_id: None,
        started_at_ms: at,
    }
}

fn turn(instance: &str, execution_id: u64) -> TurnInfo {
    TurnInfo {
        instance: instance.into(),
        execution_id,
        turn_index: 0,
    }
}

// Timer then child, awaited together
async fn timer_and_child(ctx: OrchestrationContext) -> String {
    let t = ctx.schedule_timer(100);
    let c = ctx.schedule_sub_orchestration("Child", "child-1", "in");
    let (_, child) = join(t, c).await;
    match child {
        DurableOutput::SubOrchestration(r) => r.unwrap_or_else(|e| format!("err:{e}")),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn first_turn_emits_actions_in_call_order() {
    let (hist, actions, out) = run_turn(vec![started(1_000)], timer_and_child);
    assert!(out.is_none());
    assert_eq!(
        actions,
        vec![
            Action::CreateTimer {
                id: 1,
                delay_ms: 100,
                fire_at_ms: 1_100
            },
            Action::StartSubOrchestration {
                id: 2,
                name: "Child".into(),
                instance: "child-1".into(),
                input: "in".into()
            },
        ]
    );
    assert!(matches!(hist[1], Event::TimerCreated { id: 1, fire_at_ms: 1_100 }));
    assert!(matches!(hist[2], Event::SubOrchestrationScheduled { id: 2, .. }));
}

#[test]
fn replay_is_deterministic_and_suppresses_recorded_work() {
    let (hist, _, _) = run_turn(vec![started(0)], timer_and_child);

    // Same history, same decisions, twice
    let (_, a1, o1) = run_turn(hist.clone(), timer_and_child);
    let (_, a2, o2) = run_turn(hist.clone(), timer_and_child);
    assert!(a1.is_empty() && a2.is_empty(), "recorded schedules must not be re-emitted");
    assert_eq!(o1, o2);
    assert!(o1.is_none());

    let mut done = hist;
    done.push(Event::SubOrchestrationCompleted {
        id: 2,
        result: "child-ok".into(),
    });
    done.push(Event::TimerFired { id: 1, fire_at_ms: 100 });
    let (_, actions, out) = run_turn(done, timer_and_child);
    assert!(actions.is_empty());
    assert_eq!(out.as_deref(), Some("child-ok"));
}

#[test]
fn duplicate_completion_first_wins() {
    let history = vec![
        started(0),
        Event::SubOrchestrationScheduled {
            id: 1,
            name: "Child".into(),
            instance: "c".into(),
            input: String::new(),
        },
        Event::SubOrchestrationCompleted {
            id: 1,
            result: "first".into(),
        },
        Event::SubOrchestrationFailed {
            id: 1,
            error: "second".into(),
        },
        Event::SubOrchestrationCompleted {
            id: 1,
            result: "third".into(),
        },
    ];
    let orch = |ctx: OrchestrationContext| async move {
        ctx.schedule_sub_orchestration("Child", "c", "").into_sub_orchestration().await
    };
    let (_, actions, out) = run_turn(history, orch);
    assert!(actions.is_empty());
    assert_eq!(out, Some(Ok("first".to_string())));
}

#[test]
fn replay_adopts_recorded_child_id() {
    let history = vec![
        started(0),
        Event::SubOrchestrationScheduled {
            id: 1,
            name: "Child".into(),
            instance: "Sub_recorded".into(),
            input: String::new(),
        },
    ];
    let t = run_turn_with(history, turn("P", 1), |ctx: OrchestrationContext| async move {
        let f = ctx.schedule_sub_orchestration("Child", "Sub_different", "");
        assert_eq!(f.child_instance(), Some("Sub_recorded"));
        f.await
    });
    assert!(t.actions.is_empty());
    assert!(t.nondeterminism.is_none());
}

#[test]
fn nondeterminism_is_reported() {
    // Kind mismatch: history has a timer where code now schedules a child
    let history = vec![started(0), Event::TimerCreated { id: 1, fire_at_ms: 5 }];
    let t = run_turn_with(history, turn("P", 1), |ctx: OrchestrationContext| async move {
        ctx.schedule_sub_orchestration("Child", "c", "").await
    });
    assert!(t.output.is_none());
    assert!(t.nondeterminism.unwrap().contains("nondeterministic"));

    // Name mismatch
    let history = vec![
        started(0),
        Event::SubOrchestrationScheduled {
            id: 1,
            name: "Old".into(),
            instance: "c".into(),
            input: String::new(),
        },
    ];
    let t = run_turn_with(history, turn("P", 1), |ctx: OrchestrationContext| async move {
        ctx.schedule_sub_orchestration("New", "c", "").await
    });
    assert!(t.nondeterminism.is_some());

    // Finishing without consuming a recorded schedule
    let history = vec![started(0), Event::TimerCreated { id: 1, fire_at_ms: 5 }];
    let t = run_turn_with(history, turn("P", 1), |_ctx: OrchestrationContext| async move { 7 });
    assert_eq!(t.output, Some(7));
    assert!(t.nondeterminism.unwrap().contains("not replayed"));
}

#[test]
fn replaying_flag_clock_and_guid_are_history_derived() {
    let history = vec![
        started(10_000),
        Event::TimerCreated { id: 1, fire_at_ms: 10_050 },
        Event::TimerFired { id: 1, fire_at_ms: 10_050 },
    ];
    let orch = |ctx: OrchestrationContext| async move {
        let before = (ctx.is_replaying(), ctx.current_time_ms());
        ctx.schedule_timer(50).into_timer().await;
        let after = (ctx.is_replaying(), ctx.current_time_ms());
        (before, after, ctx.new_guid(), ctx.new_guid())
    };
    let a = run_turn_with(history.clone(), turn("I", 1), orch);
    let b = run_turn_with(history.clone(), turn("I", 1), orch);
    let other_exec = run_turn_with(history, turn("I", 2), orch);

    let (before, after, g1, g2) = a.output.unwrap();
    assert_eq!(before, (true, 10_000));
    assert_eq!(after, (false, 10_050));
    assert!(a.replay_complete);
    assert_ne!(g1, g2);
    assert_eq!(b.output.unwrap().2, g1, "same position must yield the same guid");
    assert_ne!(other_exec.output.unwrap().2, g1, "guids differ across executions");
}

#[test]
fn continue_as_new_is_recorded_as_action() {
    let (_, actions, out) = run_turn(vec![started(0)], |ctx: OrchestrationContext| async move {
        ctx.continue_as_new("next");
        "done"
    });
    assert_eq!(out, Some("done"));
    assert_eq!(actions, vec![Action::ContinueAsNew { input: "next".into() }]);
}

#[test]
fn executor_drives_timers_and_children_to_completion() {
    let (hist, out) = Executor::drive_to_completion(vec![started(0)], timer_and_child, |actions, history| {
        for a in actions {
            match a {
                Action::CreateTimer { id, fire_at_ms, .. } => history.push(Event::TimerFired { id, fire_at_ms }),
                Action::StartSubOrchestration { id, input, .. } => history.push(Event::SubOrchestrationCompleted {
                    id,
                    result: format!("{input}-done"),
                }),
                Action::ContinueAsNew { .. } => unreachable!(),
            }
        }
    });
    assert_eq!(out, "in-done");
    assert_eq!(hist.len(), 5);
}

#[test]
fn default_engine_reports_next_action_and_replay_position() {
    let engine = DefaultReplayEngine::new();
    let handler = Arc::new(FnOrchestration(|ctx: OrchestrationContext, input: String| async move {
        ctx.schedule_timer(10).into_timer().await;
        Ok(input)
    }));

    let first = engine.replay(vec![started(0)], turn("E", 1), handler.clone(), "x".into());
    assert!(first.replay_complete);
    assert!(matches!(first.next_action(), Some(Action::CreateTimer { id: 1, .. })));
    assert!(first.output.is_none());

    // Recorded timer without a fire: adopted, nothing new to decide
    let second = engine.replay(first.history.clone(), turn("E", 1), handler.clone(), "x".into());
    assert!(second.replay_complete);
    assert!(second.next_action().is_none());
    assert!(second.output.is_none());

    let mut fired = first.history;
    fired.push(Event::TimerFired { id: 1, fire_at_ms: 10 });
    let third = engine.replay(fired, turn("E", 1), handler, "x".into());
    assert_eq!(third.output, Some(Ok("x".to_string())));
    assert!(third.continue_as_new().is_none());
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a debug-level fmt subscriber and return the captured lines.
fn capture_logs(f: impl FnOnce()) -> Vec<String> {
    let buf = LogBuffer::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    out.lines().map(str::to_string).collect()
}

fn count(lines: &[String], needle: &str) -> usize {
    lines.iter().filter(|l| l.contains(needle)).count()
}

#[test]
fn replayed_turns_do_not_repeat_durable_logs() {
    let orch = |ctx: OrchestrationContext| async move {
        durable_info!(ctx, "step-info");
        durable_warn!(ctx, "step-warn");
        durable_error!(ctx, "step-error");
        durable_debug!(ctx, "step-debug");
        ctx.schedule_timer(10).into_timer().await;
        durable_info!(ctx, "after-timer");
    };
    let lines = capture_logs(|| {
        let first = run_turn_with(vec![started(0)], turn("L", 1), orch);
        let mut hist = first.history;
        hist.push(Event::TimerFired { id: 1, fire_at_ms: 10 });
        let second = run_turn_with(hist, turn("L", 1), orch);
        assert!(second.output.is_some());
    });

    assert_eq!(count(&lines, "step-info"), 1);
    assert_eq!(count(&lines, "step-warn"), 1);
    assert_eq!(count(&lines, "step-error"), 1);
    assert_eq!(count(&lines, "after-timer"), 1);

    // Debug always emits and says whether it was replayed
    let debug: Vec<&String> = lines.iter().filter(|l| l.contains("step-debug")).collect();
    assert_eq!(debug.len(), 2);
    assert!(debug[0].contains("replaying=false"), "{}", debug[0]);
    assert!(debug[1].contains("replaying=true"), "{}", debug[1]);
    assert!(debug[0].contains("instance=L"));
}

#[test]
fn log_between_schedule_and_await_is_emitted_once() {
    let input = EternalInput::with_new_root().to_json().unwrap();
    let orch = |ctx: OrchestrationContext| coordinator(ctx, input.clone(), "Owner");
    let lines = capture_logs(|| {
        let first = run_turn_with(vec![started(0)], turn("Owner", 1), orch);
        assert!(first.output.is_none());
        let mut hist = first.history;
        hist.push(Event::SubOrchestrationCompleted {
            id: 1,
            result: "{}".into(),
        });
        let second = run_turn_with(hist, turn("Owner", 1), orch);
        assert!(second.output.is_some());
        assert!(second.replay_complete);
    });
    assert_eq!(count(&lines, "started cycle"), 1, "{lines:#?}");
}

#[test]
fn replaying_holds_until_recorded_completions_are_observed() {
    let history = vec![
        started(0),
        Event::SubOrchestrationScheduled {
            id: 1,
            name: "Child".into(),
            instance: "c".into(),
            input: String::new(),
        },
        Event::SubOrchestrationCompleted {
            id: 1,
            result: "r".into(),
        },
    ];
    let t = run_turn_with(history, turn("P", 1), |ctx: OrchestrationContext| async move {
        let f = ctx.schedule_sub_orchestration("Child", "c", "");
        let between = ctx.is_replaying();
        let r = f.into_sub_orchestration().await;
        (between, ctx.is_replaying(), r)
    });
    assert_eq!(t.output, Some((true, false, Ok("r".to_string()))));
    assert!(t.nondeterminism.is_none());
}
