//! Controller scenarios driven through the real dispatcher with scripted agents
//! and runner. Terminal I/O is never touched; events are pulled off the inbox
//! and applied the way the control loop does.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;

use super::*;
use crate::clipboard::{Copied, Osc52};
use crate::coalesce::Flush;
use crate::config::{AgentConfig, EventsConfig, SessionConfig, UiConfig};
use crate::conversation::{LogLevel, Role};
use crate::events::{AgentEventKind, AgentStreamEvent, EventBus, LogEvent};
use crate::focus::{FocusTarget, Overlay};
use crate::multiplexer::{self, DEFAULT_BATCH_CAP, DEFAULT_DEBOUNCE};
use crate::status::{AgentStatus, TaskStatus, WorkflowPhase};
use crate::test_support::{FakeAgent, FakeRunner};
use crate::workflow::{AgentSlot, LocalWorkflowRunner};

fn agent_config(name: &str) -> AgentConfig {
    AgentConfig {
        name: name.to_string(),
        color: "cyan".to_string(),
        enabled: true,
        endpoint: None,
        model: None,
        api_key: None,
        role: None,
    }
}

fn config() -> ResolvedConfig {
    ResolvedConfig {
        endpoint: "http://localhost:1/v1".to_string(),
        model: "test-model".to_string(),
        api_key: None,
        profile_name: "test".to_string(),
        cost_per_mtok_input: None,
        agents: vec![agent_config("claude"), agent_config("gpt")],
        session: SessionConfig::default(),
        events: EventsConfig::default(),
        ui: UiConfig {
            explorer: true,
            logs: true,
            stats: true,
            tokens: true,
            ..UiConfig::default()
        },
        state_dir: PathBuf::from("/nonexistent/quorum-test"),
    }
}

fn harness(
    agents: Vec<Arc<FakeAgent>>,
    runner: Option<Arc<FakeRunner>>,
) -> (AppState, Services, mpsc::UnboundedReceiver<UiEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = AppState::new(&config(), std::env::temp_dir(), PromptHistory::ephemeral(50));
    let services = Services {
        dispatcher: Dispatcher::new(tx),
        agents: agents.into_iter().map(|a| AgentSlot::new(a)).collect(),
        runner: runner.map(|r| r as SharedRunner),
        watcher: None,
    };
    (state, services, rx)
}

/// Pull events off the inbox and apply them until one matching `done` has
/// been applied.
async fn settle(
    state: &mut AppState,
    services: &Services,
    rx: &mut mpsc::UnboundedReceiver<UiEvent>,
    done: impl Fn(&UiEvent) -> bool,
) {
    loop {
        let ev = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("inbox closed");
        let last = done(&ev);
        apply::apply_event(state, services, ev);
        if last {
            return;
        }
    }
}

/// Apply whatever arrives within `window`.
async fn drain(
    state: &mut AppState,
    services: &Services,
    rx: &mut mpsc::UnboundedReceiver<UiEvent>,
    window: Duration,
) {
    let until = tokio::time::Instant::now() + window;
    while let Ok(Some(ev)) = tokio::time::timeout_at(until, rx.recv()).await {
        apply::apply_event(state, services, ev);
    }
}

fn stream(agent: &str, kind: AgentEventKind, message: &str) -> UiEvent {
    UiEvent::Bus(BusEvent::AgentStream(AgentStreamEvent {
        agent: agent.to_string(),
        kind,
        message: message.to_string(),
    }))
}

fn activity(state: &AppState, agent: &str) -> String {
    state.roster.get(agent).map(|a| a.activity.clone()).unwrap_or_default()
}

fn status(state: &AppState, agent: &str) -> Option<AgentStatus> {
    state.roster.get(agent).map(|a| a.status)
}

fn is_chat_finished(ev: &UiEvent) -> bool {
    matches!(ev, UiEvent::ChatFinished { .. })
}

fn is_workflow_finished(ev: &UiEvent) -> bool {
    matches!(ev, UiEvent::WorkflowFinished { .. })
}

fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

fn ctrl(c: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
}

fn last_message(state: &AppState) -> Message {
    state.conversation.history.iter().last().cloned().expect("no messages")
}

fn system_messages(state: &AppState) -> Vec<String> {
    state
        .conversation
        .history
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.body.clone())
        .collect()
}

// ── Chat ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_round_trip() {
    let agent = Arc::new(FakeAgent::with("claude", |req| {
        assert_eq!(req.prompt, "hello");
        Ok("hi there".to_string())
    }));
    let (mut state, services, mut rx) = harness(vec![agent.clone()], None);

    state.input.set("hello");
    assert!(actions::submit_input(&mut state, &services));
    assert!(state.input.is_empty());
    assert_eq!(state.conversation.history.len(), 1);
    assert_eq!(last_message(&state).role, Role::User);
    assert!(state.conversation.streaming);
    assert_eq!(state.roster.get("claude").map(|a| a.status), Some(AgentStatus::Running));

    settle(&mut state, &services, &mut rx, is_chat_finished).await;

    assert!(!state.conversation.streaming);
    assert!(!state.is_busy());
    assert_eq!(state.conversation.history.len(), 2);
    let reply = last_message(&state);
    assert_eq!(reply.role, Role::Agent);
    assert_eq!(reply.author, "claude");
    assert_eq!(reply.body, "hi there");
    assert_eq!(reply.meta.as_ref().map(|m| (m.tokens_in, m.tokens_out)), Some((10, 5)));
    assert_eq!((state.totals.tokens_in, state.totals.tokens_out), (10, 5));
    assert_eq!(state.roster.get("claude").map(|a| a.status), Some(AgentStatus::Done));
    assert_eq!(agent.calls(), 1);
}

#[tokio::test]
async fn test_chat_carries_prior_turns() {
    let agent = Arc::new(FakeAgent::with("claude", |req| Ok(format!("seen {}", req.messages.len()))));
    let (mut state, services, mut rx) = harness(vec![agent], None);

    state.input.set("first");
    actions::submit_input(&mut state, &services);
    settle(&mut state, &services, &mut rx, is_chat_finished).await;
    assert_eq!(last_message(&state).body, "seen 0");

    state.input.set("second");
    actions::submit_input(&mut state, &services);
    settle(&mut state, &services, &mut rx, is_chat_finished).await;
    // the first user turn and its reply
    assert_eq!(last_message(&state).body, "seen 2");
}

#[tokio::test]
async fn test_stale_chat_result_is_dropped() {
    let (mut state, services, _rx) = harness(vec![], None);
    let stale = state.conversation.slot.begin("chat with claude").generation;
    let current = state.conversation.slot.begin("chat with claude").generation;
    assert_ne!(stale, current);

    apply::apply_event(
        &mut state,
        &services,
        UiEvent::ChatFinished {
            generation: stale,
            agent: "claude".to_string(),
            result: Ok(ExecuteResult { output: "late".into(), tokens_in: 1, tokens_out: 1 }),
        },
    );
    assert!(state.conversation.history.is_empty());
    assert_eq!(state.totals.tokens_in, 0);
    assert!(state.conversation.slot.is_active());
}

#[tokio::test]
async fn test_completion_after_cancel_is_dropped() {
    let (mut state, services, _rx) = harness(vec![], None);
    let generation = state.conversation.slot.begin("chat with claude").generation;
    if let Some(a) = state.roster.get_mut("claude") {
        a.on_started(Some("chat".into()), None);
    }
    assert!(actions::cancel_active(&mut state));
    assert_eq!(status(&state, "claude"), Some(AgentStatus::Idle));

    apply::apply_event(
        &mut state,
        &services,
        UiEvent::ChatFinished {
            generation,
            agent: "claude".to_string(),
            result: Ok(ExecuteResult { output: "late".into(), tokens_in: 4, tokens_out: 2 }),
        },
    );
    assert_eq!(system_messages(&state), vec!["Cancelled chat with claude.".to_string()]);
    assert_eq!(state.conversation.history.len(), 1);
    assert_eq!(state.roster.get("claude").map(|a| a.tokens_in), Some(0));
    assert_eq!(status(&state, "claude"), Some(AgentStatus::Idle));
    assert_eq!(state.totals.tokens_in, 0);
}

#[tokio::test(start_paused = true)]
async fn test_chat_timeout_is_reported_once() {
    let agent = Arc::new(FakeAgent::replying("claude", "too late").latency(Duration::from_secs(60)));
    let (mut state, services, mut rx) = harness(vec![agent], None);
    state.conversation.slot.set_timeout(Duration::from_millis(200));

    state.input.set("slow question");
    actions::submit_input(&mut state, &services);
    settle(&mut state, &services, &mut rx, is_chat_finished).await;

    assert!(!state.conversation.streaming);
    let errors: Vec<String> = system_messages(&state).into_iter().filter(|m| m.contains("timed out")).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("claude timed out after"));
    assert_eq!(state.logs.buffer.count_at(LogLevel::Error), 1);
    assert_eq!(state.roster.get("claude").map(|a| a.status), Some(AgentStatus::Error));
}

#[tokio::test]
async fn test_chat_without_agents() {
    let (mut state, services, _rx) = harness(vec![], None);
    state.roster = AgentRoster::new(Vec::new());
    state.input.set("anyone there?");
    actions::submit_input(&mut state, &services);
    assert!(!state.conversation.streaming);
    assert_eq!(last_message(&state).body, "No agent configured");
}

// ── Workflows ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plan_without_runner_leaves_state_alone() {
    let (mut state, services, _rx) = harness(vec![], None);
    state.input.set("/plan build a thing");
    assert!(actions::submit_input(&mut state, &services));

    assert_eq!(state.workflow.state.phase, WorkflowPhase::Idle);
    assert!(state.workflow.state.id.is_none());
    assert!(!state.workflow.slot.is_active());
    let msg = last_message(&state);
    assert_eq!(msg.role, Role::System);
    assert_eq!(msg.body, "Workflow runner not configured");
}

#[tokio::test]
async fn test_plan_runs_to_completion() {
    let runner = Arc::new(FakeRunner::new(Duration::ZERO));
    let (mut state, services, mut rx) = harness(vec![], Some(runner.clone()));

    state.input.set("/plan build a thing");
    actions::submit_input(&mut state, &services);
    assert_eq!(state.workflow.state.phase, WorkflowPhase::Running);
    assert!(state.workflow.slot.is_active());

    settle(&mut state, &services, &mut rx, is_workflow_finished).await;

    let wf = &state.workflow.state;
    assert_eq!(wf.phase, WorkflowPhase::Done);
    assert_eq!(wf.id.as_deref(), Some("wf-test"));
    assert_eq!(wf.tasks.len(), 2);
    assert_eq!(wf.metrics.tokens_in, 100);
    assert!(!state.workflow.slot.is_active());
    assert!(last_message(&state).body.starts_with("Workflow wf-test done"));
    assert_eq!(runner.calls(), vec!["plan build a thing".to_string()]);
}

#[tokio::test]
async fn test_second_workflow_is_refused_while_running() {
    let runner = Arc::new(FakeRunner::new(Duration::from_secs(60)));
    let (mut state, services, _rx) = harness(vec![], Some(runner));

    actions::start_workflow(&mut state, &services, WorkflowOp::Plan("one".into()));
    let generation = state.workflow.slot.generation();
    actions::start_workflow(&mut state, &services, WorkflowOp::Run("two".into()));

    assert_eq!(state.workflow.slot.generation(), generation);
    assert_eq!(state.workflow.state.prompt, "one");
    assert_eq!(last_message(&state).body, "A workflow is already running (Ctrl+X to cancel).");
    actions::cancel_active(&mut state);
}

#[tokio::test]
async fn test_ctrl_x_cancels_running_workflow() {
    let runner = Arc::new(FakeRunner::new(Duration::from_secs(60)));
    let (mut state, services, mut rx) = harness(vec![], Some(runner));

    state.input.set("/plan long job");
    actions::submit_input(&mut state, &services);
    assert!(state.is_busy());
    apply::apply_event(
        &mut state,
        &services,
        stream("claude", AgentEventKind::Started { phase: Some("plan".into()), timeout: None }, ""),
    );
    assert_eq!(status(&state, "claude"), Some(AgentStatus::Running));
    let before = state.conversation.history.len();

    assert!(keys::handle_key(&mut state, &services, ctrl('x')));
    assert!(!state.is_busy());
    assert_eq!(status(&state, "claude"), Some(AgentStatus::Idle));
    assert_eq!(activity(&state, "claude"), "");
    assert_eq!(state.workflow.state.phase, WorkflowPhase::Idle);
    assert_eq!(state.conversation.history.len(), before + 1);
    assert_eq!(last_message(&state).body, "Cancelled planning.");
    assert_eq!(state.logs.buffer.count_at(LogLevel::Warn), 1);

    // the runner unwinds with a cancellation nobody is waiting for
    settle(&mut state, &services, &mut rx, is_workflow_finished).await;
    assert_eq!(state.conversation.history.len(), before + 1);
    assert_eq!(state.workflow.state.phase, WorkflowPhase::Idle);
    assert_eq!(state.logs.buffer.count_at(LogLevel::Error), 0);
    assert_eq!(status(&state, "claude"), Some(AgentStatus::Idle));
}

#[tokio::test]
async fn test_failed_execute_keeps_workflow_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let agent = Arc::new(FakeAgent::with("claude", |req| match req.phase.as_deref() {
        Some("analyze") => Ok("looks fine".to_string()),
        Some("plan") => Ok("1. first step\n2. second step".to_string()),
        _ => Err(ControllerError::workflow(None, "model refused")),
    }));
    let (mut state, mut services, mut rx) = harness(vec![], None);
    let bus = EventBus::new(1024);
    let runner = LocalWorkflowRunner::new(vec![AgentSlot::new(agent)], bus.clone(), dir.path(), None);
    services.runner = Some(Arc::new(runner) as SharedRunner);
    let _mux = multiplexer::spawn(
        &bus,
        services.dispatcher.clone(),
        DEFAULT_DEBOUNCE,
        DEFAULT_BATCH_CAP,
        |flush| match flush {
            Flush::Single(ev) => UiEvent::Bus(ev),
            Flush::Batch(evs) => UiEvent::BusBatch(evs),
        },
    );

    state.input.set("/run do it");
    actions::submit_input(&mut state, &services);
    settle(&mut state, &services, &mut rx, is_workflow_finished).await;
    // bus traffic from the run is still in the debounce window
    drain(&mut state, &services, &mut rx, Duration::from_millis(400)).await;

    let wf = &state.workflow.state;
    assert!(wf.id.is_some());
    assert_eq!(wf.phase, WorkflowPhase::Idle);
    assert!(wf.last_error.is_some());
    assert_eq!(wf.tasks.len(), 2);
    assert_eq!(wf.tasks[0].status, TaskStatus::Failed);
    assert!(wf.tasks[0].error.is_some());
    assert_eq!(wf.tasks[1].status, TaskStatus::Pending);
    assert_eq!(state.logs.buffer.count_at(LogLevel::Error), 1);
    assert_eq!(status(&state, "claude"), Some(AgentStatus::Error));
    // analyze and plan were paid for
    assert_eq!((state.totals.tokens_in, state.totals.tokens_out), (20, 10));
    assert_eq!(state.roster.get("claude").map(|a| a.tokens_in), Some(20));

    state.input.set("/execute");
    actions::submit_input(&mut state, &services);
    assert!(state.workflow.slot.is_active());
    actions::cancel_active(&mut state);
}

#[tokio::test]
async fn test_live_completions_are_not_counted_twice() {
    let runner = Arc::new(FakeRunner::new(Duration::ZERO));
    let (mut state, services, mut rx) = harness(vec![], Some(runner));

    actions::start_workflow(&mut state, &services, WorkflowOp::Plan("job".into()));
    apply::apply_event(
        &mut state,
        &services,
        stream("claude", AgentEventKind::Completed { tokens_in: 60, tokens_out: 25 }, ""),
    );
    assert_eq!((state.totals.tokens_in, state.totals.tokens_out), (60, 25));

    // the run reports 100/40 for claude in total
    settle(&mut state, &services, &mut rx, is_workflow_finished).await;
    assert_eq!((state.totals.tokens_in, state.totals.tokens_out), (100, 40));
    assert_eq!(state.roster.get("claude").map(|a| a.tokens_out), Some(40));
}

#[tokio::test]
async fn test_cancel_with_nothing_running() {
    let (mut state, _services, _rx) = harness(vec![], None);
    assert!(!actions::cancel_active(&mut state));
    assert_eq!(last_message(&state).body, "Nothing to cancel.");
}

#[tokio::test]
async fn test_execute_requires_active_workflow() {
    let runner = Arc::new(FakeRunner::new(Duration::ZERO));
    let (mut state, services, _rx) = harness(vec![], Some(runner.clone()));
    state.input.set("/execute");
    actions::submit_input(&mut state, &services);
    assert_eq!(last_message(&state).body, "No active workflow to execute; /plan one first.");
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_command_is_reported() {
    let (mut state, services, _rx) = harness(vec![], None);
    state.input.set("/frobnicate");
    assert!(actions::submit_input(&mut state, &services));
    assert!(last_message(&state).body.contains("unknown command /frobnicate"));
}

#[tokio::test]
async fn test_quit_command_ends_session() {
    let (mut state, services, _rx) = harness(vec![], None);
    state.input.set("/quit");
    assert!(!actions::submit_input(&mut state, &services));
}

// ── Bus events ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_task_events_ignored_without_active_workflow() {
    let (mut state, services, _rx) = harness(vec![], None);
    apply::apply_event(
        &mut state,
        &services,
        UiEvent::BusBatch(vec![
            BusEvent::PhaseStarted { workflow_id: "wf-x".into(), phase: "planning".into() },
            BusEvent::TaskStarted { workflow_id: "wf-x".into(), task_id: "t1".into(), agent: "claude".into() },
            BusEvent::Log(LogEvent { level: LogLevel::Info, source: "runner".into(), message: "hello".into() }),
        ]),
    );
    assert!(state.workflow.state.id.is_none());
    assert!(state.workflow.state.stage.is_none());
    // logs are never gated
    assert_eq!(state.logs.buffer.len(), 1);
}

#[tokio::test]
async fn test_token_completion_after_finish_is_ignored() {
    let (mut state, services, _rx) = harness(vec![], None);
    apply::apply_event(
        &mut state,
        &services,
        stream("gpt", AgentEventKind::Completed { tokens_in: 7, tokens_out: 3 }, ""),
    );
    assert_eq!((state.totals.tokens_in, state.totals.tokens_out), (0, 0));
    assert_eq!(state.roster.get("gpt").map(|a| a.tokens_in), Some(0));
}

#[tokio::test]
async fn test_stream_activity_updates_agent_without_logging() {
    let runner = Arc::new(FakeRunner::new(Duration::from_secs(60)));
    let (mut state, services, _rx) = harness(vec![], Some(runner));
    actions::start_workflow(&mut state, &services, WorkflowOp::Plan("job".into()));
    apply::apply_event(
        &mut state,
        &services,
        stream("claude", AgentEventKind::Started { phase: Some("plan".into()), timeout: None }, ""),
    );
    let logged = state.logs.buffer.len();

    let cases = [
        (AgentEventKind::ToolUse { tool: "read_file".into() }, "tool: read_file"),
        (AgentEventKind::Thinking, "thinking"),
        (AgentEventKind::Chunk, "writing"),
        (AgentEventKind::Progress { retry: None }, "halfway"),
    ];
    for (kind, expected) in cases {
        apply::apply_event(&mut state, &services, stream("claude", kind, "halfway"));
        assert_eq!(activity(&state, "claude"), expected);
        assert_eq!(status(&state, "claude"), Some(AgentStatus::Running));
    }
    assert_eq!(state.logs.buffer.len(), logged);

    apply::apply_event(
        &mut state,
        &services,
        stream("claude", AgentEventKind::Progress { retry: Some(1) }, "retry 1/2 after: reset"),
    );
    assert_eq!(state.logs.buffer.count_at(LogLevel::Warn), 1);
    assert_eq!(state.logs.buffer.len(), logged + 1);
    actions::cancel_active(&mut state);
}

#[tokio::test]
async fn test_agent_error_event_marks_agent_without_logging() {
    let runner = Arc::new(FakeRunner::new(Duration::from_secs(60)));
    let (mut state, services, _rx) = harness(vec![], Some(runner));
    actions::start_workflow(&mut state, &services, WorkflowOp::Plan("job".into()));
    apply::apply_event(
        &mut state,
        &services,
        stream("claude", AgentEventKind::Started { phase: Some("plan".into()), timeout: None }, ""),
    );
    let logged = state.logs.buffer.len();

    apply::apply_event(&mut state, &services, stream("claude", AgentEventKind::Error, "model refused"));
    assert_eq!(status(&state, "claude"), Some(AgentStatus::Error));
    assert_eq!(state.logs.buffer.len(), logged);
    actions::cancel_active(&mut state);
}

#[tokio::test]
async fn test_clipboard_fallback_is_written_between_frames() {
    let (mut state, services, _rx) = harness(vec![], None);
    let seq = Osc52::sequence("hello");
    apply::apply_event(
        &mut state,
        &services,
        UiEvent::ClipboardDone { what: "reply", result: Ok(Copied::Terminal(seq.clone())) },
    );
    assert_eq!(state.terminal_writes, vec![seq]);
    assert_eq!(last_message(&state).body, "Copied reply to the clipboard.");

    apply::apply_event(&mut state, &services, UiEvent::ClipboardDone { what: "reply", result: Ok(Copied::Native) });
    assert_eq!(state.terminal_writes.len(), 1);
}

#[tokio::test]
async fn test_unknown_agent_events_are_ignored() {
    let (mut state, services, _rx) = harness(vec![], None);
    apply::apply_event(&mut state, &services, stream("nobody", AgentEventKind::Error, "boom"));
    assert!(state.logs.buffer.is_empty());
    assert_eq!(state.totals.tokens_in, 0);
}

// ── Focus, panel-nav, overlays ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_panel_nav_expires_after_window() {
    let (mut state, services, mut rx) = harness(vec![], None);

    assert!(keys::handle_key(&mut state, &services, ctrl('z')));
    assert!(state.focus.nav.is_active());

    settle(&mut state, &services, &mut rx, |ev| matches!(ev, UiEvent::PanelNavTimeout { .. })).await;
    assert!(!state.focus.nav.is_active());

    // an arrow after expiry is ordinary input
    state.input.set("ab");
    keys::handle_key(&mut state, &services, key(KeyCode::Left));
    assert_eq!(state.focus.current(), FocusTarget::Input);
    assert_eq!(state.input.cursor(), 1);
}

#[tokio::test]
async fn test_panel_nav_moves_focus() {
    let (mut state, services, _rx) = harness(vec![], None);

    keys::handle_key(&mut state, &services, ctrl('z'));
    keys::handle_key(&mut state, &services, key(KeyCode::Left));
    assert_eq!(state.focus.current(), FocusTarget::Explorer);
    assert!(!state.focus.nav.is_active());

    keys::handle_key(&mut state, &services, ctrl('z'));
    keys::handle_key(&mut state, &services, key(KeyCode::Down));
    assert_eq!(state.focus.current(), FocusTarget::Tokens);

    // Tab hands focus back to the input line without typing anything
    keys::handle_key(&mut state, &services, key(KeyCode::Tab));
    assert_eq!(state.focus.current(), FocusTarget::Input);
    assert!(state.overlays.is_empty());
}

#[tokio::test]
async fn test_enter_in_tokens_panel_picks_chat_agent() {
    let (mut state, services, _rx) = harness(vec![], None);
    state.focus.set_focus(FocusTarget::Tokens);

    keys::handle_key(&mut state, &services, key(KeyCode::Down));
    keys::handle_key(&mut state, &services, key(KeyCode::Enter));
    assert_eq!(state.conversation.agent.as_deref(), Some("gpt"));
    assert_eq!(last_message(&state).body, "Chat agent set to gpt.");
    assert_eq!(state.focus.current(), FocusTarget::Tokens);
}

#[tokio::test]
async fn test_typing_in_focused_panel_reaches_input() {
    let (mut state, services, _rx) = harness(vec![], None);
    state.focus.set_focus(FocusTarget::Logs);
    keys::handle_key(&mut state, &services, key(KeyCode::Char('a')));
    assert_eq!(state.input.as_str(), "a");
    assert_eq!(state.focus.current(), FocusTarget::Input);
}

#[tokio::test]
async fn test_overlay_owns_keys_until_escape() {
    let (mut state, services, _rx) = harness(vec![], None);
    state.input.set("draft");

    keys::handle_key(&mut state, &services, key(KeyCode::F(1)));
    assert_eq!(state.overlays.top(), Some(Overlay::Shortcuts));

    keys::handle_key(&mut state, &services, key(KeyCode::Char('z')));
    // Ctrl+C inside an overlay does not quit
    assert!(keys::handle_key(&mut state, &services, ctrl('c')));
    assert_eq!(state.input.as_str(), "draft");

    keys::handle_key(&mut state, &services, key(KeyCode::Esc));
    assert!(state.overlays.is_empty());
    assert_eq!(state.input.as_str(), "draft");

    // with no overlay and nothing running, Esc clears the line
    keys::handle_key(&mut state, &services, key(KeyCode::Esc));
    assert!(state.input.is_empty());
}

#[tokio::test]
async fn test_ctrl_c_quits_from_input() {
    let (mut state, services, _rx) = harness(vec![], None);
    assert!(!keys::handle_key(&mut state, &services, ctrl('c')));
}

#[tokio::test]
async fn test_tab_toggles_task_list_or_completes_command() {
    let (mut state, services, _rx) = harness(vec![], None);
    keys::handle_key(&mut state, &services, key(KeyCode::Tab));
    assert_eq!(state.overlays.top(), Some(Overlay::Tasks));
    keys::handle_key(&mut state, &services, key(KeyCode::Tab));
    assert!(state.overlays.is_empty());

    state.input.set("/wor");
    keys::handle_key(&mut state, &services, key(KeyCode::Tab));
    assert_eq!(state.input.as_str(), "/workflows ");
}

#[tokio::test]
async fn test_history_search_fills_input() {
    let (mut state, services, _rx) = harness(vec![], None);
    state.prompt_history.push("deploy the service");
    state.prompt_history.push("write tests");

    keys::handle_key(&mut state, &services, ctrl('h'));
    assert_eq!(state.overlays.top(), Some(Overlay::HistorySearch));
    for c in "deploy".chars() {
        keys::handle_key(&mut state, &services, key(KeyCode::Char(c)));
    }
    keys::handle_key(&mut state, &services, key(KeyCode::Enter));
    assert!(state.overlays.is_empty());
    assert_eq!(state.input.as_str(), "deploy the service");
}

#[tokio::test]
async fn test_paste_flattens_newlines() {
    let (mut state, _services, _rx) = harness(vec![], None);
    keys::handle_paste(&mut state, "one\ntwo");
    assert_eq!(state.input.as_str(), "one two");

    state.overlays.open(Overlay::Shortcuts);
    keys::handle_paste(&mut state, "ignored");
    assert_eq!(state.input.as_str(), "one two");
}

#[tokio::test]
async fn test_set_chat_agent_rejects_unknown() {
    let (mut state, _services, _rx) = harness(vec![], None);
    actions::set_chat_agent(&mut state, "gpt");
    assert_eq!(state.chat_agent().as_deref(), Some("gpt"));
    actions::set_chat_agent(&mut state, "nobody");
    assert_eq!(state.chat_agent().as_deref(), Some("gpt"));
    assert_eq!(last_message(&state).body, "Unknown agent nobody.");
}
