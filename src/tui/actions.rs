//! Everything the controller does in response to user intent: slash commands,
//! chat submission, workflow operations and the dispatched side jobs (file
//! reads, git, clipboard, persistence).
use std::path::PathBuf;

use crate::agent::ExecuteRequest;
use crate::client;
use crate::clipboard;
use crate::commands::{self, Command};
use crate::conversation::{Message, Role};
use crate::error::{ControllerError, fmt_elapsed};
use crate::explorer;
use crate::focus::{FocusTarget, Overlay};
use crate::git;
use crate::prompt_history;
use crate::status::{TaskStatus, WorkflowState};

use super::{AdminAction, AppState, Services, TextView, UiEvent, WorkflowOp};

/// Prior turns sent along with a chat prompt.
const CHAT_CONTEXT_MESSAGES: usize = 20;
/// File viewer reads stop here.
const MAX_FILE_BYTES: usize = 256 * 1024;

// ── Lifecycle ─────────────────────────────────────────────────────────────────

pub fn startup(state: &mut AppState, services: &Services) {
    if let Some(runner) = services.runner.clone() {
        services.dispatcher.submit(
            "workflow state",
            async move { UiEvent::WorkflowSynced(runner.get_state().await) },
            |msg| UiEvent::WorkflowSynced(Err(ControllerError::workflow(None, msg))),
        );
    }
    if state.focus.visibility.explorer {
        load_explorer(state, services);
    }
    if services.watcher.is_none() {
        state.logs.buffer.info("watcher", "file watching unavailable; explorer refreshes on demand");
    }
    let agents = state.roster.enabled_names();
    state.logs.buffer.info(
        "session",
        format!("profile {} · {} agent(s): {}", state.profile, agents.len(), agents.join(", ")),
    );
}

/// Leaving the loop: tear down anything still in flight.
pub fn shutdown(state: &mut AppState, services: &Services) {
    state.conversation.slot.cancel();
    state.workflow.slot.cancel();
    if let Some(w) = &services.watcher {
        w.close();
    }
}

// ── Input submission ──────────────────────────────────────────────────────────

/// Enter on the input line. Returns false when the session should end.
pub fn submit_input(state: &mut AppState, services: &Services) -> bool {
    let text = state.input.take();
    let text = text.trim();
    if text.is_empty() {
        return true;
    }
    remember_prompt(state, services, text);
    match commands::parse(text) {
        None => {
            submit_chat(state, services, text);
            true
        }
        Some(Ok(cmd)) => execute_command(state, services, cmd),
        Some(Err(usage)) => {
            state.system(usage);
            true
        }
    }
}

fn remember_prompt(state: &mut AppState, services: &Services, text: &str) {
    if !state.prompt_history.push(text) {
        return;
    }
    let Some(path) = state.prompt_history.path().map(|p| p.to_path_buf()) else {
        return;
    };
    let entries = state.prompt_history.entries().to_vec();
    services.dispatcher.submit_blocking(
        "save prompt history",
        move || UiEvent::HistorySaved(prompt_history::save_entries(&path, &entries).map_err(|e| format!("{e:#}"))),
        |msg| UiEvent::HistorySaved(Err(msg)),
    );
}

/// Plain text goes to the chat agent as one request in the chat slot.
pub fn submit_chat(state: &mut AppState, services: &Services, text: &str) {
    let Some(name) = state.chat_agent() else {
        state.system("No agent configured");
        return;
    };
    let Some(slot) = services.agent(&name).cloned() else {
        state.system(format!("Agent {name} is not available"));
        return;
    };

    let prior: Vec<client::Message> = state
        .conversation
        .history
        .last_n(CHAT_CONTEXT_MESSAGES)
        .into_iter()
        .filter_map(|m| match m.role {
            Role::User => Some(client::Message::new("user", m.body)),
            Role::Agent => Some(client::Message::new("assistant", m.body)),
            Role::System => None,
        })
        .collect();

    state.conversation.history.append(Message::user(text));
    state.conversation.streaming = true;
    state.conversation.scroll = 0;

    let label = format!("chat with {name}");
    let ctx = state.conversation.slot.begin(&label);
    let timeout = state.conversation.slot.timeout();
    if let Some(a) = state.roster.get_mut(&name) {
        a.on_started(Some("chat".to_string()), Some(timeout));
    }

    let req = ExecuteRequest {
        prompt: text.to_string(),
        system_prompt: slot.system_prompt.clone(),
        messages: prior,
        model: state.conversation.model.clone().or_else(|| slot.model.clone()),
        phase: None,
        events: None,
    };
    let generation = ctx.generation;
    let agent = name.clone();
    services.dispatcher.submit(
        &label,
        async move {
            let result = slot.agent.execute(&ctx, req).await;
            UiEvent::ChatFinished { generation, agent, result }
        },
        move |msg| UiEvent::ChatFinished {
            generation,
            agent: name,
            result: Err(ControllerError::Transport(msg)),
        },
    );
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Carry out a parsed slash command. Returns false on quit.
pub fn execute_command(state: &mut AppState, services: &Services, cmd: Command) -> bool {
    match cmd {
        Command::Help => state.system(commands::help_text()),
        Command::Quit => return false,

        Command::Plan(task) => start_workflow(state, services, WorkflowOp::Plan(task)),
        Command::Run(task) => start_workflow(state, services, WorkflowOp::Run(task)),
        Command::Analyze(task) => start_workflow(state, services, WorkflowOp::Analyze(task)),
        Command::Replan(feedback) => start_workflow(state, services, WorkflowOp::Replan(feedback)),
        Command::UsePlan(id) => start_workflow(state, services, WorkflowOp::UsePlan(id)),
        Command::Resume => start_workflow(state, services, WorkflowOp::Resume),
        Command::Execute => match state.workflow.state.id.clone() {
            Some(id) => start_workflow(state, services, WorkflowOp::Execute(id)),
            None if services.runner.is_none() => state.system("Workflow runner not configured"),
            None => state.system("No active workflow to execute; /plan one first."),
        },

        Command::Status => {
            let status = status_report(state);
            state.system(status);
        }
        Command::Workflows => {
            if let Some(runner) = runner_or_report(state, services) {
                services.dispatcher.submit(
                    "list workflows",
                    async move { UiEvent::WorkflowsListed(runner.list_workflows().await) },
                    |msg| UiEvent::WorkflowsListed(Err(ControllerError::workflow(None, msg))),
                );
            }
        }
        Command::Load(id) => {
            if state.workflow.slot.is_active() {
                state.system("A workflow is running; cancel it before loading another.");
            } else if let Some(runner) = runner_or_report(state, services) {
                services.dispatcher.submit(
                    "load workflow",
                    async move { UiEvent::WorkflowLoaded(runner.load_workflow(&id).await) },
                    |msg| UiEvent::WorkflowLoaded(Err(ControllerError::workflow(None, msg))),
                );
            }
        }
        Command::New => new_session(state, services),
        Command::Delete(id) => {
            if state.workflow.slot.is_active() && state.workflow.state.id.as_deref() == Some(id.as_str()) {
                state.system("That workflow is running; cancel it first.");
            } else {
                admin(state, services, AdminAction::Delete(id));
            }
        }
        Command::Archive => admin(state, services, AdminAction::Archive),
        Command::Purge => {
            if state.workflow.slot.is_active() {
                state.system("A workflow is running; cancel it before purging.");
            } else {
                admin(state, services, AdminAction::Purge);
            }
        }
        Command::Cancel => {
            cancel_active(state);
        }

        Command::Model(None) => {
            let current = state.conversation.model.clone().unwrap_or_else(|| state.model.clone());
            state.system(format!("Chat model: {current}"));
        }
        Command::Model(Some(name)) => {
            state.system(format!("Chat model set to {name}."));
            state.model = name.clone();
            state.conversation.model = Some(name);
        }
        Command::Agent(None) => {
            let names = state.roster.enabled_names();
            let current = state.chat_agent().unwrap_or_else(|| "none".to_string());
            state.system(format!("Chat agent: {current} (enabled: {})", names.join(", ")));
        }
        Command::Agent(Some(name)) => set_chat_agent(state, &name),
        Command::Theme => {
            state.theme = state.theme.toggled();
            let name = state.theme.name();
            state.system(format!("Theme: {name}"));
        }
        Command::Clear => {
            state.conversation.history.clear();
            state.conversation.scroll = 0;
        }

        Command::Copy => match state.conversation.history.last_agent_message() {
            Some(m) => copy_text(services, "the last reply", m.body),
            None => state.system("Nothing to copy yet."),
        },
        Command::CopyAll => {
            if state.conversation.history.is_empty() {
                state.system("Nothing to copy yet.");
            } else {
                let text = state.conversation.history.transcript();
                copy_text(services, "the conversation", text);
            }
        }
        Command::CopyLogs => {
            let text = state.logs.buffer.as_text();
            copy_text(services, "the logs", text);
        }
        Command::Logs => {
            state.focus.toggle_panel(FocusTarget::Logs);
        }
        Command::ClearLogs => {
            state.logs.buffer.clear();
            state.logs.scroll = 0;
        }
        Command::Explorer => toggle_explorer(state, services),
    }
    true
}

pub fn set_chat_agent(state: &mut AppState, name: &str) {
    match state.roster.get(name) {
        Some(a) if a.is_enabled() => {
            state.conversation.agent = Some(name.to_string());
            state.system(format!("Chat agent set to {name}."));
        }
        Some(_) => state.system(format!("Agent {name} is disabled.")),
        None => state.system(format!("Unknown agent {name}.")),
    }
}

fn runner_or_report(state: &mut AppState, services: &Services) -> Option<crate::workflow::SharedRunner> {
    let runner = services.runner.clone();
    if runner.is_none() {
        state.system("Workflow runner not configured");
    }
    runner
}

fn status_report(state: &AppState) -> String {
    let wf = &state.workflow.state;
    let mut out = format!(
        "Workflow: {} ({})",
        wf.id.as_deref().unwrap_or("none"),
        wf.phase.label()
    );
    if let Some(stage) = &wf.stage {
        out.push_str(&format!(" · stage {stage}"));
    }
    if !wf.tasks.is_empty() {
        out.push_str(&format!(
            "\nTasks: {}/{} done, {} failed",
            wf.count(TaskStatus::Completed),
            wf.tasks.len(),
            wf.count(TaskStatus::Failed)
        ));
    }
    if let Some(err) = &wf.last_error {
        out.push_str(&format!("\nLast error: {err}"));
    }
    out.push_str("\nAgents:");
    for a in state.roster.iter() {
        out.push_str(&format!(
            "\n  {:<12} {:<8} in {} / out {}",
            a.name,
            a.status.label(),
            a.tokens_in,
            a.tokens_out
        ));
    }
    out.push_str(&format!(
        "\nSession tokens: in {} / out {}",
        state.totals.tokens_in, state.totals.tokens_out
    ));
    out
}

/// /new: cancel whatever runs, drop the conversation, start from a fresh workflow.
fn new_session(state: &mut AppState, services: &Services) {
    if state.is_busy() {
        cancel_active(state);
    }
    if let Some(runner) = services.runner.clone() {
        services.dispatcher.submit(
            "deactivate workflow",
            async move {
                let result = runner.deactivate_workflow().await.map(|()| "active workflow deactivated".to_string());
                UiEvent::WorkflowAdmin { action: AdminAction::Deactivate, result }
            },
            |msg| UiEvent::WorkflowAdmin {
                action: AdminAction::Deactivate,
                result: Err(ControllerError::workflow(None, msg)),
            },
        );
    }
    state.conversation.history.clear();
    state.conversation.scroll = 0;
    state.workflow.state = WorkflowState::default();
    state.workflow.analysis.clear();
    state.roster.reset_all();
    state.system("New session.");
}

fn admin(state: &mut AppState, services: &Services, action: AdminAction) {
    let Some(runner) = runner_or_report(state, services) else {
        return;
    };
    let on_failure = {
        let action = action.clone();
        move |msg: String| UiEvent::WorkflowAdmin { action, result: Err(ControllerError::workflow(None, msg)) }
    };
    services.dispatcher.submit(
        "workflow admin",
        async move {
            let result = match &action {
                AdminAction::Deactivate => runner
                    .deactivate_workflow()
                    .await
                    .map(|()| "active workflow deactivated".to_string()),
                AdminAction::Delete(id) => runner
                    .delete_workflow(id)
                    .await
                    .map(|()| format!("Deleted workflow {id}.")),
                AdminAction::Archive => runner
                    .archive_workflows()
                    .await
                    .map(|n| format!("Archived {n} workflow(s).")),
                AdminAction::Purge => runner
                    .purge_all_workflows()
                    .await
                    .map(|n| format!("Purged {n} workflow(s).")),
            };
            UiEvent::WorkflowAdmin { action, result }
        },
        on_failure,
    );
}

// ── Workflow operations ───────────────────────────────────────────────────────

pub fn start_workflow(state: &mut AppState, services: &Services, op: WorkflowOp) {
    let Some(runner) = services.runner.clone() else {
        state.system("Workflow runner not configured");
        return;
    };
    if state.workflow.slot.is_active() {
        state.system("A workflow is already running (Ctrl+X to cancel).");
        return;
    }

    if op.starts_fresh(&state.workflow.state) {
        state.workflow.state = WorkflowState::start(op.prompt(), None);
        state.workflow.analysis.clear();
    } else {
        state.workflow.state.restart();
    }
    state.roster.reset_all();
    state.workflow.counted.clear();

    let label = op.label();
    let ctx = state.workflow.slot.begin(&label);
    state.logs.buffer.info("workflow", format!("{label} started"));

    let generation = ctx.generation;
    let failed_op = op.clone();
    let since = chrono::Local::now();
    services.dispatcher.submit(
        &label,
        async move {
            let result = match &op {
                WorkflowOp::Run(p) => runner.run(&ctx, p).await,
                WorkflowOp::Analyze(p) => runner.analyze(&ctx, p).await,
                WorkflowOp::Plan(p) => runner.plan(&ctx, p).await,
                WorkflowOp::Replan(f) => runner.replan(&ctx, f).await,
                WorkflowOp::UsePlan(id) | WorkflowOp::Execute(id) => runner.use_plan(&ctx, id).await,
                WorkflowOp::Resume => runner.resume(&ctx).await,
            };
            // a failed run still leaves tasks, analysis and spent tokens behind
            let settled = match &result {
                Err(e) if !e.is_cancelled() => runner
                    .get_state()
                    .await
                    .ok()
                    .flatten()
                    .filter(|s| s.updated_at >= since),
                _ => None,
            };
            UiEvent::WorkflowFinished { generation, op, result, settled }
        },
        move |msg| UiEvent::WorkflowFinished {
            generation,
            op: failed_op,
            result: Err(ControllerError::workflow(None, msg)),
            settled: None,
        },
    );
}

// ── Cancellation and errors ───────────────────────────────────────────────────

/// Ctrl+X, /cancel, or Esc with work outstanding. Invalidates both slots so
/// late results are dropped. Returns false when there was nothing to cancel.
pub fn cancel_active(state: &mut AppState) -> bool {
    let mut cancelled = Vec::new();
    if let Some(c) = state.conversation.slot.cancel() {
        state.conversation.streaming = false;
        cancelled.push(c);
    }
    if let Some(c) = state.workflow.slot.cancel() {
        state.workflow.state.cancel();
        cancelled.push(c);
    }
    if cancelled.is_empty() {
        state.system("Nothing to cancel.");
        return false;
    }
    state.roster.reset_running();

    let what = cancelled.iter().map(|c| c.label.as_str()).collect::<Vec<_>>().join(" and ");
    let elapsed = cancelled.iter().map(|c| c.elapsed).max().unwrap_or_default();
    state
        .logs
        .buffer
        .warn("cancel", format!("cancelled {what} after {}", fmt_elapsed(elapsed)));
    state.system(format!("Cancelled {what}."));
    true
}

/// Funnel for every user-visible failure: one system message plus one log
/// entry. Cancellation is only logged.
pub fn surface_error(state: &mut AppState, agent: Option<&str>, err: &ControllerError) {
    match err {
        ControllerError::Cancelled => {
            state.logs.buffer.warn("cancel", format!("{} cancelled", agent.unwrap_or("request")));
            return;
        }
        ControllerError::Timeout { elapsed } => {
            let who = agent.unwrap_or("request");
            let msg = format!("{who} timed out after {}", fmt_elapsed(*elapsed));
            state.logs.buffer.error("timeout", msg.clone());
            state.system(msg);
        }
        other => {
            let msg = match agent {
                Some(a) => format!("{a}: {other}"),
                None => other.to_string(),
            };
            state.logs.buffer.error(other.kind(), msg.clone());
            state.system(msg);
        }
    }
    if let Some(name) = agent
        && let Some(a) = state.roster.get_mut(name)
    {
        a.on_error(&err.to_string());
    }
}

// ── Explorer, files, diff ─────────────────────────────────────────────────────

pub fn toggle_explorer(state: &mut AppState, services: &Services) {
    if state.focus.toggle_panel(FocusTarget::Explorer) {
        load_explorer(state, services);
    }
}

/// Dispatch a listing of the explorer's current directory.
pub fn load_explorer(state: &mut AppState, services: &Services) {
    let dir = state.explorer.dir.clone();
    let root = state.explorer.root.clone();
    state.explorer.loading = true;
    let failed_dir = dir.clone();
    services.dispatcher.submit_blocking(
        "list directory",
        move || {
            let result = explorer::list_dir(&dir, &root).map_err(|e| format!("{e:#}"));
            UiEvent::ExplorerLoaded { dir, result }
        },
        move |msg| UiEvent::ExplorerLoaded { dir: failed_dir, result: Err(msg) },
    );
}

/// Enter on an explorer row: descend, ascend, or open the file viewer.
pub fn open_selected(state: &mut AppState, services: &Services) {
    let Some(entry) = state.explorer.selected_entry().cloned() else {
        return;
    };
    if entry.is_dir {
        state.explorer.enter(entry.path);
        load_explorer(state, services);
    } else {
        open_file(state, services, entry.path);
    }
}

pub fn explorer_parent(state: &mut AppState, services: &Services) {
    if state.explorer.dir == state.explorer.root {
        return;
    }
    if let Some(parent) = state.explorer.dir.parent().map(|p| p.to_path_buf()) {
        state.explorer.enter(parent);
        load_explorer(state, services);
    }
}

pub fn open_file(state: &mut AppState, services: &Services, path: PathBuf) {
    let title = path
        .strip_prefix(&state.explorer.root)
        .unwrap_or(&path)
        .display()
        .to_string();
    state.overlay.file = TextView::loading(title, Some(path.clone()));
    state.overlays.open(Overlay::FileViewer);
    let failed_path = path.clone();
    services.dispatcher.submit_blocking(
        "read file",
        move || {
            let result = explorer::read_text(&path, MAX_FILE_BYTES).map_err(|e| format!("{e:#}"));
            UiEvent::FileLoaded { path, result }
        },
        move |msg| UiEvent::FileLoaded { path: failed_path, result: Err(msg) },
    );
}

pub fn load_diff(state: &mut AppState, services: &Services) {
    state.overlay.diff = TextView::loading("git diff", None);
    let dir = state.explorer.root.clone();
    services.dispatcher.submit_blocking(
        "git diff",
        move || UiEvent::DiffLoaded(git::diff_for(&dir).map_err(|e| format!("{e:#}"))),
        |msg| UiEvent::DiffLoaded(Err(msg)),
    );
}

fn copy_text(services: &Services, what: &'static str, text: String) {
    services.dispatcher.submit_blocking(
        "clipboard",
        move || UiEvent::ClipboardDone { what, result: Ok(clipboard::copy(&text)) },
        move |msg| UiEvent::ClipboardDone { what, result: Err(ControllerError::Clipboard(msg)) },
    );
}
