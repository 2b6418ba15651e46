//! Applying inbound events to `AppState`. One event, one synchronous mutation.
use crate::clipboard::Copied;
use crate::conversation::{Message, MessageMeta};
use crate::error::{ControllerError, fmt_elapsed};
use crate::events::{AgentEventKind, AgentStreamEvent, BusEvent};
use crate::focus::FocusTarget;
use crate::status::{AgentStatus, AgentUsage, TaskStatus, WorkflowPhase, WorkflowState};
use crate::workflow::WorkflowSnapshot;

use super::actions;
use super::{AdminAction, AppState, Services, UiEvent, WorkflowOp};

pub fn apply_event(state: &mut AppState, services: &Services, ev: UiEvent) {
    match ev {
        UiEvent::ChatFinished { generation, agent, result } => {
            // stale: cancelled or superseded, drop without a trace
            let Some(elapsed) = state.conversation.slot.resolve(generation) else {
                return;
            };
            state.conversation.streaming = false;
            match result {
                Ok(r) => {
                    if let Some(a) = state.roster.get_mut(&agent)
                        && a.on_completed(r.tokens_in, r.tokens_out)
                    {
                        state.totals.add(r.tokens_in, r.tokens_out);
                    }
                    let model = state
                        .conversation
                        .model
                        .clone()
                        .or_else(|| services.agent(&agent).and_then(|s| s.model.clone()));
                    let meta = MessageMeta {
                        model,
                        tokens_in: r.tokens_in,
                        tokens_out: r.tokens_out,
                        elapsed_ms: elapsed.as_millis() as u64,
                    };
                    state.conversation.history.append(Message::agent(&agent, r.output).with_meta(meta));
                    state.conversation.scroll = 0;
                }
                Err(e) => actions::surface_error(state, Some(&agent), &e),
            }
        }

        UiEvent::WorkflowFinished { generation, op, result, settled } => {
            let Some(elapsed) = state.workflow.slot.resolve(generation) else {
                return;
            };
            match result {
                Ok(snap) => finish_workflow(state, snap),
                Err(ControllerError::Cancelled) => {
                    state.workflow.state.cancel();
                    state.roster.reset_running();
                    state
                        .logs
                        .buffer
                        .warn("workflow", format!("{} cancelled after {}", op.label(), fmt_elapsed(elapsed)));
                }
                Err(e) => {
                    if let Some(snap) = settled.filter(|s| settled_matches(&state.workflow.state, &op, s)) {
                        absorb_settled(state, snap);
                    }
                    let agent = match &e {
                        ControllerError::Workflow { agent, .. } => agent.clone(),
                        _ => None,
                    };
                    state.workflow.state.stage = None;
                    state.workflow.state.fail(&e.to_string());
                    state.roster.fail(agent.as_deref(), &e.to_string());
                    actions::surface_error(state, agent.as_deref(), &e);
                }
            }
        }

        UiEvent::WorkflowSynced(result) => match result {
            Ok(Some(snap)) if !state.workflow.slot.is_active() && state.workflow.state.id.is_none() => {
                let id = snap.id.clone();
                adopt_stored(state, snap);
                state.logs.buffer.info("workflow", format!("restored active workflow {id}"));
            }
            Ok(_) => {}
            Err(e) => state.logs.buffer.warn("workflow", format!("could not read workflow state: {e}")),
        },

        UiEvent::WorkflowsListed(result) => match result {
            Ok(list) if list.is_empty() => state.system("No stored workflows."),
            Ok(list) => {
                let mut out = String::from("Stored workflows:");
                for w in list {
                    out.push_str(&format!(
                        "\n  {}  {:<7}  {}/{}  {}",
                        w.id,
                        w.status.label(),
                        w.tasks_done,
                        w.tasks_total,
                        truncate(&w.prompt, 60)
                    ));
                }
                state.system(out);
            }
            Err(e) => actions::surface_error(state, None, &e),
        },

        UiEvent::WorkflowLoaded(result) => match result {
            Ok(_) if state.workflow.slot.is_active() => {
                state.system("A workflow is running; cancel it before loading another.");
            }
            Ok(snap) => {
                let id = snap.id.clone();
                adopt_stored(state, snap);
                state.system(format!("Loaded workflow {id}."));
            }
            Err(e) => actions::surface_error(state, None, &e),
        },

        UiEvent::WorkflowAdmin { action, result } => match result {
            Ok(msg) => {
                let clears = match &action {
                    AdminAction::Delete(id) => state.workflow.state.id.as_deref() == Some(id.as_str()),
                    AdminAction::Purge => true,
                    AdminAction::Archive | AdminAction::Deactivate => false,
                };
                if clears && !state.workflow.slot.is_active() {
                    state.workflow.state = WorkflowState::default();
                    state.workflow.analysis.clear();
                }
                if action == AdminAction::Deactivate {
                    state.logs.buffer.info("workflow", msg);
                } else {
                    state.system(msg);
                }
            }
            Err(e) => actions::surface_error(state, None, &e),
        },

        UiEvent::Bus(ev) => apply_bus_event(state, ev),
        UiEvent::BusBatch(events) => {
            for ev in events {
                apply_bus_event(state, ev);
            }
        }

        UiEvent::PanelNavTimeout { seq } => {
            // superseded timers are no-ops
            state.focus.nav.expire(seq);
        }

        UiEvent::ExplorerLoaded { dir, result } => {
            state.explorer.set_listing(&dir, result);
        }

        UiEvent::FileChanged => {
            if state.focus.visibility.is_visible(FocusTarget::Explorer) {
                actions::load_explorer(state, services);
            }
        }

        UiEvent::FileLoaded { path, result } => {
            if state.overlay.file.path.as_deref() == Some(path.as_path()) {
                state.overlay.file.set(result);
            }
        }

        UiEvent::DiffLoaded(result) => state.overlay.diff.set(result),

        UiEvent::ClipboardDone { what, result } => match result {
            Ok(copied) => {
                state.logs.buffer.info("clipboard", format!("copied {what} via {}", copied.via()));
                if let Copied::Terminal(seq) = copied {
                    state.terminal_writes.push(seq);
                }
                state.system(format!("Copied {what} to the clipboard."));
            }
            Err(e) => actions::surface_error(state, None, &e),
        },

        UiEvent::HistorySaved(result) => {
            if let Err(e) = result {
                state.logs.buffer.warn("history", format!("prompt history not saved: {e}"));
            }
        }
    }
}

/// A workflow op returned. The snapshot is authoritative for tasks and ids.
fn finish_workflow(state: &mut AppState, snap: WorkflowSnapshot) {
    let wf = &mut state.workflow.state;
    wf.id = Some(snap.id.clone());
    if !snap.prompt.is_empty() {
        wf.prompt = snap.prompt.clone();
    }
    wf.tasks = snap.tasks.clone();
    if !snap.analysis.is_empty() {
        state.workflow.analysis = snap.analysis.clone();
    }
    credit_usage(state, &snap.metrics.usage);

    if let Some(err) = snap.last_error.as_deref().filter(|_| snap.status != WorkflowPhase::Done) {
        let e = ControllerError::workflow(None, err);
        state.workflow.state.fail(err);
        state.roster.fail(None, err);
        actions::surface_error(state, None, &e);
        return;
    }

    state.workflow.state.complete(&snap.metrics);
    state.roster.finish_running();

    let wf = &state.workflow.state;
    let done = wf.count(TaskStatus::Completed);
    let total = wf.tasks.len();
    let run = &snap.metrics;
    let mut summary = format!(
        "Workflow {} done: {done}/{total} tasks, {} tokens, ${:.4}",
        snap.id,
        run.tokens_in + run.tokens_out,
        run.cost_usd
    );
    if let Some(c) = run.consensus {
        summary.push_str(&format!(", consensus {:.0}%", c * 100.0));
    }
    state.logs.buffer.info("workflow", summary.clone());
    state.system(summary);
}

/// Whether the runner's active workflow is the one the failed request was
/// working on.
fn settled_matches(wf: &WorkflowState, op: &WorkflowOp, snap: &WorkflowSnapshot) -> bool {
    match (&wf.id, op) {
        (Some(id), _) => *id == snap.id,
        (None, WorkflowOp::UsePlan(id) | WorkflowOp::Execute(id)) => *id == snap.id,
        (None, _) => wf.prompt == snap.prompt,
    }
}

/// Take over what a failed run left behind: ids, tasks, analysis and cost.
fn absorb_settled(state: &mut AppState, snap: WorkflowSnapshot) {
    let wf = &mut state.workflow.state;
    wf.id = Some(snap.id);
    if !snap.prompt.is_empty() {
        wf.prompt = snap.prompt;
    }
    wf.tasks = snap.tasks;
    wf.metrics.absorb(&snap.metrics);
    if !snap.analysis.is_empty() {
        state.workflow.analysis = snap.analysis;
    }
    credit_usage(state, &snap.metrics.usage);
}

/// Credit tokens the runner reports that live events haven't already.
fn credit_usage(state: &mut AppState, reported: &[AgentUsage]) {
    for u in state.workflow.counted.settle(reported) {
        if let Some(a) = state.roster.get_mut(&u.agent)
            && a.add_tokens(u.tokens_in, u.tokens_out)
        {
            state.totals.add(u.tokens_in, u.tokens_out);
        }
    }
}

/// Replace the workflow wholesale with a stored one (load, startup sync).
fn adopt_stored(state: &mut AppState, snap: WorkflowSnapshot) {
    state.workflow.state = WorkflowState {
        id: Some(snap.id),
        prompt: snap.prompt,
        // nothing is running on our side, whatever the file says
        phase: match snap.status {
            WorkflowPhase::Done => WorkflowPhase::Done,
            _ => WorkflowPhase::Idle,
        },
        stage: None,
        started_at: Some(snap.created_at),
        tasks: snap.tasks,
        metrics: snap.metrics,
        last_error: snap.last_error,
    };
    state.workflow.analysis = snap.analysis;
}

// ── Bus events ────────────────────────────────────────────────────────────────

/// Workflow progress only applies while a workflow request is outstanding;
/// anything arriving after the slot resolved or was cancelled is late. Tokens
/// from late completions reach the totals through the run's reported usage.
pub fn apply_bus_event(state: &mut AppState, ev: BusEvent) {
    let live = state.workflow.slot.is_active();
    match ev {
        BusEvent::Log(log) => state.logs.buffer.push(log.level, &log.source, log.message),
        BusEvent::AgentStream(ev) => apply_agent_event(state, ev, live),
        BusEvent::WorkflowStateUpdated(snap) => {
            if !live || !same_workflow(&state.workflow.state, &snap.id) {
                return;
            }
            let wf = &mut state.workflow.state;
            wf.id = Some(snap.id);
            wf.tasks = snap.tasks;
            wf.stage = snap.stage;
            if !snap.analysis.is_empty() {
                state.workflow.analysis = snap.analysis;
            }
        }
        BusEvent::TaskStarted { workflow_id, task_id, agent } => {
            if live && same_workflow(&state.workflow.state, &workflow_id) {
                state.workflow.state.set_task_status(&task_id, TaskStatus::Running, Some(&agent));
                if let Some(a) = state.roster.get_mut(&agent) {
                    a.set_activity(&format!("task {task_id}"));
                }
            }
        }
        BusEvent::TaskCompleted { workflow_id, task_id, agent } => {
            if live && same_workflow(&state.workflow.state, &workflow_id) {
                state.workflow.state.set_task_status(&task_id, TaskStatus::Completed, Some(&agent));
            }
        }
        BusEvent::TaskFailed { workflow_id, task_id, error } => {
            if live && same_workflow(&state.workflow.state, &workflow_id) {
                state.workflow.state.set_task_status(&task_id, TaskStatus::Failed, None);
                if let Some(t) = state.workflow.state.task_mut(&task_id) {
                    t.error = Some(error);
                }
            }
        }
        BusEvent::TaskSkipped { workflow_id, task_id, reason } => {
            if live && same_workflow(&state.workflow.state, &workflow_id) {
                state.workflow.state.set_task_status(&task_id, TaskStatus::Skipped, None);
                state.logs.buffer.info("workflow", format!("task {task_id} skipped: {reason}"));
            }
        }
        BusEvent::PhaseStarted { workflow_id, phase } => {
            if live && same_workflow(&state.workflow.state, &workflow_id) {
                state.workflow.state.id = Some(workflow_id);
                state.logs.buffer.info("workflow", format!("phase {phase}"));
                state.workflow.state.stage = Some(phase);
            }
        }
    }
}

/// Events for a workflow we haven't learned the id of yet are adopted.
fn same_workflow(wf: &WorkflowState, id: &str) -> bool {
    wf.id.as_deref().is_none_or(|current| current == id)
}

fn apply_agent_event(state: &mut AppState, ev: AgentStreamEvent, live: bool) {
    let AgentStreamEvent { agent, kind, message } = ev;
    let Some(info) = state.roster.get_mut(&agent) else {
        // unknown agents are ignored
        return;
    };
    match kind {
        AgentEventKind::Started { phase, timeout } => {
            if live {
                info.on_started(phase, timeout);
            }
        }
        AgentEventKind::Completed { tokens_in, tokens_out } => {
            if live && info.on_completed(tokens_in, tokens_out) {
                state.totals.add(tokens_in, tokens_out);
                state.workflow.counted.record(&agent, tokens_in, tokens_out);
            }
        }
        // reported once, by whoever handles the failed request
        AgentEventKind::Error => {
            if live && info.status == AgentStatus::Running {
                info.on_error(&message);
            }
        }
        AgentEventKind::ToolUse { tool } => info.set_activity(&format!("tool: {tool}")),
        AgentEventKind::Thinking => info.set_activity("thinking"),
        AgentEventKind::Chunk => info.set_activity("writing"),
        AgentEventKind::Progress { retry } => {
            info.set_activity(&message);
            if let Some(n) = retry {
                state.logs.buffer.warn(&agent, format!("retry {n}: {message}"));
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
