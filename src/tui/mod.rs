//! Ratatui session controller.
//!
//! Architecture:
//!   control loop: one `tokio::select!` over the 120 ms spinner tick, the
//!                 controller inbox and crossterm's event stream. Every event
//!                 is applied to `AppState` to completion before the next one
//!                 is looked at.
//!   background:   agent calls, workflow runs, file reads, git and clipboard
//!                 run through the `Dispatcher` and come back as `UiEvent`s.
//!                 Bus traffic arrives pre-batched from the multiplexer.
//!
//! Nothing outside this loop ever touches `AppState`.
pub mod actions;
pub mod apply;
pub mod input;
pub mod keys;
pub mod layout;
pub mod overlays;
pub mod panels;
pub mod render;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{
        DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture, Event,
        EventStream,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures_util::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend, layout::Rect};
use tokio::sync::mpsc;

use crate::agent::ExecuteResult;
use crate::cancel::RequestSlot;
use crate::clipboard::Copied;
use crate::config::ResolvedConfig;
use crate::conversation::{ConversationHistory, LogBuffer, Message};
use crate::dispatch::Dispatcher;
use crate::error::ControllerError;
use crate::events::BusEvent;
use crate::explorer::{ExplorerEntry, ExplorerState};
use crate::focus::{FocusState, OverlayStack, PanelVisibility};
use crate::prompt_history::PromptHistory;
use crate::status::{AgentInfo, AgentRoster, TokenTotals, UsageLedger, WorkflowState};
use crate::theme::Theme;
use crate::watcher::DirWatcher;
use crate::workflow::{AgentAnswer, AgentSlot, SharedRunner, WorkflowSnapshot, WorkflowSummary};

use input::InputLine;

const SPINNER_TICK: Duration = Duration::from_millis(120);

// ── UiEvent: everything that enters the controller besides raw input ─────────

#[derive(Debug)]
pub enum UiEvent {
    ChatFinished {
        generation: u64,
        agent: String,
        result: Result<ExecuteResult, ControllerError>,
    },
    WorkflowFinished {
        generation: u64,
        op: WorkflowOp,
        result: Result<WorkflowSnapshot, ControllerError>,
        /// On failure: the workflow as the runner left it, if it could be read.
        settled: Option<WorkflowSnapshot>,
    },
    /// Startup check for a workflow left active by a previous session.
    WorkflowSynced(Result<Option<WorkflowSnapshot>, ControllerError>),
    WorkflowsListed(Result<Vec<WorkflowSummary>, ControllerError>),
    WorkflowLoaded(Result<WorkflowSnapshot, ControllerError>),
    WorkflowAdmin {
        action: AdminAction,
        result: Result<String, ControllerError>,
    },
    Bus(BusEvent),
    BusBatch(Vec<BusEvent>),
    PanelNavTimeout {
        seq: u64,
    },
    ExplorerLoaded {
        dir: PathBuf,
        result: Result<Vec<ExplorerEntry>, String>,
    },
    /// The directory watcher saw changes under the explorer root.
    FileChanged,
    FileLoaded {
        path: PathBuf,
        result: Result<String, String>,
    },
    DiffLoaded(Result<String, String>),
    ClipboardDone {
        what: &'static str,
        result: Result<Copied, ControllerError>,
    },
    HistorySaved(Result<(), String>),
}

/// The long-running workflow operations. Each one occupies the workflow slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOp {
    Run(String),
    Analyze(String),
    /// Empty prompt plans the active workflow.
    Plan(String),
    Replan(String),
    UsePlan(String),
    /// Execute the plan of the workflow with this id (the active one).
    Execute(String),
    Resume,
}

impl WorkflowOp {
    pub fn label(&self) -> String {
        match self {
            WorkflowOp::Run(_) => "workflow run".to_string(),
            WorkflowOp::Analyze(_) => "analysis".to_string(),
            WorkflowOp::Plan(_) => "planning".to_string(),
            WorkflowOp::Replan(_) => "replan".to_string(),
            WorkflowOp::UsePlan(id) => format!("plan {id}"),
            WorkflowOp::Execute(id) => format!("execution of {id}"),
            WorkflowOp::Resume => "resume".to_string(),
        }
    }

    /// Whether this op begins a new workflow rather than continuing `current`.
    pub fn starts_fresh(&self, current: &WorkflowState) -> bool {
        match self {
            WorkflowOp::Run(_) | WorkflowOp::Analyze(_) => true,
            WorkflowOp::Plan(p) => !p.is_empty() && *p != current.prompt,
            WorkflowOp::UsePlan(id) => current.id.as_deref() != Some(id.as_str()),
            WorkflowOp::Replan(_) | WorkflowOp::Execute(_) | WorkflowOp::Resume => false,
        }
    }

    fn prompt(&self) -> &str {
        match self {
            WorkflowOp::Run(p) | WorkflowOp::Analyze(p) | WorkflowOp::Plan(p) => p,
            WorkflowOp::UsePlan(id) => id,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    Deactivate,
    Delete(String),
    Archive,
    Purge,
}

// ── Sub-states ────────────────────────────────────────────────────────────────

pub struct ConversationState {
    pub history: ConversationHistory,
    /// A chat request is outstanding.
    pub streaming: bool,
    /// Lines scrolled up from the bottom.
    pub scroll: usize,
    pub slot: RequestSlot,
    /// Chat agent chosen with /agent; `None` means the first enabled one.
    pub agent: Option<String>,
    /// Model override chosen with /model.
    pub model: Option<String>,
}

pub struct WorkflowView {
    pub state: WorkflowState,
    pub slot: RequestSlot,
    /// Per-agent answers from the last analysis, for the consensus overlay.
    pub analysis: Vec<AgentAnswer>,
    /// Tokens the current run's live events already credited to agents.
    pub counted: UsageLedger,
}

/// Scrollable text shown in an overlay (diff, file).
#[derive(Debug, Clone, Default)]
pub struct TextView {
    pub title: String,
    pub path: Option<PathBuf>,
    pub body: String,
    pub error: Option<String>,
    pub loading: bool,
    pub scroll: usize,
}

impl TextView {
    pub fn loading(title: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            title: title.into(),
            path,
            loading: true,
            ..Default::default()
        }
    }

    pub fn set(&mut self, result: Result<String, String>) {
        self.loading = false;
        self.scroll = 0;
        match result {
            Ok(body) => {
                self.body = body;
                self.error = None;
            }
            Err(e) => {
                self.body.clear();
                self.error = Some(e);
            }
        }
    }

    pub fn line_count(&self) -> usize {
        self.body.lines().count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlayData {
    pub history_query: String,
    pub history_selected: usize,
    pub diff: TextView,
    pub file: TextView,
    pub consensus_scroll: usize,
    pub tasks_scroll: usize,
}

pub struct LogsView {
    pub buffer: LogBuffer,
    /// Lines scrolled up from the newest entry.
    pub scroll: usize,
}

// ── AppState ──────────────────────────────────────────────────────────────────

pub struct AppState {
    pub conversation: ConversationState,
    pub workflow: WorkflowView,
    pub roster: AgentRoster,
    pub totals: TokenTotals,
    pub focus: FocusState,
    pub overlays: OverlayStack,
    pub overlay: OverlayData,
    pub logs: LogsView,
    pub explorer: ExplorerState,
    pub input: InputLine,
    pub prompt_history: PromptHistory,
    pub theme: Theme,
    pub spinner_tick: u32,
    pub profile: String,
    pub model: String,
    pub cost_per_mtok_input: Option<f64>,
    /// Last known terminal size, for mouse hit-testing.
    pub viewport: Rect,
    pub stats_scroll: usize,
    pub tokens_selected: usize,
    /// Raw bytes for the terminal (OSC 52), written between frames.
    pub terminal_writes: Vec<String>,
}

impl AppState {
    pub fn new(resolved: &ResolvedConfig, root: PathBuf, prompt_history: PromptHistory) -> Self {
        let roster = AgentRoster::new(
            resolved
                .agents
                .iter()
                .map(|a| AgentInfo::new(&a.name, &a.color, a.enabled))
                .collect(),
        );
        let ui = &resolved.ui;
        let visibility = PanelVisibility {
            explorer: ui.explorer,
            logs: ui.logs,
            stats: ui.stats,
            tokens: ui.tokens,
        };
        Self {
            conversation: ConversationState {
                history: ConversationHistory::new(resolved.session.history_capacity),
                streaming: false,
                scroll: 0,
                slot: RequestSlot::new(resolved.session.chat_timeout()),
                agent: None,
                model: None,
            },
            workflow: WorkflowView {
                state: WorkflowState::default(),
                slot: RequestSlot::new(resolved.session.workflow_timeout()),
                analysis: Vec::new(),
                counted: UsageLedger::default(),
            },
            roster,
            totals: TokenTotals::default(),
            focus: FocusState::new(visibility),
            overlays: OverlayStack::default(),
            overlay: OverlayData::default(),
            logs: LogsView {
                buffer: LogBuffer::new(ui.log_capacity),
                scroll: 0,
            },
            explorer: ExplorerState::new(root),
            input: InputLine::default(),
            prompt_history,
            theme: Theme::by_name(&ui.theme),
            spinner_tick: 0,
            profile: resolved.profile_name.clone(),
            model: resolved.model.clone(),
            cost_per_mtok_input: resolved.cost_per_mtok_input,
            viewport: Rect::default(),
            stats_scroll: 0,
            tokens_selected: 0,
            terminal_writes: Vec::new(),
        }
    }

    /// Append a system message and keep the view pinned to the bottom.
    pub fn system(&mut self, body: impl Into<String>) {
        self.conversation.history.append(Message::system(body));
        self.conversation.scroll = 0;
    }

    /// A chat request or workflow run is outstanding.
    pub fn is_busy(&self) -> bool {
        self.conversation.slot.is_active() || self.workflow.slot.is_active()
    }

    /// The agent plain-text input goes to.
    pub fn chat_agent(&self) -> Option<String> {
        match &self.conversation.agent {
            Some(name) => Some(name.clone()),
            None => self.roster.enabled_names().into_iter().next(),
        }
    }
}

// ── Services: the collaborators the controller dispatches to ─────────────────

pub struct Services {
    pub dispatcher: Dispatcher<UiEvent>,
    pub agents: Vec<AgentSlot>,
    pub runner: Option<SharedRunner>,
    pub watcher: Option<Arc<DirWatcher>>,
}

impl Services {
    pub fn agent(&self, name: &str) -> Option<&AgentSlot> {
        self.agents.iter().find(|a| a.agent.name() == name)
    }
}

// ── Terminal setup / teardown ─────────────────────────────────────────────────

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture, EnableBracketedPaste)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) {
    let _ = disable_raw_mode();
    let _ = execute!(
        terminal.backend_mut(),
        DisableBracketedPaste,
        DisableMouseCapture,
        LeaveAlternateScreen
    );
    let _ = terminal.show_cursor();
}

// ── Main run loop ─────────────────────────────────────────────────────────────

pub async fn run(state: AppState, services: Services, inbox: mpsc::UnboundedReceiver<UiEvent>) -> Result<()> {
    let mut terminal = setup_terminal()?;

    // Panic hook: restore the terminal before printing the panic
    let orig_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), DisableMouseCapture, LeaveAlternateScreen);
        orig_hook(info);
    }));

    let result = event_loop(&mut terminal, state, services, inbox).await;

    restore_terminal(&mut terminal);
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    mut state: AppState,
    services: Services,
    mut inbox: mpsc::UnboundedReceiver<UiEvent>,
) -> Result<()> {
    let size = terminal.size()?;
    state.viewport = Rect::new(0, 0, size.width, size.height);
    actions::startup(&mut state, &services);

    let mut crossterm_events = EventStream::new();
    let mut ticker = tokio::time::interval(SPINNER_TICK);

    terminal.draw(|f| render::draw(f, &state))?;

    loop {
        tokio::select! {
            // ── Animation tick ────────────────────────────────────────────────
            _ = ticker.tick() => {
                if state.is_busy() {
                    state.spinner_tick = state.spinner_tick.wrapping_add(1);
                    terminal.draw(|f| render::draw(f, &state))?;
                }
            }

            // ── Results and bus traffic ───────────────────────────────────────
            Some(ev) = inbox.recv() => {
                apply::apply_event(&mut state, &services, ev);
                write_pending(terminal, &mut state);
                terminal.draw(|f| render::draw(f, &state))?;
            }

            // ── Keyboard / mouse / resize ─────────────────────────────────────
            Some(Ok(ev)) = crossterm_events.next() => {
                match ev {
                    Event::Key(key) => {
                        if !keys::handle_key(&mut state, &services, key) {
                            break;
                        }
                    }
                    Event::Mouse(mouse) => keys::handle_mouse(&mut state, mouse),
                    Event::Paste(text) => keys::handle_paste(&mut state, &text),
                    Event::Resize(w, h) => state.viewport = Rect::new(0, 0, w, h),
                    _ => {}
                }
                terminal.draw(|f| render::draw(f, &state))?;
            }
        }
    }

    actions::shutdown(&mut state, &services);
    Ok(())
}

fn write_pending(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, state: &mut AppState) {
    for seq in std::mem::take(&mut state.terminal_writes) {
        let backend = terminal.backend_mut();
        if let Err(e) = backend.write_all(seq.as_bytes()).and_then(|_| backend.flush()) {
            actions::surface_error(state, None, &ControllerError::Clipboard(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests;
