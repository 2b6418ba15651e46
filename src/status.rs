//! Workflow lifecycle and per-agent status machines.
//!
//! Both are plain data with transition methods. They are only ever mutated by
//! the controller while applying an event, so transitions are synchronous and
//! never interleave.
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

// ── Workflow ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPhase {
    #[default]
    Idle,
    Running,
    Done,
}

impl WorkflowPhase {
    pub fn label(self) -> &'static str {
        match self {
            WorkflowPhase::Idle => "idle",
            WorkflowPhase::Running => "running",
            WorkflowPhase::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn glyph(self) -> &'static str {
        match self {
            TaskStatus::Pending => "○",
            TaskStatus::Running => "◐",
            TaskStatus::Completed => "●",
            TaskStatus::Failed => "✗",
            TaskStatus::Skipped => "⊘",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Per-agent agreement with the rest of the quorum, 0.0–1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub agent: String,
    pub score: f64,
}

/// Tokens one agent spent during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub agent: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    #[serde(default)]
    pub consensus: Option<f64>,
    #[serde(default)]
    pub agreement: Vec<Agreement>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Per-agent breakdown of `tokens_in`/`tokens_out`.
    #[serde(default)]
    pub usage: Vec<AgentUsage>,
}

impl WorkflowMetrics {
    /// Fold one run's metrics into the running totals.
    /// Token counts, cost and duration accumulate; consensus is replaced when
    /// the run produced one.
    pub fn absorb(&mut self, run: &WorkflowMetrics) {
        self.tokens_in += run.tokens_in;
        self.tokens_out += run.tokens_out;
        self.cost_usd += run.cost_usd;
        self.duration_ms += run.duration_ms;
        for u in &run.usage {
            add_usage(&mut self.usage, &u.agent, u.tokens_in, u.tokens_out);
        }
        if run.consensus.is_some() {
            self.consensus = run.consensus;
            self.agreement = run.agreement.clone();
        }
    }
}

fn add_usage(usage: &mut Vec<AgentUsage>, agent: &str, tokens_in: u64, tokens_out: u64) {
    match usage.iter_mut().find(|u| u.agent == agent) {
        Some(u) => {
            u.tokens_in += tokens_in;
            u.tokens_out += tokens_out;
        }
        None => usage.push(AgentUsage {
            agent: agent.to_string(),
            tokens_in,
            tokens_out,
        }),
    }
}

/// Tokens already credited to agents from live stream events during the
/// current run. When the run returns, its reported usage is settled against
/// this so nothing is counted twice or dropped.
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    counted: Vec<AgentUsage>,
}

impl UsageLedger {
    pub fn record(&mut self, agent: &str, tokens_in: u64, tokens_out: u64) {
        add_usage(&mut self.counted, agent, tokens_in, tokens_out);
    }

    pub fn clear(&mut self) {
        self.counted.clear();
    }

    /// What `reported` adds on top of what was already counted, per agent.
    /// Clears the ledger.
    pub fn settle(&mut self, reported: &[AgentUsage]) -> Vec<AgentUsage> {
        let out = reported
            .iter()
            .filter_map(|r| {
                let (seen_in, seen_out) = self
                    .counted
                    .iter()
                    .find(|c| c.agent == r.agent)
                    .map_or((0, 0), |c| (c.tokens_in, c.tokens_out));
                let extra = AgentUsage {
                    agent: r.agent.clone(),
                    tokens_in: r.tokens_in.saturating_sub(seen_in),
                    tokens_out: r.tokens_out.saturating_sub(seen_out),
                };
                (extra.tokens_in > 0 || extra.tokens_out > 0).then_some(extra)
            })
            .collect();
        self.counted.clear();
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowState {
    pub id: Option<String>,
    pub prompt: String,
    pub phase: WorkflowPhase,
    /// Free-form stage label from PhaseStarted events ("analyze", "plan", "execute").
    pub stage: Option<String>,
    pub started_at: Option<DateTime<Local>>,
    pub tasks: Vec<WorkflowTask>,
    pub metrics: WorkflowMetrics,
    pub last_error: Option<String>,
}

impl WorkflowState {
    /// A fresh running instance. Replaces whatever was there before.
    pub fn start(prompt: &str, carried_id: Option<String>) -> Self {
        Self {
            id: carried_id,
            prompt: prompt.to_string(),
            phase: WorkflowPhase::Running,
            stage: None,
            started_at: Some(Local::now()),
            tasks: Vec::new(),
            metrics: WorkflowMetrics::default(),
            last_error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == WorkflowPhase::Running
    }

    /// Continue the same workflow (resume, execute, replan): back to running,
    /// keeping id, tasks and accumulated metrics.
    pub fn restart(&mut self) {
        self.phase = WorkflowPhase::Running;
        self.stage = None;
        self.last_error = None;
        if self.started_at.is_none() {
            self.started_at = Some(Local::now());
        }
    }

    /// running → done. `run` holds the metrics of the run that just finished.
    pub fn complete(&mut self, run: &WorkflowMetrics) {
        self.phase = WorkflowPhase::Done;
        self.stage = None;
        self.metrics.absorb(run);
        self.last_error = None;
    }

    /// running → idle, keeping tasks and id so the run can be resumed.
    pub fn fail(&mut self, message: &str) {
        self.phase = WorkflowPhase::Idle;
        self.last_error = Some(message.to_string());
        for task in &mut self.tasks {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
            }
        }
    }

    /// running → idle on user cancel. Not an error.
    pub fn cancel(&mut self) {
        self.phase = WorkflowPhase::Idle;
        self.stage = None;
        for task in &mut self.tasks {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
            }
        }
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut WorkflowTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn set_task_status(&mut self, id: &str, status: TaskStatus, agent: Option<&str>) {
        if let Some(task) = self.task_mut(id) {
            task.status = status;
            if let Some(a) = agent {
                task.agent = Some(a.to_string());
            }
        }
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at?;
        (Local::now() - started).to_std().ok()
    }
}

// ── Agents ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Disabled,
    Idle,
    Running,
    Done,
    Error,
}

impl AgentStatus {
    pub fn label(self) -> &'static str {
        match self {
            AgentStatus::Disabled => "disabled",
            AgentStatus::Idle => "idle",
            AgentStatus::Running => "running",
            AgentStatus::Done => "done",
            AgentStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub name: String,
    pub color: String,
    pub status: AgentStatus,
    pub tokens_in: u64,
    pub tokens_out: u64,
    /// Display-only text updated by intermediate stream events.
    pub activity: String,
    pub error: Option<String>,
    pub phase: Option<String>,
    pub timeout: Option<Duration>,
}

impl AgentInfo {
    pub fn new(name: &str, color: &str, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            color: color.to_string(),
            status: if enabled { AgentStatus::Idle } else { AgentStatus::Disabled },
            tokens_in: 0,
            tokens_out: 0,
            activity: String::new(),
            error: None,
            phase: None,
            timeout: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status != AgentStatus::Disabled
    }

    /// idle → running. Returns false when the agent is disabled.
    pub fn on_started(&mut self, phase: Option<String>, timeout: Option<Duration>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.status = AgentStatus::Running;
        self.phase = phase;
        self.timeout = timeout;
        self.error = None;
        self.activity = "started".to_string();
        true
    }

    /// running → done, accumulating tokens. Returns false when disabled.
    pub fn on_completed(&mut self, tokens_in: u64, tokens_out: u64) -> bool {
        if !self.add_tokens(tokens_in, tokens_out) {
            return false;
        }
        if self.status == AgentStatus::Running {
            self.status = AgentStatus::Done;
        }
        self.activity.clear();
        true
    }

    /// Credit tokens without a status change. Returns false when disabled.
    pub fn add_tokens(&mut self, tokens_in: u64, tokens_out: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
        true
    }

    pub fn on_error(&mut self, message: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.status = AgentStatus::Error;
        self.error = Some(message.to_string());
        self.activity.clear();
        true
    }

    pub fn set_activity(&mut self, activity: &str) {
        if self.is_enabled() {
            self.activity = activity.chars().take(80).collect();
        }
    }

    /// Any non-disabled state → idle.
    pub fn reset(&mut self) {
        if !self.is_enabled() {
            return;
        }
        self.status = AgentStatus::Idle;
        self.activity.clear();
        self.error = None;
        self.phase = None;
        self.timeout = None;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTotals {
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl TokenTotals {
    pub fn add(&mut self, tokens_in: u64, tokens_out: u64) {
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentRoster {
    agents: Vec<AgentInfo>,
}

impl AgentRoster {
    pub fn new(agents: Vec<AgentInfo>) -> Self {
        Self { agents }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentInfo> {
        self.agents.iter()
    }

    pub fn get(&self, name: &str) -> Option<&AgentInfo> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AgentInfo> {
        self.agents.iter_mut().find(|a| a.name == name)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Workflow start: every non-disabled agent back to idle.
    pub fn reset_all(&mut self) {
        for a in &mut self.agents {
            a.reset();
        }
    }

    /// Cancellation: running agents drop back to idle, the rest keep their status.
    pub fn reset_running(&mut self) {
        for a in &mut self.agents {
            if a.status == AgentStatus::Running {
                a.reset();
            }
        }
    }

    /// Workflow completed: anything still running is considered done.
    pub fn finish_running(&mut self) {
        for a in &mut self.agents {
            if a.status == AgentStatus::Running {
                a.status = AgentStatus::Done;
                a.activity.clear();
            }
        }
    }

    /// Workflow failed: the named agent (or every running one when unknown)
    /// is marked `error`; other running agents drop back to idle.
    pub fn fail(&mut self, agent: Option<&str>, message: &str) {
        for a in &mut self.agents {
            let is_culprit = match agent {
                Some(name) => a.name == name,
                None => a.status == AgentStatus::Running,
            };
            if is_culprit {
                a.on_error(message);
            } else if a.status == AgentStatus::Running {
                a.reset();
            }
        }
    }

    pub fn running(&self) -> Vec<String> {
        self.agents
            .iter()
            .filter(|a| a.status == AgentStatus::Running)
            .map(|a| a.name.clone())
            .collect()
    }

    pub fn enabled_names(&self) -> Vec<String> {
        self.agents.iter().filter(|a| a.is_enabled()).map(|a| a.name.clone()).collect()
    }
}
