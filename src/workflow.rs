//! Workflow collaborator: analyze → plan → execute across the agent quorum.
//!
//! `WorkflowRunner` is the seam the controller talks to. `LocalWorkflowRunner`
//! is the in-process implementation:
//!   1. analyze: every enabled agent answers the prompt concurrently; word-set
//!      agreement between the answers becomes the consensus score
//!   2. plan: the first enabled agent turns prompt + analysis into a numbered
//!      task list
//!   3. execute: pending tasks run in order, round-robin across agents
//!
//! Progress is reported on the event bus only. Workflows are persisted as JSON
//! under the state directory so they can be listed, reloaded and resumed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::agent::{ExecuteRequest, ExecuteResult, SharedAgent};
use crate::cancel::RequestContext;
use crate::conversation::LogLevel;
use crate::error::ControllerError;
use crate::events::{AgentEventKind, BusEvent, EventBus};
use crate::status::{AgentUsage, Agreement, TaskStatus, WorkflowMetrics, WorkflowPhase, WorkflowTask};

const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

// ── Snapshots ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAnswer {
    pub agent: String,
    pub output: String,
}

/// Full state of one workflow as the runner sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub id: String,
    pub prompt: String,
    pub status: WorkflowPhase,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub analysis: Vec<AgentAnswer>,
    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
    /// Metrics of the most recent run only; the controller does the accumulating.
    #[serde(default)]
    pub metrics: WorkflowMetrics,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

impl WorkflowSnapshot {
    fn new(id: String, prompt: &str) -> Self {
        let now = Local::now();
        Self {
            id,
            prompt: prompt.to_string(),
            status: WorkflowPhase::Idle,
            stage: None,
            analysis: Vec::new(),
            tasks: Vec::new(),
            metrics: WorkflowMetrics::default(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id.clone(),
            prompt: self.prompt.clone(),
            status: self.status,
            tasks_done: self.tasks.iter().filter(|t| t.status.is_finished()).count(),
            tasks_total: self.tasks.len(),
            updated_at: self.updated_at,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.tasks.iter().any(|t| !t.status.is_finished())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSummary {
    pub id: String,
    pub prompt: String,
    pub status: WorkflowPhase,
    pub tasks_done: usize,
    pub tasks_total: usize,
    pub updated_at: DateTime<Local>,
}

// ── Runner trait ──────────────────────────────────────────────────────────────

/// Long-running operations take a `RequestContext` and must stop promptly when
/// it is cancelled or expires. Each returns the workflow as it stands at the end.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// analyze → plan → execute for a new workflow.
    async fn run(&self, ctx: &RequestContext, prompt: &str) -> Result<WorkflowSnapshot, ControllerError>;
    async fn analyze(&self, ctx: &RequestContext, prompt: &str) -> Result<WorkflowSnapshot, ControllerError>;
    /// Plan the active workflow when `prompt` is empty or matches it; otherwise plan a new one.
    async fn plan(&self, ctx: &RequestContext, prompt: &str) -> Result<WorkflowSnapshot, ControllerError>;
    async fn replan(&self, ctx: &RequestContext, feedback: &str) -> Result<WorkflowSnapshot, ControllerError>;
    /// Re-run every task of a stored plan from the start.
    async fn use_plan(&self, ctx: &RequestContext, id: &str) -> Result<WorkflowSnapshot, ControllerError>;
    /// Continue the active workflow's unfinished tasks.
    async fn resume(&self, ctx: &RequestContext) -> Result<WorkflowSnapshot, ControllerError>;

    async fn get_state(&self) -> Result<Option<WorkflowSnapshot>, ControllerError>;
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, ControllerError>;
    async fn load_workflow(&self, id: &str) -> Result<WorkflowSnapshot, ControllerError>;
    async fn deactivate_workflow(&self) -> Result<(), ControllerError>;
    /// Moves every inactive workflow to the archive. Returns how many moved.
    async fn archive_workflows(&self) -> Result<usize, ControllerError>;
    async fn purge_all_workflows(&self) -> Result<usize, ControllerError>;
    async fn delete_workflow(&self, id: &str) -> Result<(), ControllerError>;
}

pub type SharedRunner = Arc<dyn WorkflowRunner>;

// ── Persistence ───────────────────────────────────────────────────────────────

/// JSON files under `<state_dir>/workflows/`, archived ones under `archive/`.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    dir: PathBuf,
}

impl WorkflowStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("workflows"),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn archive_dir(&self) -> PathBuf {
        self.dir.join("archive")
    }

    pub fn save(&self, snap: &WorkflowSnapshot) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&snap.id);
        let json = serde_json::to_string_pretty(snap)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(&self, id: &str) -> Result<WorkflowSnapshot> {
        let path = self.path_for(id);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("no stored workflow at {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("corrupt workflow file {}", path.display()))
    }

    /// Newest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<WorkflowSnapshot>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut out: Vec<WorkflowSnapshot> = std::fs::read_dir(&self.dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .filter_map(|p| std::fs::read_to_string(p).ok())
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        std::fs::remove_file(&path).with_context(|| format!("cannot delete {}", path.display()))
    }

    pub fn archive(&self, id: &str) -> Result<()> {
        let dest = self.archive_dir();
        std::fs::create_dir_all(&dest)?;
        std::fs::rename(self.path_for(id), dest.join(format!("{id}.json")))?;
        Ok(())
    }

    /// Remove every stored workflow, archived ones included. Returns the count.
    pub fn purge(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in [self.dir.clone(), self.archive_dir()] {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for path in entries.flatten().map(|e| e.path()) {
                if path.extension().is_some_and(|x| x == "json") && std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

// ── Consensus ─────────────────────────────────────────────────────────────────

fn word_set(text: &str) -> std::collections::HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

pub fn jaccard(a: &str, b: &str) -> f64 {
    let (a, b) = (word_set(a), word_set(b));
    let union = a.union(&b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Overall consensus is the mean pairwise similarity; each agent's agreement is
/// the mean of its own pairs. A single answer agrees with itself.
pub fn consensus(answers: &[AgentAnswer]) -> (Option<f64>, Vec<Agreement>) {
    match answers.len() {
        0 => return (None, Vec::new()),
        1 => {
            return (
                Some(1.0),
                vec![Agreement { agent: answers[0].agent.clone(), score: 1.0 }],
            );
        }
        _ => {}
    }
    let n = answers.len();
    let mut per_agent = vec![0.0; n];
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            let s = jaccard(&answers[i].output, &answers[j].output);
            per_agent[i] += s;
            per_agent[j] += s;
            total += s;
            pairs += 1;
        }
    }
    let agreement = answers
        .iter()
        .zip(per_agent)
        .map(|(a, sum)| Agreement {
            agent: a.agent.clone(),
            score: sum / (n - 1) as f64,
        })
        .collect();
    (Some(total / pairs as f64), agreement)
}

// ── Plan parsing ──────────────────────────────────────────────────────────────

/// One task per numbered line: `1. foo`, `2) bar`. Everything else is ignored.
pub fn parse_numbered_tasks(text: &str) -> Vec<WorkflowTask> {
    text.lines()
        .filter_map(|line| {
            let t = line.trim();
            let digits = t.chars().take_while(char::is_ascii_digit).count();
            if digits == 0 {
                return None;
            }
            let rest = t[digits..].strip_prefix(['.', ')'])?.trim();
            (!rest.is_empty()).then(|| rest.trim_matches('*').trim().to_string())
        })
        .enumerate()
        .map(|(i, description)| WorkflowTask {
            id: format!("t{}", i + 1),
            description,
            agent: None,
            status: TaskStatus::Pending,
            output: None,
            error: None,
        })
        .collect()
}

pub fn estimate_cost(tokens_in: u64, tokens_out: u64, cost_per_mtok_input: Option<f64>) -> f64 {
    // output is priced at 3× input
    cost_per_mtok_input
        .map(|rate| (tokens_in as f64 * rate + tokens_out as f64 * rate * 3.0) / 1_000_000.0)
        .unwrap_or(0.0)
}

// ── Local runner ──────────────────────────────────────────────────────────────

/// An agent as the runner uses it.
#[derive(Clone)]
pub struct AgentSlot {
    pub agent: SharedAgent,
    pub system_prompt: String,
    pub model: Option<String>,
}

impl AgentSlot {
    pub fn new(agent: SharedAgent) -> Self {
        Self {
            agent,
            system_prompt: String::new(),
            model: None,
        }
    }

    fn name(&self) -> &str {
        self.agent.name()
    }
}

/// Per-run bookkeeping: tokens spent per agent and wall time.
struct RunMeter {
    started: Instant,
    usage: Vec<AgentUsage>,
}

impl RunMeter {
    fn start() -> Self {
        Self {
            started: Instant::now(),
            usage: Vec::new(),
        }
    }

    fn add(&mut self, agent: &str, r: &ExecuteResult) {
        match self.usage.iter_mut().find(|u| u.agent == agent) {
            Some(u) => {
                u.tokens_in += r.tokens_in;
                u.tokens_out += r.tokens_out;
            }
            None => self.usage.push(AgentUsage {
                agent: agent.to_string(),
                tokens_in: r.tokens_in,
                tokens_out: r.tokens_out,
            }),
        }
    }

    fn tokens(&self) -> (u64, u64) {
        self.usage
            .iter()
            .fold((0, 0), |(i, o), u| (i + u.tokens_in, o + u.tokens_out))
    }

    fn metrics(&self, cost_per_mtok_input: Option<f64>) -> WorkflowMetrics {
        let (tokens_in, tokens_out) = self.tokens();
        WorkflowMetrics {
            tokens_in,
            tokens_out,
            cost_usd: estimate_cost(tokens_in, tokens_out, cost_per_mtok_input),
            consensus: None,
            agreement: Vec::new(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            usage: self.usage.clone(),
        }
    }
}

pub struct LocalWorkflowRunner {
    agents: Vec<AgentSlot>,
    bus: EventBus,
    store: WorkflowStore,
    active: Mutex<Option<WorkflowSnapshot>>,
    cost_per_mtok_input: Option<f64>,
    next_id: AtomicU64,
}

impl LocalWorkflowRunner {
    pub fn new(
        agents: Vec<AgentSlot>,
        bus: EventBus,
        state_dir: &Path,
        cost_per_mtok_input: Option<f64>,
    ) -> Self {
        Self {
            agents,
            bus,
            store: WorkflowStore::new(state_dir),
            active: Mutex::new(None),
            cost_per_mtok_input,
            next_id: AtomicU64::new(1),
        }
    }

    fn new_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("wf-{}-{n}", Local::now().format("%Y%m%d-%H%M%S"))
    }

    fn active(&self) -> Option<WorkflowSnapshot> {
        self.active.lock().ok().and_then(|g| g.clone())
    }

    fn set_active(&self, snap: Option<WorkflowSnapshot>) {
        if let Ok(mut g) = self.active.lock() {
            *g = snap;
        }
    }

    /// Record, persist (best-effort) and announce the new state.
    fn commit(&self, snap: &mut WorkflowSnapshot) {
        snap.updated_at = Local::now();
        if let Err(e) = self.store.save(snap) {
            self.bus.log(LogLevel::Warn, "workflow", format!("could not persist {}: {e:#}", snap.id));
        }
        self.set_active(Some(snap.clone()));
        self.bus.publish(BusEvent::WorkflowStateUpdated(snap.clone()));
    }

    fn enter_stage(&self, snap: &mut WorkflowSnapshot, stage: &str) {
        snap.status = WorkflowPhase::Running;
        snap.stage = Some(stage.to_string());
        snap.last_error = None;
        self.bus.publish(BusEvent::PhaseStarted {
            workflow_id: snap.id.clone(),
            phase: stage.to_string(),
        });
        self.commit(snap);
    }

    fn finish(&self, snap: &mut WorkflowSnapshot, meter: RunMeter, consensus: Option<(Option<f64>, Vec<Agreement>)>) {
        snap.status = WorkflowPhase::Done;
        snap.stage = None;
        snap.metrics = meter.metrics(self.cost_per_mtok_input);
        if let Some((score, agreement)) = consensus {
            snap.metrics.consensus = score;
            snap.metrics.agreement = agreement;
        }
        self.commit(snap);
        self.bus.log(
            LogLevel::Info,
            "workflow",
            format!("{} done ({} tokens)", snap.id, snap.metrics.tokens_in + snap.metrics.tokens_out),
        );
    }

    /// Put the workflow back to idle, keeping whatever was done and what it
    /// cost, and hand the error back to the caller.
    fn abort(&self, snap: &mut WorkflowSnapshot, meter: RunMeter, err: ControllerError) -> ControllerError {
        snap.status = WorkflowPhase::Idle;
        snap.stage = None;
        snap.metrics = meter.metrics(self.cost_per_mtok_input);
        for task in &mut snap.tasks {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
            }
        }
        if !err.is_cancelled() {
            snap.last_error = Some(err.to_string());
        }
        self.commit(snap);
        err
    }

    fn enabled(&self) -> Result<&[AgentSlot], ControllerError> {
        if self.agents.is_empty() {
            return Err(ControllerError::workflow(None, "no agents enabled"));
        }
        Ok(&self.agents)
    }

    /// One agent call with lifecycle events and retry on transport errors.
    async fn call(
        &self,
        ctx: &RequestContext,
        slot: &AgentSlot,
        phase: &str,
        prompt: String,
    ) -> Result<ExecuteResult, ControllerError> {
        let name = slot.name().to_string();
        let remaining = ctx.deadline().saturating_duration_since(tokio::time::Instant::now());
        self.bus.agent(
            &name,
            AgentEventKind::Started {
                phase: Some(phase.to_string()),
                timeout: Some(remaining),
            },
            format!("{phase} started"),
        );

        let result = self.call_with_retry(ctx, slot, phase, prompt).await;
        match &result {
            Ok(r) => self.bus.agent(
                &name,
                AgentEventKind::Completed {
                    tokens_in: r.tokens_in,
                    tokens_out: r.tokens_out,
                },
                format!("{phase} finished"),
            ),
            Err(ControllerError::Cancelled) => {}
            Err(e) => self.bus.agent(&name, AgentEventKind::Error, e.to_string()),
        }
        result
    }

    async fn call_with_retry(
        &self,
        ctx: &RequestContext,
        slot: &AgentSlot,
        phase: &str,
        prompt: String,
    ) -> Result<ExecuteResult, ControllerError> {
        let mut attempt = 0u32;
        loop {
            let req = ExecuteRequest {
                prompt: prompt.clone(),
                system_prompt: slot.system_prompt.clone(),
                messages: Vec::new(),
                model: slot.model.clone(),
                phase: Some(phase.to_string()),
                events: Some(self.bus.clone()),
            };
            match slot.agent.execute(ctx, req).await {
                Err(ControllerError::Transport(msg)) if attempt < MAX_RETRIES && !ctx.is_cancelled() => {
                    attempt += 1;
                    self.bus.agent(
                        slot.name(),
                        AgentEventKind::Progress { retry: Some(attempt) },
                        format!("retry {attempt}/{MAX_RETRIES} after: {msg}"),
                    );
                    let backoff = RETRY_BACKOFF * attempt;
                    ctx.guard(async {
                        tokio::time::sleep(backoff).await;
                        Ok(())
                    })
                    .await?;
                }
                other => return other,
            }
        }
    }

    // ── Stages ────────────────────────────────────────────────────────────────

    async fn do_analyze(
        &self,
        ctx: &RequestContext,
        snap: &mut WorkflowSnapshot,
        meter: &mut RunMeter,
    ) -> Result<(Option<f64>, Vec<Agreement>), ControllerError> {
        let agents = self.enabled()?;
        self.enter_stage(snap, "analyze");

        let prompt = format!(
            "Analyze this task. Identify the key requirements, risks and the approach you would take.\n\nTask: {}",
            snap.prompt
        );
        let calls = agents
            .iter()
            .map(|slot| self.call(ctx, slot, "analyze", prompt.clone()));
        let results = join_all(calls).await;

        let mut answers = Vec::new();
        let mut first_err = None;
        for (slot, result) in agents.iter().zip(results) {
            match result {
                Ok(r) => {
                    meter.add(slot.name(), &r);
                    answers.push(AgentAnswer {
                        agent: slot.name().to_string(),
                        output: r.output,
                    });
                }
                Err(ControllerError::Cancelled) => return Err(ControllerError::Cancelled),
                Err(e) if first_err.is_none() => first_err = Some((slot.name().to_string(), e)),
                Err(_) => {}
            }
        }
        if answers.is_empty() {
            return Err(match first_err {
                Some((_, e @ ControllerError::Timeout { .. })) => e,
                Some((agent, e)) => ControllerError::workflow(Some(&agent), e.to_string()),
                None => ControllerError::workflow(None, "analysis produced no answers"),
            });
        }
        if let Some((agent, e)) = first_err {
            self.bus.log(LogLevel::Warn, "workflow", format!("{agent} skipped analysis: {e}"));
        }

        let scored = consensus(&answers);
        snap.analysis = answers;
        self.commit(snap);
        Ok(scored)
    }

    async fn do_plan(
        &self,
        ctx: &RequestContext,
        snap: &mut WorkflowSnapshot,
        meter: &mut RunMeter,
        feedback: Option<&str>,
    ) -> Result<(), ControllerError> {
        let planner = self.enabled()?[0].clone();
        self.enter_stage(snap, "plan");

        let mut prompt = format!("Task: {}\n\n", snap.prompt);
        if !snap.analysis.is_empty() {
            prompt.push_str("Analysis from the quorum:\n\n");
            for a in &snap.analysis {
                prompt.push_str(&format!("[{}]\n{}\n\n", a.agent, a.output.trim()));
            }
        }
        if let Some(fb) = feedback {
            let previous: Vec<String> = snap
                .tasks
                .iter()
                .map(|t| format!("{}. {}", t.id.trim_start_matches('t'), t.description))
                .collect();
            prompt.push_str(&format!(
                "Previous plan:\n{}\n\nRevise it using this feedback: {fb}\n\n",
                previous.join("\n")
            ));
        }
        prompt.push_str(
            "Produce the implementation plan as a numbered list, one concrete task per line \
             (\"1. ...\"). No other numbered lines.",
        );

        let result = self.call(ctx, &planner, "plan", prompt).await?;
        meter.add(planner.name(), &result);
        let tasks = parse_numbered_tasks(&result.output);
        if tasks.is_empty() {
            return Err(ControllerError::workflow(
                Some(planner.name()),
                "plan contained no numbered tasks",
            ));
        }
        self.bus.log(
            LogLevel::Info,
            "workflow",
            format!("{} planned {} tasks", planner.name(), tasks.len()),
        );
        snap.tasks = tasks;
        self.commit(snap);
        Ok(())
    }

    async fn do_execute(
        &self,
        ctx: &RequestContext,
        snap: &mut WorkflowSnapshot,
        meter: &mut RunMeter,
    ) -> Result<(), ControllerError> {
        let agents = self.enabled()?;
        if snap.tasks.is_empty() {
            return Err(ControllerError::workflow(None, "workflow has no plan to execute"));
        }
        self.enter_stage(snap, "execute");

        let mut turn = 0usize;
        for idx in 0..snap.tasks.len() {
            if snap.tasks[idx].status.is_finished() {
                continue;
            }
            let task_id = snap.tasks[idx].id.clone();

            let duplicate_of = snap.tasks[..idx]
                .iter()
                .find(|t| t.status == TaskStatus::Completed && t.description == snap.tasks[idx].description)
                .map(|t| t.id.clone());
            if let Some(orig) = duplicate_of {
                snap.tasks[idx].status = TaskStatus::Skipped;
                self.bus.publish(BusEvent::TaskSkipped {
                    workflow_id: snap.id.clone(),
                    task_id,
                    reason: format!("duplicate of {orig}"),
                });
                self.commit(snap);
                continue;
            }

            let slot = &agents[turn % agents.len()];
            turn += 1;
            let prompt = execute_prompt(snap, idx);

            snap.tasks[idx].status = TaskStatus::Running;
            snap.tasks[idx].agent = Some(slot.name().to_string());
            snap.tasks[idx].error = None;
            self.bus.publish(BusEvent::TaskStarted {
                workflow_id: snap.id.clone(),
                task_id: task_id.clone(),
                agent: slot.name().to_string(),
            });
            self.commit(snap);

            match self.call(ctx, slot, "execute", prompt).await {
                Ok(r) => {
                    meter.add(slot.name(), &r);
                    snap.tasks[idx].status = TaskStatus::Completed;
                    snap.tasks[idx].output = Some(r.output);
                    self.bus.publish(BusEvent::TaskCompleted {
                        workflow_id: snap.id.clone(),
                        task_id,
                        agent: slot.name().to_string(),
                    });
                    self.commit(snap);
                }
                Err(ControllerError::Cancelled) => return Err(ControllerError::Cancelled),
                Err(e) => {
                    snap.tasks[idx].status = TaskStatus::Failed;
                    snap.tasks[idx].error = Some(e.to_string());
                    self.bus.publish(BusEvent::TaskFailed {
                        workflow_id: snap.id.clone(),
                        task_id,
                        error: e.to_string(),
                    });
                    self.commit(snap);
                    return Err(match e {
                        ControllerError::Timeout { .. } => e,
                        other => ControllerError::workflow(Some(slot.name()), other.to_string()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Shared tail of every long-running operation.
    fn settle(
        &self,
        mut snap: WorkflowSnapshot,
        meter: RunMeter,
        outcome: Result<Option<(Option<f64>, Vec<Agreement>)>, ControllerError>,
    ) -> Result<WorkflowSnapshot, ControllerError> {
        match outcome {
            Ok(consensus) => {
                self.finish(&mut snap, meter, consensus);
                Ok(snap)
            }
            Err(e) => Err(self.abort(&mut snap, meter, e)),
        }
    }

    fn reuse_or_new(&self, prompt: &str) -> WorkflowSnapshot {
        match self.active() {
            Some(active) if prompt.trim().is_empty() || active.prompt == prompt.trim() => active,
            _ => WorkflowSnapshot::new(self.new_id(), prompt.trim()),
        }
    }
}

fn execute_prompt(snap: &WorkflowSnapshot, idx: usize) -> String {
    let done: Vec<String> = snap.tasks[..idx]
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| {
            let first = t.output.as_deref().and_then(|o| o.lines().next()).unwrap_or("");
            format!("- {}: {} → {}", t.id, t.description, first)
        })
        .collect();
    let task = &snap.tasks[idx];
    let mut prompt = format!("Overall goal: {}\n\n", snap.prompt);
    if !done.is_empty() {
        prompt.push_str(&format!("Completed so far:\n{}\n\n", done.join("\n")));
    }
    prompt.push_str(&format!(
        "Your task ({}): {}\n\nCarry it out and report concretely what was done.",
        task.id, task.description
    ));
    prompt
}

fn not_found(id: &str) -> ControllerError {
    ControllerError::workflow(None, format!("workflow '{id}' not found"))
}

#[async_trait]
impl WorkflowRunner for LocalWorkflowRunner {
    async fn run(&self, ctx: &RequestContext, prompt: &str) -> Result<WorkflowSnapshot, ControllerError> {
        let mut snap = WorkflowSnapshot::new(self.new_id(), prompt.trim());
        let mut meter = RunMeter::start();
        let outcome = async {
            let scored = self.do_analyze(ctx, &mut snap, &mut meter).await?;
            self.do_plan(ctx, &mut snap, &mut meter, None).await?;
            self.do_execute(ctx, &mut snap, &mut meter).await?;
            Ok::<_, ControllerError>(Some(scored))
        }
        .await;
        self.settle(snap, meter, outcome)
    }

    async fn analyze(&self, ctx: &RequestContext, prompt: &str) -> Result<WorkflowSnapshot, ControllerError> {
        let mut snap = self.reuse_or_new(prompt);
        let mut meter = RunMeter::start();
        let outcome = self.do_analyze(ctx, &mut snap, &mut meter).await.map(Some);
        self.settle(snap, meter, outcome)
    }

    async fn plan(&self, ctx: &RequestContext, prompt: &str) -> Result<WorkflowSnapshot, ControllerError> {
        let mut snap = self.reuse_or_new(prompt);
        if snap.prompt.is_empty() {
            return Err(ControllerError::workflow(None, "nothing to plan"));
        }
        let mut meter = RunMeter::start();
        let outcome = self.do_plan(ctx, &mut snap, &mut meter, None).await.map(|_| None);
        self.settle(snap, meter, outcome)
    }

    async fn replan(&self, ctx: &RequestContext, feedback: &str) -> Result<WorkflowSnapshot, ControllerError> {
        let Some(mut snap) = self.active().filter(|s| !s.tasks.is_empty()) else {
            return Err(ControllerError::workflow(None, "no active plan to revise"));
        };
        let mut meter = RunMeter::start();
        let outcome = self
            .do_plan(ctx, &mut snap, &mut meter, Some(feedback))
            .await
            .map(|_| None);
        self.settle(snap, meter, outcome)
    }

    async fn use_plan(&self, ctx: &RequestContext, id: &str) -> Result<WorkflowSnapshot, ControllerError> {
        let mut snap = match self.active().filter(|s| s.id == id) {
            Some(s) => s,
            None => self.store.load(id).map_err(|_| not_found(id))?,
        };
        for task in &mut snap.tasks {
            task.status = TaskStatus::Pending;
            task.output = None;
            task.error = None;
        }
        let mut meter = RunMeter::start();
        let outcome = self.do_execute(ctx, &mut snap, &mut meter).await.map(|_| None);
        self.settle(snap, meter, outcome)
    }

    async fn resume(&self, ctx: &RequestContext) -> Result<WorkflowSnapshot, ControllerError> {
        let Some(mut snap) = self.active() else {
            return Err(ControllerError::workflow(None, "no active workflow to resume"));
        };
        let mut meter = RunMeter::start();
        let outcome = async {
            let mut scored = None;
            if snap.analysis.is_empty() {
                scored = Some(self.do_analyze(ctx, &mut snap, &mut meter).await?);
            }
            if snap.tasks.is_empty() {
                self.do_plan(ctx, &mut snap, &mut meter, None).await?;
            }
            if snap.has_pending() {
                self.do_execute(ctx, &mut snap, &mut meter).await?;
            }
            Ok::<_, ControllerError>(scored)
        }
        .await;
        self.settle(snap, meter, outcome)
    }

    async fn get_state(&self) -> Result<Option<WorkflowSnapshot>, ControllerError> {
        Ok(self.active())
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, ControllerError> {
        let stored = self
            .store
            .list()
            .map_err(|e| ControllerError::FileSystem(format!("{e:#}")))?;
        Ok(stored.iter().map(WorkflowSnapshot::summary).collect())
    }

    async fn load_workflow(&self, id: &str) -> Result<WorkflowSnapshot, ControllerError> {
        let mut snap = self.store.load(id).map_err(|_| not_found(id))?;
        // a run that was interrupted by a crash is not running anymore
        if snap.status == WorkflowPhase::Running {
            snap.status = WorkflowPhase::Idle;
        }
        self.set_active(Some(snap.clone()));
        Ok(snap)
    }

    async fn deactivate_workflow(&self) -> Result<(), ControllerError> {
        self.set_active(None);
        Ok(())
    }

    async fn archive_workflows(&self) -> Result<usize, ControllerError> {
        let active_id = self.active().map(|s| s.id);
        let stored = self
            .store
            .list()
            .map_err(|e| ControllerError::FileSystem(format!("{e:#}")))?;
        let mut moved = 0;
        for snap in stored.iter().filter(|s| Some(&s.id) != active_id.as_ref()) {
            match self.store.archive(&snap.id) {
                Ok(()) => moved += 1,
                Err(e) => tracing::warn!("archive {}: {e:#}", snap.id),
            }
        }
        Ok(moved)
    }

    async fn purge_all_workflows(&self) -> Result<usize, ControllerError> {
        self.set_active(None);
        self.store
            .purge()
            .map_err(|e| ControllerError::FileSystem(format!("{e:#}")))
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), ControllerError> {
        self.store.delete(id).map_err(|_| not_found(id))?;
        if self.active().is_some_and(|s| s.id == id) {
            self.set_active(None);
        }
        Ok(())
    }
}
