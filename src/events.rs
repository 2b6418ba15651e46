//! Event bus shared by background producers (workflow runner, agents, watchers).
//!
//! Producers publish `BusEvent`s; the multiplexer is the only consumer on the
//! controller side. Publishing never blocks and never fails when nobody is
//! subscribed.
use std::time::Duration;

use tokio::sync::broadcast;

use crate::conversation::LogLevel;
use crate::workflow::WorkflowSnapshot;

// ── Event payloads ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

/// Sub-events of a single agent call.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEventKind {
    Started {
        phase: Option<String>,
        timeout: Option<Duration>,
    },
    ToolUse {
        tool: String,
    },
    Thinking,
    Chunk,
    Progress {
        /// Set when the progress event reports a retry.
        retry: Option<u32>,
    },
    Completed {
        tokens_in: u64,
        tokens_out: u64,
    },
    Error,
}

#[derive(Debug, Clone)]
pub struct AgentStreamEvent {
    pub agent: String,
    pub kind: AgentEventKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum BusEvent {
    Log(LogEvent),
    AgentStream(AgentStreamEvent),
    WorkflowStateUpdated(WorkflowSnapshot),
    TaskStarted {
        workflow_id: String,
        task_id: String,
        agent: String,
    },
    TaskCompleted {
        workflow_id: String,
        task_id: String,
        agent: String,
    },
    TaskFailed {
        workflow_id: String,
        task_id: String,
        error: String,
    },
    TaskSkipped {
        workflow_id: String,
        task_id: String,
        reason: String,
    },
    PhaseStarted {
        workflow_id: String,
        phase: String,
    },
}

// ── Bus ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: BusEvent) {
        // Err only means there are no subscribers right now.
        let _ = self.tx.send(event);
    }

    pub fn log(&self, level: LogLevel, source: &str, message: impl Into<String>) {
        self.publish(BusEvent::Log(LogEvent {
            level,
            source: source.to_string(),
            message: message.into(),
        }));
    }

    pub fn agent(&self, agent: &str, kind: AgentEventKind, message: impl Into<String>) {
        self.publish(BusEvent::AgentStream(AgentStreamEvent {
            agent: agent.to_string(),
            kind,
            message: message.into(),
        }));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
