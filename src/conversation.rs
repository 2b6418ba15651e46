//! Conversation and log buffers: the bounded, append-only parts of session state.
//!
//! Both buffers are FIFO with a fixed capacity: appending past capacity
//! evicts the oldest entry. Readers get owned copies so nothing outside the
//! control thread can hold a reference into live state.
use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

// ── Message ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

/// Optional per-message accounting, attached to agent replies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub model: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by `ConversationHistory::append`; 0 until then.
    pub id: u64,
    pub role: Role,
    pub author: String,
    pub body: String,
    pub timestamp: DateTime<Local>,
    pub meta: Option<MessageMeta>,
}

impl Message {
    fn new(role: Role, author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: 0,
            role,
            author: author.into(),
            body: body.into(),
            timestamp: Local::now(),
            meta: None,
        }
    }

    pub fn user(body: impl Into<String>) -> Self {
        Self::new(Role::User, "you", body)
    }

    pub fn agent(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Role::Agent, author, body)
    }

    pub fn system(body: impl Into<String>) -> Self {
        Self::new(Role::System, "system", body)
    }

    pub fn with_meta(mut self, meta: MessageMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

// ── ConversationHistory ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: VecDeque<Message>,
    capacity: usize,
    next_id: u64,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_id: 1,
        }
    }

    /// Append a message, evicting the oldest one when full. Returns the assigned id.
    pub fn append(&mut self, mut msg: Message) -> u64 {
        msg.id = self.next_id;
        self.next_id += 1;
        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        let id = msg.id;
        self.messages.push_back(msg);
        id
    }

    /// Owned snapshot of every message, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    /// Owned copies of the last `n` messages, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn last_agent_message(&self) -> Option<Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Agent).cloned()
    }

    /// Borrowing iterator for the render path (same thread, no copies).
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Plain-text transcript for `/copyall`.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("[{}] {}: {}", m.timestamp.format("%H:%M:%S"), m.author, m.body))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ── Log buffer ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Debug => "DBG",
            LogLevel::Info => "INF",
            LogLevel::Warn => "WRN",
            LogLevel::Error => "ERR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

/// Ring of log entries shown in the Logs panel. Every push is mirrored to `tracing`.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, level: LogLevel, source: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(source, "{message}"),
            LogLevel::Info => tracing::info!(source, "{message}"),
            LogLevel::Warn => tracing::warn!(source, "{message}"),
            LogLevel::Error => tracing::error!(source, "{message}"),
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            level,
            source: source.to_string(),
            message,
            timestamp: Local::now(),
        });
    }

    pub fn info(&mut self, source: &str, message: impl Into<String>) {
        self.push(LogLevel::Info, source, message);
    }

    pub fn warn(&mut self, source: &str, message: impl Into<String>) {
        self.push(LogLevel::Warn, source, message);
    }

    pub fn error(&mut self, source: &str, message: impl Into<String>) {
        self.push(LogLevel::Error, source, message);
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_at(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn as_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "{} {} [{}] {}",
                    e.timestamp.format("%H:%M:%S"),
                    e.level.label(),
                    e.source,
                    e.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
