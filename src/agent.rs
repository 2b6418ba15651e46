//! Agent collaborator: one LLM-backed worker invoked for a single turn.
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::cancel::RequestContext;
use crate::client::{Client, Message, StreamDelta};
use crate::error::{ControllerError, classify};
use crate::events::{AgentEventKind, EventBus};

/// Repeats of the same stream activity are published at most this often.
const ACTIVITY_INTERVAL: Duration = Duration::from_millis(250);

pub const SYSTEM_PROMPT_BASE: &str = r#"You are one member of a quorum of coding assistants working in the user's terminal.

Guidelines:
- Be direct and specific; prefer concrete steps over general advice
- When other agents' answers are included, point out where you disagree and why
- Keep answers short unless the user asks for detail"#;

#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    pub prompt: String,
    pub system_prompt: String,
    /// Prior turns, oldest first. The prompt is sent after them.
    pub messages: Vec<Message>,
    /// Overrides the agent's default model when set.
    pub model: Option<String>,
    /// Workflow phase this call belongs to (`analyze`, `plan`, `execute`), if any.
    pub phase: Option<String>,
    /// Where stream activity (thinking, writing, tool calls) is reported, if anywhere.
    pub events: Option<EventBus>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    pub output: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// Implementations must honor `ctx`: return promptly once its token is
/// cancelled or its deadline passes.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        ctx: &RequestContext,
        req: ExecuteRequest,
    ) -> Result<ExecuteResult, ControllerError>;
}

pub type SharedAgent = Arc<dyn Agent>;

// ── OpenAI-compatible agent ───────────────────────────────────────────────────

pub struct OpenAiAgent {
    name: String,
    client: Client,
}

impl OpenAiAgent {
    pub fn new(name: &str, client: Client) -> Self {
        Self {
            name: name.to_string(),
            client,
        }
    }

    pub fn model(&self) -> &str {
        &self.client.model
    }
}

#[async_trait]
impl Agent for OpenAiAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        req: ExecuteRequest,
    ) -> Result<ExecuteResult, ControllerError> {
        let mut messages = req.messages;
        messages.push(Message::new("user", req.prompt));

        let system = if req.system_prompt.is_empty() {
            SYSTEM_PROMPT_BASE
        } else {
            req.system_prompt.as_str()
        };

        tracing::debug!(agent = %self.name, phase = ?req.phase, turns = messages.len(), "agent call");

        let mut chunks = 0usize;
        let mut throttle = ActivityThrottle::new(ACTIVITY_INTERVAL);
        let events = req.events.as_ref();
        let call = async {
            self.client
                .chat(system, &messages, req.model.as_deref(), |delta| {
                    let kind = match delta {
                        StreamDelta::Text(_) => {
                            chunks += 1;
                            AgentEventKind::Chunk
                        }
                        StreamDelta::Thinking(_) => AgentEventKind::Thinking,
                        StreamDelta::ToolCall(tool) => AgentEventKind::ToolUse { tool: tool.to_string() },
                    };
                    if let Some(bus) = events
                        && throttle.admit(&kind, Instant::now())
                    {
                        bus.agent(&self.name, kind, "");
                    }
                })
                .await
                .map_err(|e| classify(&e, ctx.elapsed()))
        };
        let resp = ctx.guard(call).await?;

        tracing::debug!(
            agent = %self.name,
            chunks,
            tokens_in = resp.input_tokens,
            tokens_out = resp.output_tokens,
            "agent call finished"
        );

        Ok(ExecuteResult {
            output: resp.text,
            tokens_in: resp.input_tokens,
            tokens_out: resp.output_tokens,
        })
    }
}

/// Stream deltas arrive per token; the UI only needs to know what the agent
/// is doing. A kind change always passes, a repeat passes once per interval.
struct ActivityThrottle {
    interval: Duration,
    last: Option<(AgentEventKind, Instant)>,
}

impl ActivityThrottle {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    fn admit(&mut self, kind: &AgentEventKind, now: Instant) -> bool {
        let pass = match &self.last {
            Some((prev, at)) => prev != kind || now.duration_since(*at) >= self.interval,
            None => true,
        };
        if pass {
            self.last = Some((kind.clone(), now));
        }
        pass
    }
}

// ── Prompt context ────────────────────────────────────────────────────────────

/// Load project conventions from AGENTS.md, CLAUDE.md, or .quorum/conventions.md.
/// Returns None if no conventions file is found.
pub fn load_conventions() -> Option<String> {
    let candidates = ["AGENTS.md", "CLAUDE.md", ".quorum/conventions.md"];
    for path in &candidates {
        if let Ok(content) = std::fs::read_to_string(path) {
            let trimmed = content.trim().to_string();
            if !trimmed.is_empty() {
                return Some(format!("\n\n# Project conventions ({path})\n\n{trimmed}"));
            }
        }
    }
    None
}

/// Base prompt, plus an optional role line and project conventions.
pub fn system_prompt(role: Option<&str>) -> String {
    let mut prompt = SYSTEM_PROMPT_BASE.to_string();
    if let Some(role) = role.filter(|r| !r.trim().is_empty()) {
        prompt.push_str(&format!("\n\nYour role in the quorum: {}", role.trim()));
    }
    if let Some(conv) = load_conventions() {
        prompt.push_str(&conv);
    }
    prompt
}
