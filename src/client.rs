use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// One piece of a streamed completion, handed to the caller as it arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta<'a> {
    Text(&'a str),
    /// Reasoning tokens from models that stream them separately
    /// (DeepSeek-R1, Qwen3 with thinking enabled, etc.)
    Thinking(&'a str),
    /// The model started a tool call with this function name.
    ToolCall(&'a str),
}

// ── Model response after streaming completes ──────────────────────────────────

#[derive(Debug, Default)]
pub struct ModelResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

// ── SSE delta types for accumulation ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<UsageStats>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageStats {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    pub endpoint: String,
    pub model: String,
    api_key: Option<String>,
}

impl Client {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            model,
            api_key: None,
        }
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    /// Stream a chat completion. Calls `on_delta` for each chunk as it arrives.
    /// Returns the complete response once streaming finishes.
    ///
    /// `model` overrides the client's default model for this call only.
    pub async fn chat(
        &self,
        system: &str,
        messages: &[Message],
        model: Option<&str>,
        mut on_delta: impl FnMut(StreamDelta<'_>),
    ) -> Result<ModelResponse> {
        let body = serde_json::json!({
            "model": model.unwrap_or(&self.model),
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": build_messages(system, messages),
        });

        let url = completions_url(&self.endpoint);

        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);

        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("API error {}: {}", status, text));
        }

        let mut stream = resp.bytes_stream();
        let mut out = ModelResponse::default();
        let mut leftover = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            let raw = String::from_utf8_lossy(&bytes);

            // SSE may split across chunks; prepend any leftover from last iteration
            let combined = format!("{leftover}{raw}");
            leftover.clear();

            for line in combined.lines() {
                match parse_sse_line(line) {
                    SseLine::Skip => {}
                    SseLine::Partial => leftover = line.trim().to_string(),
                    SseLine::Chunk(chunk) => apply_chunk(chunk, &mut out, &mut on_delta),
                }
            }
        }

        Ok(out)
    }
}

fn completions_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

// ── SSE parsing ───────────────────────────────────────────────────────────────

enum SseLine {
    Skip,
    /// JSON cut off mid-chunk; keep it for the next read.
    Partial,
    Chunk(StreamChunk),
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    if line.is_empty() || line == "data: [DONE]" {
        return SseLine::Skip;
    }
    let Some(json_str) = line.strip_prefix("data: ") else {
        return SseLine::Skip;
    };
    match serde_json::from_str::<StreamChunk>(json_str) {
        Ok(chunk) => SseLine::Chunk(chunk),
        Err(_) => SseLine::Partial,
    }
}

fn apply_chunk(chunk: StreamChunk, out: &mut ModelResponse, on_delta: &mut impl FnMut(StreamDelta<'_>)) {
    if let Some(usage) = chunk.usage {
        out.input_tokens = usage.prompt_tokens.unwrap_or(0);
        out.output_tokens = usage.completion_tokens.unwrap_or(0);
    }
    for choice in chunk.choices.unwrap_or_default() {
        let Some(delta) = choice.delta else { continue };
        if let Some(rc) = delta.reasoning_content.filter(|s| !s.is_empty()) {
            on_delta(StreamDelta::Thinking(&rc));
        }
        if let Some(text) = delta.content.filter(|s| !s.is_empty()) {
            on_delta(StreamDelta::Text(&text));
            out.text.push_str(&text);
        }
        // the name only arrives on the first fragment of each call
        for tc in delta.tool_calls.unwrap_or_default() {
            if let Some(name) = tc.function.and_then(|f| f.name).filter(|n| !n.is_empty()) {
                on_delta(StreamDelta::ToolCall(&name));
            }
        }
    }
}

// ── Build the messages array for the API ──────────────────────────────────────

fn build_messages(system: &str, messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::new();

    if !system.is_empty() {
        out.push(serde_json::json!({
            "role": "system",
            "content": system
        }));
    }

    for msg in messages {
        out.push(serde_json::json!({
            "role": msg.role,
            "content": msg.content
        }));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url_handles_v1_suffix() {
        assert_eq!(
            completions_url("http://localhost:11434"),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_sse_chunks_accumulate_text_and_usage() {
        let lines = [
            r#"data: {"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"data: {"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":2}}"#,
            "data: [DONE]",
        ];
        let mut out = ModelResponse::default();
        let mut thinking = 0;
        let mut on_delta = |d: StreamDelta<'_>| {
            if matches!(d, StreamDelta::Thinking(_)) {
                thinking += 1;
            }
        };
        for line in lines {
            if let SseLine::Chunk(c) = parse_sse_line(line) {
                apply_chunk(c, &mut out, &mut on_delta);
            }
        }
        assert_eq!(out.text, "Hello");
        assert_eq!((out.input_tokens, out.output_tokens), (12, 2));
        assert_eq!(thinking, 1);
    }

    #[test]
    fn test_tool_call_name_is_reported_once() {
        let lines = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"read_file","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"a.rs\"}"}}]}}]}"#,
        ];
        let mut out = ModelResponse::default();
        let mut tools = Vec::new();
        let mut on_delta = |d: StreamDelta<'_>| {
            if let StreamDelta::ToolCall(name) = d {
                tools.push(name.to_string());
            }
        };
        for line in lines {
            if let SseLine::Chunk(c) = parse_sse_line(line) {
                apply_chunk(c, &mut out, &mut on_delta);
            }
        }
        assert_eq!(tools, vec!["read_file"]);
        assert!(out.text.is_empty());
    }

    #[test]
    fn test_truncated_json_is_partial() {
        assert!(matches!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"con"#),
            SseLine::Partial
        ));
        assert!(matches!(parse_sse_line(": keep-alive"), SseLine::Skip));
    }

    #[test]
    fn test_build_messages_prepends_system() {
        let msgs = build_messages("be brief", &[Message::new("user", "hi")]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["content"], "hi");
    }
}
