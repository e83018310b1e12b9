// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-compatible chat completion client.
//!
//! The gateway only needs one concrete client: most hosted providers and
//! every serious local server speak the `/chat/completions` SSE wire
//! format. Anything more exotic plugs in behind [`crate::ModelClient`].

use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    client::ResponseStream, CompletionRequest, Message, MessageContent, ModelClient, ModelError,
    ResponseEvent, Role, Usage,
};

use async_trait::async_trait;

pub struct OpenAiCompatClient {
    /// Full chat completions URL, e.g. `https://api.openai.com/v1/chat/completions`.
    chat_url: String,
    /// Pre-resolved API key; `None` for local servers.
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// `base_url` ends **before** `/chat/completions`,
    /// e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            chat_url: format!("{base}/chat/completions"),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Build a client from the configured provider block, resolving the
    /// API key from its environment variable.
    pub fn from_config(provider: &skarv_config::ProviderConfig) -> Self {
        let key = std::env::var(&provider.api_key_env).ok().filter(|k| !k.is_empty());
        Self::new(&provider.base_url, key)
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError> {
        let messages = build_wire_messages(&req.messages);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": req.stream,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %req.model,
            tool_count = tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );

        let mut http_req = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let resp = http_req
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status, text));
        }

        // SSE events can be split across TCP packets. Keep a line buffer
        // across chunks; emit events only for complete lines.
        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<Result<ResponseEvent, ModelError>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(ModelError::Network(e.to_string()))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(ResponseStream::new(event_stream))
    }
}

// ── SSE parsing ───────────────────────────────────────────────────────────────

/// Drain all complete `\n`-terminated SSE lines from `buf`. A trailing
/// incomplete line stays in `buf` for the next TCP chunk to extend.
fn drain_complete_sse_lines(buf: &mut String) -> Vec<Result<ResponseEvent, ModelError>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line.
/// Returns `None` for empty lines, comments, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<Result<ResponseEvent, ModelError>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    Some(Ok(parse_sse_chunk(&v)))
}

fn parse_sse_chunk(v: &Value) -> ResponseEvent {
    // Usage-only chunk (stream_options.include_usage = true).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return ResponseEvent::Usage(Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        });
    }

    let delta = &v["choices"][0]["delta"];

    // Tool-call delta. Each SSE chunk carries one fragment in practice;
    // the `index` routes accumulation for parallel calls.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return ResponseEvent::ToolCall {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
        };
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return ResponseEvent::TextDelta(text.to_string());
    }

    ResponseEvent::TextDelta(String::new())
}

// ── Message building ──────────────────────────────────────────────────────────

fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert messages into the OpenAI wire-format JSON array.
///
/// All tool calls from one assistant turn must appear inside a single
/// assistant message as a `tool_calls` array; consecutive internal
/// `ToolCall` entries are coalesced before sending.
fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_calls: Vec<Value> = Vec::new();

    let flush = |out: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            out.push(json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": std::mem::take(pending),
            }));
        }
    };

    for m in messages {
        match &m.content {
            MessageContent::ToolCall {
                tool_call_id,
                function,
            } => {
                pending_calls.push(json!({
                    "id": tool_call_id,
                    "type": "function",
                    "function": {
                        "name": function.name,
                        "arguments": function.arguments,
                    }
                }));
            }
            MessageContent::ToolResult {
                tool_call_id,
                content,
            } => {
                flush(&mut out, &mut pending_calls);
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }));
            }
            MessageContent::Text(text) => {
                flush(&mut out, &mut pending_calls);
                out.push(json!({
                    "role": role_str(m.role),
                    "content": text,
                }));
            }
        }
    }
    flush(&mut out, &mut pending_calls);
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
