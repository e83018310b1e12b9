// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: call_id.into(),
                content: content.into(),
            },
        }
    }

    /// Plain text view; `None` for tool-call / tool-result messages.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    /// An assistant turn that requested a tool call.
    ToolCall {
        tool_call_id: String,
        function: FunctionCall,
    },
    /// The tool's answer, keyed back to the requesting call.
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON argument string exactly as the model produced it.
    pub arguments: String,
}

/// Tool description handed to the model with every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ─── Request / response ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Model id for this call. The router rewrites deprecated aliases
    /// before the request leaves the process.
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// One event in a streamed completion.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    TextDelta(String),
    /// Tool-call fragment. Providers interleave fragments for parallel
    /// calls by `index`; `id`/`name` arrive once, `arguments` accumulate.
    ToolCall {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    Usage(Usage),
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Failure modes of a model call. The router retries the fallback chain
/// only for [`ModelError::RateLimited`] and [`ModelError::Server`];
/// everything else fails the run immediately.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("rate limited (429)")]
    RateLimited,
    #[error("server error ({status})")]
    Server { status: u16 },
    #[error("http error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// True for errors the fallback policy is allowed to absorb.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::RateLimited | ModelError::Server { .. })
    }

    /// Map an HTTP status to the matching error kind.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 => ModelError::RateLimited,
            s if s >= 500 => ModelError::Server { status: s },
            s => ModelError::Http { status: s, message },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable() {
        assert!(ModelError::from_status(429, String::new()).is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(ModelError::from_status(503, String::new()).is_retryable());
        assert!(ModelError::from_status(500, String::new()).is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let e = ModelError::from_status(400, "bad request".into());
        assert!(!e.is_retryable());
        assert!(matches!(e, ModelError::Http { status: 400, .. }));
    }

    #[test]
    fn message_as_text_only_for_text_content() {
        assert_eq!(Message::user("hi").as_text(), Some("hi"));
        assert!(Message::tool_result("c1", "out").as_text().is_none());
    }

    #[test]
    fn usage_accumulates() {
        let mut u = Usage::default();
        u.add(Usage {
            input_tokens: 3,
            output_tokens: 4,
        });
        u.add(Usage {
            input_tokens: 1,
            output_tokens: 2,
        });
        assert_eq!(u.input_tokens, 4);
        assert_eq!(u.output_tokens, 6);
    }
}
