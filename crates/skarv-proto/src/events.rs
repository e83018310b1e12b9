// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Event names as they appear in the `event` field.
pub const EVENT_PRESENCE: &str = "presence";
pub const EVENT_TICK: &str = "tick";
pub const EVENT_AGENT_CHUNK: &str = "agent.chunk";
pub const EVENT_AGENT_STEP: &str = "agent.step";
pub const EVENT_AGENT_IDLE: &str = "agent.idle";
pub const EVENT_AGENT: &str = "agent";

/// Payload of `tick` — wall-clock liveness signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPayload {
    /// Milliseconds since the Unix epoch at emit time.
    pub now_ms: u64,
}

/// Payload of `agent.chunk` — one streamed text delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentChunk {
    pub run_id: String,
    pub delta: String,
}

/// Payload of `agent.step` — one tool call or tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStep {
    pub run_id: String,
    pub step: StepPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
    ToolCall {
        name: String,
        args: Value,
    },
    ToolResult {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Payload of `agent.idle` — emitted when a session's run finishes so
/// clients holding a local queue know they may submit again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdle {
    pub session_key: String,
}

/// Payload of the terminal `agent` event for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentFinal {
    pub run_id: String,
    /// `completed`, `failed`, or `cancelled`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Token accounting as reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_tool_call_wire_shape() {
        let s = AgentStep {
            run_id: "run-1".into(),
            step: StepPayload::ToolCall {
                name: "read_file".into(),
                args: serde_json::json!({"path": "a.txt"}),
            },
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["runId"], "run-1");
        assert_eq!(v["step"]["type"], "tool_call");
        assert_eq!(v["step"]["name"], "read_file");
    }

    #[test]
    fn step_tool_result_error_shape() {
        let s = StepPayload::ToolResult {
            name: "exec".into(),
            result: None,
            error: Some("permission_denied: exec refused".into()),
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["type"], "tool_result");
        assert!(v.get("result").is_none());
        assert!(v["error"].as_str().unwrap().contains("permission_denied"));
    }

    #[test]
    fn agent_final_omits_empty_fields() {
        let f = AgentFinal {
            run_id: "r".into(),
            status: "cancelled".into(),
            reply: None,
            error: None,
            model_used: None,
            usage: None,
        };
        let v = serde_json::to_value(&f).unwrap();
        assert!(v.get("reply").is_none());
        assert!(v.get("usage").is_none());
        assert_eq!(v["status"], "cancelled");
    }
}
