// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use skarv_session::SessionStore;

use crate::tool::{ParamKind, ParamSpec, Tool, ToolCall, ToolCategory, ToolContext, ToolError};

/// Lets the model read a session transcript — its own or another key's
/// (e.g. to summarize what happened on `telegram:…` when asked).
pub struct SessionHistoryTool {
    pub sessions: Arc<SessionStore>,
}

#[async_trait]
impl Tool for SessionHistoryTool {
    fn name(&self) -> &str {
        "session_history"
    }

    fn description(&self) -> &str {
        "Returns the last messages of a session transcript, oldest first."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::optional("key", ParamKind::String, "Session key (default: this run's session)"),
            ParamSpec::optional("limit", ParamKind::Integer, "Maximum messages (default 20)"),
        ];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Session
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, ToolError> {
        let key = call
            .args
            .get("key")
            .and_then(|v| v.as_str())
            .unwrap_or(ctx.agent_id.as_str());
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).unwrap_or(20) as usize;
        let messages: Vec<Value> = self
            .sessions
            .history(key, limit)
            .into_iter()
            .map(|m| json!({ "role": m.role, "content": m.content, "at": m.at.to_rfc3339() }))
            .collect();
        Ok(json!({ "key": key, "messages": messages }))
    }
}
