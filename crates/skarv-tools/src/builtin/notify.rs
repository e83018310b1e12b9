// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::tool::{ParamKind, ParamSpec, Tool, ToolCall, ToolCategory, ToolContext, ToolError};

/// User-visible notification. Actual delivery (system notification,
/// chat message) is a collaborator's job; the gateway records the intent
/// and surfaces it on the log so headless deployments still see it.
pub struct NotifyTool;

#[async_trait]
impl Tool for NotifyTool {
    fn name(&self) -> &str {
        "notify"
    }

    fn description(&self) -> &str {
        "Sends a short notification to the operator. Use sparingly for \
         events that need attention now; routine progress belongs in the \
         reply text."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::required("title", ParamKind::String, "Short notification title"),
            ParamSpec::optional("body", ParamKind::String, "Optional detail line"),
        ];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Notify
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, ToolError> {
        let title = call.args["title"].as_str().unwrap_or_default();
        let body = call.args.get("body").and_then(|v| v.as_str()).unwrap_or("");
        if title.trim().is_empty() {
            return Err(ToolError::Validation("notification title is empty".to_string()));
        }
        info!(agent = %ctx.agent_id, title = %title, body = %body, "notification");
        Ok(json!({ "delivered": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolContext;

    #[tokio::test]
    async fn empty_title_is_rejected() {
        let err = NotifyTool
            .execute(
                &ToolCall {
                    id: "c".into(),
                    name: "notify".into(),
                    args: json!({"title": ""}),
                },
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn notify_reports_delivery() {
        let out = NotifyTool
            .execute(
                &ToolCall {
                    id: "c".into(),
                    name: "notify".into(),
                    args: json!({"title": "build done", "body": "all green"}),
                },
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap();
        assert_eq!(out["delivered"], true);
    }
}
