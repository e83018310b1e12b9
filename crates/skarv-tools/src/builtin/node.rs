// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{
    NodeInvoker, ParamKind, ParamSpec, Tool, ToolCall, ToolCategory, ToolContext, ToolError,
};

/// Routes a command to a connected node. The invoker capability hides
/// the node registry so the tool layer never sees sockets.
pub struct NodeInvokeTool {
    pub invoker: Arc<dyn NodeInvoker>,
}

#[async_trait]
impl Tool for NodeInvokeTool {
    fn name(&self) -> &str {
        "node_invoke"
    }

    fn description(&self) -> &str {
        "Invokes a command on a connected node (per-host worker) and \
         returns its result. Omit nodeId to see the connected nodes and \
         the commands each one accepts."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::optional("nodeId", ParamKind::String, "Target node connection id"),
            ParamSpec::optional("command", ParamKind::String, "Command to invoke, e.g. system.run"),
            ParamSpec::optional("params", ParamKind::Object, "Command parameters"),
        ];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Node
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, ToolError> {
        let node_id = call.args.get("nodeId").and_then(|v| v.as_str());
        let command = call.args.get("command").and_then(|v| v.as_str());

        let (Some(node_id), Some(command)) = (node_id, command) else {
            // Discovery mode: list nodes instead of invoking.
            return Ok(json!({ "nodes": self.invoker.list() }));
        };

        let params = call
            .args
            .get("params")
            .cloned()
            .unwrap_or_else(|| json!({}));
        debug!(node = %node_id, command = %command, run = %ctx.run_id, "node_invoke tool");

        tokio::select! {
            result = self.invoker.invoke(node_id, command, params) => result,
            _ = ctx.cancelled_wait() => Err(ToolError::Timeout(format!(
                "run cancelled while waiting on node {node_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolContext;

    struct StubInvoker;

    #[async_trait]
    impl NodeInvoker for StubInvoker {
        async fn invoke(
            &self,
            node_id: &str,
            command: &str,
            _params: Value,
        ) -> Result<Value, ToolError> {
            if node_id == "gone" {
                return Err(ToolError::NotFound("no such node".to_string()));
            }
            Ok(json!({ "ran": command }))
        }
        fn list(&self) -> Vec<Value> {
            vec![json!({ "connId": "n1", "commands": ["system.run"] })]
        }
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "c".into(),
            name: "node_invoke".into(),
            args,
        }
    }

    #[tokio::test]
    async fn without_target_lists_nodes() {
        let tool = NodeInvokeTool {
            invoker: Arc::new(StubInvoker),
        };
        let out = tool
            .execute(&call(json!({})), &ToolContext::detached("r", "a"))
            .await
            .unwrap();
        assert_eq!(out["nodes"][0]["connId"], "n1");
    }

    #[tokio::test]
    async fn invoke_forwards_command() {
        let tool = NodeInvokeTool {
            invoker: Arc::new(StubInvoker),
        };
        let out = tool
            .execute(
                &call(json!({"nodeId": "n1", "command": "system.run", "params": {"cmd": "ls"}})),
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap();
        assert_eq!(out["ran"], "system.run");
    }

    #[tokio::test]
    async fn unknown_node_surfaces_not_found() {
        let tool = NodeInvokeTool {
            invoker: Arc::new(StubInvoker),
        };
        let err = tool
            .execute(
                &call(json!({"nodeId": "gone", "command": "system.run"})),
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
