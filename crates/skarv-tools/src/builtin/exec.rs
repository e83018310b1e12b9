// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::background::BackgroundExec;
use crate::tool::{ParamKind, ParamSpec, Tool, ToolCall, ToolCategory, ToolContext, ToolError};
use crate::workspace::resolve_workspace_path;

const OUTPUT_LIMIT: usize = 100_000;
const EXEC_TIMEOUT_CAP_SECS: u64 = 600;

/// Shell execution — foreground by default, background on request.
pub struct ExecTool {
    pub shell: PathBuf,
    pub root: PathBuf,
    pub default_timeout_secs: u64,
    pub background: Arc<BackgroundExec>,
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Executes a shell command in the workspace.\n\
         - Foreground (default): waits and returns stdout/stderr/exit code. \
           Output is limited to 100,000 characters.\n\
         - background:true returns a sessionId immediately; use the \
           'process' tool to poll, read logs, or kill it.\n\
         Default timeout is 120 seconds; set timeout_secs for slow builds \
         (hard cap 600). Chain dependent commands with '&&'; avoid \
         persistent watchers in the foreground."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::required("command", ParamKind::String, "The shell command to execute"),
            ParamSpec::optional("workdir", ParamKind::String, "Working directory (default: workspace root)"),
            ParamSpec::optional("timeout_secs", ParamKind::Integer, "Execution timeout in seconds"),
            ParamSpec::optional("background", ParamKind::Boolean, "Run detached and return a sessionId"),
        ];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Exec
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, ToolError> {
        let command = call.args["command"].as_str().unwrap_or_default().to_string();
        let timeout_secs = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.default_timeout_secs)
            .min(EXEC_TIMEOUT_CAP_SECS);
        let workdir = match call.args.get("workdir").and_then(|v| v.as_str()) {
            Some(wd) => resolve_workspace_path(wd, &self.root, false)?,
            None => self.root.clone(),
        };
        let background = call
            .args
            .get("background")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        debug!(cmd = %command, background, "exec tool");

        if background {
            let id = self.background.spawn(
                &self.shell,
                &command,
                Some(&workdir),
                Duration::from_secs(timeout_secs),
            )?;
            return Ok(json!({ "sessionId": id, "status": "running" }));
        }

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&command).current_dir(&workdir).kill_on_drop(true);

        let output = tokio::select! {
            out = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()) => {
                match out {
                    Err(_) => {
                        return Err(ToolError::Timeout(format!(
                            "command exceeded {timeout_secs}s: {command}"
                        )))
                    }
                    Ok(r) => r.map_err(|e| ToolError::Io(format!("spawn failed: {e}")))?,
                }
            }
            _ = ctx.cancelled_wait() => {
                return Err(ToolError::Timeout(format!("run cancelled during: {command}")))
            }
        };

        let stdout = truncate(&String::from_utf8_lossy(&output.stdout));
        let stderr = truncate(&String::from_utf8_lossy(&output.stderr));
        Ok(json!({
            "exitCode": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT {
        s.to_string()
    } else {
        let mut end = OUTPUT_LIMIT;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n… output truncated", &s[..end])
    }
}

// ── process ───────────────────────────────────────────────────────────────────

/// Management of background exec sessions. Operates only on children the
/// gateway itself spawned, so no approval gate applies.
pub struct ProcessTool {
    pub background: Arc<BackgroundExec>,
}

#[async_trait]
impl Tool for ProcessTool {
    fn name(&self) -> &str {
        "process"
    }

    fn description(&self) -> &str {
        "Manages background exec sessions.\n\
         action=list   → all sessions\n\
         action=poll   → status/exit code of one session\n\
         action=logs   → last lines of stdout/stderr\n\
         action=kill   → terminate the session\n\
         action=remove → kill (if running) and forget the session"
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::required("action", ParamKind::String, "list | poll | logs | kill | remove"),
            ParamSpec::optional("sessionId", ParamKind::String, "Target session (required except for list)"),
            ParamSpec::optional("lines", ParamKind::Integer, "For logs: max lines per stream (default 100)"),
        ];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Exec
    }

    fn mutates(&self) -> bool {
        false
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let action = call.args["action"].as_str().unwrap_or_default();
        let session = call.args.get("sessionId").and_then(|v| v.as_str());
        let lines = call.args.get("lines").and_then(|v| v.as_u64()).unwrap_or(100) as usize;

        let need_session = || {
            session.ok_or_else(|| {
                ToolError::Validation(format!("action '{action}' requires sessionId"))
            })
        };

        match action {
            "list" => Ok(json!({ "sessions": self.background.list() })),
            "poll" => self.background.poll(need_session()?),
            "logs" => self.background.logs(need_session()?, lines),
            "kill" => {
                let id = need_session()?;
                self.background.kill(id)?;
                Ok(json!({ "sessionId": id, "killed": true }))
            }
            "remove" => {
                let id = need_session()?;
                self.background.remove(id)?;
                Ok(json!({ "sessionId": id, "removed": true }))
            }
            other => Err(ToolError::Validation(format!(
                "unknown action '{other}' (expected list|poll|logs|kill|remove)"
            ))),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolContext;

    fn exec_tool(root: PathBuf) -> ExecTool {
        ExecTool {
            shell: PathBuf::from("/bin/sh"),
            root,
            default_timeout_secs: 10,
            background: Arc::new(BackgroundExec::new()),
        }
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "c".into(),
            name: "exec".into(),
            args,
        }
    }

    #[tokio::test]
    async fn foreground_returns_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = exec_tool(dir.path().to_path_buf())
            .execute(
                &call(json!({"command": "echo hello"})),
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap();
        assert_eq!(out["exitCode"], 0);
        assert!(out["stdout"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn foreground_timeout_is_timeout_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = exec_tool(dir.path().to_path_buf())
            .execute(
                &call(json!({"command": "sleep 5", "timeout_secs": 1})),
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn background_round_trip_kill_then_finished() {
        let dir = tempfile::tempdir().unwrap();
        let tool = exec_tool(dir.path().to_path_buf());
        let ctx = ToolContext::detached("r", "a");

        let out = tool
            .execute(&call(json!({"command": "sleep 30", "background": true})), &ctx)
            .await
            .unwrap();
        let id = out["sessionId"].as_str().unwrap().to_string();

        let process = ProcessTool {
            background: Arc::clone(&tool.background),
        };
        let listed = process
            .execute(
                &ToolCall {
                    id: "c2".into(),
                    name: "process".into(),
                    args: json!({"action": "list"}),
                },
                &ctx,
            )
            .await
            .unwrap();
        assert!(listed["sessions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s["sessionId"] == id.as_str()));

        process
            .execute(
                &ToolCall {
                    id: "c3".into(),
                    name: "process".into(),
                    args: json!({"action": "kill", "sessionId": id}),
                },
                &ctx,
            )
            .await
            .unwrap();

        // Poll until the supervisor records the kill.
        for _ in 0..100 {
            let polled = process
                .execute(
                    &ToolCall {
                        id: "c4".into(),
                        name: "process".into(),
                        args: json!({"action": "poll", "sessionId": id}),
                    },
                    &ctx,
                )
                .await
                .unwrap();
            if polled["status"] == "finished" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("killed session never reported finished");
    }

    #[tokio::test]
    async fn process_unknown_action_is_validation() {
        let process = ProcessTool {
            background: Arc::new(BackgroundExec::new()),
        };
        let err = process
            .execute(
                &ToolCall {
                    id: "c".into(),
                    name: "process".into(),
                    args: json!({"action": "dance"}),
                },
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn truncate_caps_output() {
        let big = "x".repeat(OUTPUT_LIMIT + 10);
        let t = truncate(&big);
        assert!(t.len() < big.len() + 30);
        assert!(t.ends_with("truncated"));
    }
}
