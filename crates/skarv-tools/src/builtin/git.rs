// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{ParamKind, ParamSpec, Tool, ToolCall, ToolCategory, ToolContext, ToolError};

async fn run_git(root: &PathBuf, args: &[&str]) -> Result<(i32, String, String), ToolError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await
        .map_err(|e| ToolError::Io(format!("git failed to start: {e}")))?;
    Ok((
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    ))
}

// ── git_status ────────────────────────────────────────────────────────────────

pub struct GitStatusTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Shows the workspace git status (porcelain format) and the \
         current branch. Read-only."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }

    fn mutates(&self) -> bool {
        false
    }

    async fn execute(&self, _call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let (code, stdout, stderr) =
            run_git(&self.root, &["status", "--porcelain", "--branch"]).await?;
        if code != 0 {
            return Err(ToolError::Io(format!("git status failed: {stderr}")));
        }
        debug!("git_status tool");
        Ok(json!({ "status": stdout }))
    }
}

// ── git_commit ────────────────────────────────────────────────────────────────

pub struct GitCommitTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for GitCommitTool {
    fn name(&self) -> &str {
        "git_commit"
    }

    fn description(&self) -> &str {
        "Stages the given paths and creates a commit with the given \
         message. Stage specific files — never the whole tree. Refuses \
         to commit when nothing is staged."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::required("message", ParamKind::String, "Commit message"),
            ParamSpec::required("paths", ParamKind::Array, "Files to stage for this commit"),
        ];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }

    fn mutates(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let message = call.args["message"].as_str().unwrap_or_default();
        if message.trim().is_empty() {
            return Err(ToolError::Validation("commit message is empty".to_string()));
        }
        let paths: Vec<String> = call.args["paths"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if paths.is_empty() {
            return Err(ToolError::Validation(
                "paths must name at least one file".to_string(),
            ));
        }

        let mut add_args = vec!["add", "--"];
        add_args.extend(paths.iter().map(String::as_str));
        let (code, _, stderr) = run_git(&self.root, &add_args).await?;
        if code != 0 {
            return Err(ToolError::Io(format!("git add failed: {stderr}")));
        }

        let (code, stdout, stderr) = run_git(&self.root, &["commit", "-m", message]).await?;
        if code != 0 {
            return Err(ToolError::Io(format!("git commit failed: {stderr}{stdout}")));
        }
        debug!(files = paths.len(), "git_commit tool");
        Ok(json!({ "committed": true, "output": stdout }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
