// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{ParamKind, ParamSpec, Tool, ToolCall, ToolCategory, ToolContext, ToolError};
use crate::workspace::resolve_workspace_path;

/// Default number of lines returned when the caller does not specify a
/// limit. The agent paginates with offset + limit for more.
const DEFAULT_LINE_LIMIT: usize = 200;

/// Hard byte ceiling applied in addition to the line limit.
const MAX_BYTES: usize = 20_000;

// ── read_file ─────────────────────────────────────────────────────────────────

pub struct ReadFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text file from the workspace. Default: 200 lines / 20 KB, \
         whichever comes first. Lines are prefixed L{n}: (1-indexed); when \
         more lines exist a pagination notice shows the next offset. \
         Prefer reading only the region you need via offset + limit."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::required("path", ParamKind::String, "Path relative to the workspace root"),
            ParamSpec::optional("offset", ParamKind::Integer, "1-indexed first line (default 1)"),
            ParamSpec::optional("limit", ParamKind::Integer, "Maximum lines (default 200)"),
        ];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let raw = call.args["path"].as_str().unwrap_or_default();
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;
        let path = resolve_workspace_path(raw, &self.root, true)?;

        debug!(path = %path.display(), offset, limit, "read_file tool");

        let text = tokio::fs::read_to_string(&path).await.map_err(ToolError::from)?;
        let total_lines = text.lines().count();

        let mut out = String::new();
        let mut bytes = 0usize;
        let mut shown = 0usize;
        for (i, line) in text.lines().enumerate().skip(offset.saturating_sub(1)) {
            if shown >= limit || bytes + line.len() > MAX_BYTES {
                break;
            }
            out.push_str(&format!("L{}:{}\n", i + 1, line));
            bytes += line.len();
            shown += 1;
        }
        let next_offset = offset + shown;
        if next_offset <= total_lines {
            out.push_str(&format!(
                "… {} more lines; continue with offset {}\n",
                total_lines + 1 - next_offset,
                next_offset
            ));
        }
        Ok(json!({ "path": path.display().to_string(), "content": out, "totalLines": total_lines }))
    }
}

// ── write_file ────────────────────────────────────────────────────────────────

pub struct WriteFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes content to a file in the workspace, creating parent \
         directories as needed. Overwrites the file if it exists."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::required("path", ParamKind::String, "Path relative to the workspace root"),
            ParamSpec::required("content", ParamKind::String, "Full file content to write"),
        ];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Write
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let raw = call.args["path"].as_str().unwrap_or_default();
        let content = call.args["content"].as_str().unwrap_or_default();
        let path = resolve_workspace_path(raw, &self.root, false)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ToolError::from)?;
        }
        tokio::fs::write(&path, content).await.map_err(ToolError::from)?;
        debug!(path = %path.display(), bytes = content.len(), "write_file tool");
        Ok(json!({ "path": path.display().to_string(), "bytesWritten": content.len() }))
    }
}

// ── list_dir ──────────────────────────────────────────────────────────────────

pub struct ListDirTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "Lists a directory in the workspace. Entries are name-sorted; \
         directories carry a trailing slash."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[ParamSpec::optional(
            "path",
            ParamKind::String,
            "Directory relative to the workspace root (default: the root)",
        )];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Read
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let raw = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let path = resolve_workspace_path(raw, &self.root, true)?;

        let mut entries = Vec::new();
        let mut rd = tokio::fs::read_dir(&path).await.map_err(ToolError::from)?;
        while let Some(entry) = rd.next_entry().await.map_err(ToolError::from)? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        Ok(json!({ "path": path.display().to_string(), "entries": entries }))
    }
}

// ── delete_file ───────────────────────────────────────────────────────────────

pub struct DeleteFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Deletes a single file in the workspace. Directories are refused; \
         remove their contents first."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[ParamSpec::required(
            "path",
            ParamKind::String,
            "File to delete, relative to the workspace root",
        )];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Write
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let raw = call.args["path"].as_str().unwrap_or_default();
        let path = resolve_workspace_path(raw, &self.root, false)?;
        let meta = tokio::fs::metadata(&path).await.map_err(ToolError::from)?;
        if meta.is_dir() {
            return Err(ToolError::Validation(format!(
                "{} is a directory; delete_file only removes files",
                path.display()
            )));
        }
        tokio::fs::remove_file(&path).await.map_err(ToolError::from)?;
        debug!(path = %path.display(), "delete_file tool");
        Ok(json!({ "path": path.display().to_string(), "deleted": true }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
