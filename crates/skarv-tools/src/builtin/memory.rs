// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Memory tools over a per-workspace JSONL notes file.
//!
//! One JSON object per line: `{"at": "<rfc3339>", "text": "..."}`.
//! Append-only; search is case-insensitive substring, newest-first.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{ParamKind, ParamSpec, Tool, ToolCall, ToolCategory, ToolContext, ToolError};

#[derive(Debug, Serialize, Deserialize)]
struct MemoryNote {
    at: String,
    text: String,
}

fn read_notes(path: &PathBuf) -> Result<Vec<MemoryNote>, ToolError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

// ── memory_search ─────────────────────────────────────────────────────────────

pub struct MemorySearchTool {
    pub path: PathBuf,
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Searches stored memory notes for a query string \
         (case-insensitive substring). Returns the newest matches first."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[
            ParamSpec::required("query", ParamKind::String, "Text to search for"),
            ParamSpec::optional("limit", ParamKind::Integer, "Maximum matches (default 10)"),
        ];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let query = call.args["query"].as_str().unwrap_or_default().to_lowercase();
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;

        let notes = read_notes(&self.path)?;
        let matches: Vec<Value> = notes
            .iter()
            .rev()
            .filter(|n| n.text.to_lowercase().contains(&query))
            .take(limit)
            .map(|n| json!({ "at": n.at, "text": n.text }))
            .collect();
        Ok(json!({ "query": call.args["query"], "matches": matches }))
    }
}

// ── memory_update ─────────────────────────────────────────────────────────────

pub struct MemoryUpdateTool {
    pub path: PathBuf,
}

#[async_trait]
impl Tool for MemoryUpdateTool {
    fn name(&self) -> &str {
        "memory_update"
    }

    fn description(&self) -> &str {
        "Appends a note to persistent memory. Keep notes short and \
         self-contained; they are retrieved verbatim by memory_search."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[ParamSpec::required(
            "text",
            ParamKind::String,
            "The note to remember",
        )];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Memory
    }

    // Memory is gateway-owned state, not a workspace effect; it stays
    // usable in read-only runs.
    fn mutates(&self) -> bool {
        false
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = call.args["text"].as_str().unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ToolError::Validation("note text is empty".to_string()));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(ToolError::from)?;
        }
        let note = MemoryNote {
            at: Utc::now().to_rfc3339(),
            text: text.to_string(),
        };
        let line = serde_json::to_string(&note)
            .map_err(|e| ToolError::Internal(e.to_string()))?;
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(ToolError::from)?;
        writeln!(f, "{line}").map_err(ToolError::from)?;
        Ok(json!({ "stored": true }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
