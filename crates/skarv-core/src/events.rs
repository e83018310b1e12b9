// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

use skarv_model::Usage;

/// Events emitted by the run engine while a run is in flight. The
/// gateway bridges these onto the wire (`agent.chunk`, `agent.step`,
/// terminal `agent`); other consumers (tests, the reply dispatcher) can
/// drain them directly.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A streamed text delta, in model-generation order.
    Chunk { delta: String },
    /// A tool call or its result.
    Step { step: StepEvent },
    /// Terminal event — always the last one for a run.
    Finished {
        status: RunStatus,
        reply: Option<String>,
        error: Option<String>,
        model_used: Option<String>,
        usage: Option<Usage>,
    },
}

#[derive(Debug, Clone)]
pub enum StepEvent {
    ToolCall { name: String, args: Value },
    ToolResult {
        name: String,
        result: Option<Value>,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}
