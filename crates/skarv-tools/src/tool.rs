// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// Failure modes a tool call can surface. The `kind` strings are wire-
/// and audit-stable; messages are free text.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("permission_denied: {0}")]
    PermissionDenied(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("io: {0}")]
    Io(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::PermissionDenied(_) => "permission_denied",
            ToolError::NotFound(_) => "not_found",
            ToolError::Validation(_) => "validation",
            ToolError::Io(_) => "io",
            ToolError::Timeout(_) => "timeout",
            ToolError::Unsupported(_) => "unsupported",
            ToolError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => ToolError::PermissionDenied(e.to_string()),
            _ => ToolError::Io(e.to_string()),
        }
    }
}

/// Coarse tool categories driving the gating table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Read,
    Write,
    Exec,
    Network,
    Memory,
    Git,
    Notify,
    Node,
    Session,
    Skill,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Read => "read",
            ToolCategory::Write => "write",
            ToolCategory::Exec => "exec",
            ToolCategory::Network => "network",
            ToolCategory::Memory => "memory",
            ToolCategory::Git => "git",
            ToolCategory::Notify => "notify",
            ToolCategory::Node => "node",
            ToolCategory::Session => "session",
            ToolCategory::Skill => "skill",
        }
    }
}

// ── Parameter schema ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }

    pub fn accepts(&self, v: &Value) -> bool {
        match self {
            ParamKind::String => v.is_string(),
            ParamKind::Integer => v.is_i64() || v.is_u64(),
            ParamKind::Boolean => v.is_boolean(),
            ParamKind::Object => v.is_object(),
            ParamKind::Array => v.is_array(),
        }
    }
}

/// One declared tool parameter. The registry validates arguments against
/// these before the handler ever sees them.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

// ── Run-scoped context ────────────────────────────────────────────────────────

/// What a handler may grant when a gate verdict is `Ask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Granted,
    /// Granted, and the resolved path should be allowlisted for next time.
    GrantedAlways,
    Denied,
}

/// Capability for soliciting operator confirmation. The gateway wires
/// this to the requesting operator's connection; tests script it.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn confirm(&self, action: &str, detail: &str) -> ConfirmOutcome;
}

/// Approver that denies everything — the default for runs with no
/// confirmation channel.
pub struct DenyAllApprover;

#[async_trait]
impl Approver for DenyAllApprover {
    async fn confirm(&self, _action: &str, _detail: &str) -> ConfirmOutcome {
        ConfirmOutcome::Denied
    }
}

/// Capability for routing `node_invoke` tool calls to the node registry
/// without the tool layer depending on the gateway.
#[async_trait]
pub trait NodeInvoker: Send + Sync {
    async fn invoke(&self, node_id: &str, command: &str, params: Value)
        -> Result<Value, ToolError>;
    fn list(&self) -> Vec<Value>;
}

/// Per-run context passed into every dispatch. Handlers must not retain
/// any part of it after returning.
#[derive(Clone)]
pub struct ToolContext {
    pub run_id: String,
    /// Agent identity for approvals and the audit log; by convention the
    /// session key.
    pub agent_id: String,
    pub read_only: bool,
    /// Becomes `true` when the owning run is cancelled.
    pub cancel: watch::Receiver<bool>,
    pub approver: std::sync::Arc<dyn Approver>,
}

impl ToolContext {
    /// A context for tests and non-interactive callers: no cancellation,
    /// confirmation always denied.
    pub fn detached(run_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            run_id: run_id.into(),
            agent_id: agent_id.into(),
            read_only: false,
            cancel: rx,
            approver: std::sync::Arc::new(DenyAllApprover),
        }
    }

    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves when the run is cancelled; pends forever when the run
    /// has no cancellation channel (detached contexts, dropped sender).
    pub async fn cancelled_wait(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ── The trait ─────────────────────────────────────────────────────────────────

/// Trait every built-in tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn params(&self) -> &[ParamSpec];
    fn category(&self) -> ToolCategory;

    /// True when this tool changes state outside the process. Drives the
    /// read-only refusal and which gate category applies for `git`.
    fn mutates(&self) -> bool {
        matches!(
            self.category(),
            ToolCategory::Write | ToolCategory::Exec | ToolCategory::Notify
        )
    }

    /// Execute the tool. The registry has already validated `call.args`
    /// against [`Tool::params`].
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, ToolError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_wire_stable() {
        assert_eq!(ToolError::PermissionDenied("x".into()).kind(), "permission_denied");
        assert_eq!(ToolError::Timeout("x".into()).kind(), "timeout");
        assert_eq!(ToolError::Unsupported("x".into()).kind(), "unsupported");
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let e: ToolError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(e.kind(), "not_found");
    }

    #[test]
    fn param_kind_type_checks() {
        assert!(ParamKind::String.accepts(&serde_json::json!("s")));
        assert!(ParamKind::Integer.accepts(&serde_json::json!(3)));
        assert!(!ParamKind::Integer.accepts(&serde_json::json!("3")));
        assert!(ParamKind::Boolean.accepts(&serde_json::json!(true)));
        assert!(ParamKind::Object.accepts(&serde_json::json!({})));
        assert!(ParamKind::Array.accepts(&serde_json::json!([])));
    }

    #[test]
    fn detached_context_is_not_cancelled() {
        let ctx = ToolContext::detached("r1", "main");
        assert!(!ctx.cancelled());
    }

    #[tokio::test]
    async fn deny_all_approver_denies() {
        let a = DenyAllApprover;
        assert_eq!(a.confirm("exec", "ls").await, ConfirmOutcome::Denied);
    }
}
