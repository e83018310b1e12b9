// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use skarv_config::{SafetyGateConfig, ToolsConfig};
use skarv_safety::{
    decide, ActionCategory, ApprovalStore, AuditLog, ExecDecision, GateDecision,
};

use crate::background::BackgroundExec;
use crate::tool::{ConfirmOutcome, ParamSpec, Tool, ToolCall, ToolCategory, ToolContext, ToolError};

/// Hard cap on the exec deadline regardless of what the call asks for.
const EXEC_TIMEOUT_CAP: Duration = Duration::from_secs(600);

/// Tool schema as published to the model.
#[derive(Debug, Clone)]
pub struct PublishedSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Central registry holding all available tools and the policy state
/// their dispatch is checked against.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    gate: SafetyGateConfig,
    approvals: Arc<ApprovalStore>,
    audit: Arc<AuditLog>,
    config: ToolsConfig,
    workspace_root: PathBuf,
    background: Arc<BackgroundExec>,
}

impl ToolRegistry {
    pub fn new(
        gate: SafetyGateConfig,
        approvals: Arc<ApprovalStore>,
        audit: Arc<AuditLog>,
        config: ToolsConfig,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            tools: HashMap::new(),
            gate,
            approvals,
            audit,
            config,
            workspace_root,
            background: Arc::new(BackgroundExec::new()),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.workspace_root
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.config
    }

    pub fn background(&self) -> &Arc<BackgroundExec> {
        &self.background
    }

    pub fn approvals(&self) -> &Arc<ApprovalStore> {
        &self.approvals
    }

    /// Schemas for all registered tools, name-sorted for stable prompts.
    pub fn schemas(&self) -> Vec<PublishedSchema> {
        let mut schemas: Vec<PublishedSchema> = self
            .tools
            .values()
            .map(|t| PublishedSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: params_to_json_schema(t.params()),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Dispatch one call: lookup, validate, gate, deadline, execute.
    ///
    /// `permission_denied` is decided before the handler runs, so a
    /// refused call has no side effect by construction.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .cloned()
            .ok_or_else(|| ToolError::Unsupported(format!("unknown tool: {}", call.name)))?;

        validate_args(&call.args, tool.params())?;

        let category = tool.category();
        let mutating = tool.mutates();

        // Read-only runs refuse effects internally, regardless of the gate.
        if ctx.read_only && mutating {
            return Err(ToolError::PermissionDenied(format!(
                "{} is unavailable in a read-only run",
                call.name
            )));
        }

        // Gate + approvals for side-effectful categories.
        if let Some(action) = gate_category(category, mutating) {
            self.check_gate(action, call, ctx).await?;
        }
        if category == ToolCategory::Exec && mutating {
            self.check_exec_approval(call, ctx).await?;
        }

        let deadline = self.deadline_for(&tool, call);

        // Run the handler in its own task so a panic is contained and
        // translated instead of unwinding through the run loop.
        let task_tool = Arc::clone(&tool);
        let task_call = call.clone();
        let task_ctx = ctx.clone();
        let mut handle =
            tokio::spawn(async move { task_tool.execute(&task_call, &task_ctx).await });

        let result = match tokio::time::timeout(deadline, &mut handle).await {
            Err(_) => {
                // Kill the handler; a timed-out call must not keep
                // producing effects in the background.
                handle.abort();
                Err(ToolError::Timeout(format!(
                    "{} exceeded its {}s deadline",
                    call.name,
                    deadline.as_secs()
                )))
            }
            Ok(Err(join_err)) => {
                warn!(tool = %call.name, "tool task panicked: {join_err}");
                Err(ToolError::Internal(truncate(
                    &format!("tool panicked: {join_err}"),
                    400,
                )))
            }
            Ok(Ok(r)) => r,
        };

        // Audit successful effects only; a denial must not look like one.
        if result.is_ok() && mutating {
            if let Some(action) = gate_category(category, mutating) {
                let details = truncate(&call.args.to_string(), 300);
                if let Err(e) =
                    self.audit
                        .record("INFO", &ctx.agent_id, action.as_str(), &details, "ok")
                {
                    warn!("audit write failed: {e}");
                }
            }
        }

        debug!(tool = %call.name, ok = result.is_ok(), "tool dispatched");
        result
    }

    async fn check_gate(
        &self,
        action: ActionCategory,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<(), ToolError> {
        let verdict = decide(&self.gate, action);
        match verdict.decision {
            GateDecision::Allow => Ok(()),
            GateDecision::Deny => Err(ToolError::PermissionDenied(verdict.reason)),
            GateDecision::Ask => {
                let detail = truncate(&call.args.to_string(), 200);
                match ctx.approver.confirm(action.as_str(), &detail).await {
                    ConfirmOutcome::Granted | ConfirmOutcome::GrantedAlways => Ok(()),
                    ConfirmOutcome::Denied => Err(ToolError::PermissionDenied(format!(
                        "operator declined: {}",
                        verdict.reason
                    ))),
                }
            }
        }
    }

    async fn check_exec_approval(&self, call: &ToolCall, ctx: &ToolContext) -> Result<(), ToolError> {
        let command = call
            .args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        match self.approvals.decide(&ctx.agent_id, command) {
            ExecDecision::Allow => Ok(()),
            ExecDecision::Deny => Err(ToolError::PermissionDenied(format!(
                "command refused by approval policy: {command}"
            ))),
            ExecDecision::Ask => match ctx.approver.confirm("system_command", command).await {
                ConfirmOutcome::Granted => Ok(()),
                ConfirmOutcome::GrantedAlways => {
                    self.approvals
                        .add(&ctx.agent_id, command)
                        .map_err(|e| ToolError::Internal(e.to_string()))?;
                    Ok(())
                }
                ConfirmOutcome::Denied => Err(ToolError::PermissionDenied(format!(
                    "operator declined command: {command}"
                ))),
            },
        }
    }

    fn deadline_for(&self, tool: &Arc<dyn Tool>, call: &ToolCall) -> Duration {
        if tool.category() == ToolCategory::Exec {
            let requested = call
                .args
                .get("timeout_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or(self.config.exec_timeout_secs);
            // Outer deadline leaves headroom over the handler's own
            // timeout so the handler reports the friendlier error.
            Duration::from_secs(requested.min(EXEC_TIMEOUT_CAP.as_secs())) + Duration::from_secs(5)
        } else {
            Duration::from_secs(self.config.tool_timeout_secs)
        }
    }
}

/// Which gate category applies to a tool, if any. Read-ish categories
/// pass ungated.
fn gate_category(category: ToolCategory, mutating: bool) -> Option<ActionCategory> {
    match category {
        ToolCategory::Write => Some(ActionCategory::FileWrite),
        ToolCategory::Exec if mutating => Some(ActionCategory::SystemCommand),
        ToolCategory::Git if mutating => Some(ActionCategory::GitOperations),
        ToolCategory::Notify => Some(ActionCategory::Notification),
        _ => None,
    }
}

/// Validate `args` against the declared parameter specs.
fn validate_args(args: &Value, specs: &[ParamSpec]) -> Result<(), ToolError> {
    let obj = match args {
        Value::Null => {
            if specs.iter().any(|s| s.required) {
                return Err(ToolError::Validation("missing arguments".to_string()));
            }
            return Ok(());
        }
        Value::Object(o) => o,
        other => {
            return Err(ToolError::Validation(format!(
                "arguments must be an object, got {other}"
            )))
        }
    };

    for spec in specs {
        match obj.get(spec.name) {
            None if spec.required => {
                return Err(ToolError::Validation(format!(
                    "missing required argument '{}'",
                    spec.name
                )))
            }
            Some(v) if !v.is_null() && !spec.kind.accepts(v) => {
                return Err(ToolError::Validation(format!(
                    "argument '{}' must be a {}",
                    spec.name,
                    spec.kind.json_type()
                )))
            }
            _ => {}
        }
    }
    for key in obj.keys() {
        if !specs.iter().any(|s| s.name == key) {
            return Err(ToolError::Validation(format!("unknown argument '{key}'")));
        }
    }
    Ok(())
}

fn params_to_json_schema(specs: &[ParamSpec]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for spec in specs {
        properties.insert(
            spec.name.to_string(),
            json!({
                "type": spec.kind.json_type(),
                "description": spec.description,
            }),
        );
        if spec.required {
            required.push(Value::String(spec.name.to_string()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::tool::Approver;

    struct EchoTool {
        name: &'static str,
        category: ToolCategory,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn params(&self) -> &[ParamSpec] {
            const P: &[ParamSpec] = &[
                ParamSpec::required("command", crate::ParamKind::String, "what to echo"),
                ParamSpec::optional("timeout_secs", crate::ParamKind::Integer, "deadline"),
            ];
            P
        }
        fn category(&self) -> ToolCategory {
            self.category
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "echo": call.args["command"] }))
        }
    }

    struct GrantingApprover {
        outcome: ConfirmOutcome,
        asked: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Approver for GrantingApprover {
        async fn confirm(&self, _action: &str, _detail: &str) -> ConfirmOutcome {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.outcome
        }
    }

    fn registry(gate: SafetyGateConfig) -> (ToolRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let approvals = Arc::new(
            ApprovalStore::load_or_init(
                dir.path().join("approvals.json"),
                PathBuf::from("/bin/sh"),
            )
            .unwrap(),
        );
        let audit = Arc::new(AuditLog::new(dir.path().join("audit.log")));
        let reg = ToolRegistry::new(
            gate,
            approvals,
            audit,
            ToolsConfig::default(),
            dir.path().to_path_buf(),
        );
        (reg, dir)
    }

    fn open_gate() -> SafetyGateConfig {
        SafetyGateConfig {
            enabled: false,
            confirmation_required: Default::default(),
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_unsupported_without_side_effects() {
        let (reg, _d) = registry(open_gate());
        let err = reg
            .dispatch(&call("nope", json!({})), &ToolContext::detached("r", "a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported");
    }

    #[tokio::test]
    async fn missing_required_argument_fails_validation_before_handler() {
        let (mut reg, _d) = registry(open_gate());
        let calls = Arc::new(AtomicUsize::new(0));
        reg.register(EchoTool {
            name: "echo",
            category: ToolCategory::Read,
            calls: Arc::clone(&calls),
        });
        let err = reg
            .dispatch(&call("echo", json!({})), &ToolContext::detached("r", "a"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wrong_argument_type_fails_validation() {
        let (mut reg, _d) = registry(open_gate());
        reg.register(EchoTool {
            name: "echo",
            category: ToolCategory::Read,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let err = reg
            .dispatch(
                &call("echo", json!({"command": 7})),
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn unknown_argument_is_rejected() {
        let (mut reg, _d) = registry(open_gate());
        reg.register(EchoTool {
            name: "echo",
            category: ToolCategory::Read,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let err = reg
            .dispatch(
                &call("echo", json!({"command": "x", "bogus": 1})),
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn read_only_refuses_mutating_tool_without_running_it() {
        let (mut reg, _d) = registry(open_gate());
        let calls = Arc::new(AtomicUsize::new(0));
        reg.register(EchoTool {
            name: "write_thing",
            category: ToolCategory::Write,
            calls: Arc::clone(&calls),
        });
        let mut ctx = ToolContext::detached("r", "a");
        ctx.read_only = true;
        let err = reg
            .dispatch(&call("write_thing", json!({"command": "x"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exec_ask_on_miss_denied_by_default_approver() {
        let (mut reg, _d) = registry(open_gate());
        let calls = Arc::new(AtomicUsize::new(0));
        reg.register(EchoTool {
            name: "exec",
            category: ToolCategory::Exec,
            calls: Arc::clone(&calls),
        });
        let err = reg
            .dispatch(
                &call("exec", json!({"command": "ls /tmp"})),
                &ToolContext::detached("r", "main"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exec_granted_runs_but_adds_no_allowlist_entry() {
        let (mut reg, _d) = registry(open_gate());
        let calls = Arc::new(AtomicUsize::new(0));
        reg.register(EchoTool {
            name: "exec",
            category: ToolCategory::Exec,
            calls: Arc::clone(&calls),
        });
        let asked = Arc::new(AtomicUsize::new(0));
        let mut ctx = ToolContext::detached("r", "main");
        ctx.approver = Arc::new(GrantingApprover {
            outcome: ConfirmOutcome::Granted,
            asked: Arc::clone(&asked),
        });

        // First call: ask → granted → runs.
        reg.dispatch(&call("exec", json!({"command": "ls /tmp"})), &ctx)
            .await
            .unwrap();
        // Second identical call: still asks (nothing was allowlisted).
        reg.dispatch(&call("exec", json!({"command": "ls /tmp"})), &ctx)
            .await
            .unwrap();
        assert_eq!(asked.load(Ordering::SeqCst), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!reg.approvals().is_allowlisted("main", "ls /tmp"));
    }

    #[tokio::test]
    async fn exec_granted_always_appends_resolved_path_once() {
        let (mut reg, _d) = registry(open_gate());
        reg.register(EchoTool {
            name: "exec",
            category: ToolCategory::Exec,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let asked = Arc::new(AtomicUsize::new(0));
        let mut ctx = ToolContext::detached("r", "main");
        ctx.approver = Arc::new(GrantingApprover {
            outcome: ConfirmOutcome::GrantedAlways,
            asked: Arc::clone(&asked),
        });

        reg.dispatch(&call("exec", json!({"command": "ls /tmp"})), &ctx)
            .await
            .unwrap();
        assert!(reg.approvals().is_allowlisted("main", "ls /tmp"));
        // Second call is allowlisted now — no further confirmation.
        reg.dispatch(&call("exec", json!({"command": "ls /tmp"})), &ctx)
            .await
            .unwrap();
        assert_eq!(asked.load(Ordering::SeqCst), 1);
        let snap = reg.approvals().snapshot();
        assert_eq!(snap.agents["main"].allowlist.len(), 1);
    }

    #[tokio::test]
    async fn successful_write_is_audited_denied_write_is_not() {
        let (mut reg, _d) = registry(open_gate());
        reg.register(EchoTool {
            name: "write_thing",
            category: ToolCategory::Write,
            calls: Arc::new(AtomicUsize::new(0)),
        });

        // Denied (read-only) — must leave no audit entry.
        let mut ro = ToolContext::detached("r", "a");
        ro.read_only = true;
        let _ = reg
            .dispatch(&call("write_thing", json!({"command": "x"})), &ro)
            .await;

        // Allowed — audited.
        reg.dispatch(
            &call("write_thing", json!({"command": "x"})),
            &ToolContext::detached("r", "a"),
        )
        .await
        .unwrap();

        let log = reg.audit.read_all().unwrap();
        assert_eq!(log.matches("action=file_write").count(), 1);
    }

    #[test]
    fn schema_generation_includes_required_list() {
        let (mut reg, _d) = registry(open_gate());
        reg.register(EchoTool {
            name: "echo",
            category: ToolCategory::Read,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let schemas = reg.schemas();
        assert_eq!(schemas.len(), 1);
        let params = &schemas[0].parameters;
        assert_eq!(params["type"], "object");
        assert_eq!(params["required"][0], "command");
        assert_eq!(params["additionalProperties"], false);
    }
}
