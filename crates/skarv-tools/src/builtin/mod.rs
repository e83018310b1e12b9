// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Built-in tool set.
//!
//! One or two tools per category; each file owns its category's builtins.

mod exec;
mod fs;
mod git;
mod http;
mod memory;
mod node;
mod notify;
mod session;

pub use exec::{ExecTool, ProcessTool};
pub use fs::{DeleteFileTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use git::{GitCommitTool, GitStatusTool};
pub use http::HttpFetchTool;
pub use memory::{MemorySearchTool, MemoryUpdateTool};
pub use node::NodeInvokeTool;
pub use notify::NotifyTool;
pub use session::SessionHistoryTool;

use std::path::PathBuf;
use std::sync::Arc;

use skarv_session::SessionStore;

use crate::{NodeInvoker, ToolRegistry};

/// External collaborators the builtins need beyond what the registry
/// itself owns.
pub struct BuiltinDeps {
    pub sessions: Arc<SessionStore>,
    pub node_invoker: Option<Arc<dyn NodeInvoker>>,
    /// JSONL notes file backing the memory tools.
    pub memory_path: PathBuf,
}

/// Register the standard tool set on `reg`.
pub fn install(reg: &mut ToolRegistry, deps: BuiltinDeps) {
    let root = reg.workspace_root().clone();
    let shell = reg.config().shell.clone();
    let exec_timeout = reg.config().exec_timeout_secs;
    let background = Arc::clone(reg.background());

    reg.register(ReadFileTool { root: root.clone() });
    reg.register(WriteFileTool { root: root.clone() });
    reg.register(ListDirTool { root: root.clone() });
    reg.register(DeleteFileTool { root: root.clone() });
    reg.register(ExecTool {
        shell: shell.clone(),
        root: root.clone(),
        default_timeout_secs: exec_timeout,
        background: Arc::clone(&background),
    });
    reg.register(ProcessTool { background });
    reg.register(HttpFetchTool::default());
    reg.register(MemorySearchTool {
        path: deps.memory_path.clone(),
    });
    reg.register(MemoryUpdateTool {
        path: deps.memory_path,
    });
    reg.register(GitStatusTool { root: root.clone() });
    reg.register(GitCommitTool { root });
    reg.register(NotifyTool);
    reg.register(SessionHistoryTool {
        sessions: deps.sessions,
    });
    if let Some(invoker) = deps.node_invoker {
        reg.register(NodeInvokeTool { invoker });
    }
}
