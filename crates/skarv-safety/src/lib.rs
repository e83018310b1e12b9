// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod approvals;
mod audit;
mod gate;

pub use approvals::{
    default_approvals_path, AgentApprovals, ApprovalStore, ApprovalsFile, AskMode, ExecDecision,
    SafetyMode,
};
pub use audit::AuditLog;
pub use gate::{decide, ActionCategory, GateDecision, GateVerdict};
