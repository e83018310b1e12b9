// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use skarv_config::SafetyGateConfig;

/// Category a tool action falls into for gating purposes. The string
/// forms double as the `safety_gate.confirmation_required.<category>`
/// config keys and the audit-log action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCategory {
    FileRead,
    FileWrite,
    SystemCommand,
    GitOperations,
    Network,
    Memory,
    Notification,
    Node,
    Session,
    Skill,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::FileRead => "file_read",
            ActionCategory::FileWrite => "file_write",
            ActionCategory::SystemCommand => "system_command",
            ActionCategory::GitOperations => "git_operations",
            ActionCategory::Network => "network",
            ActionCategory::Memory => "memory",
            ActionCategory::Notification => "notification",
            ActionCategory::Node => "node",
            ActionCategory::Session => "session",
            ActionCategory::Skill => "skill",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Ask,
    Deny,
}

/// A decision plus the human-readable reason shown in confirmations and
/// the audit log.
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub decision: GateDecision,
    pub reason: String,
}

/// Decide whether an action in `category` may proceed.
///
/// Pure function of `(config, category)`: no I/O, no clock, same answer
/// for the same inputs. Soliciting the actual confirmation when the
/// verdict is `Ask` is the caller's job.
pub fn decide(cfg: &SafetyGateConfig, category: ActionCategory) -> GateVerdict {
    if !cfg.enabled {
        return GateVerdict {
            decision: GateDecision::Allow,
            reason: "safety gate disabled by config".to_string(),
        };
    }
    if cfg
        .confirmation_required
        .get(category.as_str())
        .copied()
        .unwrap_or(false)
    {
        return GateVerdict {
            decision: GateDecision::Ask,
            reason: format!("{} requires confirmation", category.as_str()),
        };
    }
    GateVerdict {
        decision: GateDecision::Allow,
        reason: format!("{} permitted by policy", category.as_str()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(enabled: bool, required: &[&str]) -> SafetyGateConfig {
        SafetyGateConfig {
            enabled,
            confirmation_required: required
                .iter()
                .map(|c| (c.to_string(), true))
                .collect(),
        }
    }

    #[test]
    fn disabled_gate_allows_everything() {
        let c = cfg(false, &["system_command", "file_write"]);
        for cat in [
            ActionCategory::SystemCommand,
            ActionCategory::FileWrite,
            ActionCategory::Node,
        ] {
            assert_eq!(decide(&c, cat).decision, GateDecision::Allow);
        }
    }

    #[test]
    fn configured_category_asks() {
        let c = cfg(true, &["file_write"]);
        let v = decide(&c, ActionCategory::FileWrite);
        assert_eq!(v.decision, GateDecision::Ask);
        assert!(v.reason.contains("file_write"));
    }

    #[test]
    fn unconfigured_category_allows() {
        let c = cfg(true, &["file_write"]);
        assert_eq!(
            decide(&c, ActionCategory::FileRead).decision,
            GateDecision::Allow
        );
    }

    #[test]
    fn decision_is_deterministic() {
        let c = cfg(true, &["notification"]);
        let a = decide(&c, ActionCategory::Notification);
        let b = decide(&c, ActionCategory::Notification);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.reason, b.reason);
    }

    #[test]
    fn category_strings_match_config_keys() {
        assert_eq!(ActionCategory::GitOperations.as_str(), "git_operations");
        assert_eq!(ActionCategory::SystemCommand.as_str(), "system_command");
    }
}
