// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Persisted per-agent exec approvals.
//!
//! The store answers one question: may this agent run this command
//! string right now? The answer is always computed against the
//! *resolved* executable path, never the raw first token, so an
//! allowlist entry for `/usr/bin/ls` covers `ls` invoked through PATH
//! and an attacker-controlled `./ls` does not ride on it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    Deny,
    #[default]
    AskOnMiss,
    Allowlist,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AskMode {
    Off,
    #[default]
    OnMiss,
    Always,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApprovalsFile {
    #[serde(default)]
    pub defaults: ApprovalDefaults,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentApprovals>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ApprovalDefaults {
    #[serde(default)]
    pub security: SafetyMode,
    #[serde(default)]
    pub ask: AskMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentApprovals {
    #[serde(default)]
    pub allowlist: Vec<String>,
}

/// Outcome of an exec approval check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecDecision {
    Allow,
    Ask,
    Deny,
}

/// Default on-disk location: `<config dir>/skarv/approvals.json`.
pub fn default_approvals_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skarv/approvals.json")
}

/// Approval store backed by a JSON document. All mutations write through
/// to disk before returning.
#[derive(Debug)]
pub struct ApprovalStore {
    path: PathBuf,
    shell: PathBuf,
    inner: Mutex<ApprovalsFile>,
}

impl ApprovalStore {
    /// Load the file at `path`, creating it with `ask_on_miss` /
    /// `on_miss` defaults when absent.
    pub fn load_or_init(path: PathBuf, shell: PathBuf) -> anyhow::Result<Self> {
        let file = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            let file = ApprovalsFile::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(&path, serde_json::to_string_pretty(&file)?)
                .with_context(|| format!("writing {}", path.display()))?;
            debug!(path = %path.display(), "created approvals file with defaults");
            file
        };
        Ok(Self {
            path,
            shell,
            inner: Mutex::new(file),
        })
    }

    pub fn security_mode(&self) -> SafetyMode {
        self.inner.lock().unwrap().defaults.security
    }

    pub fn ask_mode(&self) -> AskMode {
        self.inner.lock().unwrap().defaults.ask
    }

    /// Decide whether `agent_id` may run `raw_command`.
    pub fn decide(&self, agent_id: &str, raw_command: &str) -> ExecDecision {
        let resolved = self.resolve_executable(raw_command);
        let resolved = resolved.to_string_lossy();
        let file = self.inner.lock().unwrap();
        let matched = file
            .agents
            .get(agent_id)
            .map(|a| a.allowlist.iter().any(|p| pattern_matches(p, &resolved)))
            .unwrap_or(false);

        match file.defaults.security {
            SafetyMode::Deny => ExecDecision::Deny,
            SafetyMode::Full => {
                if file.defaults.ask == AskMode::Always {
                    ExecDecision::Ask
                } else {
                    ExecDecision::Allow
                }
            }
            SafetyMode::Allowlist => {
                if matched {
                    ExecDecision::Allow
                } else {
                    ExecDecision::Deny
                }
            }
            SafetyMode::AskOnMiss => {
                if matched && file.defaults.ask != AskMode::Always {
                    ExecDecision::Allow
                } else {
                    ExecDecision::Ask
                }
            }
        }
    }

    /// True when the resolved path of `raw_command` is allowlisted.
    pub fn is_allowlisted(&self, agent_id: &str, raw_command: &str) -> bool {
        let resolved = self.resolve_executable(raw_command);
        let resolved = resolved.to_string_lossy();
        let file = self.inner.lock().unwrap();
        file.agents
            .get(agent_id)
            .map(|a| a.allowlist.iter().any(|p| pattern_matches(p, &resolved)))
            .unwrap_or(false)
    }

    /// Append the resolved path of `raw_command` to the agent's
    /// allowlist. Idempotent: adding the same entry twice leaves the
    /// list unchanged.
    pub fn add(&self, agent_id: &str, raw_command: &str) -> anyhow::Result<()> {
        let entry = self
            .resolve_executable(raw_command)
            .to_string_lossy()
            .to_string();
        // Mutate under the lock, write the snapshot after releasing it.
        let snapshot = {
            let mut file = self.inner.lock().unwrap();
            let agent = file.agents.entry(agent_id.to_string()).or_default();
            if agent.allowlist.contains(&entry) {
                return Ok(());
            }
            agent.allowlist.push(entry);
            file.clone()
        };
        self.persist(&snapshot)
    }

    /// Snapshot of the whole file for diagnostics / the CLI.
    pub fn snapshot(&self) -> ApprovalsFile {
        self.inner.lock().unwrap().clone()
    }

    fn persist(&self, file: &ApprovalsFile) -> anyhow::Result<()> {
        std::fs::write(&self.path, serde_json::to_string_pretty(file)?)
            .with_context(|| format!("writing {}", self.path.display()))
    }

    /// Resolve the executable a raw command string refers to.
    ///
    /// Absolute first token → used as given. Otherwise the first PATH
    /// entry holding an existing executable file wins; if no PATH entry
    /// matches, the configured shell is the answer (a bare builtin or
    /// pipeline ends up running under the shell anyway).
    pub fn resolve_executable(&self, raw_command: &str) -> PathBuf {
        let first = raw_command.split_whitespace().next().unwrap_or("");
        if first.is_empty() {
            return self.shell.clone();
        }
        let candidate = Path::new(first);
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        if let Some(path_var) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&path_var) {
                let full = dir.join(first);
                if is_executable(&full) {
                    return full;
                }
            }
        }
        self.shell.clone()
    }
}

/// Exact match, or a single trailing `*` matching any suffix.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(defaults: ApprovalDefaults) -> (ApprovalStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approvals.json");
        let file = ApprovalsFile {
            defaults,
            agents: BTreeMap::new(),
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();
        let store = ApprovalStore::load_or_init(path, PathBuf::from("/bin/sh")).unwrap();
        (store, dir)
    }

    fn defaults(security: SafetyMode, ask: AskMode) -> ApprovalDefaults {
        ApprovalDefaults { security, ask }
    }

    #[test]
    fn creates_file_with_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/approvals.json");
        let store =
            ApprovalStore::load_or_init(path.clone(), PathBuf::from("/bin/sh")).unwrap();
        assert!(path.exists());
        assert_eq!(store.security_mode(), SafetyMode::AskOnMiss);
        assert_eq!(store.ask_mode(), AskMode::OnMiss);
    }

    #[test]
    fn deny_mode_always_denies() {
        let (store, _d) = store_with(defaults(SafetyMode::Deny, AskMode::Off));
        assert_eq!(store.decide("a", "/bin/ls"), ExecDecision::Deny);
    }

    #[test]
    fn full_mode_allows_unless_ask_always() {
        let (store, _d) = store_with(defaults(SafetyMode::Full, AskMode::OnMiss));
        assert_eq!(store.decide("a", "/bin/ls"), ExecDecision::Allow);

        let (store, _d) = store_with(defaults(SafetyMode::Full, AskMode::Always));
        assert_eq!(store.decide("a", "/bin/ls"), ExecDecision::Ask);
    }

    #[test]
    fn allowlist_mode_allows_only_matches() {
        let (store, _d) = store_with(defaults(SafetyMode::Allowlist, AskMode::Off));
        store.add("a", "/bin/ls").unwrap();
        assert_eq!(store.decide("a", "/bin/ls -la"), ExecDecision::Allow);
        assert_eq!(store.decide("a", "/bin/rm"), ExecDecision::Deny);
    }

    #[test]
    fn ask_on_miss_asks_for_unknown_command() {
        let (store, _d) = store_with(defaults(SafetyMode::AskOnMiss, AskMode::OnMiss));
        assert_eq!(store.decide("a", "/usr/bin/make"), ExecDecision::Ask);
        store.add("a", "/usr/bin/make").unwrap();
        assert_eq!(store.decide("a", "/usr/bin/make -j8"), ExecDecision::Allow);
    }

    #[test]
    fn ask_always_overrides_allowlist_hit() {
        let (store, _d) = store_with(defaults(SafetyMode::AskOnMiss, AskMode::Always));
        store.add("a", "/bin/ls").unwrap();
        assert_eq!(store.decide("a", "/bin/ls"), ExecDecision::Ask);
    }

    #[test]
    fn add_is_idempotent() {
        let (store, _d) = store_with(defaults(SafetyMode::AskOnMiss, AskMode::OnMiss));
        store.add("a", "/bin/ls").unwrap();
        store.add("a", "/bin/ls").unwrap();
        let snap = store.snapshot();
        assert_eq!(snap.agents["a"].allowlist.len(), 1);
        assert!(store.is_allowlisted("a", "/bin/ls"));
    }

    #[test]
    fn add_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approvals.json");
        {
            let store =
                ApprovalStore::load_or_init(path.clone(), PathBuf::from("/bin/sh")).unwrap();
            store.add("agent", "/bin/true").unwrap();
        }
        let store = ApprovalStore::load_or_init(path, PathBuf::from("/bin/sh")).unwrap();
        assert!(store.is_allowlisted("agent", "/bin/true"));
    }

    #[test]
    fn wildcard_pattern_matches_prefix() {
        assert!(pattern_matches("/usr/bin/*", "/usr/bin/ls"));
        assert!(pattern_matches("/usr/bin/git", "/usr/bin/git"));
        assert!(!pattern_matches("/usr/bin/*", "/opt/ls"));
        assert!(!pattern_matches("/usr/bin/git", "/usr/bin/gitk"));
    }

    #[test]
    fn absolute_command_resolves_as_given() {
        let (store, _d) = store_with(defaults(SafetyMode::AskOnMiss, AskMode::OnMiss));
        assert_eq!(
            store.resolve_executable("/opt/tool --flag"),
            PathBuf::from("/opt/tool")
        );
    }

    #[test]
    fn bare_command_resolves_via_path_or_shell() {
        let (store, _d) = store_with(defaults(SafetyMode::AskOnMiss, AskMode::OnMiss));
        let resolved = store.resolve_executable("sh -c true");
        // Either a real PATH hit ending in /sh or the shell fallback.
        assert!(resolved.to_string_lossy().ends_with("sh"));
    }

    #[test]
    fn empty_command_resolves_to_shell() {
        let (store, _d) = store_with(defaults(SafetyMode::AskOnMiss, AskMode::OnMiss));
        assert_eq!(store.resolve_executable(""), PathBuf::from("/bin/sh"));
    }
}
