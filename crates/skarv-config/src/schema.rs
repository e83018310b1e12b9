// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be on unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub model_routing: ModelRoutingConfig,
    #[serde(default)]
    pub safety_gate: SafetyGateConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

// ── Gateway ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// TCP port the WebSocket endpoint listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address. Loopback by default; set to a LAN address only
    /// together with a configured auth token.
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Period of the `tick` liveness event, advertised to clients in
    /// the hello-ok policy block.
    #[serde(default = "default_tick_interval_ms", rename = "tickIntervalMs")]
    pub tick_interval_ms: u64,
    /// Directory for gateway-owned state (approvals file, audit log,
    /// memory notes). Defaults to the user config dir.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    4180
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_tick_interval_ms() -> u64 {
    15_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            auth: AuthConfig::default(),
            tick_interval_ms: default_tick_interval_ms(),
            state_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Shared secret. When unset the gateway accepts unauthenticated
    /// connects (loopback deployments).
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Token,
    Password,
}

// ── Model routing ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRoutingConfig {
    /// Tier used for requests classified as needing deliberate reasoning.
    #[serde(default = "default_reasoning_tier")]
    pub tier_1_reasoning: TierConfig,
    /// Tier used for routine action requests.
    #[serde(default = "default_action_tier")]
    pub tier_2_action: TierConfig,
    #[serde(default)]
    pub complexity_classifier: ClassifierConfig,
    /// Classifier score at or above which the reasoning tier is chosen.
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: u8,
    /// Provider endpoint the tiers resolve against.
    #[serde(default)]
    pub provider: ProviderConfig,
}

fn default_complexity_threshold() -> u8 {
    4
}

fn default_reasoning_tier() -> TierConfig {
    TierConfig {
        model: "gpt-5.2".to_string(),
        max_tokens: 8192,
        temperature: 0.7,
        fallback: vec!["gpt-5-mini".to_string()],
    }
}

fn default_action_tier() -> TierConfig {
    TierConfig {
        model: "gpt-5-mini".to_string(),
        max_tokens: 4096,
        temperature: 0.3,
        fallback: vec![],
    }
}

impl Default for ModelRoutingConfig {
    fn default() -> Self {
        Self {
            tier_1_reasoning: default_reasoning_tier(),
            tier_2_action: default_action_tier(),
            complexity_classifier: ClassifierConfig::default(),
            complexity_threshold: default_complexity_threshold(),
            provider: ProviderConfig::default(),
        }
    }
}

/// One routing tier: a primary model plus the ordered fallback chain
/// tried on rate-limit / server errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub fallback: Vec<String>,
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Kill switch: with the classifier off every run uses the action
    /// tier unless the caller picked one explicitly.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_classifier_model")]
    pub model: String,
}

fn default_classifier_model() -> String {
    "gpt-5-nano".to_string()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_classifier_model(),
        }
    }
}

/// OpenAI-compatible endpoint the model clients talk to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key, read at client build
    /// time so secrets stay out of config files.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

// ── Safety gate ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyGateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Action categories that require confirmation before a tool may
    /// take effect, e.g. `file_write: true`, `system_command: true`.
    #[serde(default = "default_confirmation_required")]
    pub confirmation_required: BTreeMap<String, bool>,
}

fn default_confirmation_required() -> BTreeMap<String, bool> {
    let mut m = BTreeMap::new();
    m.insert("system_command".to_string(), true);
    m
}

impl Default for SafetyGateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confirmation_required: default_confirmation_required(),
        }
    }
}

// ── Tools ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Workspace root all path-bearing tool arguments are confined to.
    /// Defaults to the process working directory at startup.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Foreground exec timeout. Hard-capped at 600 s by the registry.
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,
    /// Default per-tool-call deadline.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Shell used when a bare command cannot be resolved on PATH.
    #[serde(default = "default_shell")]
    pub shell: PathBuf,
}

fn default_exec_timeout_secs() -> u64 {
    120
}
fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_shell() -> PathBuf {
    PathBuf::from("/bin/sh")
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            exec_timeout_secs: default_exec_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            shell: default_shell(),
        }
    }
}

// ── Heartbeat ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Period of the diagnostic status line logged by the daemon.
    /// Zero disables it.
    #[serde(default = "default_heartbeat_minutes")]
    pub interval_minutes: u64,
}

fn default_heartbeat_minutes() -> u64 {
    30
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_heartbeat_minutes(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_loopback() {
        let cfg = Config::default();
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
        assert!(cfg.gateway.auth.token.is_none());
    }

    #[test]
    fn tick_interval_uses_camel_case_key() {
        let cfg: Config =
            serde_yaml::from_str("gateway:\n  tickIntervalMs: 2500\n").unwrap();
        assert_eq!(cfg.gateway.tick_interval_ms, 2500);
    }

    #[test]
    fn tier_fallback_defaults_empty() {
        let cfg: Config = serde_yaml::from_str(
            "model_routing:\n  tier_2_action:\n    model: m-action\n",
        )
        .unwrap();
        assert_eq!(cfg.model_routing.tier_2_action.model, "m-action");
        assert!(cfg.model_routing.tier_2_action.fallback.is_empty());
    }

    #[test]
    fn safety_gate_enabled_by_default() {
        let cfg = Config::default();
        assert!(cfg.safety_gate.enabled);
        assert_eq!(
            cfg.safety_gate.confirmation_required.get("system_command"),
            Some(&true)
        );
    }

    #[test]
    fn classifier_can_be_disabled() {
        let cfg: Config = serde_yaml::from_str(
            "model_routing:\n  complexity_classifier:\n    enabled: false\n",
        )
        .unwrap();
        assert!(!cfg.model_routing.complexity_classifier.enabled);
    }

    #[test]
    fn exec_timeout_default_is_120s() {
        assert_eq!(ToolsConfig::default().exec_timeout_secs, 120);
    }
}
