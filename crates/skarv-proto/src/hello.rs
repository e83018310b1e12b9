// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role a connection declares in its `connect` request. Exactly one per
/// connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Operator,
    Node,
}

/// Parameters of the `connect` RPC.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Lowest protocol version the client can speak.
    #[serde(default = "default_protocol")]
    pub min_protocol: u32,
    /// Highest protocol version the client can speak.
    #[serde(default = "default_protocol")]
    pub max_protocol: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Node-only: capability strings the node advertises.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caps: Vec<String>,
    /// Node-only: invoke commands the node accepts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    /// Node-only: named permission switches (e.g. "system.run": true).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permissions: BTreeMap<String, bool>,
}

fn default_protocol() -> u32 {
    crate::PROTOCOL_VERSION
}

// ── hello-ok ──────────────────────────────────────────────────────────────────

/// Payload of the successful `connect` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    #[serde(rename = "type")]
    pub kind: String,
    pub protocol: u32,
    pub server: ServerInfo,
    pub features: Features,
    pub snapshot: Snapshot,
    pub policy: PolicyInfo,
}

impl HelloOk {
    pub fn new(server: ServerInfo, snapshot: Snapshot, tick_interval_ms: u64) -> Self {
        Self {
            kind: "hello-ok".to_string(),
            protocol: crate::PROTOCOL_VERSION,
            server,
            features: Features::default(),
            snapshot,
            policy: PolicyInfo { tick_interval_ms },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Feature flags advertised to clients. All on; the struct exists so a
/// future build can switch one off without a protocol bump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub agent: bool,
    pub chat: bool,
    pub sessions: bool,
    pub config: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            agent: true,
            chat: true,
            sessions: true,
            config: true,
        }
    }
}

/// Point-in-time view of the gateway handed to a freshly handshaken
/// client so it can render without waiting for the first broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub presence: Vec<PresenceEntry>,
    pub health: HealthInfo,
    pub state_version: StateVersion,
    pub uptime_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
    #[serde(default)]
    pub session_defaults: Value,
    pub auth_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthInfo {
    pub ok: bool,
}

/// Counters bumped on every presence / health change so clients can
/// cheaply detect that a snapshot is stale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateVersion {
    pub presence: u64,
    pub health: u64,
}

/// One handshaken connection as shown in presence broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub conn_id: String,
    pub role: Role,
    pub scopes: Vec<String>,
    pub connected_at_ms: u64,
    pub loopback: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInfo {
    pub tick_interval_ms: u64,
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_params_default_protocol_range() {
        let p: ConnectParams = serde_json::from_str(r#"{"role":"operator"}"#).unwrap();
        assert_eq!(p.min_protocol, crate::PROTOCOL_VERSION);
        assert_eq!(p.max_protocol, crate::PROTOCOL_VERSION);
        assert!(p.token.is_none());
    }

    #[test]
    fn node_connect_params_carry_claims() {
        let p: ConnectParams = serde_json::from_str(
            r#"{"role":"node","caps":["shell"],"commands":["system.run"],
                "permissions":{"system.run":true},"minProtocol":3,"maxProtocol":3}"#,
        )
        .unwrap();
        assert_eq!(p.role, Role::Node);
        assert_eq!(p.commands, vec!["system.run"]);
        assert_eq!(p.permissions.get("system.run"), Some(&true));
    }

    #[test]
    fn hello_ok_has_literal_type_tag() {
        let hello = HelloOk::new(
            ServerInfo {
                name: "skarv".into(),
                version: "0.0.0".into(),
            },
            Snapshot {
                presence: vec![],
                health: HealthInfo { ok: true },
                state_version: StateVersion::default(),
                uptime_ms: 12,
                config_path: None,
                state_dir: None,
                session_defaults: Value::Null,
                auth_mode: "none".into(),
            },
            5_000,
        );
        let v = serde_json::to_value(&hello).unwrap();
        assert_eq!(v["type"], "hello-ok");
        assert_eq!(v["protocol"], 3);
        assert_eq!(v["policy"]["tickIntervalMs"], 5000);
        assert_eq!(v["snapshot"]["uptimeMs"], 12);
    }

    #[test]
    fn presence_entry_uses_camel_case() {
        let e = PresenceEntry {
            conn_id: "c1".into(),
            role: Role::Node,
            scopes: vec!["admin".into()],
            connected_at_ms: 7,
            loopback: true,
            caps: vec!["shell".into()],
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["connId"], "c1");
        assert_eq!(v["connectedAtMs"], 7);
        assert_eq!(v["role"], "node");
    }
}
