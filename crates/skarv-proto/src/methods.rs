// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Every RPC method the gateway dispatches.
///
/// A closed enum instead of string matching: adding a method without
/// handling it is a compile error in the dispatch `match`. Strings the
/// server has never heard of land in [`Method::Unknown`] so the
/// connection survives and the caller gets an `unsupported` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Connect,
    Health,
    Status,
    ChatHistory,
    ChatExport,
    ChatReplace,
    ChatClear,
    Agent,
    AgentCancel,
    NodeList,
    NodeInvoke,
    SessionsList,
    SessionsResolve,
    SessionsPatch,
    Unknown(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Connect => "connect",
            Method::Health => "health",
            Method::Status => "status",
            Method::ChatHistory => "chat.history",
            Method::ChatExport => "chat.export",
            Method::ChatReplace => "chat.replace",
            Method::ChatClear => "chat.clear",
            Method::Agent => "agent",
            Method::AgentCancel => "agent.cancel",
            Method::NodeList => "node.list",
            Method::NodeInvoke => "node.invoke",
            Method::SessionsList => "sessions.list",
            Method::SessionsResolve => "sessions.resolve",
            Method::SessionsPatch => "sessions.patch",
            Method::Unknown(s) => s,
        }
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "connect" => Method::Connect,
            "health" => Method::Health,
            "status" => Method::Status,
            "chat.history" => Method::ChatHistory,
            "chat.export" => Method::ChatExport,
            "chat.replace" => Method::ChatReplace,
            "chat.clear" => Method::ChatClear,
            "agent" => Method::Agent,
            "agent.cancel" => Method::AgentCancel,
            "node.list" => Method::NodeList,
            "node.invoke" => Method::NodeInvoke,
            "sessions.list" => Method::SessionsList,
            "sessions.resolve" => Method::SessionsResolve,
            "sessions.patch" => Method::SessionsPatch,
            other => Method::Unknown(other.to_string()),
        }
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct V;
        impl de::Visitor<'_> for V {
            type Value = Method;
            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a method name string")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<Method, E> {
                Ok(Method::from(v))
            }
        }
        deserializer.deserialize_str(V)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_methods_round_trip() {
        for name in [
            "connect",
            "health",
            "status",
            "chat.history",
            "chat.export",
            "chat.replace",
            "chat.clear",
            "agent",
            "agent.cancel",
            "node.list",
            "node.invoke",
            "sessions.list",
            "sessions.resolve",
            "sessions.patch",
        ] {
            let m = Method::from(name);
            assert!(!matches!(m, Method::Unknown(_)), "{name} parsed as Unknown");
            assert_eq!(m.as_str(), name);
        }
    }

    #[test]
    fn unknown_method_preserves_original_string() {
        let m = Method::from("frobnicate");
        assert_eq!(m, Method::Unknown("frobnicate".into()));
        assert_eq!(m.as_str(), "frobnicate");
    }

    #[test]
    fn serde_uses_wire_name() {
        let json = serde_json::to_string(&Method::ChatHistory).unwrap();
        assert_eq!(json, "\"chat.history\"");
        let back: Method = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Method::ChatHistory);
    }
}
