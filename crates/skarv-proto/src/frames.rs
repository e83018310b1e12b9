// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::methods::Method;

/// One WebSocket frame, tagged by its `type` field.
///
/// `Res.payload` is normally present iff `ok` is true; the one sanctioned
/// exception is the busy fast-fail, where `ok:false` carries
/// `payload:{busy:true}` so clients can distinguish "queue locally" from
/// a hard error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Req {
        id: String,
        method: Method,
        #[serde(default)]
        params: Value,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    Event {
        event: String,
        payload: Value,
        seq: u64,
    },
    Invoke {
        id: String,
        command: String,
        #[serde(default)]
        params: Value,
    },
    InvokeRes {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
}

/// Structured error carried in `res.error` / `invoke_res.error`.
///
/// The field also accepts a bare string from peers; the gateway always
/// emits this object form so clients can switch on `code` without
/// parsing prose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl Frame {
    pub fn res_ok(id: impl Into<String>, payload: Value) -> Self {
        Frame::Res {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn res_err(id: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Frame::Res {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(
                serde_json::to_value(ErrorShape {
                    code: code.to_string(),
                    message: message.into(),
                })
                .unwrap_or(Value::Null),
            ),
        }
    }

    /// Busy fast-fail: `ok:false` with `payload:{busy:true}`.
    pub fn res_busy(id: impl Into<String>) -> Self {
        Frame::Res {
            id: id.into(),
            ok: false,
            payload: Some(serde_json::json!({ "busy": true })),
            error: None,
        }
    }

    pub fn event(event: &str, payload: Value, seq: u64) -> Self {
        Frame::Event {
            event: event.to_string(),
            payload,
            seq,
        }
    }

    /// Encode to the JSON text representation sent on the socket.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Decode a text frame. Errors bubble so the caller can decide
    /// whether a malformed frame is fatal for the connection.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_round_trip() {
        let f = Frame::Req {
            id: "r1".into(),
            method: Method::Health,
            params: serde_json::json!({}),
        };
        let back = Frame::decode(&f.encode()).unwrap();
        assert!(matches!(back, Frame::Req { method: Method::Health, .. }));
    }

    #[test]
    fn type_tag_is_snake_case() {
        let f = Frame::InvokeRes {
            id: "i1".into(),
            ok: true,
            result: Some(serde_json::json!({"x": 1})),
            error: None,
        };
        let v: Value = serde_json::from_str(&f.encode()).unwrap();
        assert_eq!(v["type"], "invoke_res");
    }

    #[test]
    fn res_ok_omits_error_field() {
        let f = Frame::res_ok("r1", serde_json::json!({"ok": true}));
        let v: Value = serde_json::from_str(&f.encode()).unwrap();
        assert_eq!(v["ok"], true);
        assert!(v.get("error").is_none());
    }

    #[test]
    fn res_err_carries_code_and_message() {
        let f = Frame::res_err("r1", crate::ERR_UNSUPPORTED, "unknown method");
        let v: Value = serde_json::from_str(&f.encode()).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "unsupported");
        assert!(v.get("payload").is_none());
    }

    #[test]
    fn res_busy_has_payload_despite_not_ok() {
        let f = Frame::res_busy("r2");
        let v: Value = serde_json::from_str(&f.encode()).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["payload"]["busy"], true);
    }

    #[test]
    fn event_round_trip_preserves_seq() {
        let f = Frame::event("tick", serde_json::json!({"t": 1}), 42);
        match Frame::decode(&f.encode()).unwrap() {
            Frame::Event { event, seq, .. } => {
                assert_eq!(event, "tick");
                assert_eq!(seq, 42);
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert!(Frame::decode(r#"{"type":"nonsense"}"#).is_err());
    }

    #[test]
    fn req_params_default_to_null() {
        let f = Frame::decode(r#"{"type":"req","id":"1","method":"health"}"#).unwrap();
        match f {
            Frame::Req { params, .. } => assert!(params.is_null()),
            other => panic!("wrong frame: {other:?}"),
        }
    }
}
