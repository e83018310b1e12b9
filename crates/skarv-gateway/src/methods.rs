// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use skarv_core::{ReplyContext, RunEvent, StepEvent};
use skarv_model::Tier;
use skarv_nodes::InvokeError;
use skarv_proto::{
    AgentChunk, AgentFinal, AgentStep, Frame, Method, StepPayload, TokenUsage, EVENT_AGENT,
    EVENT_AGENT_CHUNK, EVENT_AGENT_STEP,
};
use skarv_session::{resolve_session_key, SessionMessage, SessionRole};
use skarv_tools::DenyAllApprover;

use crate::state::{ConnectedClient, Gateway};

/// Dispatch one request frame. Exactly one `res` is sent per call —
/// either here or by the task a long-running method spawns.
pub async fn dispatch(
    gateway: &Arc<Gateway>,
    client: &Arc<ConnectedClient>,
    id: String,
    method: Method,
    params: Value,
) {
    debug!(conn = %client.conn_id, method = method.as_str(), "dispatching request");
    match method {
        Method::Connect => {
            client.send_frame(&Frame::res_err(
                &id,
                skarv_proto::ERR_VALIDATION,
                "already connected",
            ));
        }
        Method::Health => {
            client.send_frame(&Frame::res_ok(
                &id,
                json!({ "ok": true, "uptimeMs": gateway.uptime_ms() }),
            ));
        }
        Method::Status => {
            client.send_frame(&Frame::res_ok(
                &id,
                json!({
                    "server": { "name": "skarv", "version": env!("CARGO_PKG_VERSION") },
                    "uptimeMs": gateway.uptime_ms(),
                    "connections": gateway.connection_count(),
                    "nodes": gateway.nodes.list().len(),
                    "activeRuns": gateway.active_run_count(),
                }),
            ));
        }
        Method::ChatHistory => chat_history(gateway, client, id, params, false),
        Method::ChatExport => chat_history(gateway, client, id, params, true),
        Method::ChatReplace => chat_replace(gateway, client, id, params),
        Method::ChatClear => {
            let Some(key) = session_key_param(&params) else {
                return missing_key(client, id);
            };
            gateway.sessions.clear(&key);
            client.send_frame(&Frame::res_ok(&id, json!({ "sessionKey": key, "cleared": true })));
        }
        Method::Agent => agent(gateway, client, id, params),
        Method::AgentCancel => {
            let run_id = params.get("runId").and_then(|v| v.as_str()).unwrap_or("");
            if gateway.cancel_run(run_id) {
                client.send_frame(&Frame::res_ok(&id, json!({ "runId": run_id, "cancelled": true })));
            } else {
                client.send_frame(&Frame::res_err(
                    &id,
                    skarv_proto::ERR_NOT_FOUND,
                    format!("no active run {run_id}"),
                ));
            }
        }
        Method::NodeList => {
            client.send_frame(&Frame::res_ok(&id, json!({ "nodes": gateway.nodes.list() })));
        }
        Method::NodeInvoke => node_invoke(gateway, client, id, params),
        Method::SessionsList => {
            let limit = params.get("limit").and_then(|v| v.as_u64()).unwrap_or(50) as usize;
            let sessions = gateway.sessions.list(limit);
            client.send_frame(&Frame::res_ok(
                &id,
                json!({ "sessions": serde_json::to_value(sessions).unwrap_or_default() }),
            ));
        }
        Method::SessionsResolve => {
            let label = params.get("label").and_then(|v| v.as_str()).unwrap_or("");
            client.send_frame(&Frame::res_ok(
                &id,
                json!({ "sessionKey": resolve_session_key(label) }),
            ));
        }
        Method::SessionsPatch => sessions_patch(gateway, client, id, params),
        Method::Unknown(name) => {
            client.send_frame(&Frame::res_err(
                &id,
                skarv_proto::ERR_UNSUPPORTED,
                format!("unknown method: {name}"),
            ));
        }
    }
}

fn session_key_param(params: &Value) -> Option<String> {
    params
        .get("sessionKey")
        .and_then(|v| v.as_str())
        .map(resolve_session_key)
}

fn missing_key(client: &Arc<ConnectedClient>, id: String) {
    client.send_frame(&Frame::res_err(
        &id,
        skarv_proto::ERR_VALIDATION,
        "missing sessionKey",
    ));
}

// ── chat.* ────────────────────────────────────────────────────────────────────

fn chat_history(
    gateway: &Arc<Gateway>,
    client: &Arc<ConnectedClient>,
    id: String,
    params: Value,
    export_all: bool,
) {
    let Some(key) = session_key_param(&params) else {
        return missing_key(client, id);
    };
    let limit = if export_all {
        usize::MAX
    } else {
        params.get("limit").and_then(|v| v.as_u64()).unwrap_or(50) as usize
    };
    let messages = gateway.sessions.history(&key, limit);
    client.send_frame(&Frame::res_ok(
        &id,
        json!({
            "sessionKey": key,
            "messages": serde_json::to_value(messages).unwrap_or_default(),
        }),
    ));
}

#[derive(Debug, Deserialize)]
struct ReplaceMessage {
    role: SessionRole,
    content: String,
    #[serde(default)]
    at: Option<DateTime<Utc>>,
}

fn chat_replace(
    gateway: &Arc<Gateway>,
    client: &Arc<ConnectedClient>,
    id: String,
    params: Value,
) {
    let Some(key) = session_key_param(&params) else {
        return missing_key(client, id);
    };
    let raw = params.get("messages").cloned().unwrap_or(Value::Null);
    let incoming: Vec<ReplaceMessage> = match serde_json::from_value(raw) {
        Ok(m) => m,
        Err(e) => {
            client.send_frame(&Frame::res_err(
                &id,
                skarv_proto::ERR_VALIDATION,
                format!("bad messages: {e}"),
            ));
            return;
        }
    };
    let count = incoming.len();
    let messages: Vec<SessionMessage> = incoming
        .into_iter()
        .map(|m| SessionMessage {
            role: m.role,
            content: m.content,
            at: m.at.unwrap_or_else(Utc::now),
        })
        .collect();
    gateway.sessions.replace(&key, messages);
    client.send_frame(&Frame::res_ok(
        &id,
        json!({ "sessionKey": key, "replaced": count }),
    ));
}

fn sessions_patch(
    gateway: &Arc<Gateway>,
    client: &Arc<ConnectedClient>,
    id: String,
    params: Value,
) {
    let Some(key) = session_key_param(&params) else {
        return missing_key(client, id);
    };
    let mut cleared = false;
    let mut appended = false;
    if params.get("clear").and_then(|v| v.as_bool()).unwrap_or(false) {
        gateway.sessions.clear(&key);
        cleared = true;
    }
    if let Some(append) = params.get("append") {
        let role: SessionRole = serde_json::from_value(
            append.get("role").cloned().unwrap_or(json!("user")),
        )
        .unwrap_or(SessionRole::User);
        if let Some(content) = append.get("content").and_then(|v| v.as_str()) {
            gateway.sessions.append(&key, role, content);
            appended = true;
        }
    }
    client.send_frame(&Frame::res_ok(
        &id,
        json!({ "sessionKey": key, "cleared": cleared, "appended": appended }),
    ));
}

// ── agent ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentParams {
    message: String,
    #[serde(default)]
    session_key: Option<String>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    read_only: bool,
    #[serde(default)]
    tier: Option<String>,
}

fn agent(gateway: &Arc<Gateway>, client: &Arc<ConnectedClient>, id: String, params: Value) {
    let params: AgentParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => {
            client.send_frame(&Frame::res_err(
                &id,
                skarv_proto::ERR_VALIDATION,
                format!("bad agent params: {e}"),
            ));
            return;
        }
    };
    let tier = match params.tier.as_deref() {
        None => None,
        Some("reasoning") => Some(Tier::Reasoning),
        Some("action") => Some(Tier::Action),
        Some(other) => {
            client.send_frame(&Frame::res_err(
                &id,
                skarv_proto::ERR_VALIDATION,
                format!("unknown tier: {other}"),
            ));
            return;
        }
    };

    let session_key = resolve_session_key(params.session_key.as_deref().unwrap_or(""));
    let run_id = uuid::Uuid::new_v4().to_string();

    // Single-run-per-session: fail fast with the busy marker so the
    // client queues locally; `agent.idle` will tell it when to retry.
    let Some(cancel_rx) = gateway.claim_session(&session_key, &run_id, &client.conn_id) else {
        client.send_frame(&Frame::res_busy(&id));
        return;
    };

    client.send_frame(&Frame::res_ok(
        &id,
        json!({ "runId": run_id, "status": "accepted" }),
    ));

    // Bridge engine events to wire frames for the requesting client.
    let (events_tx, mut events_rx) = mpsc::channel::<RunEvent>(256);
    let bridge_client = Arc::clone(client);
    let bridge_run_id = run_id.clone();
    let bridge = tokio::spawn(async move {
        while let Some(ev) = events_rx.recv().await {
            match ev {
                RunEvent::Chunk { delta } => {
                    let payload = serde_json::to_value(AgentChunk {
                        run_id: bridge_run_id.clone(),
                        delta,
                    })
                    .unwrap_or_default();
                    bridge_client.send_event(EVENT_AGENT_CHUNK, payload);
                }
                RunEvent::Step { step } => {
                    let step = match step {
                        StepEvent::ToolCall { name, args } => StepPayload::ToolCall { name, args },
                        StepEvent::ToolResult { name, result, error } => {
                            StepPayload::ToolResult { name, result, error }
                        }
                    };
                    let payload = serde_json::to_value(AgentStep {
                        run_id: bridge_run_id.clone(),
                        step,
                    })
                    .unwrap_or_default();
                    bridge_client.send_event(EVENT_AGENT_STEP, payload);
                }
                RunEvent::Finished {
                    status,
                    reply,
                    error,
                    model_used,
                    usage,
                } => {
                    let payload = serde_json::to_value(AgentFinal {
                        run_id: bridge_run_id.clone(),
                        status: status.as_str().to_string(),
                        reply,
                        error,
                        model_used,
                        usage: usage.map(|u| TokenUsage {
                            input_tokens: u.input_tokens,
                            output_tokens: u.output_tokens,
                        }),
                    })
                    .unwrap_or_default();
                    bridge_client.send_event(EVENT_AGENT, payload);
                }
            }
        }
    });

    // The run itself, off the connection's read loop so a cancel RPC
    // can still be handled while it streams.
    let run_gateway = Arc::clone(gateway);
    tokio::spawn(async move {
        let ctx = ReplyContext {
            run_id: run_id.clone(),
            tier,
            read_only: params.read_only,
            stream: params.stream,
            approver: Arc::new(DenyAllApprover),
        };
        let _ = run_gateway
            .dispatcher
            .reply(&session_key, &params.message, ctx, events_tx, cancel_rx)
            .await;
        // Let the bridge flush the terminal `agent` frame before the
        // idle broadcast, so clients always see them in that order.
        let _ = bridge.await;
        run_gateway.release_session(&session_key, &run_id);
    });
}

// ── node.invoke ───────────────────────────────────────────────────────────────

fn node_invoke(gateway: &Arc<Gateway>, client: &Arc<ConnectedClient>, id: String, params: Value) {
    let node_id = params
        .get("nodeId")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let command = params
        .get("command")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if node_id.is_empty() || command.is_empty() {
        client.send_frame(&Frame::res_err(
            &id,
            skarv_proto::ERR_VALIDATION,
            "nodeId and command are required",
        ));
        return;
    }
    let invoke_params = params.get("params").cloned().unwrap_or(json!({}));

    let gateway = Arc::clone(gateway);
    let client = Arc::clone(client);
    tokio::spawn(async move {
        match gateway
            .nodes
            .invoke(&node_id, &command, invoke_params, None)
            .await
        {
            Ok(result) => {
                client.send_frame(&Frame::res_ok(&id, json!({ "result": result })));
            }
            Err(e) => {
                let code = match &e {
                    InvokeError::NotFound(_) => skarv_proto::ERR_NOT_FOUND,
                    InvokeError::Timeout(_) | InvokeError::Cancelled => skarv_proto::ERR_TIMEOUT,
                    InvokeError::NodeDisconnected => skarv_proto::ERR_NODE_DISCONNECTED,
                    InvokeError::Remote(_) | InvokeError::Send(_) => skarv_proto::ERR_IO,
                };
                client.send_frame(&Frame::res_err(&id, code, e.to_string()));
            }
        }
    });
}
