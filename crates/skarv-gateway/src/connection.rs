// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use skarv_nodes::NodeClaims;
use skarv_proto::{ConnectParams, Frame, HelloOk, Method, Role, ServerInfo, PROTOCOL_VERSION};

use crate::auth::{self, AuthOutcome};
use crate::methods;
use crate::state::Gateway;

/// Messages to the socket writer task.
enum WriterMsg {
    Text(String),
    /// Send a close frame with the given code, then stop.
    Close(u16, &'static str),
}

/// Drive one WebSocket connection through its lifetime.
pub async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, remote: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: everything outbound funnels through one channel so
    // frames are never interleaved and per-connection seq order holds.
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterMsg>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = writer_rx.recv().await {
            match msg {
                WriterMsg::Text(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                WriterMsg::Close(code, reason) => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Frame channel handed to the gateway state / node registry: plain
    // serialized frames, forwarded into the writer.
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();
    let forward_tx = writer_tx.clone();
    tokio::spawn(async move {
        while let Some(text) = frame_rx.recv().await {
            if forward_tx.send(WriterMsg::Text(text)).is_err() {
                break;
            }
        }
    });

    let send_frame = |frame: Frame| {
        let _ = writer_tx.send(WriterMsg::Text(frame.encode()));
    };

    // ── AWAITING_HELLO ───────────────────────────────────────────────────────
    // The first frame must be a valid `connect` req; anything else
    // terminates the connection with a policy-violation close.
    let client = loop {
        let Some(incoming) = ws_rx.next().await else {
            // Peer went away before saying anything.
            writer.abort();
            return;
        };
        let text = match incoming {
            Ok(Message::Text(t)) => t,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => {
                writer.abort();
                return;
            }
            Ok(_) => {
                let _ = writer_tx.send(WriterMsg::Close(close_code::POLICY, "expected connect"));
                return;
            }
        };

        let frame = match Frame::decode(&text) {
            Ok(f) => f,
            Err(e) => {
                debug!(%remote, "undecodable first frame: {e}");
                let _ = writer_tx.send(WriterMsg::Close(close_code::POLICY, "bad frame"));
                return;
            }
        };
        let Frame::Req { id, method, params } = frame else {
            let _ = writer_tx.send(WriterMsg::Close(close_code::POLICY, "expected connect"));
            return;
        };
        if method != Method::Connect {
            let _ = writer_tx.send(WriterMsg::Close(close_code::POLICY, "expected connect"));
            return;
        }

        let params: ConnectParams = match if params.is_null() {
            Ok(ConnectParams::default())
        } else {
            serde_json::from_value(params)
        } {
            Ok(p) => p,
            Err(e) => {
                send_frame(Frame::res_err(
                    &id,
                    skarv_proto::ERR_VALIDATION,
                    format!("bad connect params: {e}"),
                ));
                let _ = writer_tx.send(WriterMsg::Close(close_code::POLICY, "bad connect"));
                return;
            }
        };

        // Protocol negotiation: the server speaks exactly one version.
        if params.min_protocol > PROTOCOL_VERSION || params.max_protocol < PROTOCOL_VERSION {
            send_frame(Frame::res_err(
                &id,
                skarv_proto::ERR_VALIDATION,
                format!(
                    "no common protocol (server speaks {PROTOCOL_VERSION}, client offers {}..{})",
                    params.min_protocol, params.max_protocol
                ),
            ));
            let _ = writer_tx.send(WriterMsg::Close(close_code::POLICY, "protocol mismatch"));
            return;
        }

        if auth::check(&gateway.config.gateway.auth, params.token.as_deref())
            == AuthOutcome::Failed
        {
            warn!(%remote, "authentication failed");
            send_frame(Frame::res_err(
                &id,
                skarv_proto::ERR_AUTH_FAILED,
                "invalid token",
            ));
            let _ = writer_tx.send(WriterMsg::Close(close_code::POLICY, "auth failed"));
            return;
        }

        // Handshake accepted.
        let conn_id = gateway.next_conn_id();
        let claims = (params.role == Role::Node).then(|| NodeClaims {
            caps: params.caps.clone(),
            commands: params.commands.clone(),
            permissions: params.permissions.clone(),
        });
        let client = gateway.add_connection(
            conn_id,
            params.role,
            params.scopes.clone(),
            claims,
            remote.ip().is_loopback(),
            frame_tx.clone(),
        );

        let hello = HelloOk::new(
            ServerInfo {
                name: "skarv".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            gateway.snapshot(),
            gateway.config.gateway.tick_interval_ms,
        );
        send_frame(Frame::res_ok(
            &id,
            serde_json::to_value(hello).unwrap_or_default(),
        ));
        break client;
    };

    // ── HANDSHAKEN ───────────────────────────────────────────────────────────
    // Inbound frames are processed in order on this logical thread;
    // long-running methods spawn so a cancel RPC can overtake its run.
    while let Some(incoming) = ws_rx.next().await {
        let text = match incoming {
            Ok(Message::Text(t)) => t,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue, // binary frames ignored
        };
        let frame = match Frame::decode(&text) {
            Ok(f) => f,
            Err(e) => {
                debug!(conn = %client.conn_id, "undecodable frame: {e}");
                continue;
            }
        };
        match frame {
            Frame::Req { id, method, params } => {
                methods::dispatch(&gateway, &client, id, method, params).await;
            }
            Frame::InvokeRes {
                id,
                ok,
                result,
                error,
            } => {
                if client.role == Role::Node {
                    gateway.nodes.on_response(&client.conn_id, &id, ok, result, error);
                } else {
                    debug!(conn = %client.conn_id, "invoke_res from non-node ignored");
                }
            }
            other => {
                debug!(conn = %client.conn_id, "unexpected frame ignored: {other:?}");
            }
        }
    }

    gateway.remove_connection(&client.conn_id);
    writer.abort();
    debug!(conn = %client.conn_id, "socket handler finished");
}
