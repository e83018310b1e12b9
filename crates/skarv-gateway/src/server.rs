// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use tokio::task::JoinHandle;
use tracing::info;

use skarv_proto::{TickPayload, EVENT_TICK};

use crate::connection::handle_socket;
use crate::state::Gateway;

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, remote))
}

/// Bind the configured address and return the actual local address plus
/// the serving task. Port 0 binds an ephemeral port — used by tests.
pub async fn spawn(gateway: Arc<Gateway>) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let bind = format!(
        "{}:{}",
        gateway.config.gateway.bind, gateway.config.gateway.port
    );
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    let local = listener.local_addr()?;

    start_tick(Arc::clone(&gateway));
    start_heartbeat(Arc::clone(&gateway));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(gateway);

    info!(addr = %local, "gateway listening");
    let handle = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    Ok((local, handle))
}

/// Serve until the process is stopped.
pub async fn serve(gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let (_, handle) = spawn(gateway).await?;
    handle.await?;
    Ok(())
}

/// Liveness tick at the interval advertised in hello-ok.
fn start_tick(gateway: Arc<Gateway>) {
    tokio::spawn(async move {
        let period = Duration::from_millis(gateway.config.gateway.tick_interval_ms.max(100));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let payload = serde_json::to_value(TickPayload {
                now_ms: chrono::Utc::now().timestamp_millis() as u64,
            })
            .unwrap_or_default();
            gateway.broadcast_to_all(EVENT_TICK, payload);
        }
    });
}

/// Periodic diagnostic status line, distinct from the wire-level tick.
fn start_heartbeat(gateway: Arc<Gateway>) {
    let minutes = gateway.config.heartbeat.interval_minutes;
    if minutes == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(minutes * 60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays quiet.
        interval.tick().await;
        loop {
            interval.tick().await;
            info!(
                connections = gateway.connection_count(),
                nodes = gateway.nodes.list().len(),
                active_runs = gateway.active_run_count(),
                uptime_ms = gateway.uptime_ms(),
                "heartbeat"
            );
        }
    });
}
