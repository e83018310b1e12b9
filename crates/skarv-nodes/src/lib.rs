// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Node registry — the gateway's view of connected per-host workers.
//!
//! A node appears here exactly while its connection is live and
//! handshaken with `role=node`. Invokes are correlated by a fresh
//! invoke id; every pending invoke either resolves with the node's
//! response, fails on its deadline, or fails with `node_disconnected`
//! when the socket goes away. Nothing leaks: the pending map entry is
//! removed on every one of those paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use skarv_proto::Frame;

/// Default deadline for a node invoke.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Capabilities a node declared in its `connect` request.
#[derive(Debug, Clone, Default)]
pub struct NodeClaims {
    pub caps: Vec<String>,
    pub commands: Vec<String>,
    pub permissions: BTreeMap<String, bool>,
}

/// Failure modes of an invoke.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("no node with connection id {0}")]
    NotFound(String),
    #[error("invoke timed out after {0:?}")]
    Timeout(Duration),
    #[error("node disconnected while invoke was pending")]
    NodeDisconnected,
    #[error("invoke cancelled by requester")]
    Cancelled,
    #[error("node error: {0}")]
    Remote(String),
    #[error("node send failed: {0}")]
    Send(String),
}

struct NodeEntry {
    claims: NodeClaims,
    /// Serialized frames to the node's socket writer.
    sender: mpsc::UnboundedSender<String>,
}

struct PendingInvoke {
    node_conn_id: String,
    reply: oneshot::Sender<Result<Value, InvokeError>>,
}

/// Registry of live nodes plus the invoke correlation table.
pub struct NodeRegistry {
    nodes: Mutex<HashMap<String, NodeEntry>>,
    pending: Mutex<HashMap<String, PendingInvoke>>,
    invoke_timeout: Duration,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_INVOKE_TIMEOUT)
    }
}

impl NodeRegistry {
    pub fn new(invoke_timeout: Duration) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            invoke_timeout,
        }
    }

    /// Add a node after a successful handshake.
    pub fn register(
        &self,
        conn_id: impl Into<String>,
        claims: NodeClaims,
        sender: mpsc::UnboundedSender<String>,
    ) {
        let conn_id = conn_id.into();
        debug!(node = %conn_id, commands = claims.commands.len(), "node registered");
        self.nodes
            .lock()
            .unwrap()
            .insert(conn_id, NodeEntry { claims, sender });
    }

    /// Drop a node on socket close, failing everything it still owed us.
    pub fn unregister(&self, conn_id: &str) {
        if self.nodes.lock().unwrap().remove(conn_id).is_none() {
            return;
        }
        debug!(node = %conn_id, "node unregistered");

        let owed: Vec<PendingInvoke> = {
            let mut pending = self.pending.lock().unwrap();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.node_conn_id == conn_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        for p in owed {
            let _ = p.reply.send(Err(InvokeError::NodeDisconnected));
        }
    }

    pub fn is_registered(&self, conn_id: &str) -> bool {
        self.nodes.lock().unwrap().contains_key(conn_id)
    }

    /// Snapshot of active nodes with their declared claims.
    pub fn list(&self) -> Vec<Value> {
        let nodes = self.nodes.lock().unwrap();
        let mut out: Vec<Value> = nodes
            .iter()
            .map(|(id, n)| {
                json!({
                    "connId": id,
                    "caps": n.claims.caps,
                    "commands": n.claims.commands,
                    "permissions": n.claims.permissions,
                })
            })
            .collect();
        out.sort_by(|a, b| a["connId"].as_str().cmp(&b["connId"].as_str()));
        out
    }

    /// Send an `invoke` frame and suspend until the response, the
    /// deadline, disconnection, or cancellation — whichever is first.
    ///
    /// Concurrent invokes on one node are fine; correlation is by the
    /// fresh invoke id carried in the frame.
    pub async fn invoke(
        &self,
        conn_id: &str,
        command: &str,
        params: Value,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Value, InvokeError> {
        let invoke_id = uuid::Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();

        // Register the pending entry before sending so a fast response
        // cannot race past us.
        self.pending.lock().unwrap().insert(
            invoke_id.clone(),
            PendingInvoke {
                node_conn_id: conn_id.to_string(),
                reply: reply_tx,
            },
        );

        let frame = Frame::Invoke {
            id: invoke_id.clone(),
            command: command.to_string(),
            params,
        };
        let send_result = {
            let nodes = self.nodes.lock().unwrap();
            match nodes.get(conn_id) {
                None => Err(InvokeError::NotFound(conn_id.to_string())),
                Some(node) => node
                    .sender
                    .send(frame.encode())
                    .map_err(|e| InvokeError::Send(e.to_string())),
            }
        };
        if let Err(e) = send_result {
            self.pending.lock().unwrap().remove(&invoke_id);
            return Err(e);
        }

        let deadline = tokio::time::sleep(self.invoke_timeout);
        tokio::pin!(deadline);
        let cancelled = async {
            match cancel {
                Some(mut rx) => loop {
                    if *rx.borrow() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            res = reply_rx => match res {
                Ok(outcome) => outcome,
                // Sender dropped without a verdict — treat as disconnect.
                Err(_) => Err(InvokeError::NodeDisconnected),
            },
            _ = &mut deadline => {
                self.pending.lock().unwrap().remove(&invoke_id);
                warn!(node = %conn_id, command = %command, "node invoke timed out");
                Err(InvokeError::Timeout(self.invoke_timeout))
            }
            _ = cancelled => {
                self.pending.lock().unwrap().remove(&invoke_id);
                Err(InvokeError::Cancelled)
            }
        }
    }

    /// Resolve the pending invoke matching an `invoke_res` frame.
    /// Unmatched or misattributed responses are dropped silently.
    pub fn on_response(
        &self,
        conn_id: &str,
        invoke_id: &str,
        ok: bool,
        result: Option<Value>,
        error: Option<Value>,
    ) {
        let pending = {
            let mut map = self.pending.lock().unwrap();
            match map.get(invoke_id) {
                Some(p) if p.node_conn_id == conn_id => map.remove(invoke_id),
                // A response from the wrong node keeps the entry armed.
                _ => None,
            }
        };
        let Some(pending) = pending else {
            debug!(invoke = %invoke_id, node = %conn_id, "dropping unmatched invoke response");
            return;
        };
        let outcome = if ok {
            Ok(result.unwrap_or(Value::Null))
        } else {
            let message = error
                .map(|e| match e {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "unspecified node error".to_string());
            Err(InvokeError::Remote(message))
        };
        let _ = pending.reply.send(outcome);
    }

    /// Number of pending invokes owed by one node. Diagnostics/tests.
    pub fn pending_for(&self, conn_id: &str) -> usize {
        self.pending
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.node_conn_id == conn_id)
            .count()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(commands: &[&str]) -> NodeClaims {
        NodeClaims {
            caps: vec!["shell".into()],
            commands: commands.iter().map(|c| c.to_string()).collect(),
            permissions: BTreeMap::new(),
        }
    }

    /// Spawn a fake node that answers every invoke frame with `result`.
    fn auto_responder(
        registry: std::sync::Arc<NodeRegistry>,
        conn_id: &str,
        mut rx: mpsc::UnboundedReceiver<String>,
        result: Value,
    ) {
        let conn_id = conn_id.to_string();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Ok(Frame::Invoke { id, .. }) = Frame::decode(&text) {
                    registry.on_response(&conn_id, &id, true, Some(result.clone()), None);
                }
            }
        });
    }

    #[tokio::test]
    async fn invoke_round_trips_through_responder() {
        let registry = std::sync::Arc::new(NodeRegistry::default());
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("n1", claims(&["system.run"]), tx);
        auto_responder(registry.clone(), "n1", rx, json!({"stdout": "ok"}));

        let out = registry
            .invoke("n1", "system.run", json!({"cmd": "ls"}), None)
            .await
            .unwrap();
        assert_eq!(out["stdout"], "ok");
        assert_eq!(registry.pending_for("n1"), 0);
    }

    #[tokio::test]
    async fn invoke_unknown_node_is_not_found() {
        let registry = NodeRegistry::default();
        let err = registry
            .invoke("ghost", "system.run", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::NotFound(_)));
    }

    #[tokio::test]
    async fn deadline_lapse_removes_pending_entry() {
        let registry = NodeRegistry::new(Duration::from_millis(50));
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("n1", claims(&[]), tx);

        let err = registry
            .invoke("n1", "system.run", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Timeout(_)));
        assert_eq!(registry.pending_for("n1"), 0);
    }

    #[tokio::test]
    async fn disconnect_fails_all_pending_promptly() {
        let registry = std::sync::Arc::new(NodeRegistry::new(Duration::from_secs(30)));
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("n1", claims(&[]), tx);

        let r2 = registry.clone();
        let pending_invoke =
            tokio::spawn(async move { r2.invoke("n1", "system.run", json!({}), None).await });

        // Let the invoke register itself, then drop the node.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.pending_for("n1"), 1);
        registry.unregister("n1");

        let err = pending_invoke.await.unwrap().unwrap_err();
        assert!(matches!(err, InvokeError::NodeDisconnected));
        assert_eq!(registry.pending_for("n1"), 0);
        assert!(!registry.is_registered("n1"));
    }

    #[tokio::test]
    async fn cancellation_aborts_pending_invoke() {
        let registry = std::sync::Arc::new(NodeRegistry::new(Duration::from_secs(30)));
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("n1", claims(&[]), tx);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let r2 = registry.clone();
        let pending_invoke = tokio::spawn(async move {
            r2.invoke("n1", "system.run", json!({}), Some(cancel_rx)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_tx.send(true).unwrap();

        let err = pending_invoke.await.unwrap().unwrap_err();
        assert!(matches!(err, InvokeError::Cancelled));
        assert_eq!(registry.pending_for("n1"), 0);
    }

    #[tokio::test]
    async fn unmatched_response_is_dropped_silently() {
        let registry = NodeRegistry::default();
        // No pending entry — must not panic or create state.
        registry.on_response("n1", "no-such-invoke", true, Some(json!({})), None);
        assert_eq!(registry.pending_for("n1"), 0);
    }

    #[tokio::test]
    async fn response_from_wrong_node_does_not_resolve() {
        let registry = std::sync::Arc::new(NodeRegistry::new(Duration::from_millis(100)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("n1", claims(&[]), tx);

        let r2 = registry.clone();
        let pending_invoke =
            tokio::spawn(async move { r2.invoke("n1", "system.run", json!({}), None).await });

        // Intercept the invoke id and answer as a different node.
        let text = rx.recv().await.unwrap();
        let Frame::Invoke { id, .. } = Frame::decode(&text).unwrap() else {
            panic!("expected invoke frame");
        };
        registry.on_response("impostor", &id, true, Some(json!({"stolen": true})), None);

        // The rightful invoke still times out rather than accepting the
        // impostor's answer.
        let err = pending_invoke.await.unwrap().unwrap_err();
        assert!(matches!(err, InvokeError::Timeout(_)));
    }

    #[tokio::test]
    async fn remote_error_surfaces_message() {
        let registry = std::sync::Arc::new(NodeRegistry::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("n1", claims(&[]), tx);

        let r2 = registry.clone();
        tokio::spawn(async move {
            let text = rx.recv().await.unwrap();
            if let Ok(Frame::Invoke { id, .. }) = Frame::decode(&text) {
                r2.on_response("n1", &id, false, None, Some(json!("command not permitted")));
            }
        });

        let err = registry
            .invoke("n1", "system.run", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Remote(m) if m.contains("not permitted")));
    }

    #[tokio::test]
    async fn concurrent_invokes_have_distinct_ids() {
        let registry = std::sync::Arc::new(NodeRegistry::new(Duration::from_millis(200)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("n1", claims(&[]), tx);

        let r1 = registry.clone();
        let h1 = tokio::spawn(async move { r1.invoke("n1", "one", json!({}), None).await });
        let r2 = registry.clone();
        let h2 = tokio::spawn(async move { r2.invoke("n1", "two", json!({}), None).await });

        let f1 = Frame::decode(&rx.recv().await.unwrap()).unwrap();
        let f2 = Frame::decode(&rx.recv().await.unwrap()).unwrap();
        match (f1, f2) {
            (Frame::Invoke { id: id1, .. }, Frame::Invoke { id: id2, .. }) => {
                assert_ne!(id1, id2);
            }
            other => panic!("expected two invoke frames, got {other:?}"),
        }
        // Both invokes run out their short deadline.
        assert!(h1.await.unwrap().is_err());
        assert!(h2.await.unwrap().is_err());
    }
}
