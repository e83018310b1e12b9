// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use skarv_config::Config;
use skarv_core::{ReplyDispatcher, RunEngine, SkillSnapshot};
use skarv_model::{ModelClient, TierRouter};
use skarv_nodes::{InvokeError, NodeClaims, NodeRegistry};
use skarv_proto::{
    Frame, HealthInfo, PresenceEntry, Role, Snapshot, StateVersion, EVENT_PRESENCE,
};
use skarv_safety::{ApprovalStore, AuditLog};
use skarv_session::SessionStore;
use skarv_tools::builtin::{self, BuiltinDeps};
use skarv_tools::{NodeInvoker, ToolError, ToolRegistry};

/// A client currently connected and handshaken.
pub struct ConnectedClient {
    pub conn_id: String,
    pub role: Role,
    pub scopes: Vec<String>,
    pub caps: Vec<String>,
    pub connected_at_ms: u64,
    pub loopback: bool,
    /// Serialized frames to this client's socket writer task.
    sender: mpsc::UnboundedSender<String>,
    /// Per-connection event sequence; strictly increasing.
    seq: AtomicU64,
}

impl ConnectedClient {
    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.sender.send(frame.encode()).is_ok()
    }

    /// Send an event stamped with this connection's next sequence number.
    pub fn send_event(&self, event: &str, payload: Value) -> bool {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.send_frame(&Frame::event(event, payload, seq))
    }

    pub fn presence_entry(&self) -> PresenceEntry {
        PresenceEntry {
            conn_id: self.conn_id.clone(),
            role: self.role,
            scopes: self.scopes.clone(),
            connected_at_ms: self.connected_at_ms,
            loopback: self.loopback,
            caps: self.caps.clone(),
        }
    }
}

/// One in-flight agent run, keyed by session.
struct ActiveRun {
    run_id: String,
    requester_conn_id: String,
    cancel: watch::Sender<bool>,
}

/// Process-wide gateway state. Everything a connection handler needs
/// hangs off one `Arc<Gateway>`; tests construct fresh instances.
pub struct Gateway {
    pub config: Config,
    pub sessions: Arc<SessionStore>,
    pub nodes: Arc<NodeRegistry>,
    pub dispatcher: Arc<ReplyDispatcher>,
    pub skills: Arc<RwLock<SkillSnapshot>>,
    pub state_dir: PathBuf,
    pub config_path: Option<PathBuf>,

    started_at: Instant,
    conn_counter: AtomicU64,
    connections: RwLock<HashMap<String, Arc<ConnectedClient>>>,
    state_version: Mutex<StateVersion>,
    active_runs: Mutex<HashMap<String, ActiveRun>>,
}

impl Gateway {
    /// Assemble the full gateway from config and a model client.
    ///
    /// The model client is a parameter, not a construction detail, so
    /// tests inject a scripted mock and never touch the network.
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        model: Arc<dyn ModelClient>,
    ) -> anyhow::Result<Arc<Self>> {
        let state_dir = config
            .gateway
            .state_dir
            .clone()
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("skarv")
            });

        let sessions = Arc::new(SessionStore::new());
        let nodes = Arc::new(NodeRegistry::default());
        let approvals = Arc::new(ApprovalStore::load_or_init(
            state_dir.join("approvals.json"),
            config.tools.shell.clone(),
        )?);
        let audit = Arc::new(AuditLog::new(state_dir.join("audit.log")));

        let workspace_root = config
            .tools
            .workspace_root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let mut registry = ToolRegistry::new(
            config.safety_gate.clone(),
            approvals,
            audit,
            config.tools.clone(),
            workspace_root,
        );
        let node_invoker: Arc<dyn NodeInvoker> = Arc::new(RegistryNodeInvoker {
            nodes: Arc::clone(&nodes),
        });
        builtin::install(
            &mut registry,
            BuiltinDeps {
                sessions: Arc::clone(&sessions),
                node_invoker: Some(node_invoker),
                memory_path: state_dir.join("memory.jsonl"),
            },
        );

        let router = Arc::new(TierRouter::new(model, config.model_routing.clone()));
        let engine = Arc::new(RunEngine::new(
            router,
            Arc::new(registry),
            Arc::clone(&sessions),
        ));
        let skills = Arc::new(RwLock::new(SkillSnapshot::default()));
        let dispatcher = Arc::new(ReplyDispatcher::new(engine, Arc::clone(&skills)));

        Ok(Arc::new(Self {
            config,
            sessions,
            nodes,
            dispatcher,
            skills,
            state_dir,
            config_path,
            started_at: Instant::now(),
            conn_counter: AtomicU64::new(0),
            connections: RwLock::new(HashMap::new()),
            state_version: Mutex::new(StateVersion::default()),
            active_runs: Mutex::new(HashMap::new()),
        }))
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Fresh, never-reused connection id.
    pub fn next_conn_id(&self) -> String {
        let n = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{n}")
    }

    // ── Connections & presence ────────────────────────────────────────────────

    /// Insert a handshaken connection, register its node record when
    /// applicable, and broadcast the presence change.
    pub fn add_connection(
        &self,
        conn_id: String,
        role: Role,
        scopes: Vec<String>,
        claims: Option<NodeClaims>,
        loopback: bool,
        sender: mpsc::UnboundedSender<String>,
    ) -> Arc<ConnectedClient> {
        let client = Arc::new(ConnectedClient {
            conn_id: conn_id.clone(),
            role,
            scopes,
            caps: claims.as_ref().map(|c| c.caps.clone()).unwrap_or_default(),
            connected_at_ms: chrono::Utc::now().timestamp_millis() as u64,
            loopback,
            sender: sender.clone(),
            seq: AtomicU64::new(0),
        });
        self.connections
            .write()
            .unwrap()
            .insert(conn_id.clone(), Arc::clone(&client));
        if let Some(claims) = claims {
            self.nodes.register(&conn_id, claims, sender);
        }
        info!(conn = %conn_id, role = ?role, "connection handshaken");
        self.broadcast_presence();
        client
    }

    /// Remove a closed connection: presence update, node record drop,
    /// cancellation of every run it owns.
    pub fn remove_connection(&self, conn_id: &str) {
        let removed = self.connections.write().unwrap().remove(conn_id);
        if removed.is_none() {
            return;
        }
        self.nodes.unregister(conn_id);

        let owned: Vec<ActiveRun> = {
            let mut runs = self.active_runs.lock().unwrap();
            let keys: Vec<String> = runs
                .iter()
                .filter(|(_, r)| r.requester_conn_id == conn_id)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter().filter_map(|k| runs.remove(&k)).collect()
        };
        for run in owned {
            debug!(run = %run.run_id, "cancelling run owned by closed connection");
            let _ = run.cancel.send(true);
        }

        info!(conn = %conn_id, "connection closed");
        self.broadcast_presence();
    }

    pub fn connection(&self, conn_id: &str) -> Option<Arc<ConnectedClient>> {
        self.connections.read().unwrap().get(conn_id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    pub fn presence(&self) -> Vec<PresenceEntry> {
        let conns = self.connections.read().unwrap();
        let mut entries: Vec<PresenceEntry> =
            conns.values().map(|c| c.presence_entry()).collect();
        entries.sort_by(|a, b| a.conn_id.cmp(&b.conn_id));
        entries
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            presence: self.presence(),
            health: HealthInfo { ok: true },
            state_version: self.state_version.lock().unwrap().clone(),
            uptime_ms: self.uptime_ms(),
            config_path: self
                .config_path
                .as_ref()
                .map(|p| p.display().to_string()),
            state_dir: Some(self.state_dir.display().to_string()),
            session_defaults: serde_json::json!({ "mainKey": "main" }),
            auth_mode: crate::auth::auth_mode(&self.config.gateway.auth).to_string(),
        }
    }

    fn broadcast_presence(&self) {
        let version = {
            let mut v = self.state_version.lock().unwrap();
            v.presence += 1;
            v.presence
        };
        let payload = serde_json::json!({
            "presence": self.presence(),
            "stateVersion": { "presence": version },
        });
        self.broadcast_to_operators(EVENT_PRESENCE, payload);
    }

    /// Send an event to every handshaken operator.
    pub fn broadcast_to_operators(&self, event: &str, payload: Value) {
        let conns = self.connections.read().unwrap();
        for client in conns.values().filter(|c| c.role == Role::Operator) {
            if !client.send_event(event, payload.clone()) {
                warn!(conn = %client.conn_id, "dropping event for dead operator connection");
            }
        }
    }

    /// Send an event to every handshaken connection.
    pub fn broadcast_to_all(&self, event: &str, payload: Value) {
        let conns = self.connections.read().unwrap();
        for client in conns.values() {
            let _ = client.send_event(event, payload.clone());
        }
    }

    // ── Run lifecycle ─────────────────────────────────────────────────────────

    /// Claim the single run slot for a session. `None` means busy.
    pub fn claim_session(
        &self,
        session_key: &str,
        run_id: &str,
        requester_conn_id: &str,
    ) -> Option<watch::Receiver<bool>> {
        let mut runs = self.active_runs.lock().unwrap();
        if runs.contains_key(session_key) {
            return None;
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        runs.insert(
            session_key.to_string(),
            ActiveRun {
                run_id: run_id.to_string(),
                requester_conn_id: requester_conn_id.to_string(),
                cancel: cancel_tx,
            },
        );
        Some(cancel_rx)
    }

    /// Release a finished run's claim and tell operators the session is
    /// idle again.
    pub fn release_session(&self, session_key: &str, run_id: &str) {
        let released = {
            let mut runs = self.active_runs.lock().unwrap();
            match runs.get(session_key) {
                Some(active) if active.run_id == run_id => {
                    runs.remove(session_key);
                    true
                }
                _ => false,
            }
        };
        if released {
            self.broadcast_to_operators(
                skarv_proto::EVENT_AGENT_IDLE,
                serde_json::to_value(skarv_proto::AgentIdle {
                    session_key: session_key.to_string(),
                })
                .unwrap_or(Value::Null),
            );
        }
    }

    /// Cancel a run by id. Returns false when no such run is active.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        let runs = self.active_runs.lock().unwrap();
        for run in runs.values() {
            if run.run_id == run_id {
                let _ = run.cancel.send(true);
                return true;
            }
        }
        false
    }

    pub fn active_run_count(&self) -> usize {
        self.active_runs.lock().unwrap().len()
    }
}

/// Adapter giving the tool layer access to the node registry.
struct RegistryNodeInvoker {
    nodes: Arc<NodeRegistry>,
}

#[async_trait]
impl NodeInvoker for RegistryNodeInvoker {
    async fn invoke(
        &self,
        node_id: &str,
        command: &str,
        params: Value,
    ) -> Result<Value, ToolError> {
        self.nodes
            .invoke(node_id, command, params, None)
            .await
            .map_err(|e| match e {
                InvokeError::NotFound(id) => ToolError::NotFound(format!("no node {id}")),
                InvokeError::Timeout(d) => {
                    ToolError::Timeout(format!("node invoke timed out after {d:?}"))
                }
                InvokeError::NodeDisconnected => {
                    ToolError::Io("node_disconnected".to_string())
                }
                InvokeError::Cancelled => ToolError::Timeout("invoke cancelled".to_string()),
                InvokeError::Remote(m) => ToolError::Io(format!("node error: {m}")),
                InvokeError::Send(m) => ToolError::Io(format!("node send failed: {m}")),
            })
    }

    fn list(&self) -> Vec<Value> {
        self.nodes.list()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use skarv_model::ScriptedMockClient;

    fn gateway() -> (Arc<Gateway>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.gateway.state_dir = Some(dir.path().to_path_buf());
        config.tools.workspace_root = Some(dir.path().to_path_buf());
        let gw =
            Gateway::new(config, None, Arc::new(ScriptedMockClient::always_text("ok"))).unwrap();
        (gw, dir)
    }

    fn connect(gw: &Arc<Gateway>, role: Role) -> (Arc<ConnectedClient>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = gw.next_conn_id();
        let claims = (role == Role::Node).then(NodeClaims::default);
        let client = gw.add_connection(id, role, vec![], claims, true, tx);
        (client, rx)
    }

    #[tokio::test]
    async fn conn_ids_are_never_reused() {
        let (gw, _dir) = gateway();
        let a = gw.next_conn_id();
        let b = gw.next_conn_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn presence_broadcast_reaches_operators_not_nodes() {
        let (gw, _dir) = gateway();
        let (_op, mut op_rx) = connect(&gw, Role::Operator);
        let (_node, mut node_rx) = connect(&gw, Role::Node);

        // The node join broadcast the second presence event; operator
        // received both, node received none.
        let mut op_events = 0;
        while let Ok(text) = op_rx.try_recv() {
            if text.contains("\"presence\"") {
                op_events += 1;
            }
        }
        assert!(op_events >= 1);
        assert!(node_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn node_record_tracks_connection_lifetime() {
        let (gw, _dir) = gateway();
        let (node, _rx) = connect(&gw, Role::Node);
        assert!(gw.nodes.is_registered(&node.conn_id));
        gw.remove_connection(&node.conn_id);
        assert!(!gw.nodes.is_registered(&node.conn_id));
    }

    #[tokio::test]
    async fn session_claim_is_exclusive_until_release() {
        let (gw, _dir) = gateway();
        let first = gw.claim_session("main", "run-1", "conn-1");
        assert!(first.is_some());
        assert!(gw.claim_session("main", "run-2", "conn-2").is_none());

        // Releasing with the wrong run id is a no-op.
        gw.release_session("main", "run-9");
        assert!(gw.claim_session("main", "run-3", "conn-3").is_none());

        gw.release_session("main", "run-1");
        assert!(gw.claim_session("main", "run-4", "conn-4").is_some());
    }

    #[tokio::test]
    async fn disconnect_cancels_owned_runs() {
        let (gw, _dir) = gateway();
        let (op, _rx) = connect(&gw, Role::Operator);
        let cancel_rx = gw
            .claim_session("main", "run-1", &op.conn_id)
            .expect("claim failed");
        assert!(!*cancel_rx.borrow());

        gw.remove_connection(&op.conn_id);
        assert!(*cancel_rx.borrow());
        assert_eq!(gw.active_run_count(), 0);
    }

    #[tokio::test]
    async fn cancel_run_by_id() {
        let (gw, _dir) = gateway();
        let cancel_rx = gw.claim_session("main", "run-1", "conn-1").unwrap();
        assert!(gw.cancel_run("run-1"));
        assert!(*cancel_rx.borrow());
        assert!(!gw.cancel_run("run-unknown"));
    }

    #[tokio::test]
    async fn event_sequence_numbers_increase_per_connection() {
        let (gw, _dir) = gateway();
        let (op, mut rx) = connect(&gw, Role::Operator);
        op.send_event("tick", serde_json::json!({"nowMs": 1}));
        op.send_event("tick", serde_json::json!({"nowMs": 2}));

        let mut seqs = Vec::new();
        while let Ok(text) = rx.try_recv() {
            if let Ok(Frame::Event { seq, .. }) = Frame::decode(&text) {
                seqs.push(seq);
            }
        }
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seqs not increasing: {seqs:?}");
    }

    #[tokio::test]
    async fn snapshot_reports_auth_mode_none_without_token() {
        let (gw, _dir) = gateway();
        let snap = gw.snapshot();
        assert_eq!(snap.auth_mode, "none");
        assert!(snap.health.ok);
    }
}
