// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wire protocol between clients (operators, nodes) and the gateway.
//!
//! All frames are UTF-8 JSON text frames over a single WebSocket. The
//! envelope is deliberately small: five frame types, lowercase field
//! names, and a string method that maps onto a closed [`Method`] enum so
//! dispatch is exhaustive at compile time.
//!
//! # Typical operator session
//!
//! ```text
//! Operator                              Gateway
//!    │                                     │
//!    │── req {method:"connect", …} ───────►│  auth check, protocol pick
//!    │◄─ res {ok:true, payload:hello-ok} ──│  snapshot + policy
//!    │◄─ event {event:"presence", seq:1} ──│  (broadcast on any change)
//!    │                                     │
//!    │── req {method:"agent", …} ─────────►│
//!    │◄─ res {ok:true, {runId, accepted}} ─│
//!    │◄─ event {event:"agent.chunk", …} ───│  × N, generation order
//!    │◄─ event {event:"agent.step", …} ────│  per tool call/result
//!    │◄─ event {event:"agent", status} ────│  terminal, highest seq
//! ```
//!
//! Nodes speak the same envelope in the other direction: the gateway
//! sends `invoke` frames and the node answers with `invoke_res`,
//! correlated by `id`.

mod events;
mod frames;
mod hello;
mod methods;

pub use events::{
    AgentChunk, AgentFinal, AgentIdle, AgentStep, StepPayload, TickPayload, TokenUsage,
    EVENT_AGENT, EVENT_AGENT_CHUNK, EVENT_AGENT_IDLE, EVENT_AGENT_STEP, EVENT_PRESENCE,
    EVENT_TICK,
};
pub use frames::{ErrorShape, Frame};
pub use hello::{
    ConnectParams, Features, HealthInfo, HelloOk, PolicyInfo, PresenceEntry, Role, ServerInfo,
    Snapshot, StateVersion,
};
pub use methods::Method;

/// The only protocol version this gateway speaks. Clients must offer a
/// range that includes it or the handshake is rejected.
pub const PROTOCOL_VERSION: u32 = 3;

// ── Error kind strings ────────────────────────────────────────────────────────
// Stable identifiers carried in `res.error.code` / tool errors. Kept as
// constants so server and tests never drift on spelling.

pub const ERR_AUTH_FAILED: &str = "auth_failed";
pub const ERR_VALIDATION: &str = "validation";
pub const ERR_UNSUPPORTED: &str = "unsupported";
pub const ERR_PERMISSION_DENIED: &str = "permission_denied";
pub const ERR_NOT_FOUND: &str = "not_found";
pub const ERR_TIMEOUT: &str = "timeout";
pub const ERR_BUSY: &str = "busy";
pub const ERR_IO: &str = "io";
pub const ERR_INTERNAL: &str = "internal";
pub const ERR_NODE_DISCONNECTED: &str = "node_disconnected";
