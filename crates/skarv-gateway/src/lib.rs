// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The gateway server: one WebSocket endpoint multiplexing operators
//! and nodes, owning the run lifecycle, presence and the tick.
//!
//! # Frame discipline
//!
//! Exactly one `res` per `req`. Events are broadcast (`presence`,
//! `tick`, `agent.idle`) or unicast to the requesting client
//! (`agent.chunk`, `agent.step`, terminal `agent`), each stamped with
//! the connection's monotone sequence number at send time.
//!
//! # Handshake
//!
//! ```text
//! CONNECTING ──socket open──► AWAITING_HELLO
//! AWAITING_HELLO:
//!   req(connect, auth ok)  → HANDSHAKEN   (hello-ok + snapshot)
//!   req(connect, auth bad) → close 1008
//!   anything else          → close 1008
//! HANDSHAKEN:
//!   req(*)        → method dispatch
//!   invoke_res    → node registry correlation (role=node only)
//!   socket close  → presence update, node unregister, cancel owned runs
//! ```

mod auth;
mod connection;
mod methods;
mod server;
mod state;

pub use server::{serve, spawn};
pub use state::Gateway;
