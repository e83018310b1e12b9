// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! In-memory session store — ordered per-key transcripts feeding agent
//! runs.
//!
//! Transcripts are bounded: a session holds at most [`SESSION_CAP`]
//! messages, and when it reaches the cap the oldest [`SESSION_TRIM`]
//! are dropped in one batch. Batch trimming keeps recency without the
//! churn of a per-append drop.
//!
//! Every operation takes the store lock once, mutates or snapshots, and
//! releases it before returning — no iterator or reference outlives a
//! call, and no lock is ever held across I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum messages retained per session.
pub const SESSION_CAP: usize = 100;
/// Oldest messages dropped in one batch when the cap is reached.
pub const SESSION_TRIM: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: SessionRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Diagnostic view of one session for `sessions.list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub key: String,
    pub message_count: usize,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Session {
    messages: Vec<SessionMessage>,
    last_activity_at: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            last_activity_at: Utc::now(),
        }
    }
}

/// Mapping from session key to its bounded transcript. Created lazily on
/// first access; keys are accepted verbatim.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message, trimming to the cap.
    pub fn append(&self, key: &str, role: SessionRole, content: impl Into<String>) {
        let mut map = self.inner.lock().unwrap();
        let session = map.entry(key.to_string()).or_insert_with(Session::new);
        session.messages.push(SessionMessage {
            role,
            content: content.into(),
            at: Utc::now(),
        });
        if session.messages.len() >= SESSION_CAP {
            session.messages.drain(..SESSION_TRIM);
        }
        session.last_activity_at = Utc::now();
    }

    /// Last `limit` messages, oldest-first. Missing key returns empty.
    pub fn history(&self, key: &str, limit: usize) -> Vec<SessionMessage> {
        let map = self.inner.lock().unwrap();
        match map.get(key) {
            Some(session) => {
                let n = session.messages.len();
                let start = n.saturating_sub(limit);
                session.messages[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Atomic wholesale replace; prior state for the key is discarded.
    /// The replacement is subject to the same cap as appends.
    pub fn replace(&self, key: &str, mut messages: Vec<SessionMessage>) {
        if messages.len() > SESSION_CAP {
            let excess = messages.len() - SESSION_CAP;
            messages.drain(..excess);
        }
        let mut map = self.inner.lock().unwrap();
        let session = map.entry(key.to_string()).or_insert_with(Session::new);
        session.messages = messages;
        session.last_activity_at = Utc::now();
    }

    /// Empty the transcript; the key continues to exist.
    pub fn clear(&self, key: &str) {
        let mut map = self.inner.lock().unwrap();
        let session = map.entry(key.to_string()).or_insert_with(Session::new);
        session.messages.clear();
        session.last_activity_at = Utc::now();
    }

    /// Known keys with diagnostics, most recently active first.
    pub fn list(&self, limit: usize) -> Vec<SessionSummary> {
        let map = self.inner.lock().unwrap();
        let mut out: Vec<SessionSummary> = map
            .iter()
            .map(|(key, s)| SessionSummary {
                key: key.clone(),
                message_count: s.messages.len(),
                last_activity_at: s.last_activity_at,
            })
            .collect();
        out.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        out.truncate(limit);
        out
    }
}

/// Resolve a client-supplied session label to its canonical key.
///
/// Canonical keys are `main`, `tui`, `dashboard` and `telegram:<chatId>`;
/// anything else passes through verbatim. An empty or `default` label
/// maps to `main` so thin clients need not know the convention.
pub fn resolve_session_key(label: &str) -> String {
    match label.trim() {
        "" | "default" => "main".to_string(),
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
