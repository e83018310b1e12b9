// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Reply dispatcher — the single entry point from "an inbound message
//! arrived for session X" to "a reply exists".
//!
//! Deliberately thin: short-circuit the inline commands, compose the
//! system prompt, hand off to the run engine. Anything heavier belongs
//! in the engine or the gateway.

use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, watch};

use skarv_model::Tier;
use skarv_tools::Approver;

use crate::engine::{RunEngine, RunRequest};
use crate::events::{RunEvent, RunStatus};
use crate::prompts::{compose_system_prompt, BASE_PROMPT};
use crate::skills::SkillSnapshot;

/// What a dispatched reply amounted to.
#[derive(Debug, Clone)]
pub struct ReplyOutcome {
    pub reply: Option<String>,
    pub error: Option<String>,
    pub tool_calls_count: u32,
    pub model_used: Option<String>,
}

/// Context the gateway supplies per inbound message.
pub struct ReplyContext {
    pub run_id: String,
    pub tier: Option<Tier>,
    pub read_only: bool,
    pub stream: bool,
    pub approver: Arc<dyn Approver>,
}

pub struct ReplyDispatcher {
    engine: Arc<RunEngine>,
    /// Swapped atomically by the skill collaborator; runs read one
    /// consistent snapshot.
    skills: Arc<RwLock<SkillSnapshot>>,
    base_prompt: String,
    /// Optional first-run bootstrap context, cleared after first use.
    bootstrap: RwLock<Option<String>>,
    server_name: String,
    server_version: String,
}

impl ReplyDispatcher {
    pub fn new(engine: Arc<RunEngine>, skills: Arc<RwLock<SkillSnapshot>>) -> Self {
        Self {
            engine,
            skills,
            base_prompt: BASE_PROMPT.to_string(),
            bootstrap: RwLock::new(None),
            server_name: "skarv".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_base_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = prompt.into();
        self
    }

    pub fn with_bootstrap(self, bootstrap: impl Into<String>) -> Self {
        *self.bootstrap.write().unwrap() = Some(bootstrap.into());
        self
    }

    /// Dispatch one inbound message for `session_key`.
    ///
    /// Inline commands answer without a model call; everything else runs
    /// the agent loop, streaming events through `events`.
    pub async fn reply(
        &self,
        session_key: &str,
        text: &str,
        ctx: ReplyContext,
        events: mpsc::Sender<RunEvent>,
        cancel: watch::Receiver<bool>,
    ) -> ReplyOutcome {
        if let Some(inline) = self.inline_reply(text) {
            let _ = events
                .send(RunEvent::Finished {
                    status: RunStatus::Completed,
                    reply: Some(inline.clone()),
                    error: None,
                    model_used: None,
                    usage: None,
                })
                .await;
            return ReplyOutcome {
                reply: Some(inline),
                error: None,
                tool_calls_count: 0,
                model_used: None,
            };
        }

        // First-run bootstrap is consumed exactly once.
        let bootstrap = self.bootstrap.write().unwrap().take();
        let skills = self.skills.read().unwrap().clone();
        let system_prompt = compose_system_prompt(
            &self.base_prompt,
            bootstrap.as_deref(),
            &skills,
            ctx.read_only,
        );

        let outcome = self
            .engine
            .run(
                RunRequest {
                    run_id: ctx.run_id,
                    session_key: session_key.to_string(),
                    message: text.to_string(),
                    system_prompt,
                    tier: ctx.tier,
                    read_only: ctx.read_only,
                    stream: ctx.stream,
                    approver: ctx.approver,
                },
                events,
                cancel,
            )
            .await;

        ReplyOutcome {
            reply: outcome.reply,
            error: outcome.error,
            tool_calls_count: outcome.tool_calls_count,
            model_used: outcome.model_used,
        }
    }

    /// Inline commands that never touch the model.
    fn inline_reply(&self, text: &str) -> Option<String> {
        match text.trim() {
            "/status" => Some(format!(
                "{} {} — gateway up, agent ready",
                self.server_name, self.server_version
            )),
            "/skills" => {
                let skills = self.skills.read().unwrap();
                if skills.is_empty() {
                    Some("no skills loaded".to_string())
                } else {
                    Some(format!(
                        "skills snapshot v{} ({} chars)",
                        skills.version,
                        skills.prompt_text.len()
                    ))
                }
            }
            _ => None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
