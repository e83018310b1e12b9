// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use skarv_model::{
    FunctionCall, Message, MessageContent, ResponseEvent, Role, Tier, TierRouter, ToolSchema,
    Usage,
};
use skarv_session::{SessionRole, SessionStore};
use skarv_tools::{Approver, ToolCall, ToolContext, ToolRegistry};

use crate::classifier::choose_tier;
use crate::events::{RunEvent, RunStatus, StepEvent};
use crate::scrub::scrub_reply;

/// One agent run as requested over the wire.
pub struct RunRequest {
    pub run_id: String,
    pub session_key: String,
    pub message: String,
    /// Fully composed system prompt (base + bootstrap + skills).
    pub system_prompt: String,
    /// Caller-chosen tier; `None` consults the complexity classifier.
    pub tier: Option<Tier>,
    pub read_only: bool,
    /// Emit `Chunk` events for text deltas.
    pub stream: bool,
    pub approver: Arc<dyn Approver>,
}

/// What a finished run amounted to.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub reply: Option<String>,
    pub error: Option<String>,
    pub model_used: Option<String>,
    pub usage: Option<Usage>,
    pub tool_calls_count: u32,
}

/// Executes agent runs: the model ↔ tool loop with streaming, fallback,
/// cancellation and transcript persistence.
pub struct RunEngine {
    router: Arc<TierRouter>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    max_iterations: u32,
    history_limit: usize,
}

impl RunEngine {
    pub fn new(
        router: Arc<TierRouter>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            router,
            tools,
            sessions,
            max_iterations: 10,
            history_limit: 20,
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Run to completion, streaming [`RunEvent`]s through `events`.
    ///
    /// Exactly one `Finished` event is emitted, last. The transcript
    /// gains the user message (and the assistant reply when the run
    /// completed); a cancelled run writes nothing.
    pub async fn run(
        &self,
        req: RunRequest,
        events: mpsc::Sender<RunEvent>,
        cancel: watch::Receiver<bool>,
    ) -> RunOutcome {
        info!(run = %req.run_id, session = %req.session_key, "agent run started");
        let outcome = self.run_inner(&req, &events, cancel).await;

        if outcome.status != RunStatus::Cancelled {
            self.sessions
                .append(&req.session_key, SessionRole::User, &req.message);
            if outcome.status == RunStatus::Completed {
                if let Some(reply) = &outcome.reply {
                    self.sessions
                        .append(&req.session_key, SessionRole::Assistant, reply);
                }
            }
        }

        let _ = events
            .send(RunEvent::Finished {
                status: outcome.status,
                reply: outcome.reply.clone(),
                error: outcome.error.clone(),
                model_used: outcome.model_used.clone(),
                usage: outcome.usage,
            })
            .await;

        info!(
            run = %req.run_id,
            status = outcome.status.as_str(),
            tool_calls = outcome.tool_calls_count,
            "agent run finished"
        );
        outcome
    }

    async fn run_inner(
        &self,
        req: &RunRequest,
        events: &mpsc::Sender<RunEvent>,
        cancel: watch::Receiver<bool>,
    ) -> RunOutcome {
        let mut usage = Usage::default();
        let mut model_used: Option<String> = None;
        let mut tool_calls_count = 0u32;

        // ── Assemble the message list ────────────────────────────────────────
        let mut messages = vec![Message::system(&req.system_prompt)];
        for m in self.sessions.history(&req.session_key, self.history_limit) {
            // Tool transcript entries are context for humans, not valid
            // wire history without their call ids; replay text turns only.
            match m.role {
                SessionRole::User => messages.push(Message::user(m.content)),
                SessionRole::Assistant => messages.push(Message::assistant(m.content)),
                SessionRole::Tool => {}
            }
        }
        messages.push(Message::user(&req.message));

        // ── Tier ─────────────────────────────────────────────────────────────
        let tier = match req.tier {
            Some(t) => t,
            None => choose_tier(&self.router, &req.message).await,
        };
        debug!(run = %req.run_id, tier = tier.as_str(), "tier selected");

        let schemas: Vec<ToolSchema> = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        let cancelled = |mu: &Option<String>, u: Usage, n: u32| RunOutcome {
            status: RunStatus::Cancelled,
            reply: None,
            error: None,
            model_used: mu.clone(),
            usage: Some(u),
            tool_calls_count: n,
        };

        let mut last_text = String::new();

        // ── Tool loop ────────────────────────────────────────────────────────
        for iteration in 1..=self.max_iterations {
            if *cancel.borrow() {
                return cancelled(&model_used, usage, tool_calls_count);
            }

            // Model call; the router walks the fallback chain on 429/5xx.
            let mut cancel_watch = cancel.clone();
            let routed = tokio::select! {
                biased;
                _ = wait_true(&mut cancel_watch) => {
                    return cancelled(&model_used, usage, tool_calls_count);
                }
                r = self.router.complete(tier, messages.clone(), schemas.clone()) => r,
            };
            let routed = match routed {
                Ok(r) => r,
                Err(e) => {
                    warn!(run = %req.run_id, error = %e, "model call failed");
                    return RunOutcome {
                        status: RunStatus::Failed,
                        reply: None,
                        error: Some(e.to_string()),
                        model_used,
                        usage: Some(usage),
                        tool_calls_count,
                    };
                }
            };
            model_used = Some(routed.model_used);
            let mut stream = routed.stream;

            // Drain the stream: text deltas out as chunks, tool-call
            // fragments accumulated by index.
            let mut text = String::new();
            let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();
            loop {
                let mut cancel_watch = cancel.clone();
                let event = tokio::select! {
                    biased;
                    _ = wait_true(&mut cancel_watch) => {
                        return cancelled(&model_used, usage, tool_calls_count);
                    }
                    ev = stream.next() => ev,
                };
                match event {
                    None => break,
                    Some(Err(e)) => {
                        warn!(run = %req.run_id, error = %e, "model stream failed");
                        return RunOutcome {
                            status: RunStatus::Failed,
                            reply: None,
                            error: Some(e.to_string()),
                            model_used,
                            usage: Some(usage),
                            tool_calls_count,
                        };
                    }
                    Some(Ok(ResponseEvent::TextDelta(delta))) if !delta.is_empty() => {
                        text.push_str(&delta);
                        if req.stream {
                            let _ = events.send(RunEvent::Chunk { delta }).await;
                        }
                    }
                    Some(Ok(ResponseEvent::TextDelta(_))) => {}
                    Some(Ok(ResponseEvent::ToolCall {
                        index,
                        id,
                        name,
                        arguments,
                    })) => {
                        let ptc = pending.entry(index).or_default();
                        if !id.is_empty() {
                            ptc.id = id;
                        }
                        if !name.is_empty() {
                            ptc.name = name;
                        }
                        ptc.args_buf.push_str(&arguments);
                    }
                    Some(Ok(ResponseEvent::Usage(u))) => usage.add(u),
                    Some(Ok(ResponseEvent::Done)) => break,
                }
            }

            if !text.is_empty() {
                last_text = text.clone();
                messages.push(Message::assistant(&text));
            }

            let tool_calls = finalize_tool_calls(pending);
            if tool_calls.is_empty() {
                // Final text turn — the reply.
                return RunOutcome {
                    status: RunStatus::Completed,
                    reply: Some(scrub_reply(&last_text)),
                    error: None,
                    model_used,
                    usage: Some(usage),
                    tool_calls_count,
                };
            }

            // Record the calls in wire order before any result, so the
            // conversation history stays valid for the next model turn.
            for tc in &tool_calls {
                messages.push(Message {
                    role: Role::Assistant,
                    content: MessageContent::ToolCall {
                        tool_call_id: tc.id.clone(),
                        function: FunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.args.to_string(),
                        },
                    },
                });
            }

            let mut successes = 0u32;
            let mut internal_only_failure = false;
            for tc in &tool_calls {
                let _ = events
                    .send(RunEvent::Step {
                        step: StepEvent::ToolCall {
                            name: tc.name.clone(),
                            args: tc.args.clone(),
                        },
                    })
                    .await;

                let ctx = ToolContext {
                    run_id: req.run_id.clone(),
                    agent_id: req.session_key.clone(),
                    read_only: req.read_only,
                    cancel: cancel.clone(),
                    approver: Arc::clone(&req.approver),
                };
                let result = self.tools.dispatch(tc, &ctx).await;
                tool_calls_count += 1;

                match result {
                    Ok(value) => {
                        successes += 1;
                        let _ = events
                            .send(RunEvent::Step {
                                step: StepEvent::ToolResult {
                                    name: tc.name.clone(),
                                    result: Some(value.clone()),
                                    error: None,
                                },
                            })
                            .await;
                        let body = serde_json::to_string(&json!({ "result": value }))
                            .unwrap_or_else(|_| "{}".to_string());
                        messages.push(Message::tool_result(&tc.id, body));
                    }
                    Err(e) => {
                        // Tool errors are never fatal to the run; the
                        // model sees them and adapts.
                        let rendered = e.to_string();
                        let _ = events
                            .send(RunEvent::Step {
                                step: StepEvent::ToolResult {
                                    name: tc.name.clone(),
                                    result: None,
                                    error: Some(rendered.clone()),
                                },
                            })
                            .await;
                        let body = serde_json::to_string(
                            &json!({ "error": { "kind": e.kind(), "message": rendered } }),
                        )
                        .unwrap_or_else(|_| "{}".to_string());
                        messages.push(Message::tool_result(&tc.id, body));
                        if e.kind() == "internal" {
                            internal_only_failure = true;
                        }
                    }
                }

                if *cancel.borrow() {
                    return cancelled(&model_used, usage, tool_calls_count);
                }
            }

            // An iteration that produced only internal failures does not
            // earn another round; answer with what we have.
            if internal_only_failure && successes == 0 {
                warn!(run = %req.run_id, iteration, "stopping after internal tool failure");
                return RunOutcome {
                    status: RunStatus::Completed,
                    reply: Some(scrub_reply(&last_text)),
                    error: Some("a tool failed internally; stopped early".to_string()),
                    model_used,
                    usage: Some(usage),
                    tool_calls_count,
                };
            }
        }

        // Loop budget exhausted.
        warn!(run = %req.run_id, "tool loop budget exhausted");
        RunOutcome {
            status: RunStatus::Completed,
            reply: Some(scrub_reply(&last_text)),
            error: Some(format!(
                "tool loop budget exhausted after {} iterations",
                self.max_iterations
            )),
            model_used,
            usage: Some(usage),
            tool_calls_count,
        }
    }
}

/// Resolve when the watch flips to `true`; pend forever on a closed
/// channel (no cancellation possible).
async fn wait_true(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

/// Flush accumulated parallel tool calls, ordered by index. Calls with
/// no name cannot be dispatched and are dropped; an empty id gets a
/// synthetic fallback so the turn can still complete.
fn finalize_tool_calls(pending: HashMap<u32, PendingToolCall>) -> Vec<ToolCall> {
    let mut sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
    sorted.sort_by_key(|(idx, _)| *idx);

    let mut out = Vec::new();
    for (i, (_, ptc)) in sorted.into_iter().enumerate() {
        if ptc.name.is_empty() {
            warn!(call_id = %ptc.id, "dropping tool call with empty name from model");
            continue;
        }
        let args = if ptc.args_buf.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&ptc.args_buf).unwrap_or_else(|e| {
                warn!(tool = %ptc.name, error = %e, "invalid tool-call JSON from model; substituting {{}}");
                json!({})
            })
        };
        let id = if ptc.id.is_empty() {
            format!("tc_synthetic_{i}")
        } else {
            ptc.id
        };
        out.push(ToolCall {
            id,
            name: ptc.name,
            args,
        });
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
