// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    client::ResponseStream, CompletionRequest, ModelClient, ModelError, ResponseEvent, Usage,
};

type ErrorFactory = Box<dyn Fn() -> ModelError + Send + Sync>;

/// A pre-scripted mock client. Each call to `complete` pops the next
/// response script from the front of the queue, so tests can specify
/// exact event sequences — including tool calls and per-model failures —
/// without network access.
pub struct ScriptedMockClient {
    scripts: Mutex<Vec<Vec<ResponseEvent>>>,
    /// Model ids that fail instead of answering, with the error each
    /// one produces. Lets fallback tests fail the primary and let the
    /// backup answer from the script queue.
    failing: HashMap<String, ErrorFactory>,
    /// Every request seen, in order, so tests can inspect what was sent.
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    /// Artificial latency before each response, for tests that need a
    /// run to still be in flight when the next request arrives.
    delay: Option<std::time::Duration>,
}

impl ScriptedMockClient {
    /// Build a client from a list of response scripts. The outer `Vec`
    /// is the ordered list of calls; the inner `Vec` is the event
    /// sequence emitted for that call.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            failing: HashMap::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Convenience: client that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r: String = reply.into();
        let script = vec![
            ResponseEvent::TextDelta(r),
            ResponseEvent::Usage(Usage {
                input_tokens: 5,
                output_tokens: 5,
            }),
            ResponseEvent::Done,
        ];
        // Enough copies that multi-round loops never starve mid-test.
        Self::new(vec![script; 16])
    }

    /// Convenience: client that returns a tool call, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ResponseEvent::ToolCall {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                ResponseEvent::Done,
            ],
            vec![
                ResponseEvent::TextDelta(final_text.into()),
                ResponseEvent::Done,
            ],
        ])
    }

    /// Declare that requests for `model` fail with the produced error
    /// instead of consuming a script.
    pub fn failing_model(
        mut self,
        model: impl Into<String>,
        make: impl Fn() -> ModelError + Send + Sync + 'static,
    ) -> Self {
        self.failing.insert(model.into(), Box::new(make));
        self
    }

    /// Sleep this long before answering each request.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The most recent request, if any call was made.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// All requests seen so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedMockClient {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError> {
        self.requests.lock().unwrap().push(req.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(make) = self.failing.get(&req.model) {
            return Err(make());
        }

        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed.
                vec![
                    ResponseEvent::TextDelta("[no more scripts]".into()),
                    ResponseEvent::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<Result<ResponseEvent, ModelError>> =
            events.into_iter().map(Ok).collect();
        Ok(ResponseStream::new(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
