// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tracing::warn;

use skarv_config::{ModelRoutingConfig, TierConfig};

use crate::{
    canonical_model_id, CompletionRequest, Message, ModelClient, ModelError, ResponseStream,
    ToolSchema,
};

/// Coarse capability class that selects which tier configuration a run
/// uses. Either supplied by the caller or decided by the complexity
/// classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Reasoning,
    Action,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Reasoning => "reasoning",
            Tier::Action => "action",
        }
    }
}

/// Stream plus the model id that actually answered — fallback may have
/// advanced past the tier's primary.
#[derive(Debug)]
pub struct RoutedStream {
    pub stream: ResponseStream,
    pub model_used: String,
}

/// Walks a tier's model chain over a single [`ModelClient`].
///
/// Retry policy per the error contract: only `RateLimited` (429) and
/// `Server` (5xx) advance to the next fallback id; any other error is
/// surfaced immediately.
pub struct TierRouter {
    client: Arc<dyn ModelClient>,
    routing: ModelRoutingConfig,
}

impl TierRouter {
    pub fn new(client: Arc<dyn ModelClient>, routing: ModelRoutingConfig) -> Self {
        Self { client, routing }
    }

    pub fn tier_config(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Reasoning => &self.routing.tier_1_reasoning,
            Tier::Action => &self.routing.tier_2_action,
        }
    }

    pub fn classifier_model(&self) -> &str {
        &self.routing.complexity_classifier.model
    }

    pub fn classifier_enabled(&self) -> bool {
        self.routing.complexity_classifier.enabled
    }

    pub fn complexity_threshold(&self) -> u8 {
        self.routing.complexity_threshold
    }

    /// Open a streaming completion on the given tier, walking the
    /// fallback chain as needed. Returns the stream and the id that won.
    pub async fn complete(
        &self,
        tier: Tier,
        messages: Vec<Message>,
        tools: Vec<ToolSchema>,
    ) -> Result<RoutedStream, ModelError> {
        let tc = self.tier_config(tier);
        let mut last_err = None;

        for id in std::iter::once(tc.model.as_str()).chain(tc.fallback.iter().map(String::as_str))
        {
            let model = canonical_model_id(id).to_string();
            let req = CompletionRequest {
                model: model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: tc.max_tokens,
                temperature: tc.temperature,
                stream: true,
            };
            match self.client.complete(req).await {
                Ok(stream) => {
                    return Ok(RoutedStream {
                        stream,
                        model_used: model,
                    })
                }
                Err(e) if e.is_retryable() => {
                    warn!(model = %model, error = %e, "model call failed, trying next fallback");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(ModelError::InvalidResponse(
            "tier has no models configured".to_string(),
        )))
    }

    /// One-shot non-tiered completion against an explicit model id.
    /// Used by the complexity classifier; no fallback chain applies.
    pub async fn complete_model(
        &self,
        model: &str,
        messages: Vec<Message>,
        max_tokens: u32,
    ) -> Result<ResponseStream, ModelError> {
        let req = CompletionRequest {
            model: canonical_model_id(model).to_string(),
            messages,
            tools: vec![],
            max_tokens,
            temperature: 0.0,
            stream: true,
        };
        self.client.complete(req).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
