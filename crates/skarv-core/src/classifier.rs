// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use futures::StreamExt;
use tracing::debug;

use skarv_model::{Message, ResponseEvent, Tier, TierRouter};

const CLASSIFIER_PROMPT: &str = "\
Rate the complexity of the user's request on a scale of 1 to 5, where 1 \
is a trivial lookup or action and 5 requires careful multi-step \
reasoning. Respond with the single digit only.";

/// Pick the routing tier for a message.
///
/// A cheap small-model completion returns an integer 1–5; at or above
/// the configured threshold the reasoning tier is chosen. Every failure
/// mode — classifier disabled, call error, unparseable output — defaults
/// to the action tier: misrouting to the cheap tier is recoverable,
/// hanging a run on a broken classifier is not.
pub async fn choose_tier(router: &TierRouter, message: &str) -> Tier {
    if !router.classifier_enabled() {
        return Tier::Action;
    }

    let messages = vec![
        Message::system(CLASSIFIER_PROMPT),
        Message::user(message),
    ];
    let model = router.classifier_model().to_string();
    let mut stream = match router.complete_model(&model, messages, 8).await {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, "complexity classifier call failed; using action tier");
            return Tier::Action;
        }
    };

    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event {
            Ok(ResponseEvent::TextDelta(delta)) => text.push_str(&delta),
            Ok(ResponseEvent::Done) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "classifier stream error; using action tier");
                return Tier::Action;
            }
        }
    }

    match parse_score(&text) {
        Some(score) if score >= router.complexity_threshold() => Tier::Reasoning,
        Some(_) => Tier::Action,
        None => {
            debug!(output = %text, "classifier output had no score; using action tier");
            Tier::Action
        }
    }
}

/// First digit 1–5 anywhere in the output.
fn parse_score(text: &str) -> Option<u8> {
    text.chars()
        .find(|c| ('1'..='5').contains(c))
        .and_then(|c| c.to_digit(10))
        .map(|d| d as u8)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use skarv_config::ModelRoutingConfig;
    use skarv_model::{ModelError, ScriptedMockClient, Usage};

    fn router_with(client: ScriptedMockClient) -> TierRouter {
        TierRouter::new(Arc::new(client), ModelRoutingConfig::default())
    }

    #[test]
    fn parse_score_finds_digit_in_noise() {
        assert_eq!(parse_score("Complexity: 4/5"), Some(4));
        assert_eq!(parse_score("2"), Some(2));
        assert_eq!(parse_score("no digits here"), None);
        // 0 and 9 are out of range.
        assert_eq!(parse_score("score 9"), None);
    }

    #[tokio::test]
    async fn high_score_routes_to_reasoning() {
        let router = router_with(ScriptedMockClient::always_text("5"));
        assert_eq!(choose_tier(&router, "prove this theorem").await, Tier::Reasoning);
    }

    #[tokio::test]
    async fn low_score_routes_to_action() {
        let router = router_with(ScriptedMockClient::always_text("1"));
        assert_eq!(choose_tier(&router, "what time is it").await, Tier::Action);
    }

    #[tokio::test]
    async fn classifier_failure_defaults_to_action() {
        let client = ScriptedMockClient::always_text("5")
            .failing_model("gpt-5-nano", || ModelError::Server { status: 500 });
        let router = router_with(client);
        assert_eq!(choose_tier(&router, "anything").await, Tier::Action);
    }

    #[tokio::test]
    async fn garbage_output_defaults_to_action() {
        let router = router_with(ScriptedMockClient::always_text("I cannot rate this"));
        assert_eq!(choose_tier(&router, "anything").await, Tier::Action);
    }

    #[tokio::test]
    async fn disabled_classifier_skips_the_call() {
        let mut routing = ModelRoutingConfig::default();
        routing.complexity_classifier.enabled = false;
        let client = Arc::new(ScriptedMockClient::new(vec![vec![
            skarv_model::ResponseEvent::TextDelta("5".into()),
            skarv_model::ResponseEvent::Usage(Usage::default()),
            skarv_model::ResponseEvent::Done,
        ]]));
        let router = TierRouter::new(Arc::clone(&client) as _, routing);
        assert_eq!(choose_tier(&router, "anything").await, Tier::Action);
        assert!(client.requests().is_empty());
    }
}
