// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{ParamKind, ParamSpec, Tool, ToolCall, ToolCategory, ToolContext, ToolError};

const BODY_LIMIT: usize = 100_000;

/// HTTP GET with a capped body. POST and friends stay out on purpose:
/// fetch is categorized network-read and must not mutate remote state.
pub struct HttpFetchTool {
    client: reqwest::Client,
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn name(&self) -> &str {
        "http_fetch"
    }

    fn description(&self) -> &str {
        "Fetches a URL with HTTP GET and returns status, content type and \
         the response body (truncated at 100,000 characters). Only http \
         and https URLs are accepted."
    }

    fn params(&self) -> &[ParamSpec] {
        const P: &[ParamSpec] = &[ParamSpec::required(
            "url",
            ParamKind::String,
            "The http(s) URL to fetch",
        )];
        P
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Network
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let url = call.args["url"].as_str().unwrap_or_default();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::Validation(format!(
                "url must be http(s), got: {url}"
            )));
        }
        debug!(url = %url, "http_fetch tool");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Io(format!("fetch failed: {e}")))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::Io(format!("body read failed: {e}")))?;

        let truncated = body.len() > BODY_LIMIT;
        let body = if truncated {
            let mut end = BODY_LIMIT;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body[..end].to_string()
        } else {
            body
        };

        Ok(json!({
            "status": status,
            "contentType": content_type,
            "body": body,
            "truncated": truncated,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolContext;

    #[tokio::test]
    async fn non_http_url_is_validation_error() {
        let tool = HttpFetchTool::default();
        let err = tool
            .execute(
                &ToolCall {
                    id: "c".into(),
                    name: "http_fetch".into(),
                    args: json!({"url": "file:///etc/passwd"}),
                },
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn unreachable_host_is_io_error() {
        let tool = HttpFetchTool::default();
        let err = tool
            .execute(
                &ToolCall {
                    id: "c".into(),
                    name: "http_fetch".into(),
                    args: json!({"url": "http://127.0.0.1:1/none"}),
                },
                &ToolContext::detached("r", "a"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
