// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;

use crate::{CompletionRequest, ModelError, ResponseEvent};

/// A boxed completion event stream.
///
/// Wrapped in a named type (rather than a bare `Pin<Box<dyn Stream>>`
/// alias) so it can carry a `Debug` impl — `Result::unwrap_err` requires
/// the `Ok` side to be `Debug`, which a raw trait object can't provide.
pub struct ResponseStream(Pin<Box<dyn Stream<Item = Result<ResponseEvent, ModelError>> + Send>>);

impl ResponseStream {
    pub fn new(stream: impl Stream<Item = Result<ResponseEvent, ModelError>> + Send + 'static) -> Self {
        Self(Box::pin(stream))
    }
}

impl Stream for ResponseStream {
    type Item = Result<ResponseEvent, ModelError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

/// Capability the run engine calls for completions.
///
/// A client speaks to one endpoint; the model id travels in the request
/// so the router can walk a fallback chain over a single client.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Human-readable client name for status display.
    fn name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    ///
    /// Errors returned here (as opposed to mid-stream) are what the
    /// fallback policy inspects: `RateLimited` and `Server` advance the
    /// chain, anything else fails the run.
    async fn complete(&self, req: CompletionRequest) -> Result<ResponseStream, ModelError>;
}
