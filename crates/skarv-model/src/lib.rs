// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The model capability the run engine is written against.
//!
//! The engine never constructs HTTP requests itself; it holds an
//! `Arc<dyn ModelClient>` and a [`TierRouter`] that picks the model id
//! for the chosen tier and walks the configured fallback chain when a
//! call fails with a retryable status (429 / 5xx). Everything else —
//! endpoints, auth headers, SSE parsing — lives behind the trait, so
//! tests swap in [`ScriptedMockClient`] and never touch the network.

mod aliases;
mod client;
mod mock;
mod openai_compat;
mod router;
mod types;

pub use aliases::canonical_model_id;
pub use client::{ModelClient, ResponseStream};
pub use mock::ScriptedMockClient;
pub use openai_compat::OpenAiCompatClient;
pub use router::{RoutedStream, Tier, TierRouter};
pub use types::{
    CompletionRequest, FunctionCall, Message, MessageContent, ModelError, ResponseEvent, Role,
    ToolSchema, Usage,
};
