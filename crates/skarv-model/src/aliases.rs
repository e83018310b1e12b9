// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Deprecated model-id rewrites.
//!
//! Config files outlive provider deprecation cycles; rather than failing
//! a run because a tier still names a retired id, the router rewrites
//! known aliases to their current replacement just before the outbound
//! call. The table is fixed at compile time — new deprecations are a
//! code change, not config.

/// (deprecated, replacement) pairs. Checked in order, first hit wins.
const ALIASES: &[(&str, &str)] = &[
    ("gpt-4-turbo-preview", "gpt-4-turbo"),
    ("gpt-4-32k", "gpt-4-turbo"),
    ("gpt-4o-2024-05-13", "gpt-4o"),
    ("gpt-5.0", "gpt-5.2"),
    ("claude-3-sonnet-20240229", "claude-sonnet-4-5"),
    ("claude-3-opus-20240229", "claude-opus-4-5"),
];

/// Rewrite a deprecated model id to its current replacement.
/// Unknown ids pass through unchanged.
pub fn canonical_model_id(id: &str) -> &str {
    for (old, new) in ALIASES {
        if *old == id {
            return new;
        }
    }
    id
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_alias_is_rewritten() {
        assert_eq!(canonical_model_id("gpt-4-32k"), "gpt-4-turbo");
    }

    #[test]
    fn current_id_passes_through() {
        assert_eq!(canonical_model_id("gpt-5.2"), "gpt-5.2");
    }

    #[test]
    fn unknown_id_passes_through() {
        assert_eq!(canonical_model_id("local-llama"), "local-llama");
    }
}
