// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use skarv_config::AuthConfig;

/// Outcome of checking a `connect` request's credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Ok,
    Failed,
}

/// Check a presented token against the configured secret.
///
/// No secret configured → every connect is accepted (loopback
/// deployments). With a secret, the presented token must match by
/// constant-time comparison of SHA-256 digests — digesting first makes
/// the comparison length-independent as well, so neither content nor
/// length of the guess leaks through timing.
pub fn check(config: &AuthConfig, presented: Option<&str>) -> AuthOutcome {
    let Some(expected) = config.token.as_deref() else {
        return AuthOutcome::Ok;
    };
    let Some(presented) = presented else {
        return AuthOutcome::Failed;
    };
    let expected_digest = Sha256::digest(expected.as_bytes());
    let presented_digest = Sha256::digest(presented.as_bytes());
    if expected_digest.ct_eq(&presented_digest).into() {
        AuthOutcome::Ok
    } else {
        AuthOutcome::Failed
    }
}

/// The `authMode` string advertised in the hello-ok snapshot.
pub fn auth_mode(config: &AuthConfig) -> &'static str {
    use skarv_config::AuthMode;
    if config.token.is_none() {
        return "none";
    }
    match config.mode {
        AuthMode::Token => "token",
        AuthMode::Password => "password",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
