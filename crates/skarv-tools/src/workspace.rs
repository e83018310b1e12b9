// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Component, Path, PathBuf};

use crate::ToolError;

/// Resolve a path-bearing tool argument against the workspace root.
///
/// Rules:
/// - `~` expands to the user's home directory first.
/// - Relative paths are joined onto the workspace root.
/// - The lexically normalized result must stay under the root, or —
///   when the tool opts in with `allow_home` — under the home
///   directory. Anything else is a `permission_denied`.
///
/// Normalization is lexical (`..` components are resolved without
/// touching the filesystem) so the check also covers paths that do not
/// exist yet, e.g. the target of a `write_file`.
pub fn resolve_workspace_path(
    raw: &str,
    root: &Path,
    allow_home: bool,
) -> Result<PathBuf, ToolError> {
    let expanded = shellexpand::tilde(raw).to_string();
    let candidate = Path::new(&expanded);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let normalized = normalize(&joined);

    if normalized.starts_with(normalize(root)) {
        return Ok(normalized);
    }
    if allow_home {
        if let Some(home) = dirs::home_dir() {
            if normalized.starts_with(normalize(&home)) {
                return Ok(normalized);
            }
        }
    }
    Err(ToolError::PermissionDenied(format!(
        "path {raw} escapes the workspace root"
    )))
}

/// Lexical normalization: resolve `.` and `..` without hitting the
/// filesystem. `..` at the root is dropped.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
