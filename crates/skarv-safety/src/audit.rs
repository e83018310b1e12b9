// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use chrono::Utc;

/// Append-only audit log of gated tool effects.
///
/// One block per entry: a header line with timestamp, level, agent and
/// action, then indented detail and outcome lines. Text on purpose —
/// the file is read by humans after the fact, not parsed by the system.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    // Serializes writers so interleaved blocks cannot occur.
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one entry. Failures are returned, not swallowed — the
    /// caller decides whether a missing audit trail is fatal.
    pub fn record(
        &self,
        level: &str,
        agent: &str,
        action: &str,
        details: &str,
        outcome: &str,
    ) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(
            f,
            "[{}] {} agent={} action={}\n  details: {}\n  outcome: {}",
            Utc::now().to_rfc3339(),
            level,
            agent,
            action,
            details,
            outcome,
        )
        .with_context(|| format!("appending to {}", self.path.display()))
    }

    /// Full log contents; empty string when nothing has been written.
    pub fn read_all(&self) -> anyhow::Result<String> {
        let _guard = self.lock.lock().unwrap();
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_block_with_fields() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));
        log.record("INFO", "main", "file_write", "path=/tmp/x", "ok")
            .unwrap();
        let text = log.read_all().unwrap();
        assert!(text.contains("agent=main"));
        assert!(text.contains("action=file_write"));
        assert!(text.contains("outcome: ok"));
    }

    #[test]
    fn entries_accumulate_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));
        log.record("INFO", "a", "first", "-", "ok").unwrap();
        log.record("WARN", "a", "second", "-", "denied").unwrap();
        let text = log.read_all().unwrap();
        let first = text.find("action=first").unwrap();
        let second = text.find("action=second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn read_all_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("never-written.log"));
        assert_eq!(log.read_all().unwrap(), "");
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("deep/nested/audit.log"));
        log.record("INFO", "a", "x", "-", "ok").unwrap();
        assert!(!log.read_all().unwrap().is_empty());
    }
}
