// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Background-exec table.
//!
//! `exec` with `background:true` returns a session id immediately; the
//! child keeps running under this table. Output buffers are bounded —
//! a runaway process drops its oldest lines, never grows the gateway.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::ToolError;

/// Byte cap per output stream; oldest lines drop first.
const STREAM_CAP_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Finished,
}

impl JobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
        }
    }
}

/// Line buffer with a byte budget. Push drops from the front until the
/// new line fits.
#[derive(Debug, Default)]
struct BoundedBuffer {
    lines: std::collections::VecDeque<String>,
    bytes: usize,
}

impl BoundedBuffer {
    fn push(&mut self, line: String) {
        self.bytes += line.len();
        self.lines.push_back(line);
        while self.bytes > STREAM_CAP_BYTES {
            match self.lines.pop_front() {
                Some(dropped) => self.bytes -= dropped.len(),
                None => break,
            }
        }
    }

    fn tail(&self, max_lines: usize) -> String {
        let n = self.lines.len();
        let start = n.saturating_sub(max_lines);
        self.lines
            .iter()
            .skip(start)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

struct Job {
    command: String,
    status: JobStatus,
    exit_code: Option<i32>,
    timed_out: bool,
    stdout: Arc<Mutex<BoundedBuffer>>,
    stderr: Arc<Mutex<BoundedBuffer>>,
    /// Signals the supervisor task to kill the child.
    kill_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Process-wide table of background jobs, owned by the tool registry.
#[derive(Default)]
pub struct BackgroundExec {
    jobs: Mutex<HashMap<String, Job>>,
}

impl BackgroundExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `command` under the shell and return its session id.
    pub fn spawn(
        self: &Arc<Self>,
        shell: &std::path::Path,
        command: &str,
        workdir: Option<&std::path::Path>,
        timeout: Duration,
    ) -> Result<String, ToolError> {
        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(wd) = workdir {
            cmd.current_dir(wd);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::Io(format!("spawn failed: {e}")))?;

        let id = uuid::Uuid::new_v4().to_string();
        let stdout_buf = Arc::new(Mutex::new(BoundedBuffer::default()));
        let stderr_buf = Arc::new(Mutex::new(BoundedBuffer::default()));
        let (kill_tx, kill_rx) = tokio::sync::oneshot::channel::<()>();

        // Pipe readers; the OS pipe is drained even when nobody polls.
        if let Some(out) = child.stdout.take() {
            let buf = Arc::clone(&stdout_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    buf.lock().unwrap().push(line);
                }
            });
        }
        if let Some(err) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    buf.lock().unwrap().push(line);
                }
            });
        }

        self.jobs.lock().unwrap().insert(
            id.clone(),
            Job {
                command: command.to_string(),
                status: JobStatus::Running,
                exit_code: None,
                timed_out: false,
                stdout: stdout_buf,
                stderr: stderr_buf,
                kill_tx: Some(kill_tx),
            },
        );

        debug!(session = %id, command = %command, "background exec started");
        spawn_supervisor(Arc::clone(self), id.clone(), child, kill_rx, timeout);
        Ok(id)
    }

    /// Status snapshot for one job.
    pub fn poll(&self, id: &str) -> Result<Value, ToolError> {
        let jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get(id)
            .ok_or_else(|| ToolError::NotFound(format!("no background session {id}")))?;
        Ok(json!({
            "sessionId": id,
            "command": job.command,
            "status": job.status.as_str(),
            "exitCode": job.exit_code,
            "timedOut": job.timed_out,
        }))
    }

    /// Tail of the captured output.
    pub fn logs(&self, id: &str, max_lines: usize) -> Result<Value, ToolError> {
        let jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get(id)
            .ok_or_else(|| ToolError::NotFound(format!("no background session {id}")))?;
        let stdout = job.stdout.lock().unwrap().tail(max_lines);
        let stderr = job.stderr.lock().unwrap().tail(max_lines);
        Ok(json!({
            "sessionId": id,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }

    /// Ask the supervisor to kill the child. Idempotent.
    pub fn kill(&self, id: &str) -> Result<(), ToolError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| ToolError::NotFound(format!("no background session {id}")))?;
        if let Some(tx) = job.kill_tx.take() {
            let _ = tx.send(());
        }
        Ok(())
    }

    /// Drop a finished job's record. Running jobs are killed first.
    pub fn remove(&self, id: &str) -> Result<(), ToolError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .remove(id)
            .ok_or_else(|| ToolError::NotFound(format!("no background session {id}")))?;
        if let Some(tx) = job.kill_tx {
            let _ = tx.send(());
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<Value> {
        let jobs = self.jobs.lock().unwrap();
        let mut out: Vec<Value> = jobs
            .iter()
            .map(|(id, job)| {
                json!({
                    "sessionId": id,
                    "command": job.command,
                    "status": job.status.as_str(),
                })
            })
            .collect();
        out.sort_by(|a, b| a["sessionId"].as_str().cmp(&b["sessionId"].as_str()));
        out
    }

    fn mark_finished(&self, id: &str, exit_code: Option<i32>, timed_out: bool) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(id) {
            job.status = JobStatus::Finished;
            job.exit_code = exit_code;
            job.timed_out = timed_out;
            job.kill_tx = None;
        }
    }
}

fn spawn_supervisor(
    table: Arc<BackgroundExec>,
    id: String,
    mut child: tokio::process::Child,
    kill_rx: tokio::sync::oneshot::Receiver<()>,
    timeout: Duration,
) {
    tokio::spawn(async move {
        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(s) => (s.code(), false),
                Err(e) => {
                    warn!(session = %id, "background wait failed: {e}");
                    (None, false)
                }
            },
            _ = kill_rx => {
                let _ = child.kill().await;
                let code = child.wait().await.ok().and_then(|s| s.code());
                (code, false)
            }
            _ = tokio::time::sleep(timeout) => {
                warn!(session = %id, "background exec exceeded timeout; killing");
                let _ = child.kill().await;
                let code = child.wait().await.ok().and_then(|s| s.code());
                (code, true)
            }
        };
        table.mark_finished(&id, outcome.0, outcome.1);
    });
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> std::path::PathBuf {
        std::path::PathBuf::from("/bin/sh")
    }

    #[tokio::test]
    async fn spawn_appears_in_list() {
        let table = Arc::new(BackgroundExec::new());
        let id = table
            .spawn(&shell(), "sleep 5", None, Duration::from_secs(30))
            .unwrap();
        let listed = table.list();
        assert!(listed.iter().any(|j| j["sessionId"] == id.as_str()));
        table.kill(&id).unwrap();
    }

    #[tokio::test]
    async fn short_command_finishes_with_exit_code() {
        let table = Arc::new(BackgroundExec::new());
        let id = table
            .spawn(&shell(), "echo hi; exit 3", None, Duration::from_secs(30))
            .unwrap();
        // Wait for the supervisor to record completion.
        for _ in 0..100 {
            let v = table.poll(&id).unwrap();
            if v["status"] == "finished" {
                assert_eq!(v["exitCode"], 3);
                assert_eq!(v["timedOut"], false);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("background job never finished");
    }

    #[tokio::test]
    async fn kill_then_poll_reports_finished() {
        let table = Arc::new(BackgroundExec::new());
        let id = table
            .spawn(&shell(), "sleep 30", None, Duration::from_secs(60))
            .unwrap();
        table.kill(&id).unwrap();
        for _ in 0..100 {
            let v = table.poll(&id).unwrap();
            if v["status"] == "finished" {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("killed job never reported finished");
    }

    #[tokio::test]
    async fn timeout_kills_and_flags() {
        let table = Arc::new(BackgroundExec::new());
        let id = table
            .spawn(&shell(), "sleep 30", None, Duration::from_millis(100))
            .unwrap();
        for _ in 0..100 {
            let v = table.poll(&id).unwrap();
            if v["status"] == "finished" {
                assert_eq!(v["timedOut"], true);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed-out job never reported finished");
    }

    #[tokio::test]
    async fn logs_capture_stdout() {
        let table = Arc::new(BackgroundExec::new());
        let id = table
            .spawn(&shell(), "echo one; echo two", None, Duration::from_secs(30))
            .unwrap();
        for _ in 0..100 {
            if table.poll(&id).unwrap()["status"] == "finished" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let logs = table.logs(&id, 100).unwrap();
        let stdout = logs["stdout"].as_str().unwrap();
        assert!(stdout.contains("one"));
        assert!(stdout.contains("two"));
    }

    #[tokio::test]
    async fn remove_forgets_the_session() {
        let table = Arc::new(BackgroundExec::new());
        let id = table
            .spawn(&shell(), "true", None, Duration::from_secs(30))
            .unwrap();
        table.remove(&id).unwrap();
        assert_eq!(table.poll(&id).unwrap_err().kind(), "not_found");
    }

    #[test]
    fn bounded_buffer_drops_oldest() {
        let mut buf = BoundedBuffer::default();
        let line = "x".repeat(1024);
        for _ in 0..1000 {
            buf.push(line.clone());
        }
        assert!(buf.bytes <= STREAM_CAP_BYTES);
        assert!(!buf.lines.is_empty());
    }

    #[test]
    fn unknown_session_is_not_found() {
        let table = BackgroundExec::new();
        assert_eq!(table.poll("nope").unwrap_err().kind(), "not_found");
        assert_eq!(table.kill("nope").unwrap_err().kind(), "not_found");
    }
}
