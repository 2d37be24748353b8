//! Killable external tool processes.
//!
//! Every long-running tool invocation (ffmpeg normalize, whisper) is
//! spawned through [`ToolProcess`], which separates the wait path (owned
//! by the worker) from a cloneable [`KillHandle`] the cancel path uses to
//! terminate the child. Stderr is drained concurrently so the child can
//! never block on a full pipe, and its tail is kept for diagnostics.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use murmur_core::{Error, Result};

/// How many trailing stderr lines to keep for the failure diagnostic.
const STDERR_TAIL_LINES: usize = 20;

/// Cloneable handle that can terminate a running tool process.
#[derive(Clone)]
pub struct KillHandle {
    inner: Arc<Mutex<Option<Child>>>,
    label: String,
}

impl KillHandle {
    /// Best-effort terminate the child. A process that already exited is
    /// not an error.
    pub async fn kill(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(child) = guard.as_mut() {
            debug!(label = %self.label, "Killing tool process");
            let _ = child.start_kill();
        }
    }

    /// The label this process was spawned with (for logging).
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// A spawned external tool owned by the worker.
pub struct ToolProcess {
    inner: Arc<Mutex<Option<Child>>>,
    stderr_task: Option<JoinHandle<String>>,
    label: String,
}

impl ToolProcess {
    /// Spawn the command with stderr piped and drained in the background.
    pub fn spawn(mut command: Command, label: &str) -> Result<Self> {
        command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| Error::Audio(format!("Failed to launch {label}: {e}")))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail: Vec<String> = Vec::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
                tail.join("\n")
            })
        });

        Ok(Self {
            inner: Arc::new(Mutex::new(Some(child))),
            stderr_task,
            label: label.to_string(),
        })
    }

    /// A handle the cancel path can use to terminate this process.
    pub fn kill_handle(&self) -> KillHandle {
        KillHandle {
            inner: self.inner.clone(),
            label: self.label.clone(),
        }
    }

    /// Wait for the process to exit. Nonzero exit (including a kill
    /// signal) yields an error carrying the stderr tail; the caller
    /// decides whether that was a cancellation.
    pub async fn wait(mut self) -> Result<()> {
        let status = loop {
            let mut guard = self.inner.lock().await;
            let Some(child) = guard.as_mut() else {
                return Err(Error::Internal(format!(
                    "{} process handle already consumed",
                    self.label
                )));
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    // Drop the child so a late kill() is a no-op.
                    guard.take();
                    break status;
                }
                Ok(None) => {
                    drop(guard);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
                Err(e) => {
                    return Err(Error::Audio(format!("Waiting on {} failed: {e}", self.label)))
                }
            }
        };

        let stderr_tail = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            Ok(())
        } else {
            let detail = if stderr_tail.is_empty() {
                String::new()
            } else {
                format!(": {}", stderr_tail.trim())
            };
            Err(Error::Audio(format!(
                "{} exited with {status}{detail}",
                self.label
            )))
        }
    }
}
