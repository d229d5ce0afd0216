// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::runner::{
    ShellError, ShellInput, ShellOutput, ShellRunner, EXIT_SPAWN_FAILURE, EXIT_TIMEOUT,
};

/// Runs commands directly with the operating system shell.
///
/// Selected for allowlisted commands that need host credentials (e.g. `gh`)
/// and as the fallback when the container engine is unreachable.  Each
/// command is a fresh `bash -c` process, so restart is a no-op.
pub struct HostRunner {
    timeout: Duration,
    closed: AtomicBool,
}

impl HostRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, closed: AtomicBool::new(false) }
    }
}

#[async_trait]
impl ShellRunner for HostRunner {
    async fn run(&self, input: &ShellInput) -> Result<ShellOutput, ShellError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShellError::Closed);
        }
        debug!(cmd = %input.command, "running on host");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&input.command);
        // No terminal access for subprocesses; a dropped future must not
        // leave the child running.
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(out)) => {
                let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&out.stderr);
                if !stderr.is_empty() {
                    output.push_str(&stderr);
                }
                Ok(ShellOutput {
                    output,
                    exit_code: out.status.code().unwrap_or(-1).to_string(),
                })
            }
            Ok(Err(e)) => Ok(ShellOutput {
                output: format!("spawn error: {e}"),
                exit_code: EXIT_SPAWN_FAILURE.into(),
            }),
            Err(_) => Ok(ShellOutput {
                output: format!("command timed out after {}s", self.timeout.as_secs()),
                exit_code: EXIT_TIMEOUT.into(),
            }),
        }
    }

    async fn restart(&self) -> Result<(), ShellError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShellError::Closed);
        }
        // Stateless: every run is a fresh process.
        Ok(())
    }

    async fn close(&self) -> Result<(), ShellError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
