// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use thiserror::Error;

/// Exit code reported when a command hits the wall-clock timeout.
/// Matches the convention of coreutils `timeout(1)`.
pub const EXIT_TIMEOUT: &str = "124";

/// Exit code reported when the command could not be spawned at all.
pub const EXIT_SPAWN_FAILURE: &str = "-1";

#[derive(Debug, Clone)]
pub struct ShellInput {
    pub command: String,
    /// Short human-readable description shown in the UI while running.
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ShellOutput {
    /// stdout + stderr interleaved as observed.
    pub output: String,
    /// Decimal exit code as a string; [`EXIT_TIMEOUT`] on timeout,
    /// [`EXIT_SPAWN_FAILURE`] when the command never started.
    pub exit_code: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == "0"
    }
}

/// Infrastructure failures of the shell itself, distinct from a non-zero
/// exit code of the command it ran.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("shell runner is closed")]
    Closed,

    /// Process died, stream EOF mid-command, sentinel never observed.
    /// The runner retries once with a fresh shell before surfacing this.
    #[error("shell harness failure: {0}")]
    Harness(String),
}

/// A persistent shell with run/restart/close lifecycle.
///
/// Implementations serialize access internally: one outstanding `run` at a
/// time.  Timeouts are reported as a normal [`ShellOutput`] with exit code
/// `"124"`, never as a [`ShellError`].
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, input: &ShellInput) -> Result<ShellOutput, ShellError>;

    /// Tear down the current shell and launch a fresh one with the same
    /// configuration.  Idempotent; safe to call while idle.
    async fn restart(&self) -> Result<(), ShellError>;

    /// Terminate the shell and free resources.  Subsequent `run` calls fail
    /// with [`ShellError::Closed`].
    async fn close(&self) -> Result<(), ShellError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
