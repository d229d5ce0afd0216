// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::runner::{ShellError, ShellInput, ShellOutput, ShellRunner, EXIT_TIMEOUT};

/// Return the first available container engine, probing `docker` then
/// `podman`.  `None` means sandboxed execution is unavailable on this host.
pub async fn detect_engine() -> Option<&'static str> {
    for engine in ["docker", "podman"] {
        let probe = Command::new(engine)
            .arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if matches!(probe, Ok(s) if s.success()) {
            return Some(engine);
        }
    }
    None
}

enum State {
    Uninitialized,
    Ready(Shell),
    Closed,
}

struct Shell {
    container: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Persistent sandboxed shell: one long-lived `bash` inside a container,
/// commands injected over stdin and demarcated by a unique sentinel token
/// that also carries the exit code.  Keeping the shell warm avoids the
/// container cold-start on every command (>100× faster than `docker run`
/// per command).
pub struct SandboxRunner {
    engine: String,
    image: String,
    workdir: PathBuf,
    timeout: Duration,
    no_cleanup: bool,
    state: Mutex<State>,
}

impl SandboxRunner {
    pub fn new(
        engine: impl Into<String>,
        image: impl Into<String>,
        workdir: PathBuf,
        timeout: Duration,
        no_cleanup: bool,
    ) -> Self {
        Self {
            engine: engine.into(),
            image: image.into(),
            workdir,
            timeout,
            no_cleanup,
            state: Mutex::new(State::Uninitialized),
        }
    }

    /// Launch the container (detached, workdir bind-mounted at the same
    /// absolute path so paths are portable) and attach a persistent bash to
    /// it.  The inner `exec 2>&1` merges stderr into stdout so the sentinel
    /// reader observes one interleaved stream.
    async fn start_shell(&self) -> Result<Shell, ShellError> {
        let container = format!("asimi-{}", Uuid::new_v4().simple());
        let mount = format!("{}:{}", self.workdir.display(), self.workdir.display());

        let run = Command::new(&self.engine)
            .args(["run", "-d", "--name", &container, "-v", &mount, "-w"])
            .arg(&self.workdir)
            .args([self.image.as_str(), "sleep", "infinity"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ShellError::Harness(format!("cannot spawn {}: {e}", self.engine)))?;
        if !run.status.success() {
            return Err(ShellError::Harness(format!(
                "container start failed: {}",
                String::from_utf8_lossy(&run.stderr).trim()
            )));
        }

        let mut child = Command::new(&self.engine)
            .args(["exec", "-i", &container, "bash", "-c"])
            .arg("exec 2>&1; exec bash --norc --noprofile")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ShellError::Harness(format!("cannot attach shell: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ShellError::Harness("no stdin handle on shell".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShellError::Harness("no stdout handle on shell".into()))?;

        debug!(container = %container, image = %self.image, "sandbox shell started");
        Ok(Shell { container, child, stdin, stdout: BufReader::new(stdout) })
    }

    async fn teardown(&self, shell: &mut Shell, remove_container: bool) {
        let _ = shell.child.kill().await;
        if remove_container {
            let _ = Command::new(&self.engine)
                .args(["rm", "-f", &shell.container])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }
    }

    /// Send one command and read until the sentinel line.  Every error here
    /// is a harness error: the shell can no longer be trusted to be in sync.
    async fn exec_command(shell: &mut Shell, command: &str) -> Result<ShellOutput, ShellError> {
        let sentinel = format!("__ASIMI_DONE_{}__", Uuid::new_v4().simple());
        let payload = format!("{command}\necho \"{sentinel} $?\"\n");
        shell
            .stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| ShellError::Harness(format!("shell stdin write failed: {e}")))?;
        shell
            .stdin
            .flush()
            .await
            .map_err(|e| ShellError::Harness(format!("shell stdin flush failed: {e}")))?;

        let mut output = String::new();
        loop {
            let mut line = String::new();
            let n = shell
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| ShellError::Harness(format!("shell stdout read failed: {e}")))?;
            if n == 0 {
                return Err(ShellError::Harness("shell stream ended mid-command".into()));
            }
            match split_sentinel(&line, &sentinel) {
                Some((prefix, exit_code)) => {
                    output.push_str(&prefix);
                    let exit_code = exit_code.ok_or_else(|| {
                        ShellError::Harness("sentinel line carried no exit code".into())
                    })?;
                    return Ok(ShellOutput { output, exit_code });
                }
                None => output.push_str(&line),
            }
        }
    }
}

/// Split a line at the sentinel token.  Returns the output prefix that
/// preceded the sentinel (a command whose output lacked a trailing newline
/// shares the line) and the exit code that follows it.
fn split_sentinel(line: &str, sentinel: &str) -> Option<(String, Option<String>)> {
    let pos = line.find(sentinel)?;
    let prefix = line[..pos].to_string();
    let rest = line[pos + sentinel.len()..].trim();
    let exit_code = rest
        .split_whitespace()
        .next()
        .filter(|c| c.parse::<i32>().is_ok())
        .map(str::to_string);
    Some((prefix, exit_code))
}

#[async_trait]
impl ShellRunner for SandboxRunner {
    async fn run(&self, input: &ShellInput) -> Result<ShellOutput, ShellError> {
        let mut guard = self.state.lock().await;
        if matches!(*guard, State::Closed) {
            return Err(ShellError::Closed);
        }

        // Harness failures get exactly one automatic restart + retry.
        let mut last_err: Option<ShellError> = None;
        for attempt in 0..2 {
            if !matches!(*guard, State::Ready(_)) {
                match self.start_shell().await {
                    Ok(shell) => *guard = State::Ready(shell),
                    Err(e) => {
                        warn!(attempt, error = %e, "sandbox shell start failed");
                        last_err = Some(e);
                        continue;
                    }
                }
            }
            let State::Ready(shell) = &mut *guard else {
                unreachable!("state checked above");
            };

            match tokio::time::timeout(self.timeout, Self::exec_command(shell, &input.command))
                .await
            {
                Ok(Ok(out)) => return Ok(out),
                Ok(Err(harness)) => {
                    warn!(attempt, error = %harness, "sandbox harness failure; restarting");
                    self.teardown(shell, true).await;
                    *guard = State::Uninitialized;
                    last_err = Some(harness);
                }
                Err(_) => {
                    // Sentinel synchronization is lost after a kill; the shell
                    // must be rebuilt before the next command.
                    self.teardown(shell, true).await;
                    *guard = State::Uninitialized;
                    return Ok(ShellOutput {
                        output: format!("command timed out after {}s", self.timeout.as_secs()),
                        exit_code: EXIT_TIMEOUT.into(),
                    });
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ShellError::Harness("sandbox unavailable".into())))
    }

    async fn restart(&self) -> Result<(), ShellError> {
        let mut guard = self.state.lock().await;
        match &mut *guard {
            State::Closed => return Err(ShellError::Closed),
            State::Ready(shell) => {
                self.teardown(shell, true).await;
                *guard = State::Uninitialized;
            }
            State::Uninitialized => {}
        }
        let shell = self.start_shell().await?;
        *guard = State::Ready(shell);
        Ok(())
    }

    async fn close(&self) -> Result<(), ShellError> {
        let mut guard = self.state.lock().await;
        if let State::Ready(shell) = &mut *guard {
            self.teardown(shell, !self.no_cleanup).await;
        }
        *guard = State::Closed;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
