// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::warn;

use asimi_config::RunInShellConfig;

use crate::runner::{ShellError, ShellInput, ShellOutput, ShellRunner};
use crate::{HostRunner, SandboxRunner};

/// Where a command will execute, decided before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selection {
    /// Matched the run-on-host allowlist.
    HostAllowlisted,
    Sandbox,
    /// Engine unreachable, fallback permitted.
    HostFallback,
    /// Engine unreachable and fallback disabled.
    Unavailable,
}

/// Per-command routing between the sandboxed shell and the host shell.
///
/// `sandbox` is `None` when no container engine was detected at startup;
/// the policy then either falls back to the host (with a warning event) or
/// fails the call with a harness error.
pub struct PolicyRunner {
    sandbox: Option<Arc<SandboxRunner>>,
    host: Arc<HostRunner>,
    run_on_host: Vec<Regex>,
    allow_host_fallback: bool,
    warnings: Option<mpsc::Sender<String>>,
}

impl PolicyRunner {
    pub fn new(
        cfg: &RunInShellConfig,
        sandbox: Option<Arc<SandboxRunner>>,
        host: Arc<HostRunner>,
        warnings: Option<mpsc::Sender<String>>,
    ) -> anyhow::Result<Self> {
        let run_on_host = cfg
            .run_on_host
            .iter()
            .map(|p| Regex::new(p).map_err(|e| anyhow::anyhow!("bad run_on_host regex {p:?}: {e}")))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            sandbox,
            host,
            run_on_host,
            allow_host_fallback: cfg.allow_host_fallback,
            warnings,
        })
    }

    pub(crate) fn select(&self, command: &str) -> Selection {
        if self.run_on_host.iter().any(|re| re.is_match(command)) {
            Selection::HostAllowlisted
        } else if self.sandbox.is_some() {
            Selection::Sandbox
        } else if self.allow_host_fallback {
            Selection::HostFallback
        } else {
            Selection::Unavailable
        }
    }

    async fn emit_warning(&self, text: String) {
        warn!("{text}");
        if let Some(tx) = &self.warnings {
            let _ = tx.send(text).await;
        }
    }
}

#[async_trait]
impl ShellRunner for PolicyRunner {
    async fn run(&self, input: &ShellInput) -> Result<ShellOutput, ShellError> {
        match self.select(&input.command) {
            Selection::HostAllowlisted => self.host.run(input).await,
            Selection::Sandbox => {
                // select() only returns Sandbox when the runner exists.
                self.sandbox.as_ref().unwrap().run(input).await
            }
            Selection::HostFallback => {
                self.emit_warning(format!(
                    "container engine unreachable; running on host: {}",
                    input.description
                ))
                .await;
                self.host.run(input).await
            }
            Selection::Unavailable => Err(ShellError::Harness(
                "container engine unreachable and host fallback is disabled \
                 (set run_in_shell.allow_host_fallback = true to permit it)"
                    .into(),
            )),
        }
    }

    async fn restart(&self) -> Result<(), ShellError> {
        if let Some(sb) = &self.sandbox {
            sb.restart().await?;
        }
        self.host.restart().await
    }

    async fn close(&self) -> Result<(), ShellError> {
        if let Some(sb) = &self.sandbox {
            sb.close().await?;
        }
        self.host.close().await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
