// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use asimi_config::Config;
use asimi_core::{slug, SessionEvent};
use asimi_shell::{detect_engine, HostRunner, PolicyRunner, SandboxRunner, ShellRunner};
use asimi_store::{SessionStore, StoreHandle};

/// Owns the process-wide collaborators: the shell runner, the session
/// store, and the UI-notify channel.  Components receive what they need at
/// construction instead of reaching for globals.
pub struct AppContext {
    pub shell: Arc<PolicyRunner>,
    pub store: Option<Arc<SessionStore>>,
    pub store_handle: Option<StoreHandle>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

impl AppContext {
    pub async fn build(
        config: &Config,
        workdir: &Path,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> anyhow::Result<Self> {
        // Sandbox: probe for a container engine once; the policy decides
        // per command whether to use it, fall back, or refuse.
        let sandbox = match detect_engine().await {
            Some(engine) => {
                let image = config.run_in_shell.image_name.clone().unwrap_or_else(|| {
                    format!("asimi-sandbox-{}:latest", slug::project_slug(workdir))
                });
                debug!(engine, image = %image, "container engine available");
                Some(Arc::new(SandboxRunner::new(
                    engine,
                    image,
                    workdir.to_path_buf(),
                    shell_timeout(config),
                    config.run_in_shell.no_cleanup,
                )))
            }
            None => {
                debug!("no container engine detected");
                None
            }
        };
        let host = Arc::new(HostRunner::new(shell_timeout(config)));

        // Forward shell-policy warnings (host fallback notices) as toasts.
        let (warn_tx, mut warn_rx) = mpsc::channel::<String>(16);
        let toast = events.clone();
        tokio::spawn(async move {
            while let Some(text) = warn_rx.recv().await {
                let _ = toast.send(SessionEvent::Warning(text));
            }
        });

        let shell = Arc::new(PolicyRunner::new(
            &config.run_in_shell,
            sandbox,
            host,
            Some(warn_tx),
        )?);

        let (store, store_handle) = if config.session.enabled {
            let store = Arc::new(SessionStore::open(&asimi_store::default_db_path()?)?);
            let handle = StoreHandle::spawn(Arc::clone(&store));
            (Some(store), Some(handle))
        } else {
            (None, None)
        };

        Ok(Self { shell, store, store_handle, events })
    }

    /// Flush pending session writes and release the shell.
    pub async fn shutdown(self) {
        if let Some(handle) = self.store_handle {
            handle.close().await;
        }
        if let Err(e) = self.shell.close().await {
            warn!(error = %e, "shell close failed");
        }
    }
}

fn shell_timeout(config: &Config) -> Duration {
    Duration::from_secs(config.run_in_shell.timeout_minutes * 60)
}
