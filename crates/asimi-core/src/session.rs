// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use uuid::Uuid;

use asimi_model::{tokens, Auth, Message, ModelClient, ToolSchema};
use asimi_tools::{ToolEvent, ToolRegistry, ToolScheduler};

use crate::events::SessionEvent;
use crate::prompts::{self, PromptContext};
use crate::slug;

/// Identical consecutive tool calls tolerated before the loop breaker fires.
pub(crate) const TOOL_LOOP_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub provider: String,
    pub model: String,
    pub working_dir: PathBuf,
    pub max_turns: u32,
    pub disable_sanitization: bool,
    /// Parallelism bound for concurrent tool execution.
    pub tool_concurrency: usize,
    /// Name of the project memory file injected into the system prompt.
    pub memory_file_name: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            model: "mock-model".into(),
            working_dir: PathBuf::from("."),
            max_turns: 999,
            disable_sanitization: false,
            tool_concurrency: asimi_tools::scheduler::DEFAULT_CONCURRENCY,
            memory_file_name: "AGENTS.md".into(),
        }
    }
}

/// Derived token counters, recomputed on mutation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TokenCounters {
    pub system_prompt: usize,
    pub system_tools: usize,
    pub memory_files: usize,
    pub messages: usize,
}

impl TokenCounters {
    pub fn used(&self) -> usize {
        self.system_prompt + self.system_tools + self.memory_files + self.messages
    }
}

/// Consecutive-identical-call detector.  The fingerprint is
/// SHA-256 over `name:args`; the counter resets on every new user message
/// and on rollback.
#[derive(Debug, Default)]
pub(crate) struct LoopDetector {
    last: Option<String>,
    count: u32,
}

impl LoopDetector {
    /// Record one call and return how many identical calls in a row this is.
    pub fn note(&mut self, name: &str, args: &str) -> u32 {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(args.as_bytes());
        let key = hex::encode(hasher.finalize());
        if self.last.as_deref() == Some(key.as_str()) {
            self.count += 1;
        } else {
            self.last = Some(key);
            self.count = 1;
        }
        self.count
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// The in-memory conversation: message history, turn loop, streaming,
/// compaction, and token accounting.
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub working_dir: PathBuf,
    pub project_slug: String,
    pub branch_slug: String,
    pub messages: Vec<Message>,

    /// Ephemeral context attachments (path → content), bundled into the next
    /// user prompt and then cleared.
    pub(crate) attachments: BTreeMap<String, String>,
    pub(crate) counters: TokenCounters,
    pub(crate) loop_detector: LoopDetector,

    pub(crate) client: Arc<dyn ModelClient>,
    pub(crate) auth: Arc<dyn Auth>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) scheduler: ToolScheduler,
    pub(crate) notifier: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) max_turns: u32,
    pub(crate) disable_sanitization: bool,
}

impl Session {
    /// Create a session with a freshly materialized system prompt.
    ///
    /// Must be called within a tokio runtime: the scheduler's status events
    /// are forwarded to `notifier` by a background task.
    pub fn new(
        options: SessionOptions,
        client: Arc<dyn ModelClient>,
        auth: Arc<dyn Auth>,
        registry: Arc<ToolRegistry>,
        notifier: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let now = Utc::now();
        let id = format!(
            "{}-{}",
            now.format("%Y%m%d-%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let project_slug = slug::project_slug(&options.working_dir);
        let branch_slug = slug::branch_slug(&options.working_dir);

        let memory = prompts::load_project_memory(&options.working_dir, &options.memory_file_name);
        let system = prompts::system_prompt(&PromptContext {
            working_dir: &options.working_dir,
            branch: &branch_slug,
            project_memory: memory.as_ref().map(|(n, c)| (n.as_str(), c.as_str())),
        });

        let (tool_tx, tool_rx) = mpsc::channel(64);
        tokio::spawn(forward_tool_events(tool_rx, notifier.clone()));
        let scheduler = ToolScheduler::new(options.tool_concurrency, tool_tx);

        let mut session = Self {
            id,
            created_at: now,
            last_updated: now,
            provider: options.provider,
            model: options.model,
            working_dir: options.working_dir,
            project_slug,
            branch_slug,
            messages: vec![Message::system(system)],
            attachments: BTreeMap::new(),
            counters: TokenCounters::default(),
            loop_detector: LoopDetector::default(),
            client,
            auth,
            registry,
            scheduler,
            notifier,
            max_turns: options.max_turns,
            disable_sanitization: options.disable_sanitization,
        };
        session.recount();
        session
    }

    /// Append a message and update the derived counters.
    pub(crate) fn push(&mut self, msg: Message) {
        self.counters.messages += tokens::message_tokens(&msg);
        self.messages.push(msg);
        self.last_updated = Utc::now();
    }

    /// Recompute every token counter from scratch.
    pub(crate) fn recount(&mut self) {
        self.counters.system_prompt = self
            .messages
            .first()
            .map(tokens::message_tokens)
            .unwrap_or(0);
        self.counters.messages = self
            .messages
            .iter()
            .skip(1)
            .map(tokens::message_tokens)
            .sum();
        self.counters.memory_files = self
            .attachments
            .values()
            .map(|c| tokens::count_tokens(c))
            .sum();
        self.counters.system_tools = tokens::schema_tokens(&self.tool_schemas());
    }

    /// Tool schemas in the model crate's shape.
    pub(crate) fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.registry
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }

    pub(crate) fn notify(&self, event: SessionEvent) {
        let _ = self.notifier.send(event);
    }

    // ── Context attachments ───────────────────────────────────────────────────

    /// Attach file content to the next user prompt.  Cleared after use.
    pub fn add_context_attachment(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.attachments.insert(path.into(), content.into());
        self.recount();
    }

    /// Render and clear the pending attachments.
    pub(crate) fn take_attachments_prefix(&mut self) -> String {
        if self.attachments.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for (path, content) in std::mem::take(&mut self.attachments) {
            out.push_str(&format!(
                "--- Context from: {path} ---\n{content}\n--- End ---\n"
            ));
        }
        self.recount();
        out
    }

    // ── Snapshot / rollback ───────────────────────────────────────────────────

    /// An integer sufficient to roll the session back to the current state.
    pub fn get_message_snapshot(&self) -> usize {
        self.messages.len()
    }

    /// Truncate the history to the first `n` messages.  `n` is clamped to
    /// `[1, len]` so the system message always survives.  Resets the
    /// tool-loop detector and recomputes token counters.
    pub fn rollback_to(&mut self, n: usize) {
        let n = n.clamp(1, self.messages.len());
        self.messages.truncate(n);
        self.loop_detector.reset();
        self.recount();
        self.last_updated = Utc::now();
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            created_at: self.created_at,
            last_updated: self.last_updated,
            provider: self.provider.clone(),
            model: self.model.clone(),
            working_dir: self.working_dir.to_string_lossy().into_owned(),
            project_slug: self.project_slug.clone(),
            branch_slug: self.branch_slug.clone(),
            messages: self.messages.clone(),
        }
    }

    /// Resume from a persisted snapshot, replacing identity and history.
    /// The loop detector resets; counters are recomputed.
    pub fn load_snapshot(&mut self, snap: SessionSnapshot) {
        self.id = snap.id;
        self.created_at = snap.created_at;
        self.last_updated = snap.last_updated;
        self.provider = snap.provider;
        self.model = snap.model;
        self.working_dir = PathBuf::from(&snap.working_dir);
        self.project_slug = snap.project_slug;
        self.branch_slug = snap.branch_slug;
        self.messages = snap.messages;
        self.loop_detector.reset();
        self.recount();
    }
}

/// Everything persisted for a session: the in-memory form minus the live
/// client, scheduler, and notifier handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub working_dir: String,
    pub project_slug: String,
    pub branch_slug: String,
    pub messages: Vec<Message>,
}

async fn forward_tool_events(
    mut rx: mpsc::Receiver<ToolEvent>,
    notifier: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(ev) = rx.recv().await {
        let mapped = match ev {
            ToolEvent::Scheduled { id, tool_name, input } => {
                SessionEvent::ToolCallScheduled { id, tool_name, input }
            }
            ToolEvent::Executing { id, tool_name, input } => {
                SessionEvent::ToolCallExecuting { id, tool_name, input }
            }
            ToolEvent::Success { id, tool_name, input, output } => {
                SessionEvent::ToolCallSuccess { id, tool_name, input, output }
            }
            ToolEvent::Error { id, tool_name, input, error, .. } => {
                SessionEvent::ToolCallError { id, tool_name, input, error }
            }
        };
        if notifier.send(mapped).is_err() {
            break;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
