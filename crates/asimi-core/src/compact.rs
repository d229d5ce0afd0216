// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tracing::warn;

use asimi_model::{generate_with_refresh, GenerateOptions, Message, Part, Role, ToolChoice};

use crate::events::SessionEvent;
use crate::session::Session;

/// Prompt used by automatic compaction.  Manual compaction may pass its own.
pub const DEFAULT_COMPACTION_PROMPT: &str =
    "Summarise the following conversation history in a concise, \
     information-dense way. Preserve all technical details, decisions, file \
     names, code snippets, and tool outputs that may be relevant to future \
     work. The summary will replace the original history to free up context \
     space.";

const SUMMARY_ACK: &str = "I understand. I'll continue from this context.";

impl Session {
    /// Replace the conversation with a model-written summary.
    ///
    /// On success the history becomes
    /// `[system, Human(summary), AI(acknowledgement)]` and the summary text
    /// is returned.  On a model error the original history is restored and
    /// the error propagated.
    pub async fn compact_history(&mut self, compaction_prompt: &str) -> anyhow::Result<String> {
        let tokens_before = self.counters.used();
        let system = self.messages[0].clone();

        let corpus = build_corpus(&self.messages);
        let original = std::mem::replace(
            &mut self.messages,
            vec![
                system.clone(),
                Message::human(format!("{compaction_prompt}\n\n{corpus}")),
            ],
        );
        self.recount();

        let options = GenerateOptions {
            tool_choice: ToolChoice::None,
            ..Default::default()
        };
        let result = generate_with_refresh(
            self.client.as_ref(),
            self.auth.as_ref(),
            &self.messages,
            &[],
            &options,
        )
        .await;

        match result {
            Ok(response) => {
                let summary = response.into_first().content;
                self.messages = vec![
                    system,
                    Message::human(format!("Previous conversation summary:\n\n{summary}")),
                    Message::ai(SUMMARY_ACK),
                ];
                self.loop_detector.reset();
                self.recount();
                self.notify(SessionEvent::ContextCompacted {
                    tokens_before,
                    tokens_after: self.counters.used(),
                });
                Ok(summary)
            }
            Err(e) => {
                self.messages = original;
                self.recount();
                Err(e.into())
            }
        }
    }

    /// Silent pre-prompt compaction: fires when free context has shrunk
    /// below 10% of the window and there is real history to compress.
    /// Failures are logged, never surfaced; the prompt proceeds either way.
    pub(crate) async fn maybe_autocompact(&mut self) {
        let info = self.context_info();
        let threshold = info.total_tokens as i64 / 10;
        if info.free_tokens >= threshold || self.messages.len() <= 2 {
            return;
        }
        if let Err(e) = self.compact_history(DEFAULT_COMPACTION_PROMPT).await {
            warn!(error = %e, "automatic compaction failed; continuing uncompacted");
        }
    }
}

/// Corpus fed to the compaction model call: the file-change evidence first,
/// then every Human and AI text part in order (tool-call parts omitted).
fn build_corpus(messages: &[Message]) -> String {
    let mut out = String::new();
    let changes = file_change_evidence(messages);
    if !changes.is_empty() {
        out.push_str("Files changed during this session:\n");
        for c in &changes {
            out.push_str(c);
            out.push('\n');
        }
        out.push('\n');
    }
    for m in messages {
        let label = match m.role {
            Role::Human => "User",
            Role::Ai => "Assistant",
            _ => continue,
        };
        let text = m.text();
        if !text.is_empty() {
            out.push_str(&format!("{label}: {text}\n\n"));
        }
    }
    out
}

/// Successful `write_file` / `edit_file` responses, as evidence lines.
fn file_change_evidence(messages: &[Message]) -> Vec<String> {
    let mut out = Vec::new();
    for m in messages.iter().filter(|m| m.role == Role::Tool) {
        for p in &m.parts {
            if let Part::ToolCallResponse { name, content, .. } = p {
                let is_change = name == "write_file" || name == "edit_file";
                let succeeded = !content.starts_with("Error") && !content.starts_with("error");
                if is_change && succeeded {
                    let first = content.lines().next().unwrap_or("");
                    out.push(format!("- {name}: {first}"));
                }
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
