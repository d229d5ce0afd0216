// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    Choice, ContentResponse, GenerateOptions, Message, ModelClient, ModelError, Role, StopReason,
    ToolCallRequest, ToolSchema,
};

/// Deterministic mock client for tests.  Echoes the last human message back
/// as the assistant response.
#[derive(Default)]
pub struct MockClient;

#[async_trait]
impl ModelClient for MockClient {
    fn provider(&self) -> &str {
        "mock"
    }
    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate_content(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
        options: &GenerateOptions,
    ) -> Result<ContentResponse, ModelError> {
        if options.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        let reply = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Human)
            .map(|m| m.text())
            .unwrap_or_else(|| "[no input]".into());
        let content = format!("MOCK: {reply}");
        if let Some(cb) = &options.on_chunk {
            cb(&content);
        }
        Ok(ContentResponse::from_choice(Choice { content, ..Default::default() }))
    }
}

/// A pre-scripted mock client.  Each `generate_content` call pops the next
/// [`Choice`] from the front of the script queue, so tests specify exact
/// response sequences, including tool calls, without network access.
///
/// When the queue runs dry the last served choice is repeated, mimicking a
/// model that has nothing new to say.  The session's identical-turn
/// short-circuit terminates on exactly that repetition.
pub struct ScriptedMockClient {
    scripts: Mutex<Vec<Choice>>,
    last_served: Mutex<Option<Choice>>,
    calls: AtomicUsize,
    /// The last (messages, tools) pair seen, for request inspection.
    pub last_request: Mutex<Option<(Vec<Message>, Vec<ToolSchema>)>>,
}

impl ScriptedMockClient {
    pub fn new(scripts: Vec<Choice>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            last_served: Mutex::new(None),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Number of `generate_content` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Convenience: a plain text choice.
    pub fn text(content: impl Into<String>) -> Choice {
        Choice { content: content.into(), ..Default::default() }
    }

    /// Convenience: a choice that stops on `max_tokens` with partial content.
    pub fn max_tokens(content: impl Into<String>) -> Choice {
        Choice {
            content: content.into(),
            stop_reason: StopReason::MaxTokens,
            ..Default::default()
        }
    }

    /// Convenience: a choice carrying a single tool call.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Choice {
        Choice {
            stop_reason: StopReason::ToolUse,
            tool_calls: vec![ToolCallRequest {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
            }],
            ..Default::default()
        }
    }

    /// Convenience: a choice carrying several parallel tool calls.
    pub fn tool_calls(calls: Vec<(String, String, String)>) -> Choice {
        Choice {
            stop_reason: StopReason::ToolUse,
            tool_calls: calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCallRequest { id, name, arguments })
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedMockClient {
    fn provider(&self) -> &str {
        "mock"
    }
    fn model(&self) -> &str {
        "scripted-mock-model"
    }

    async fn generate_content(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerateOptions,
    ) -> Result<ContentResponse, ModelError> {
        if options.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        *self.last_request.lock().unwrap() = Some((messages.to_vec(), tools.to_vec()));
        self.calls.fetch_add(1, Ordering::SeqCst);

        let choice = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                self.last_served
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Choice { content: "[no more scripts]".into(), ..Default::default() })
            } else {
                let c = scripts.remove(0);
                *self.last_served.lock().unwrap() = Some(c.clone());
                c
            }
        };

        if let Some(cb) = &options.on_reasoning {
            if let Some(r) = &choice.reasoning_content {
                cb(r);
            }
        }
        if let Some(cb) = &options.on_chunk {
            if !choice.content.is_empty() {
                cb(&choice.content);
            }
        }
        Ok(ContentResponse::from_choice(choice))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
