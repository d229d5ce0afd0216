// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
    Tool,
}

/// A single content part of a message.
///
/// Serialized with an external `kind` tag so persisted snapshots are
/// self-describing:
/// `{"kind":"tool_call","id":"t1","name":"read_file","arguments":"{…}"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ToolCall {
        /// Opaque identifier assigned by the model (forwarded verbatim)
        id: String,
        name: String,
        /// JSON-encoded argument object
        arguments: String,
    },
    ToolCallResponse {
        /// The id of the originating ToolCall
        id: String,
        name: String,
        content: String,
    },
}

/// A single message in the conversation history: a role and an ordered
/// list of content parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, parts: vec![Part::Text { text: text.into() }] }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self { role: Role::Human, parts: vec![Part::Text { text: text.into() }] }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self { role: Role::Ai, parts: vec![Part::Text { text: text.into() }] }
    }

    /// Construct an assistant message from streamed text plus the tool calls
    /// returned in the same model turn.  An empty text produces no Text part.
    pub fn ai_with_calls(text: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        let text = text.into();
        let mut parts = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            parts.push(Part::Text { text });
        }
        for c in calls {
            parts.push(Part::ToolCall { id: c.id, name: c.name, arguments: c.arguments });
        }
        Self { role: Role::Ai, parts }
    }

    /// Construct a tool message holding exactly one response part.
    pub fn tool_response(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![Part::ToolCallResponse {
                id: id.into(),
                name: name.into(),
                content: content.into(),
            }],
        }
    }

    /// Concatenated text of all Text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::ToolCall { .. }))
    }

    /// All ToolCall parts of this message, in order.
    pub fn tool_calls(&self) -> Vec<ToolCallRequest> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall { id, name, arguments } => Some(ToolCallRequest {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// The id of the single ToolCallResponse part, for Tool messages.
    pub fn response_id(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            Part::ToolCallResponse { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

// ─── Completion types ─────────────────────────────────────────────────────────

/// A tool invocation requested by the model in a completion response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    EndTurn,
    MaxTokens,
    ToolUse,
}

/// One completion choice.  All current providers return exactly one.
#[derive(Debug, Clone, Default)]
pub struct Choice {
    pub content: String,
    pub reasoning_content: Option<String>,
    pub stop_reason: StopReason,
    pub tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct ContentResponse {
    pub choices: Vec<Choice>,
}

impl ContentResponse {
    pub fn from_choice(choice: Choice) -> Self {
        Self { choices: vec![choice] }
    }

    /// Consume the response, returning the first choice (empty when the
    /// provider returned none).
    pub fn into_first(mut self) -> Choice {
        if self.choices.is_empty() {
            Choice::default()
        } else {
            self.choices.swap_remove(0)
        }
    }
}

/// Callback invoked with each streamed chunk.
pub type ChunkFn = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
}

/// Per-request options for [`crate::ModelClient::generate_content`].
///
/// Callbacks are `Arc`s so the whole struct stays `Clone`; the OAuth retry
/// path re-issues the identical request after a token refresh.
#[derive(Clone, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub tool_choice: ToolChoice,
    /// Streamed text chunks.  When set, providers use their streaming API.
    pub on_chunk: Option<ChunkFn>,
    /// Streamed reasoning/thinking chunks (providers that support it).
    pub on_reasoning: Option<ChunkFn>,
    /// Cooperative cancellation observed between streamed chunks.
    pub cancel: Option<CancellationToken>,
}

impl GenerateOptions {
    /// True when the cancellation token is set and already cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

impl std::fmt::Debug for GenerateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateOptions")
            .field("max_tokens", &self.max_tokens)
            .field("tool_choice", &self.tool_choice)
            .field("on_chunk", &self.on_chunk.is_some())
            .field("on_reasoning", &self.on_reasoning.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
