// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Token estimation used for context accounting.
//!
//! A chars/4 heuristic is used for every provider.  It is deliberately
//! approximate; the consumers are proportional displays and the compaction
//! trigger, both of which tolerate a few percent of error.

use crate::{Message, Part, ToolSchema};

/// Approximate token count of a text: `ceil(bytes / 4)`.
pub fn count_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Approximate token count of one message (minimum 1).
pub fn message_tokens(m: &Message) -> usize {
    let chars: usize = m
        .parts
        .iter()
        .map(|p| match p {
            Part::Text { text } => text.len(),
            Part::ToolCall { name, arguments, .. } => name.len() + arguments.len(),
            Part::ToolCallResponse { content, .. } => content.len(),
        })
        .sum();
    (chars / 4).max(1)
}

/// Approximate token count of the serialized tool schema list.
pub fn schema_tokens(tools: &[ToolSchema]) -> usize {
    tools
        .iter()
        .map(|t| {
            let params = t.parameters.to_string();
            (t.name.len() + t.description.len() + params.len()) / 4
        })
        .sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
