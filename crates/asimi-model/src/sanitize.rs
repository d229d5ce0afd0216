// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! History sanitization: repair a message tail left malformed by an
//! interrupted turn before it is sent to a provider or persisted.
//!
//! Providers reject histories in which an assistant tool call has no
//! matching tool response.  Sanitization trims such state from the tail:
//!
//! - a trailing AI message that still contains ToolCall parts (its
//!   responses never arrived),
//! - a trailing Tool message whose response id does not match any ToolCall
//!   of the nearest preceding AI message, or that stands without one,
//! - a trailing tool-interaction group whose response set is incomplete.
//!
//! The rules are iterated until the tail is well-formed, so the function is
//! a fixpoint: applying it twice yields the same sequence.

use std::collections::HashSet;

use crate::{Message, Part, Role};

/// Trim malformed state from the tail of `messages`.  Returns the number of
/// messages removed.
pub fn sanitize_history(messages: &mut Vec<Message>) -> usize {
    let before = messages.len();
    loop {
        if !(pop_bad_tail(messages) || pop_incomplete_group(messages)) {
            break;
        }
    }
    before - messages.len()
}

/// Apply the two single-message tail rules once.  Returns true when a
/// message was removed.
fn pop_bad_tail(messages: &mut Vec<Message>) -> bool {
    let Some(last) = messages.last() else {
        return false;
    };
    let drop = match last.role {
        // Rule 1: trailing assistant message with unanswered tool calls.
        Role::Ai => last.has_tool_calls(),
        // Rule 2: trailing tool response without a matching call.
        Role::Tool => !tool_message_matches(messages, messages.len() - 1),
        _ => false,
    };
    if drop {
        messages.pop();
    }
    drop
}

/// True when the Tool message at `idx` answers a ToolCall of the nearest
/// preceding AI message (scanning back over the contiguous Tool block).
fn tool_message_matches(messages: &[Message], idx: usize) -> bool {
    let mut start = idx;
    while start > 0 && messages[start - 1].role == Role::Tool {
        start -= 1;
    }
    if start == 0 || messages[start - 1].role != Role::Ai {
        return false;
    }
    let ids: HashSet<&str> = messages[start - 1]
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::ToolCall { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();
    match messages[idx].response_id() {
        Some(id) => ids.contains(id),
        None => false,
    }
}

/// Drop a trailing `AI(calls) + Tool*` group whose response set is
/// incomplete (some calls were answered, others never arrived).  Returns
/// true when the group was removed.
fn pop_incomplete_group(messages: &mut Vec<Message>) -> bool {
    // Only a group at the very tail can be incomplete; interior groups were
    // completed before the next AI/Human message was appended.
    let mut start = messages.len();
    while start > 0 && messages[start - 1].role == Role::Tool {
        start -= 1;
    }
    if start == messages.len() || start == 0 || messages[start - 1].role != Role::Ai {
        return false;
    }
    let ai_idx = start - 1;
    let call_ids: HashSet<String> = messages[ai_idx]
        .tool_calls()
        .into_iter()
        .map(|c| c.id)
        .collect();
    if call_ids.is_empty() {
        return false;
    }
    let answered: HashSet<String> = messages[start..]
        .iter()
        .filter_map(|m| m.response_id().map(str::to_string))
        .collect();
    if call_ids.is_subset(&answered) {
        return false;
    }
    messages.truncate(ai_idx);
    true
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
