// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Events published by the session while it processes a prompt.
/// Consumers (the terminal UI, the headless CLI) subscribe to drive their
/// output; the session never blocks on them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Emitted once before the first model call of a streamed prompt.
    StreamStart,
    /// A text chunk streamed from the model, forwarded verbatim.
    StreamChunk(String),
    /// A reasoning/thinking chunk from the model.
    StreamReasoningChunk(String),
    /// The streamed prompt finished normally.
    StreamComplete,
    /// The streamed prompt was cancelled; `partial` holds the text streamed
    /// before the interruption.
    StreamInterrupted { partial: String },
    /// The streamed prompt failed with a model-layer error.
    StreamError { error: String },
    /// The turn loop hit its cap without the model finishing.
    StreamMaxTurnsExceeded { max: u32 },
    /// The model stopped because it ran out of output tokens.
    StreamMaxTokensReached { content: String },

    /// A tool invocation was accepted by the scheduler.
    ToolCallScheduled { id: String, tool_name: String, input: Value },
    /// The invocation acquired an execution slot.
    ToolCallExecuting { id: String, tool_name: String, input: Value },
    ToolCallSuccess { id: String, tool_name: String, input: Value, output: String },
    ToolCallError { id: String, tool_name: String, input: Value, error: String },

    /// Non-fatal notice shown as a toast (e.g. host-fallback shell).
    Warning(String),
    /// The conversation was compacted; statistics for the UI.
    ContextCompacted { tokens_before: usize, tokens_after: usize },
}

impl SessionEvent {
    /// True for the events that end an `ask_stream` call.  Exactly one of
    /// these is published per streamed prompt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::StreamComplete | Self::StreamInterrupted { .. } | Self::StreamError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(SessionEvent::StreamComplete.is_terminal());
        assert!(SessionEvent::StreamInterrupted { partial: String::new() }.is_terminal());
        assert!(SessionEvent::StreamError { error: "x".into() }.is_terminal());
        assert!(!SessionEvent::StreamStart.is_terminal());
        assert!(!SessionEvent::StreamChunk("x".into()).is_terminal());
        assert!(!SessionEvent::StreamMaxTurnsExceeded { max: 3 }.is_terminal());
    }
}
