// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The turn loop: model call → tool dispatch → repeat, in a plain and a
//! streaming flavour over the same implementation.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use asimi_model::{
    generate_with_refresh, sanitize::sanitize_history, GenerateOptions, Message, ModelError,
    StopReason, ToolCallRequest, ToolChoice,
};
use asimi_tools::{CompletionHandle, ToolError};

use crate::events::SessionEvent;
use crate::session::{Session, TOOL_LOOP_THRESHOLD};

/// Synthetic tool response body used when cancellation interrupts a turn.
const ABORT_RESPONSE: &str = "error: session aborted by user";

/// How one `ask` / `ask_stream` invocation ended.
enum TurnOutcome {
    /// The model finished talking; the final assistant text.
    Completed(String),
    /// Cancelled; text streamed before the interruption.
    Interrupted { partial: String },
    /// Turn cap reached; the last assistant text.
    MaxTurns(String),
    /// The model ran out of output tokens; the partial content.
    MaxTokens(String),
}

/// How one batch of tool calls ended.
enum Dispatch {
    Continue,
    Aborted,
    LoopExit,
}

/// One planned invocation from a model batch: either a synthetic response
/// appended verbatim, or a scheduled execution to await.
enum Planned {
    Synthetic(String),
    Run(CompletionHandle),
}

impl Session {
    /// Submit a prompt and drive the turn loop to completion.
    /// Returns the final assistant text.
    pub async fn ask(&mut self, prompt: &str) -> anyhow::Result<String> {
        let outcome = self.run_turns(prompt, CancellationToken::new(), false).await?;
        Ok(match outcome {
            TurnOutcome::Completed(text)
            | TurnOutcome::Interrupted { partial: text }
            | TurnOutcome::MaxTurns(text)
            | TurnOutcome::MaxTokens(text) => text,
        })
    }

    /// Streaming variant of [`ask`]: chunks and lifecycle events are
    /// published to the notifier, and `cancel` interrupts the turn within
    /// tens of milliseconds.  Exactly one terminal event
    /// (`StreamComplete` | `StreamInterrupted` | `StreamError`) is
    /// published per call.
    pub async fn ask_stream(
        &mut self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        match self.run_turns(prompt, cancel, true).await {
            Ok(TurnOutcome::Interrupted { partial }) => {
                self.notify(SessionEvent::StreamInterrupted { partial });
                Ok(())
            }
            Ok(_) => {
                self.notify(SessionEvent::StreamComplete);
                Ok(())
            }
            Err(e) => {
                self.notify(SessionEvent::StreamError { error: e.to_string() });
                Err(e)
            }
        }
    }

    async fn run_turns(
        &mut self,
        prompt: &str,
        cancel: CancellationToken,
        streaming: bool,
    ) -> anyhow::Result<TurnOutcome> {
        self.maybe_autocompact().await;

        if !self.disable_sanitization {
            let removed = sanitize_history(&mut self.messages);
            if removed > 0 {
                debug!(removed, "sanitized malformed history tail");
                self.recount();
            }
        }

        let text = format!("{}{}", self.take_attachments_prefix(), prompt);
        self.push(Message::human(text));
        self.loop_detector.reset();

        if streaming {
            self.notify(SessionEvent::StreamStart);
        }

        let schemas = self.tool_schemas();
        let mut prev_text: Option<String> = None;
        let mut last_text = String::new();
        // All text streamed during this ask, for the Interrupted event.
        let mut streamed_total = String::new();

        for _turn in 0..self.max_turns {
            // Per-call accumulator so a cancelled stream can flush exactly
            // the text that never made it into a message.
            let acc = Arc::new(Mutex::new(String::new()));
            let options = self.generate_options(streaming, &cancel, &acc);

            let response = generate_with_refresh(
                self.client.as_ref(),
                self.auth.as_ref(),
                &self.messages,
                &schemas,
                &options,
            )
            .await;

            let choice = match response {
                Ok(r) => r.into_first(),
                Err(ModelError::Cancelled) => {
                    let partial = acc.lock().unwrap().clone();
                    if !partial.is_empty() {
                        // Text only, never a dangling ToolCall.
                        self.push(Message::ai(partial.clone()));
                    }
                    streamed_total.push_str(&partial);
                    return Ok(TurnOutcome::Interrupted { partial: streamed_total });
                }
                Err(e) => return Err(e.into()),
            };

            if choice.stop_reason == StopReason::MaxTokens {
                if !choice.content.is_empty() {
                    self.push(Message::ai(choice.content.clone()));
                }
                self.notify(SessionEvent::StreamMaxTokensReached {
                    content: choice.content.clone(),
                });
                return Ok(TurnOutcome::MaxTokens(choice.content));
            }

            // Zero-information turn: same text as last turn, no tool calls.
            // Exit before appending so the history does not grow.
            if choice.tool_calls.is_empty() && prev_text.as_deref() == Some(choice.content.as_str())
            {
                return Ok(TurnOutcome::Completed(choice.content));
            }

            prev_text = Some(choice.content.clone());
            last_text = choice.content.clone();
            streamed_total.push_str(&choice.content);
            let calls = choice.tool_calls;
            self.push(Message::ai_with_calls(choice.content, calls.clone()));

            if calls.is_empty() {
                continue;
            }

            match self.dispatch_tool_calls(&calls, &cancel).await {
                Dispatch::Continue => {}
                Dispatch::Aborted => {
                    return Ok(TurnOutcome::Interrupted { partial: streamed_total })
                }
                Dispatch::LoopExit => return Ok(TurnOutcome::Completed(last_text)),
            }
        }

        self.notify(SessionEvent::StreamMaxTurnsExceeded { max: self.max_turns });
        Ok(TurnOutcome::MaxTurns(last_text))
    }

    fn generate_options(
        &self,
        streaming: bool,
        cancel: &CancellationToken,
        acc: &Arc<Mutex<String>>,
    ) -> GenerateOptions {
        let mut options = GenerateOptions {
            max_tokens: None,
            tool_choice: ToolChoice::Auto,
            on_chunk: None,
            on_reasoning: None,
            cancel: Some(cancel.clone()),
        };
        if streaming {
            let tx = self.notifier.clone();
            let acc = Arc::clone(acc);
            options.on_chunk = Some(Arc::new(move |chunk: &str| {
                acc.lock().unwrap().push_str(chunk);
                let _ = tx.send(SessionEvent::StreamChunk(chunk.to_string()));
            }));
            let tx = self.notifier.clone();
            options.on_reasoning = Some(Arc::new(move |chunk: &str| {
                let _ = tx.send(SessionEvent::StreamReasoningChunk(chunk.to_string()));
            }));
        }
        options
    }

    /// Execute one batch of tool calls.
    ///
    /// Planning walks the batch in order (cancellation check first, then
    /// loop detection, unknown tools, argument validation) and schedules
    /// everything runnable so independent calls execute in parallel.  The
    /// responses are appended in call order regardless of completion order.
    /// Every call gets exactly one response (never a dangling ToolCall).
    async fn dispatch_tool_calls(
        &mut self,
        calls: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Dispatch {
        let mut planned: Vec<Planned> = Vec::with_capacity(calls.len());
        let mut loop_exit = false;

        for call in calls {
            if cancel.is_cancelled() {
                planned.push(Planned::Synthetic(ABORT_RESPONSE.into()));
                continue;
            }
            if loop_exit {
                planned.push(Planned::Synthetic(
                    "error: tool call loop detected, call skipped".into(),
                ));
                continue;
            }
            let count = self.loop_detector.note(&call.name, &call.arguments);
            if count >= TOOL_LOOP_THRESHOLD {
                warn!(tool = %call.name, count, "tool call loop detected");
                planned.push(Planned::Synthetic(format!(
                    "tool call loop detected after {count} attempts, \
                     please try a different approach"
                )));
                loop_exit = true;
                continue;
            }
            let Some(tool) = self.registry.get(&call.name) else {
                planned.push(Planned::Synthetic(format!(
                    "error: unknown tool \"{}\"",
                    call.name
                )));
                continue;
            };
            let args: Value = match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    planned.push(Planned::Synthetic(format!(
                        "Error: invalid tool arguments: {e}"
                    )));
                    continue;
                }
            };
            planned.push(Planned::Run(self.scheduler.schedule(
                call.id.clone(),
                tool,
                args,
                cancel.clone(),
            )));
        }

        let mut aborted = cancel.is_cancelled();
        for (call, plan) in calls.iter().zip(planned) {
            let content = match plan {
                Planned::Synthetic(text) => text,
                Planned::Run(handle) => {
                    let result = handle.wait().await;
                    match (result.output, result.error) {
                        (Some(output), _) => output,
                        (None, Some(ToolError::Cancelled)) => {
                            aborted = true;
                            ABORT_RESPONSE.into()
                        }
                        (None, Some(e)) => format!("Error: {e}"),
                        (None, None) => "Error: tool returned no result".into(),
                    }
                }
            };
            self.push(Message::tool_response(&call.id, &call.name, content));
        }

        if aborted {
            Dispatch::Aborted
        } else if loop_exit {
            Dispatch::LoopExit
        } else {
            Dispatch::Continue
        }
    }
}
