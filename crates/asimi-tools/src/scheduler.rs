// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tool::{Tool, ToolError};

/// Default parallelism bound for concurrent tool execution.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Lifecycle notifications published while an invocation runs.
///
/// For any single invocation the order is strict:
/// `Scheduled ≺ Executing ≺ (Success | Error)`.  No ordering is guaranteed
/// between two concurrent invocations.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    Scheduled { id: String, tool_name: String, input: Value },
    Executing { id: String, tool_name: String, input: Value },
    Success { id: String, tool_name: String, input: Value, output: String },
    Error { id: String, tool_name: String, input: Value, error: String, cancelled: bool },
}

/// Final outcome of one scheduled invocation: exactly one of `output` /
/// `error` is set.
#[derive(Debug)]
pub struct ToolResult {
    pub output: Option<String>,
    pub error: Option<ToolError>,
}

/// Yields the [`ToolResult`] of one invocation, exactly once.
pub struct CompletionHandle {
    rx: oneshot::Receiver<ToolResult>,
}

impl CompletionHandle {
    pub async fn wait(self) -> ToolResult {
        self.rx.await.unwrap_or(ToolResult {
            output: None,
            error: Some(ToolError::Execution("tool task dropped".into())),
        })
    }
}

/// Concurrent tool dispatcher: executes invocations in parallel up to a
/// semaphore bound, publishing status events to the UI notifier.
///
/// `schedule` never blocks the caller beyond enqueueing: the spawned task
/// waits for a permit, so excess invocations queue in arrival order.
pub struct ToolScheduler {
    semaphore: Arc<Semaphore>,
    events: mpsc::Sender<ToolEvent>,
}

impl ToolScheduler {
    pub fn new(concurrency: usize, events: mpsc::Sender<ToolEvent>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            events,
        }
    }

    pub fn schedule(
        &self,
        id: impl Into<String>,
        tool: Arc<dyn Tool>,
        args: Value,
        cancel: CancellationToken,
    ) -> CompletionHandle {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let semaphore = Arc::clone(&self.semaphore);
        let events = self.events.clone();

        tokio::spawn(async move {
            let tool_name = tool.name().to_string();
            let _ = events
                .send(ToolEvent::Scheduled {
                    id: id.clone(),
                    tool_name: tool_name.clone(),
                    input: args.clone(),
                })
                .await;

            let Ok(permit) = semaphore.acquire_owned().await else {
                return; // scheduler dropped
            };
            let _ = events
                .send(ToolEvent::Executing {
                    id: id.clone(),
                    tool_name: tool_name.clone(),
                    input: args.clone(),
                })
                .await;
            debug!(id = %id, tool = %tool_name, "executing tool");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    ToolResult { output: None, error: Some(ToolError::Cancelled) }
                }
                r = tool.call(args.clone()) => match r {
                    Ok(output) => ToolResult { output: Some(output), error: None },
                    Err(e) => ToolResult { output: None, error: Some(e) },
                },
            };
            drop(permit);

            let event = match &result {
                ToolResult { output: Some(output), .. } => ToolEvent::Success {
                    id: id.clone(),
                    tool_name,
                    input: args,
                    output: output.clone(),
                },
                ToolResult { error, .. } => {
                    let error = error.as_ref().expect("result has output or error");
                    ToolEvent::Error {
                        id: id.clone(),
                        tool_name,
                        input: args,
                        error: error.to_string(),
                        cancelled: matches!(error, ToolError::Cancelled),
                    }
                }
            };
            let _ = events.send(event).await;
            let _ = tx.send(result);
        });

        CompletionHandle { rx }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
