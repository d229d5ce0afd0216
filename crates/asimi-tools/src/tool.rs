// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    /// Bad path, bad JSON arguments, path escape attempt.
    #[error("validation error: {0}")]
    Validation(String),

    /// The tool ran and failed; the message becomes the tool response body.
    #[error("{0}")]
    Execution(String),

    /// Cooperative cancellation observed while the tool was in flight.
    #[error("session aborted by user")]
    Cancelled,
}

/// Trait implemented by every tool the model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the argument object.
    fn parameters_schema(&self) -> Value;
    /// Execute with parsed JSON arguments, returning the text shown to the
    /// model.
    async fn call(&self, args: Value) -> Result<String, ToolError>;
    /// One-line presentation of an invocation for the UI collaborator.
    fn format(&self, input: &Value, output: Option<&str>, error: Option<&str>) -> String {
        let args = input.to_string();
        match (output, error) {
            (_, Some(e)) => format!("{}({args}) failed: {e}", self.name()),
            (Some(o), None) => {
                let first = o.lines().next().unwrap_or("");
                format!("{}({args}) → {first}", self.name())
            }
            (None, None) => format!("{}({args})", self.name()),
        }
    }
}

// ── Argument helpers ──────────────────────────────────────────────────────────

pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::Validation(format!("missing required parameter '{key}'")))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

pub(crate) fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(|v| v.as_u64())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
