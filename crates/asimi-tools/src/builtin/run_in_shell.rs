// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use asimi_shell::{ShellInput, ShellRunner};

use crate::tool::{optional_str, require_str, Tool, ToolError};

/// Byte ceiling for shell output returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;
const HEAD_LINES: usize = 100;
const TAIL_LINES: usize = 100;

/// Dispatches commands to the shell runner (sandboxed by default, host when
/// the policy says so).
pub struct RunInShellTool {
    runner: Arc<dyn ShellRunner>,
}

impl RunInShellTool {
    pub fn new(runner: Arc<dyn ShellRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for RunInShellTool {
    fn name(&self) -> &str {
        "run_in_shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the persistent project sandbox and return\n\
         its combined output. Shell state (cwd, exported variables) persists\n\
         across calls. 'description' is a short phrase shown to the user while\n\
         the command runs.\n\
         A non-zero exit code is reported in the output; a timeout shows as\n\
         exit code 124. Prefer non-interactive commands.\n\
         For large outputs pipe through `tail -200` to keep only what matters."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute (bash syntax)"
                },
                "description": {
                    "type": "string",
                    "description": "Short description of what the command does, e.g. 'run tests'"
                }
            },
            "required": ["command", "description"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let command = require_str(&args, "command")?.to_string();
        let description = optional_str(&args, "description").unwrap_or("").to_string();

        debug!(cmd = %command, "run_in_shell tool");

        let out = self
            .runner
            .run(&ShellInput { command, description })
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let body = head_tail_truncate(&out.output);
        if out.success() {
            Ok(if body.is_empty() { "[exit 0]".into() } else { body })
        } else {
            Ok(format!("[exit {}]\n{body}", out.exit_code))
        }
    }
}

/// Truncate `s` to fit within [`OUTPUT_LIMIT_BYTES`], keeping the first and
/// last lines with an omission marker in between.  Errors and summaries
/// almost always appear at the end of build/test output, so the tail is at
/// least as important as the head.
fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();

    if total <= HEAD_LINES + TAIL_LINES {
        // Byte budget exceeded by very long lines; split the budget.
        let head = &s[..OUTPUT_LIMIT_BYTES / 2];
        let tail = &s[s.len() - OUTPUT_LIMIT_BYTES / 2..];
        let omitted = s.len() - head.len() - tail.len();
        return format!("{head}\n...[{omitted} bytes omitted]...\n{tail}");
    }

    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[total - TAIL_LINES..].join("\n");
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    let omitted_bytes = s.len().saturating_sub(head.len() + tail.len());
    format!("{head}\n...[{omitted_lines} lines / ~{omitted_bytes} bytes omitted]...\n{tail}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use asimi_shell::HostRunner;

    fn tool(timeout_secs: u64) -> RunInShellTool {
        RunInShellTool::new(Arc::new(HostRunner::new(Duration::from_secs(timeout_secs))))
    }

    #[tokio::test]
    async fn successful_command_returns_output() {
        let out = tool(30)
            .call(json!({"command": "echo hi", "description": "say hi"}))
            .await
            .unwrap();
        assert_eq!(out, "hi\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_in_output_not_error() {
        let out = tool(30)
            .call(json!({"command": "echo oops && exit 3", "description": "fail"}))
            .await
            .unwrap();
        assert!(out.starts_with("[exit 3]"));
        assert!(out.contains("oops"));
    }

    #[tokio::test]
    async fn timeout_shows_exit_124() {
        let out = tool(1)
            .call(json!({"command": "sleep 30", "description": "hang"}))
            .await
            .unwrap();
        assert!(out.starts_with("[exit 124]"), "{out}");
        assert!(out.contains("timed out"));
    }

    #[tokio::test]
    async fn silent_success_reports_exit_zero() {
        let out = tool(30)
            .call(json!({"command": "true", "description": "noop"}))
            .await
            .unwrap();
        assert_eq!(out, "[exit 0]");
    }

    #[tokio::test]
    async fn missing_command_is_validation_error() {
        let err = tool(30).call(json!({"description": "x"})).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    // ── Head+tail truncation ──────────────────────────────────────────────────

    #[test]
    fn short_output_passes_through_unchanged() {
        let s = "hello\nworld\n";
        assert_eq!(head_tail_truncate(s), s);
    }

    #[test]
    fn head_and_tail_both_preserved_for_large_output() {
        let mut lines: Vec<String> = vec!["BUILD START".into()];
        for i in 0..800 {
            lines.push(format!("middle line {i} padding padding padding padding"));
        }
        lines.push("BUILD ERROR".into());
        let content = lines.join("\n");

        let result = head_tail_truncate(&content);
        assert!(result.contains("BUILD START"));
        assert!(result.contains("BUILD ERROR"));
        assert!(result.contains("omitted"));
        assert!(result.len() < content.len());
    }
}
