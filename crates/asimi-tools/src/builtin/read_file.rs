// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::paths::resolve_in_workdir;
use crate::tool::{optional_u64, require_str, Tool, ToolError};

/// Default number of lines returned when the caller does not specify a limit.
/// Kept small to avoid flooding the model context on the first read; the
/// model can paginate with offset + limit to get more.
const DEFAULT_LINE_LIMIT: usize = 500;

pub struct ReadFileTool {
    workdir: PathBuf,
}

impl ReadFileTool {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the project. Returns up to 500 lines by default.\n\
         offset is the 1-indexed line to start from; limit caps the line count.\n\
         When more lines exist, a pagination notice shows the next offset.\n\
         Use grep first to find the relevant region, then read only those lines."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the project working directory"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 500)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let raw = require_str(&args, "path")?;
        let path = resolve_in_workdir(&self.workdir, raw)?;
        let offset = optional_u64(&args, "offset").unwrap_or(1).max(1) as usize;
        let limit = optional_u64(&args, "limit").unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        debug!(path = %path.display(), offset, limit, "read_file tool");

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Execution(format!("read error: {e}")))?;

        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();
        let start = offset - 1;
        let selected: Vec<&str> = all_lines.iter().skip(start).take(limit).copied().collect();
        let shown = selected.len();
        let mut content = selected.join("\n");

        let last_shown = start + shown;
        if last_shown < total {
            content.push_str(&format!(
                "\n...[{} more lines — showing {}-{} of {}; use offset={} to continue]",
                total - last_shown,
                offset,
                last_shown,
                total,
                last_shown + 1
            ));
        }
        Ok(content)
    }
}
