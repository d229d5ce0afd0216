// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::paths::{display_path, resolve_in_workdir};
use crate::tool::{require_str, Tool, ToolError};

pub struct EditFileTool {
    workdir: PathBuf,
}

impl EditFileTool {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact text snippet in a file.\n\
         old_text must match the file exactly once, including whitespace and\n\
         indentation. If it matches several places, include more surrounding\n\
         context to make it unique. Use write_file to create new files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the project working directory"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to replace (must be unique in the file)"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let raw = require_str(&args, "path")?;
        let old_text = require_str(&args, "old_text")?;
        let new_text = require_str(&args, "new_text")?;
        if old_text.is_empty() {
            return Err(ToolError::Validation("old_text must not be empty".into()));
        }
        let path = resolve_in_workdir(&self.workdir, raw)?;

        debug!(path = %path.display(), "edit_file tool");

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Execution(format!("read error: {e}")))?;

        let matches = content.matches(old_text).count();
        let shown = display_path(&self.workdir, &path);
        match matches {
            0 => Err(ToolError::Execution(format!(
                "old_text not found in {shown}; re-read the file and match it exactly"
            ))),
            1 => {
                let updated = content.replacen(old_text, new_text, 1);
                tokio::fs::write(&path, updated)
                    .await
                    .map_err(|e| ToolError::Execution(format!("write error: {e}")))?;
                Ok(format!("replaced 1 occurrence in {shown}"))
            }
            n => Err(ToolError::Execution(format!(
                "old_text matches {n} locations in {shown}; \
                 include more surrounding context to make it unique"
            ))),
        }
    }
}
