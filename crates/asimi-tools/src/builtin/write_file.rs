// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::paths::{display_path, resolve_in_workdir};
use crate::tool::{require_str, Tool, ToolError};

pub struct WriteFileTool {
    workdir: PathBuf,
}

impl WriteFileTool {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content.\n\
         Parent directories are created as needed.\n\
         For small targeted changes to an existing file prefer edit_file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the project working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Complete new file content"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let raw = require_str(&args, "path")?;
        let content = require_str(&args, "content")?;
        let path = resolve_in_workdir(&self.workdir, raw)?;

        debug!(path = %path.display(), bytes = content.len(), "write_file tool");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Execution(format!("mkdir error: {e}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::Execution(format!("write error: {e}")))?;

        Ok(format!(
            "wrote {} bytes to {}",
            content.len(),
            display_path(&self.workdir, &path)
        ))
    }
}
