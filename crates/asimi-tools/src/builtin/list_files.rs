// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::paths::resolve_in_workdir;
use crate::tool::{optional_str, Tool, ToolError};

pub struct ListFilesTool {
    workdir: PathBuf,
}

impl ListFilesTool {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a directory (non-recursive), sorted by name.\n\
         Directories are marked with a trailing slash.\n\
         Defaults to the project working directory when path is omitted.\n\
         Use glob for recursive file discovery."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path relative to the working directory (optional)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let path = match optional_str(&args, "path") {
            Some(raw) => resolve_in_workdir(&self.workdir, raw)?,
            None => self.workdir.clone(),
        };

        debug!(path = %path.display(), "list_files tool");

        let mut rd = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::Execution(format!("list error: {e}")))?;
        let mut entries: Vec<String> = Vec::new();
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| ToolError::Execution(format!("list error: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        if entries.is_empty() {
            return Ok("(empty directory)".into());
        }
        Ok(entries.join("\n"))
    }
}
