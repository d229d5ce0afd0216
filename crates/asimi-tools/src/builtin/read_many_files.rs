// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::paths::{display_path, resolve_in_workdir};
use crate::tool::{Tool, ToolError};

/// Upper bound on expanded files per call, so a `**/*` glob cannot flood
/// the context window.
const MAX_FILES: usize = 50;

pub struct ReadManyFilesTool {
    workdir: PathBuf,
}

impl ReadManyFilesTool {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }

    /// Expand one entry into concrete paths.  Entries without glob
    /// metacharacters resolve to a single file; glob entries expand relative
    /// to the working directory, confined to it.
    fn expand(&self, entry: &str) -> Result<Vec<PathBuf>, ToolError> {
        if !entry.contains(['*', '?', '[']) {
            return Ok(vec![resolve_in_workdir(&self.workdir, entry)?]);
        }
        let pattern = self.workdir.join(entry);
        let matches = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| ToolError::Validation(format!("bad glob {entry:?}: {e}")))?;
        let mut out = Vec::new();
        for m in matches.flatten() {
            if m.is_file() {
                // Confinement check on the expanded result, not the pattern.
                out.push(resolve_in_workdir(&self.workdir, &m.to_string_lossy())?);
            }
        }
        out.sort();
        Ok(out)
    }
}

#[async_trait]
impl Tool for ReadManyFilesTool {
    fn name(&self) -> &str {
        "read_many_files"
    }

    fn description(&self) -> &str {
        "Read several files in one call. Each entry is a path or a glob\n\
         (e.g. \"src/**/*.rs\"). Files are concatenated with a header line\n\
         per file. At most 50 files are returned per call."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "File paths or glob patterns, relative to the working directory"
                }
            },
            "required": ["paths"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let entries = args
            .get("paths")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ToolError::Validation("missing required parameter 'paths'".into()))?;
        if entries.is_empty() {
            return Err(ToolError::Validation("'paths' must not be empty".into()));
        }

        let mut files: Vec<PathBuf> = Vec::new();
        for e in entries {
            let entry = e
                .as_str()
                .ok_or_else(|| ToolError::Validation("'paths' entries must be strings".into()))?;
            files.extend(self.expand(entry)?);
        }
        files.dedup();

        debug!(count = files.len(), "read_many_files tool");

        let truncated = files.len() > MAX_FILES;
        files.truncate(MAX_FILES);

        let mut sections = Vec::with_capacity(files.len());
        for path in &files {
            let shown = display_path(&self.workdir, path);
            match tokio::fs::read_to_string(path).await {
                Ok(content) => sections.push(format!("--- {shown} ---\n{content}")),
                Err(e) => sections.push(format!("--- {shown} ---\n(read error: {e})")),
            }
        }
        if sections.is_empty() {
            return Ok("(no files matched)".into());
        }
        let mut out = sections.join("\n");
        if truncated {
            out.push_str(&format!("\n...[file limit of {MAX_FILES} reached]"));
        }
        Ok(out)
    }
}
