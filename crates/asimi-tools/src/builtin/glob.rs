// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::paths::display_path;
use crate::tool::{require_str, Tool, ToolError};

/// Result cap so `**/*` on a large tree stays readable.
const MAX_RESULTS: usize = 500;

pub struct GlobTool {
    workdir: PathBuf,
}

impl GlobTool {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files by glob pattern, relative to the project working\n\
         directory. Supports ** for recursive matching, e.g. \"src/**/*.rs\".\n\
         Returns matching paths sorted by name, capped at 500."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. \"**/*.toml\""
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let pattern = require_str(&args, "pattern")?;
        if pattern.contains("..") {
            return Err(ToolError::Validation(format!(
                "path escapes the working directory: {pattern}"
            )));
        }
        let full = self.workdir.join(pattern);

        debug!(pattern = %pattern, "glob tool");

        let paths = glob::glob(&full.to_string_lossy())
            .map_err(|e| ToolError::Validation(format!("bad glob {pattern:?}: {e}")))?;

        let mut results: Vec<String> = paths
            .flatten()
            .filter(|p| p.is_file())
            .map(|p| display_path(&self.workdir, &p))
            .collect();
        results.sort();

        if results.is_empty() {
            return Ok("(no matches)".into());
        }
        let total = results.len();
        results.truncate(MAX_RESULTS);
        let mut out = results.join("\n");
        if total > MAX_RESULTS {
            out.push_str(&format!("\n...[{} more matches]", total - MAX_RESULTS));
        }
        Ok(out)
    }
}
