// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::paths::{display_path, resolve_in_workdir};
use crate::tool::{optional_str, require_str, Tool, ToolError};

/// Match cap so a loose pattern over a large tree stays readable.
const MAX_MATCHES: usize = 200;

pub struct GrepTool {
    workdir: PathBuf,
}

impl GrepTool {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression.\n\
         Searches the whole project by default; pass path to narrow the scope\n\
         to a file or directory. flags: 'i' for case-insensitive matching.\n\
         Output is path:line:content, capped at 200 matches.\n\
         Hidden directories and binary files are skipped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (optional, default whole project)"
                },
                "flags": {
                    "type": "string",
                    "description": "Matching flags: 'i' = case-insensitive (optional)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn call(&self, args: Value) -> Result<String, ToolError> {
        let pattern = require_str(&args, "pattern")?;
        let flags = optional_str(&args, "flags").unwrap_or("");
        let root = match optional_str(&args, "path") {
            Some(raw) => resolve_in_workdir(&self.workdir, raw)?,
            None => self.workdir.clone(),
        };

        let re = RegexBuilder::new(pattern)
            .case_insensitive(flags.contains('i'))
            .build()
            .map_err(|e| ToolError::Validation(format!("bad pattern {pattern:?}: {e}")))?;

        debug!(pattern = %pattern, root = %root.display(), "grep tool");

        let mut matches: Vec<String> = Vec::new();
        let mut total = 0usize;
        for entry in WalkDir::new(&root)
            .into_iter()
            // The search root itself may carry a hidden name; only prune
            // hidden entries below it.
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
            .flatten()
            .filter(|e| e.file_type().is_file())
        {
            let Ok(bytes) = std::fs::read(entry.path()) else {
                continue;
            };
            if looks_binary(&bytes) {
                continue;
            }
            let text = String::from_utf8_lossy(&bytes);
            let shown = display_path(&self.workdir, entry.path());
            for (lineno, line) in text.lines().enumerate() {
                if re.is_match(line) {
                    total += 1;
                    if matches.len() < MAX_MATCHES {
                        matches.push(format!("{shown}:{}:{line}", lineno + 1));
                    }
                }
            }
        }

        if matches.is_empty() {
            return Ok("(no matches)".into());
        }
        let mut out = matches.join("\n");
        if total > MAX_MATCHES {
            out.push_str(&format!(
                "\n...[{} more matches; use a more specific pattern or path]",
                total - MAX_MATCHES
            ));
        }
        Ok(out)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n != "." && n != "..")
}

/// Null byte in the first 4 KiB marks a file as binary.
fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(4096)].contains(&0)
}
