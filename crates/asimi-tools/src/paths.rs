// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Working-directory confinement for file tools.
//!
//! Defense-in-depth, not a security boundary: the sandbox container is the
//! real isolation layer.  Path validation keeps the model's file operations
//! inside the project so an errant `../../etc/passwd` fails loudly.

use std::path::{Component, Path, PathBuf};

use crate::tool::ToolError;

/// Resolve `raw` against `workdir` and verify the result stays inside it.
///
/// Normalization is lexical (`..` pops a component, `.` is dropped) so paths
/// that do not exist yet (`write_file` targets) validate the same way as
/// existing ones.  Any `..` that would climb above the working directory is
/// a validation error.
pub fn resolve_in_workdir(workdir: &Path, raw: &str) -> Result<PathBuf, ToolError> {
    if raw.is_empty() {
        return Err(ToolError::Validation("empty path".into()));
    }
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        workdir.join(candidate)
    };

    let mut normal = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::ParentDir => {
                if !normal.pop() {
                    return Err(escape_error(raw));
                }
            }
            Component::CurDir => {}
            other => normal.push(other),
        }
    }

    if normal.starts_with(workdir) {
        Ok(normal)
    } else {
        Err(escape_error(raw))
    }
}

fn escape_error(raw: &str) -> ToolError {
    ToolError::Validation(format!("path escapes the working directory: {raw}"))
}

/// Path relative to the working directory, for display.
pub fn display_path(workdir: &Path, path: &Path) -> String {
    path.strip_prefix(workdir)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
