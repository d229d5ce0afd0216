// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System prompt assembly: template + environment block + optional project
//! memory file.

use std::path::Path;

const SYSTEM_PROMPT_TEMPLATE: &str = "\
You are asimi, an AI coding agent running in the user's terminal.

You help with software engineering tasks: reading and editing code, running
commands, searching the project, and answering questions about it.

Guidelines:
- Use the provided tools to inspect the project before answering; do not
  guess file contents.
- Make the smallest change that accomplishes the task.
- Shell commands run in a sandboxed container by default; state does persist
  between commands.
- When a task is done, summarise what changed and how to verify it.";

/// Environment facts injected under the template.  Assembled once at session
/// creation; the working copy state is the user's responsibility afterwards.
pub struct PromptContext<'a> {
    pub working_dir: &'a Path,
    pub branch: &'a str,
    /// (file name, content) of the project memory file, when present.
    pub project_memory: Option<(&'a str, &'a str)>,
}

/// Materialize the full system prompt.
pub fn system_prompt(ctx: &PromptContext) -> String {
    let mut out = String::from(SYSTEM_PROMPT_TEMPLATE);
    out.push_str("\n\n# Environment\n");
    out.push_str(&format!("OS: {}\n", std::env::consts::OS));
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".into());
    out.push_str(&format!("Shell: {shell}\n"));
    out.push_str(&format!("Working directory: {}\n", ctx.working_dir.display()));
    out.push_str(&format!("Git branch: {}\n", ctx.branch));

    if let Some((name, content)) = ctx.project_memory {
        out.push_str(&format!(
            "\n--- Project specific directions from: {name} ---\n{content}\n--- End ---\n"
        ));
    }
    out
}

/// Read the project memory file (`AGENTS.md` by default) from the working
/// directory root.  Returns `(file name, content)` when present and readable.
pub fn load_project_memory(workdir: &Path, name: &str) -> Option<(String, String)> {
    let path = workdir.join(name);
    let content = std::fs::read_to_string(path).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    Some((name.to_string(), content))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
