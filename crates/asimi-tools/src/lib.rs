// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod paths;
pub mod registry;
pub mod scheduler;
pub mod tool;

pub use registry::{ToolRegistry, ToolSchema};
pub use scheduler::{CompletionHandle, ToolEvent, ToolResult, ToolScheduler};
pub use tool::{Tool, ToolError};

pub use builtin::edit_file::EditFileTool;
pub use builtin::glob::GlobTool;
pub use builtin::grep::GrepTool;
pub use builtin::list_files::ListFilesTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::read_many_files::ReadManyFilesTool;
pub use builtin::run_in_shell::RunInShellTool;
pub use builtin::web_search::WebSearchTool;
pub use builtin::write_file::WriteFileTool;

use std::path::PathBuf;
use std::sync::Arc;

use asimi_shell::ShellRunner;

/// Build the canonical tool registry: every tool the model may invoke.
pub fn builtin_registry(workdir: PathBuf, shell: Arc<dyn ShellRunner>) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(ReadFileTool::new(workdir.clone()));
    reg.register(WriteFileTool::new(workdir.clone()));
    reg.register(EditFileTool::new(workdir.clone()));
    reg.register(ListFilesTool::new(workdir.clone()));
    reg.register(ReadManyFilesTool::new(workdir.clone()));
    reg.register(GrepTool::new(workdir.clone()));
    reg.register(GlobTool::new(workdir));
    reg.register(RunInShellTool::new(shell));
    reg.register(WebSearchTool::default());
    reg
}
