// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use asimi_model::catalog;

use crate::session::Session;

/// Tokens held back from the reported free space so the UI warns visibly
/// before the window is actually exhausted.
pub const AUTOCOMPACT_BUFFER: usize = 45_000;

/// Context-window usage broken down by component.  Rendering is the UI's
/// job; this is the raw accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    pub model: String,
    pub total_tokens: usize,
    pub used_tokens: usize,
    /// May go negative when usage outgrows the window minus the buffer.
    pub free_tokens: i64,
    pub autocompact_buffer: usize,
    pub system_prompt_tokens: usize,
    pub system_tools_tokens: usize,
    pub memory_files_tokens: usize,
    pub messages_tokens: usize,
}

impl Session {
    pub fn context_info(&self) -> ContextInfo {
        let total = catalog::context_window(&self.model) as usize;
        let used = self.counters.used();
        ContextInfo {
            model: self.model.clone(),
            total_tokens: total,
            used_tokens: used,
            free_tokens: total as i64 - used as i64 - AUTOCOMPACT_BUFFER as i64,
            autocompact_buffer: AUTOCOMPACT_BUFFER,
            system_prompt_tokens: self.counters.system_prompt,
            system_tools_tokens: self.counters.system_tools,
            memory_files_tokens: self.counters.memory_files,
            messages_tokens: self.counters.messages,
        }
    }
}
