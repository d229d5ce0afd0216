// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{ContentResponse, GenerateOptions, Message, ModelError, ToolSchema};

/// Abstraction over an LLM provider.
///
/// One method does all the work: callers pass the full message history, the
/// tool schema list, and per-request options (streaming callbacks,
/// cancellation, token limits).  Implementations are stateless apart from
/// their HTTP client; credentials come from the [`crate::Auth`] collaborator
/// on every request so refreshed tokens take effect immediately.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider identifier ("anthropic", "openai", …) for display and
    /// credential lookup.
    fn provider(&self) -> &str;

    /// Model identifier as reported to users.
    fn model(&self) -> &str;

    async fn generate_content(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerateOptions,
    ) -> Result<ContentResponse, ModelError>;
}
