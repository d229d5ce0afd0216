// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
pub mod sanitize;
pub mod tokens;
mod anthropic;
mod auth;
mod client;
mod error;
mod google;
mod mock;
mod openai;
mod sse;
mod types;

pub use anthropic::AnthropicClient;
pub use auth::{generate_with_refresh, Auth, ConfigAuth};
pub use client::ModelClient;
pub use error::ModelError;
pub use google::GoogleClient;
pub use mock::{MockClient, ScriptedMockClient};
pub use openai::OpenAiCompatClient;
pub use types::*;

use std::sync::Arc;

use anyhow::bail;
use asimi_config::LlmConfig;

/// Construct a boxed [`ModelClient`] from configuration.
///
/// Selects the driver implementation based on `cfg.provider`.  Credentials
/// are resolved per-request through the [`Auth`] collaborator so a token
/// refresh takes effect without rebuilding the client.
pub fn from_config(cfg: &LlmConfig, auth: Arc<dyn Auth>) -> anyhow::Result<Box<dyn ModelClient>> {
    match cfg.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicClient::new(cfg.model.clone(), auth, None))),
        "openai" => Ok(Box::new(OpenAiCompatClient::new(
            "openai",
            cfg.model.clone(),
            auth,
            "https://api.openai.com/v1",
        ))),
        "ollama" => Ok(Box::new(OpenAiCompatClient::new(
            "ollama",
            cfg.model.clone(),
            auth,
            "http://localhost:11434/v1",
        ))),
        "google" => Ok(Box::new(GoogleClient::new(cfg.model.clone(), auth, None))),
        "mock" => Ok(Box::new(MockClient)),
        other => {
            bail!(
                "unknown model provider: {other:?}\n\
                 Known providers: anthropic, openai, google, ollama"
            )
        }
    }
}
