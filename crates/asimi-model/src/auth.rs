// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::warn;

use crate::{ContentResponse, GenerateOptions, Message, ModelClient, ModelError, ToolSchema};

/// Credential collaborator consulted by model drivers on every request.
///
/// The shipped implementation ([`ConfigAuth`]) reads config and environment;
/// a keyring-backed implementation plugs in behind the same trait.
#[async_trait]
pub trait Auth: Send + Sync {
    /// Current OAuth access token for `provider`, if one is configured.
    async fn get_oauth_token(&self, provider: &str) -> Option<String>;

    /// Exchange the stored refresh token for a new access token and cache it.
    /// Returns the new access token.
    async fn refresh_oauth_token(&self, provider: &str) -> anyhow::Result<String>;

    /// Static API key for `provider`, if one is configured.
    fn get_api_key(&self, provider: &str) -> Option<String>;
}

/// [`Auth`] backed by the loaded configuration plus well-known environment
/// variables.  Refreshed tokens are cached in-process; minting a new token
/// from a refresh token requires an external OAuth collaborator and is not
/// implemented here.
#[derive(Default)]
pub struct ConfigAuth {
    oauth_tokens: RwLock<HashMap<String, String>>,
    refresh_tokens: HashMap<String, String>,
    api_keys: HashMap<String, String>,
}

impl ConfigAuth {
    pub fn from_config(cfg: &asimi_config::LlmConfig) -> Self {
        let mut oauth = HashMap::new();
        let mut refresh = HashMap::new();
        if let Some(t) = &cfg.auth_token {
            oauth.insert(cfg.provider.clone(), t.clone());
        }
        if let Some(t) = &cfg.refresh_token {
            refresh.insert(cfg.provider.clone(), t.clone());
        }
        let mut api_keys = HashMap::new();
        for (provider, var) in [
            ("anthropic", "ANTHROPIC_API_KEY"),
            ("openai", "OPENAI_API_KEY"),
            ("google", "GEMINI_API_KEY"),
        ] {
            if let Ok(key) = std::env::var(var) {
                api_keys.insert(provider.to_string(), key);
            }
        }
        // GOOGLE_API_KEY is an accepted alias for GEMINI_API_KEY.
        if !api_keys.contains_key("google") {
            if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
                api_keys.insert("google".to_string(), key);
            }
        }
        Self { oauth_tokens: RwLock::new(oauth), refresh_tokens: refresh, api_keys }
    }
}

#[async_trait]
impl Auth for ConfigAuth {
    async fn get_oauth_token(&self, provider: &str) -> Option<String> {
        self.oauth_tokens.read().ok()?.get(provider).cloned()
    }

    async fn refresh_oauth_token(&self, provider: &str) -> anyhow::Result<String> {
        // Minting a fresh access token requires the provider's OAuth endpoint,
        // which lives in the external auth collaborator.  Config-based auth can
        // only report that a refresh token exists.
        match self.refresh_tokens.get(provider) {
            Some(_) => anyhow::bail!(
                "refresh token present for {provider} but no OAuth endpoint is \
                 configured; re-authenticate and update llm.auth_token"
            ),
            None => anyhow::bail!("no refresh token configured for {provider}"),
        }
    }

    fn get_api_key(&self, provider: &str) -> Option<String> {
        self.api_keys.get(provider).cloned()
    }
}

/// Issue a completion with the one-shot OAuth refresh policy.
///
/// On a [`ModelError::Auth`] failure whose message marks an expired token,
/// the provider's OAuth token is refreshed exactly once through `auth` and
/// the identical request is retried.  Every other error, including a second
/// auth failure, is surfaced verbatim.
pub async fn generate_with_refresh(
    client: &dyn ModelClient,
    auth: &dyn Auth,
    messages: &[Message],
    tools: &[ToolSchema],
    options: &GenerateOptions,
) -> Result<ContentResponse, ModelError> {
    match client.generate_content(messages, tools, options).await {
        Err(e) if e.is_expired_auth() => {
            match auth.refresh_oauth_token(client.provider()).await {
                Ok(_) => client.generate_content(messages, tools, options).await,
                Err(refresh_err) => {
                    warn!(
                        provider = client.provider(),
                        error = %refresh_err,
                        "oauth refresh failed; surfacing original auth error"
                    );
                    Err(e)
                }
            }
        }
        other => other,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
