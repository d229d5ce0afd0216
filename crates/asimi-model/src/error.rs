// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Typed errors surfaced by model drivers.
///
/// `Auth` is a distinct variant (rather than a string pattern on a generic
/// error) so the session's refresh-and-retry policy can dispatch on it
/// structurally.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// True for auth failures caused by an expired OAuth token, the only
    /// case the one-shot refresh policy acts on.
    pub fn is_expired_auth(&self) -> bool {
        match self {
            Self::Auth(msg) => msg.to_lowercase().contains("expire"),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Map an HTTP error status + body onto the right variant.
///
/// 401 responses become `Auth` so that token-expiry markers in the body are
/// visible to [`ModelError::is_expired_auth`].
pub(crate) fn from_status(status: u16, body: String) -> ModelError {
    if status == 401 {
        ModelError::Auth(body)
    } else {
        ModelError::Api { status, body }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
