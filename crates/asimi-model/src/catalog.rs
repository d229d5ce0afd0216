// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Static model catalog: context windows for the models the drivers ship
//! against.  Lookup is by model-name prefix so point releases inherit their
//! family's window without a catalog update.

pub struct CatalogEntry {
    pub provider: &'static str,
    pub model_prefix: &'static str,
    pub context_window: u32,
}

/// Window used for models not present in the catalog.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;

static CATALOG: &[CatalogEntry] = &[
    CatalogEntry { provider: "anthropic", model_prefix: "claude-opus-4", context_window: 200_000 },
    CatalogEntry { provider: "anthropic", model_prefix: "claude-sonnet-4", context_window: 200_000 },
    CatalogEntry { provider: "anthropic", model_prefix: "claude-haiku-4", context_window: 200_000 },
    CatalogEntry { provider: "anthropic", model_prefix: "claude-3", context_window: 200_000 },
    CatalogEntry { provider: "openai", model_prefix: "gpt-4.1", context_window: 1_047_576 },
    CatalogEntry { provider: "openai", model_prefix: "gpt-4o", context_window: 128_000 },
    CatalogEntry { provider: "openai", model_prefix: "o3", context_window: 200_000 },
    CatalogEntry { provider: "openai", model_prefix: "o4-mini", context_window: 200_000 },
    CatalogEntry { provider: "google", model_prefix: "gemini-2", context_window: 1_048_576 },
    CatalogEntry { provider: "google", model_prefix: "gemini-1.5-pro", context_window: 2_097_152 },
    CatalogEntry { provider: "ollama", model_prefix: "qwen2.5-coder", context_window: 32_768 },
    CatalogEntry { provider: "ollama", model_prefix: "llama3", context_window: 131_072 },
];

/// Context window for `model`, by longest matching prefix.
/// Unknown models get [`DEFAULT_CONTEXT_WINDOW`].
pub fn context_window(model: &str) -> u32 {
    CATALOG
        .iter()
        .filter(|e| model.starts_with(e.model_prefix))
        .max_by_key(|e| e.model_prefix.len())
        .map(|e| e.context_window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_models_have_200k_window() {
        assert_eq!(context_window("claude-sonnet-4-5"), 200_000);
        assert_eq!(context_window("claude-opus-4-1"), 200_000);
    }

    #[test]
    fn longest_prefix_wins() {
        // "gpt-4.1" must not be shadowed by a hypothetical shorter match.
        assert_eq!(context_window("gpt-4.1-mini"), 1_047_576);
        assert_eq!(context_window("gpt-4o-mini"), 128_000);
    }

    #[test]
    fn unknown_model_uses_default() {
        assert_eq!(context_window("some-local-gguf"), DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn gemini_window_is_large() {
        assert!(context_window("gemini-2.0-flash") > 1_000_000);
    }
}
