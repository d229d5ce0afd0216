// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub run_in_shell: RunInShellConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_max_turns() -> u32 {
    999
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider identifier: "anthropic" | "openai" | "google" | "ollama"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub model: String,
    /// Maximum number of model ↔ tool round-trips per user prompt
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Skip history sanitization before model calls.  When set, a malformed
    /// tail (dangling tool calls) is sent to the provider verbatim and the
    /// provider's own validation error is surfaced instead.
    #[serde(default)]
    pub disable_sanitization: bool,
    /// OAuth access token for providers that support it (Anthropic).
    /// Prefer the OS credential store; this field is a fallback for headless
    /// environments.
    pub auth_token: Option<String>,
    /// OAuth refresh token paired with `auth_token`.
    pub refresh_token: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            max_turns: default_max_turns(),
            disable_sanitization: false,
            auth_token: None,
            refresh_token: None,
        }
    }
}

fn default_timeout_minutes() -> u64 {
    10
}

fn default_run_on_host() -> Vec<String> {
    // gh needs the host's credential helper; everything else stays sandboxed.
    vec![r"^gh\s.*".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInShellConfig {
    /// Wall-clock limit for a single shell command, in minutes.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    /// Commands matching any of these regexes run on the host instead of the
    /// sandbox, regardless of sandbox health.
    #[serde(default = "default_run_on_host")]
    pub run_on_host: Vec<String>,
    /// Run commands on the host when the container engine is unreachable.
    /// A warning is emitted whenever this fallback is taken.
    #[serde(default)]
    pub allow_host_fallback: bool,
    /// Keep the sandbox container around after close (for debugging).
    #[serde(default)]
    pub no_cleanup: bool,
    /// Sandbox image override.  Default: `asimi-sandbox-<project-slug>:latest`.
    pub image_name: Option<String>,
}

impl Default for RunInShellConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_timeout_minutes(),
            run_on_host: default_run_on_host(),
            allow_host_fallback: false,
            no_cleanup: false,
            image_name: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_sessions() -> u32 {
    50
}
fn default_max_age_days() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Master switch for session persistence.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Persist the session automatically after every turn.
    #[serde(default = "default_true")]
    pub auto_save: bool,
    /// Retain at most this many sessions per project/branch.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    /// Delete sessions whose last update is older than this many days.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Maximum entries returned by session listing.  0 = unlimited.
    #[serde(default)]
    pub list_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_save: true,
            max_sessions: default_max_sessions(),
            max_age_days: default_max_age_days(),
            list_limit: 0,
        }
    }
}

impl Config {
    /// Apply `ASIMI_`-prefixed overrides from an explicit key/value list.
    ///
    /// Keys use the section and field name joined by `_`, upper-cased:
    /// `ASIMI_LLM_PROVIDER`, `ASIMI_RUN_IN_SHELL_TIMEOUT_MINUTES`, …
    /// Unknown keys are ignored; unparseable numeric/boolean values keep the
    /// previous setting.
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(key) = key.strip_prefix("ASIMI_") else {
                continue;
            };
            match key {
                "LLM_PROVIDER" => self.llm.provider = value,
                "LLM_MODEL" => self.llm.model = value,
                "LLM_MAX_TURNS" => {
                    if let Ok(n) = value.parse() {
                        self.llm.max_turns = n;
                    }
                }
                "LLM_DISABLE_SANITIZATION" => {
                    if let Ok(b) = value.parse() {
                        self.llm.disable_sanitization = b;
                    }
                }
                "LLM_AUTH_TOKEN" => self.llm.auth_token = Some(value),
                "LLM_REFRESH_TOKEN" => self.llm.refresh_token = Some(value),
                "RUN_IN_SHELL_TIMEOUT_MINUTES" => {
                    if let Ok(n) = value.parse() {
                        self.run_in_shell.timeout_minutes = n;
                    }
                }
                "RUN_IN_SHELL_ALLOW_HOST_FALLBACK" => {
                    if let Ok(b) = value.parse() {
                        self.run_in_shell.allow_host_fallback = b;
                    }
                }
                "RUN_IN_SHELL_NO_CLEANUP" => {
                    if let Ok(b) = value.parse() {
                        self.run_in_shell.no_cleanup = b;
                    }
                }
                "RUN_IN_SHELL_IMAGE_NAME" => self.run_in_shell.image_name = Some(value),
                "SESSION_ENABLED" => {
                    if let Ok(b) = value.parse() {
                        self.session.enabled = b;
                    }
                }
                "SESSION_AUTO_SAVE" => {
                    if let Ok(b) = value.parse() {
                        self.session.auto_save = b;
                    }
                }
                "SESSION_MAX_SESSIONS" => {
                    if let Ok(n) = value.parse() {
                        self.session.max_sessions = n;
                    }
                }
                "SESSION_MAX_AGE_DAYS" => {
                    if let Ok(n) = value.parse() {
                        self.session.max_age_days = n;
                    }
                }
                "SESSION_LIST_LIMIT" => {
                    if let Ok(n) = value.parse() {
                        self.session.list_limit = n;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Pick a provider from the API keys present in an explicit key set.
///
/// Checked in order: `ANTHROPIC_API_KEY` → anthropic, `OPENAI_API_KEY` →
/// openai, `GEMINI_API_KEY` / `GOOGLE_API_KEY` → google.  Falls back to
/// "ollama" (local, keyless) when none is present.
pub fn discover_provider<F>(has_var: F) -> &'static str
where
    F: Fn(&str) -> bool,
{
    if has_var("ANTHROPIC_API_KEY") {
        "anthropic"
    } else if has_var("OPENAI_API_KEY") {
        "openai"
    } else if has_var("GEMINI_API_KEY") || has_var("GOOGLE_API_KEY") {
        "google"
    } else {
        "ollama"
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ─────────────────────────────────────────────────────────────

    #[test]
    fn config_default_provider_is_openai() {
        let c = Config::default();
        assert_eq!(c.llm.provider, "openai");
    }

    #[test]
    fn config_default_max_turns_is_999() {
        let c = Config::default();
        assert_eq!(c.llm.max_turns, 999);
    }

    #[test]
    fn config_default_sanitization_enabled() {
        let c = Config::default();
        assert!(!c.llm.disable_sanitization);
    }

    #[test]
    fn config_default_shell_timeout_is_ten_minutes() {
        let c = Config::default();
        assert_eq!(c.run_in_shell.timeout_minutes, 10);
    }

    #[test]
    fn config_default_run_on_host_has_gh_only() {
        let c = Config::default();
        assert_eq!(c.run_in_shell.run_on_host, vec![r"^gh\s.*".to_string()]);
    }

    #[test]
    fn config_default_host_fallback_disabled() {
        let c = Config::default();
        assert!(!c.run_in_shell.allow_host_fallback);
    }

    #[test]
    fn config_default_session_retention() {
        let c = Config::default();
        assert!(c.session.enabled);
        assert!(c.session.auto_save);
        assert_eq!(c.session.max_sessions, 50);
        assert_eq!(c.session.max_age_days, 30);
        assert_eq!(c.session.list_limit, 0);
    }

    // ── TOML round-trip ───────────────────────────────────────────────────────

    #[test]
    fn config_deserialises_from_toml() {
        let toml_str = "[llm]\nprovider = \"anthropic\"\nmodel = \"claude-sonnet-4-5\"\nmax_turns = 12\n";
        let c: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(c.llm.provider, "anthropic");
        assert_eq!(c.llm.model, "claude-sonnet-4-5");
        assert_eq!(c.llm.max_turns, 12);
    }

    #[test]
    fn config_partial_toml_fills_in_defaults() {
        let toml_str = "[run_in_shell]\ntimeout_minutes = 1\n";
        let c: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(c.run_in_shell.timeout_minutes, 1);
        assert_eq!(c.llm.max_turns, 999, "serde default must fill missing fields");
        assert_eq!(c.session.max_sessions, 50);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut c = Config::default();
        c.llm.provider = "anthropic".into();
        c.run_in_shell.allow_host_fallback = true;
        c.session.list_limit = 7;
        let s = toml::to_string(&c).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.llm.provider, "anthropic");
        assert!(back.run_in_shell.allow_host_fallback);
        assert_eq!(back.session.list_limit, 7);
    }

    #[test]
    fn run_on_host_list_parses_from_toml() {
        let toml_str = "[run_in_shell]\nrun_on_host = ['^gh\\s.*', '^docker\\s.*']\n";
        let c: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(c.run_in_shell.run_on_host.len(), 2);
    }

    // ── Env overrides ─────────────────────────────────────────────────────────

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn override_sets_provider_and_model() {
        let mut c = Config::default();
        c.apply_overrides(pairs(&[
            ("ASIMI_LLM_PROVIDER", "anthropic"),
            ("ASIMI_LLM_MODEL", "claude-sonnet-4-5"),
        ]));
        assert_eq!(c.llm.provider, "anthropic");
        assert_eq!(c.llm.model, "claude-sonnet-4-5");
    }

    #[test]
    fn override_parses_numbers_and_bools() {
        let mut c = Config::default();
        c.apply_overrides(pairs(&[
            ("ASIMI_LLM_MAX_TURNS", "5"),
            ("ASIMI_RUN_IN_SHELL_ALLOW_HOST_FALLBACK", "true"),
            ("ASIMI_SESSION_MAX_AGE_DAYS", "3"),
        ]));
        assert_eq!(c.llm.max_turns, 5);
        assert!(c.run_in_shell.allow_host_fallback);
        assert_eq!(c.session.max_age_days, 3);
    }

    #[test]
    fn override_ignores_unknown_and_unprefixed_keys() {
        let mut c = Config::default();
        c.apply_overrides(pairs(&[
            ("ASIMI_NO_SUCH_KEY", "x"),
            ("LLM_PROVIDER", "anthropic"), // missing prefix
        ]));
        assert_eq!(c.llm.provider, "openai");
    }

    #[test]
    fn override_keeps_value_on_parse_failure() {
        let mut c = Config::default();
        c.apply_overrides(pairs(&[("ASIMI_LLM_MAX_TURNS", "not-a-number")]));
        assert_eq!(c.llm.max_turns, 999);
    }

    // ── Provider discovery ────────────────────────────────────────────────────

    #[test]
    fn discover_prefers_anthropic() {
        let p = discover_provider(|k| k == "ANTHROPIC_API_KEY" || k == "OPENAI_API_KEY");
        assert_eq!(p, "anthropic");
    }

    #[test]
    fn discover_falls_through_to_google_keys() {
        assert_eq!(discover_provider(|k| k == "GEMINI_API_KEY"), "google");
        assert_eq!(discover_provider(|k| k == "GOOGLE_API_KEY"), "google");
    }

    #[test]
    fn discover_defaults_to_ollama() {
        assert_eq!(discover_provider(|_| false), "ollama");
    }
}
