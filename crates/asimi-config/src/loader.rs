// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/asimi/config.toml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/asimi/config.toml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("asimi/config.toml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".asimi.toml"));
    paths.push(PathBuf::from("asimi.toml"));

    paths
}

/// Load configuration by merging all discovered TOML files and applying
/// `ASIMI_*` environment overrides on top.
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    load_with_env(extra, std::env::vars())
}

/// Same as [`load`] but with an explicit environment, for tests.
pub fn load_with_env<I>(extra: Option<&Path>, vars: I) -> anyhow::Result<Config>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut merged = toml::Value::Table(toml::map::Map::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            merge_toml(&mut merged, read_layer(&path)?);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let expanded = shellexpand::tilde(&p.to_string_lossy()).into_owned();
        merge_toml(&mut merged, read_layer(Path::new(&expanded))?);
    }

    // Deserialize the merged value into Config, falling back to defaults
    // when the merged value is empty (no config files found).
    let mut config: Config = if matches!(merged, toml::Value::Table(ref t) if t.is_empty()) {
        Config::default()
    } else {
        merged.try_into().unwrap_or_default()
    };

    config.apply_overrides(vars);
    Ok(config)
}

fn read_layer(path: &Path) -> anyhow::Result<toml::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_toml(dst: &mut toml::Value, src: toml::Value) {
    match (dst, src) {
        (toml::Value::Table(d), toml::Value::Table(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(toml::Value::Table(toml::map::Map::new()));
                merge_toml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x = 1");
        let src = val("x = 2");
        merge_toml(&mut dst, src);
        assert_eq!(dst["x"].as_integer(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a = 1\nb = 2");
        let src = val("b = 99");
        merge_toml(&mut dst, src);
        assert_eq!(dst["a"].as_integer(), Some(1));
        assert_eq!(dst["b"].as_integer(), Some(99));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val("[llm]\nprovider = \"openai\"\nmodel = \"gpt-4o\"");
        let src = val("[llm]\nmodel = \"gpt-4o-mini\"");
        merge_toml(&mut dst, src);
        assert_eq!(dst["llm"]["provider"].as_str(), Some("openai"));
        assert_eq!(dst["llm"]["model"].as_str(), Some("gpt-4o-mini"));
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load_with_env(
            Some(Path::new("/tmp/asimi_nonexistent_config_xyz.toml")),
            Vec::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[llm]\nprovider = \"anthropic\"\nmodel = \"test-model\"").unwrap();
        let cfg = load_with_env(Some(f.path()), Vec::new()).unwrap();
        assert_eq!(cfg.llm.provider, "anthropic");
        assert_eq!(cfg.llm.model, "test-model");
    }

    #[test]
    fn env_overrides_beat_config_files() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[llm]\nprovider = \"anthropic\"\nmodel = \"test-model\"").unwrap();
        let cfg = load_with_env(
            Some(f.path()),
            vec![("ASIMI_LLM_MODEL".to_string(), "env-model".to_string())],
        )
        .unwrap();
        assert_eq!(cfg.llm.provider, "anthropic");
        assert_eq!(cfg.llm.model, "env-model");
    }
}
