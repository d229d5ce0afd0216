// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Stable project and branch identifiers used for persistence keying and
//! the sandbox image name.

use std::path::Path;
use std::process::Command;

use sha2::{Digest, Sha256};

/// Lowercase, keep `[a-z0-9]`, collapse runs of anything else into a single
/// `-`, trim leading/trailing `-`.
pub fn sanitize_slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Stable project identifier: the sanitized `owner/repo` of
/// `git remote.origin.url` when available, else `<basename>-<hash6>` where
/// hash6 is the first 6 hex of SHA-256 over the working directory path.
pub fn project_slug(workdir: &Path) -> String {
    if let Some(remote) = git_output(workdir, &["config", "--get", "remote.origin.url"]) {
        if let Some(owner_repo) = parse_owner_repo(&remote) {
            let slug = sanitize_slug(&owner_repo);
            if !slug.is_empty() {
                return slug;
            }
        }
    }
    let basename = workdir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".into());
    let digest = Sha256::digest(workdir.to_string_lossy().as_bytes());
    format!("{}-{}", sanitize_slug(&basename), &hex::encode(digest)[..6])
}

/// Current branch name sanitized, or `main` when there is no repository or
/// no branch (detached HEAD reports the literal "HEAD" and also falls back).
pub fn branch_slug(workdir: &Path) -> String {
    match git_output(workdir, &["rev-parse", "--abbrev-ref", "HEAD"]) {
        Some(branch) if branch != "HEAD" => {
            let slug = sanitize_slug(&branch);
            if slug.is_empty() {
                "main".into()
            } else {
                slug
            }
        }
        _ => "main".into(),
    }
}

fn git_output(workdir: &Path, args: &[&str]) -> Option<String> {
    let out = Command::new("git").arg("-C").arg(workdir).args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Extract `owner/repo` from the common git remote URL shapes:
/// `git@host:owner/repo.git` and `https://host/owner/repo.git`.
fn parse_owner_repo(url: &str) -> Option<String> {
    let path = if let Some((_, rest)) = url.split_once(':') {
        // ssh form, or scheme://host/path
        if let Some(rest) = rest.strip_prefix("//") {
            rest.split_once('/').map(|(_, p)| p)?
        } else {
            rest
        }
    } else {
        url
    };
    let path = path.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = path.rsplit('/');
    let repo = parts.next()?;
    let owner = parts.next()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some(format!("{owner}/{repo}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
