// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Durable session persistence: one SQLite database holding sessions,
//! their messages, and per-project prompt history.  Saves are enqueued and
//! coalesced by a background writer so the session loop never blocks on
//! disk I/O.

mod store;
mod writer;

pub use store::{SessionEntry, SessionStore};
pub use writer::StoreHandle;

use std::path::PathBuf;

/// Default database location: `<data_dir>/asimi/asimi.sqlite`
/// (`~/.local/share/asimi/asimi.sqlite` on Linux).
pub fn default_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir().ok_or_else(|| anyhow::anyhow!("no data directory on this system"))?;
    Ok(base.join("asimi").join("asimi.sqlite"))
}
