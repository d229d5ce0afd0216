// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Persistent shell execution for the agent's `run_in_shell` tool.
//!
//! Two [`ShellRunner`] implementations sit behind one contract: a sandboxed
//! container shell (the default) and a host shell (allowlist and fallback
//! cases).  [`PolicyRunner`] picks between them per command.

mod host;
mod policy;
mod runner;
mod sandbox;

pub use host::HostRunner;
pub use policy::PolicyRunner;
pub use runner::{ShellError, ShellInput, ShellOutput, ShellRunner, EXIT_SPAWN_FAILURE, EXIT_TIMEOUT};
pub use sandbox::{detect_engine, SandboxRunner};
