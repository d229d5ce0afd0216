// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// asimi: an AI coding agent with a sandboxed shell.
///
/// The interactive terminal UI attaches through the library crates; this
/// binary drives the same engine headlessly.
#[derive(Parser, Debug)]
#[command(name = "asimi", version, about)]
pub struct Cli {
    /// Path to an explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr (RUST_LOG controls the filter).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit one prompt, stream the answer to stdout, and exit.
    Ask {
        /// The prompt. Reads stdin when omitted.
        prompt: Vec<String>,

        /// Resume a saved session by id instead of starting fresh.
        #[arg(long)]
        resume: Option<String>,
    },

    /// List saved sessions for this project and branch.
    Sessions {
        /// Maximum entries to show (0 = config default).
        #[arg(long, default_value_t = 0)]
        limit: u32,
    },

    /// Apply the retention policy: drop sessions beyond max_sessions or
    /// older than max_age_days.
    Cleanup,

    /// Print the effective configuration and exit.
    ShowConfig,
}
