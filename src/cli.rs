// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "bytecraft",
    version,
    about = "An interactive command-line AI coding assistant"
)]
pub struct Cli {
    /// Model alias to use for this run
    #[arg(short, long, env = "CRAFT_MODEL")]
    pub model: Option<String>,

    /// Session id or short prefix to load at startup
    #[arg(short, long, env = "CRAFT_SESSION_ID")]
    pub session: Option<String>,

    /// One-shot prompt mode: process this message, print the reply, and exit
    #[arg(short = 'p', long = "message", env = "CRAFT_INITIAL_MESSAGE")]
    pub message: Option<String>,

    /// Explicit configuration file (merged over the discovered layers)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log to stderr (BYTECRAFT_LOG / RUST_LOG control the filter)
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print shell completion definitions for the given shell
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the merged configuration as YAML
    ShowConfig,
    /// List stored sessions, newest first
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "bytecraft", &mut io::stdout());
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
