// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "skarv",
    about = "Local control-plane gateway for tool-using AI agents",
    version
)]
pub struct Cli {
    /// Explicit config file (highest-priority layer).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the gateway daemon (WebSocket control plane).
    Gateway,
    /// Print the merged effective configuration as YAML.
    ShowConfig,
    /// Inspect or edit the persisted exec approvals.
    Approvals {
        #[command(subcommand)]
        command: ApprovalsCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum ApprovalsCommands {
    /// Show the approvals file (defaults and per-agent allowlists).
    List,
    /// Allowlist a command for an agent (stored as its resolved path).
    Allow {
        /// Agent id (by convention the session key).
        agent: String,
        /// The command whose resolved executable to allowlist.
        command: String,
    },
}
