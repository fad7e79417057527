// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Portal secure transport CLI
#[derive(Parser, Debug)]
#[command(name = "portal-transport-cli")]
#[command(version)]
#[command(about = "Debugging tools for the portal secure transport", long_about = None)]
pub struct Cli {
    /// TOML configuration file (PORTAL_* environment variables override it)
    #[arg(long, global = true, env = "PORTAL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Establish a session with a backend and print it
    Handshake(commands::HandshakeArgs),

    /// Send one secured request and print the decoded response
    Request(commands::RequestArgs),

    /// Print the canonical signing string for a request
    Canonical(commands::CanonicalArgs),
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    dotenv::dotenv().ok();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Handshake(args) => commands::handshake(&config, args).await,
        Commands::Request(args) => commands::request(&config, args).await,
        Commands::Canonical(args) => commands::canonical(args),
    }
}
