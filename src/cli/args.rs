//! CLI argument definitions.
//!
//! This module defines all CLI arguments using clap's derive macros.
//! The main entry point is the [`Cli`] struct.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Steadyflow - inspect durable workflow engine state.
#[derive(Debug, Parser)]
#[command(name = "steadyflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the flows recorded in a persisted engine state file
    Inspect(InspectArgs),

    /// Show the effective engine configuration and retry schedule
    Config(ConfigArgs),
}

/// Arguments for the `inspect` command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct InspectArgs {
    /// Path to the state file written by the engine
    pub state_file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `config` command.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    /// Engine configuration file (YAML)
    #[arg(short, long, env = "STEADYFLOW_CONFIG")]
    pub file: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
