//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dbweave")]
#[command(about = "dbweave - resilient multi-mode database access layer", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to dbweave.yaml + dbweave.local.yaml + DBWEAVE_* env)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe the configured backend and report its health
    Health,

    /// Warm the pools and print pool, cache and circuit statistics
    Stats,

    /// Print the effective configuration with secrets redacted
    Config,
}
