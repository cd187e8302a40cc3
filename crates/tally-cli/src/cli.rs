//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::identity::IdentityAction;
use crate::commands::import::ImportArgs;
use crate::commands::summary::SummaryArgs;

/// Self-hosted activity tracker.
///
/// Imports editor heartbeats and reports how much time went into each
/// project, language, editor and machine.
#[derive(Debug, Parser)]
#[command(name = "tally", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Identity to act as (overrides `user` from the config).
    #[arg(long = "as", value_name = "USER", global = true)]
    pub requester: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show tracked time for an identity.
    Summary(SummaryArgs),

    /// Import heartbeats as JSON lines from stdin.
    Import(ImportArgs),

    /// Manage identities and their aliases.
    #[command(subcommand)]
    Identity(IdentityAction),
}
