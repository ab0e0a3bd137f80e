//! CLI definitions for apisync.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// apisync - Keep API collections and environments in sync
#[derive(Parser)]
#[command(name = "apisync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/apisync/apisync.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show configuration and test connections
    Status,

    /// Pull changed collections from the Git remote
    Pull,

    /// Push locally modified collections, one commit per collection
    Push,

    /// Pull then push
    Sync,

    /// Sync environments with the secret store
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },

    /// Run auto-sync as the app does on start (honours the auto_sync settings)
    Startup,

    /// Import a collection JSON file into the workspace as a local edit
    Import {
        /// Path to the collection file
        file: PathBuf,
    },

    /// List collections and environments with their sync state
    List,

    /// Store an access token in the OS keyring (prompted, not echoed)
    Login {
        #[arg(value_enum)]
        backend: Backend,
    },
}

#[derive(Subcommand)]
pub enum VaultAction {
    /// Fetch secrets into local environments
    Pull,
    /// Overwrite remote secrets with local environments
    Push,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Backend {
    Github,
    Vault,
}
