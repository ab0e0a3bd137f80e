//! apisync CLI - Sync API collections with Git and environments with Vault.

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, VaultAction};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("apisync={}", log_level).parse()?),
        )
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .unwrap_or_else(apisync::config::default_config_path);

    match cli.command {
        Commands::Status => cli::commands::status(&config_path),
        Commands::Pull => cli::commands::pull(&config_path),
        Commands::Push => cli::commands::push(&config_path),
        Commands::Sync => cli::commands::sync(&config_path),
        Commands::Vault { action } => match action {
            VaultAction::Pull => cli::commands::vault_pull(&config_path),
            VaultAction::Push => cli::commands::vault_push(&config_path),
        },
        Commands::Startup => cli::commands::startup(&config_path),
        Commands::Import { file } => cli::commands::import(&config_path, &file),
        Commands::List => cli::commands::list(&config_path),
        Commands::Login { backend } => cli::commands::login(backend),
    }
}
