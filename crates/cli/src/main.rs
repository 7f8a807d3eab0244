mod cli;
mod commands;
mod config;

use clap::Parser;
use madmin_store::Registry;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::review::ReviewArgs;
use crate::config::Config;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(cli.config.as_deref()).await?;

    if let Commands::Config { command } = cli.command {
        return commands::handle_config_command(command, config, cli.config).await;
    }

    if let Some(modules_dir) = cli.modules_dir {
        config.registry.modules_dir = modules_dir;
    }
    if let Some(state_dir) = cli.state_dir {
        config.registry.state_dir = state_dir;
    }

    if let Commands::Validate { files, json } = cli.command {
        return commands::handle_validate_command(files, json, &config).await;
    }

    let registry = Registry::open(config.registry.clone()).await?;

    match cli.command {
        Commands::Build { json } => commands::handle_build_command(&registry, json).await,
        Commands::Review {
            id,
            status,
            reviewer,
            note,
            expected_revision,
        } => {
            let args = ReviewArgs {
                id,
                status,
                reviewer,
                note,
                expected_revision,
            };
            commands::handle_review_command(args, &registry, &config).await
        }
        Commands::Status => commands::handle_status_command(&registry).await,
        Commands::Show {
            id,
            client_version,
            os,
        } => commands::handle_show_command(id, client_version, os, &registry).await,
        Commands::Export { output } => commands::handle_export_command(output, &registry).await,
        Commands::Validate { .. } | Commands::Config { .. } => Ok(()),
    }
}
