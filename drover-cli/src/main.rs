use anyhow::{Context, Result};
use clap::Parser;
use drover_config::{ConfigLoader, DroverConfig, LogLevel};
use std::path::PathBuf;
use tracing::{debug, info, warn};

mod cli;
mod commands;
mod workers;

use cli::{Cli, Commands, ConfigCommands};
use commands::worker::WorkerArgs;

fn load_config(config_path: Option<&PathBuf>) -> Result<DroverConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                loader
                    .from_file(path)
                    .with_context(|| format!("Failed to load configuration from {:?}", path))
            } else {
                warn!("Configuration file not found: {:?}. Using defaults.", path);
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

fn apply_log_level(config: &mut DroverConfig, log_level: Option<&String>) -> Result<()> {
    if let Some(level) = log_level {
        config.logging.level = level
            .parse::<LogLevel>()
            .map_err(anyhow::Error::msg)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config validation and generation work without a loadable configuration.
    if let Commands::Config { config_cmd } = &cli.command {
        drover_logging::init_simple_tracing(cli.log_level.as_deref().unwrap_or("warn"))?;
        return match config_cmd {
            ConfigCommands::Validate { config_file } => {
                commands::config::handle_config_validate(config_file)
            }
            ConfigCommands::Generate { output, force } => {
                commands::config::handle_config_generate(output, *force)
            }
        };
    }

    let mut config = load_config(cli.config.as_ref())?;
    apply_log_level(&mut config, cli.log_level.as_ref())?;

    // Worker processes log to stderr only.
    if let Commands::Worker {
        task_id,
        task_type,
        worker,
        processor_id,
        with_job_settings,
    } = cli.command
    {
        drover_logging::init_worker_tracing(&config.logging)?;
        let args = WorkerArgs {
            task_id,
            task_type,
            worker,
            processor_id,
            with_job_settings,
        };
        return commands::worker::run_worker_process(config, args).await;
    }

    drover_logging::init_logging(&config.logging)?;
    info!("Drover CLI starting");

    match &cli.command {
        Commands::Serve { no_scheduler } => {
            commands::serve::serve_command(
                config,
                cli.config.as_deref().filter(|p| p.exists()),
                *no_scheduler,
            )
            .await
        }
        Commands::Submit {
            task_type,
            payload,
            settings,
            tenant,
        } => {
            commands::client::submit_command(
                config,
                task_type,
                payload.as_deref(),
                settings.as_deref(),
                tenant.as_deref(),
            )
            .await
        }
        Commands::Status { task_id } => {
            commands::client::status_command(config, task_id.as_deref()).await
        }
        Commands::Cancel { task_id, reason } => {
            commands::client::cancel_command(config, task_id, reason.clone()).await
        }
        Commands::Config { .. } | Commands::Worker { .. } => Ok(()),
    }
}
