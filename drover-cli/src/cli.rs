//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a task processor, and the scheduler when it is enabled
    Serve {
        /// Do not run the scheduler even if the configuration enables it
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Put a task on its queue
    Submit {
        /// Task type; selects the queue and the worker
        #[arg(long, value_name = "TYPE")]
        task_type: String,

        /// JSON payload (example: --payload '{"units_ms":[1000,4000]}')
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,

        /// JSON job settings stored next to the task
        #[arg(long, value_name = "JSON")]
        settings: Option<String>,

        #[arg(long, value_name = "ID")]
        tenant: Option<String>,
    },

    /// Show one task, or every known summary and queue length
    Status {
        #[arg(long, value_name = "UUID")]
        task_id: Option<String>,
    },

    /// Ask the processor running a task to cancel it
    Cancel {
        #[arg(long, value_name = "UUID")]
        task_id: String,

        #[arg(long, value_name = "TEXT")]
        reason: Option<String>,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },

    /// Run one task in this process (started by a processor)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        task_id: String,

        #[arg(long)]
        task_type: String,

        #[arg(long)]
        worker: String,

        #[arg(long)]
        processor_id: String,

        #[arg(long)]
        with_job_settings: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Write a sample configuration file
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_worker_arguments_round_trip() {
        let cli = Cli::try_parse_from([
            "drover",
            "--config",
            "drover.yaml",
            "worker",
            "--task-id",
            "7f1c5a3e-0d5e-4c2a-9a53-8d1b51c0be11",
            "--task-type",
            "export",
            "--worker",
            "delay",
            "--processor-id",
            "host-1",
            "--with-job-settings",
        ])
        .unwrap();

        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("drover.yaml")));
        match cli.command {
            Commands::Worker {
                task_type,
                worker,
                with_job_settings,
                ..
            } => {
                assert_eq!(task_type, "export");
                assert_eq!(worker, "delay");
                assert!(with_job_settings);
            }
            _ => panic!("expected the worker command"),
        }
    }
}
