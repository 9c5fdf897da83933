use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::args::{Cli, Command};
use crate::cli::commands::{backup, exit_for_error, restore, sync};
use crate::config::load;
use crate::types::RunMode;

pub mod args;
pub mod commands;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let run_mode = RunMode {
        dry_run: cli.dry_run,
        verbose: cli.verbose,
    };

    let outcome = match cli.command {
        Command::Backup { restart } => {
            backup::run_backup(&config_path, restart.as_deref(), run_mode)
        }
        Command::List => backup::run_list(&config_path, run_mode),
        Command::Compact => backup::run_compact(&config_path, run_mode),
        Command::Restore(args) => restore::run_restore(&config_path, args, run_mode),
        Command::Sync => sync::run_sync(&config_path, run_mode),
    };

    // 0 clean, 1 with file-level errors, 2 on config/usage problems.
    match outcome {
        Ok(0) => Ok(()),
        Ok(_) => std::process::exit(1),
        Err(err) => exit_for_error(&err),
    }
}

fn default_config_path() -> PathBuf {
    load::default_state_dir().join("config.yaml")
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
