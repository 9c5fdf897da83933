use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "genvault", version, about = "Generational backup, restore, and directory sync")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Plan and log without writing data
    #[arg(long, global = true)]
    pub dry_run: bool,
    /// Mirror per-file activity to stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Back up the configured dirs into a new generation
    Backup {
        /// Resume an aborted run from its manifest log
        #[arg(long)]
        restart: Option<PathBuf>,
    },
    /// List every backed-up file with its capture dates
    List,
    /// Remove generations that captured nothing
    Compact,
    /// Restore files from backup history
    Restore(RestoreArgs),
    /// Two-way sync of the configured dirs with the target
    Sync,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Directory restored files are placed under
    #[arg(long)]
    pub dest: PathBuf,
    /// Machine whose history to restore (default: this machine)
    #[arg(long)]
    pub machine: Option<String>,
    /// Restore as of this moment, yyyy.mm.dd.hh.mm.ss (default: now)
    #[arg(long)]
    pub asof: Option<String>,
    /// Skip paths matching this pattern (repeatable)
    #[arg(long = "exclude")]
    pub excludes: Vec<String>,
    /// Patterns selecting the original paths to restore
    #[arg(required = true)]
    pub patterns: Vec<String>,
}
