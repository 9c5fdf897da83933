use std::path::Path;

use chrono::{Local, LocalResult, TimeZone};

use crate::backup::BackupRun;
use crate::config::block;
use crate::config::load;
use crate::error::Result;
use crate::notify::LogNotifier;
use crate::types::RunMode;

pub fn run_backup(
    config_path: &Path,
    restart_log: Option<&Path>,
    run_mode: RunMode,
) -> Result<u64> {
    match restart_log {
        Some(log_path) => {
            let plan = block::parse_restart_log(log_path, &load::default_state_dir())?;
            BackupRun::restart(plan, log_path, run_mode, &LogNotifier)
        }
        None => {
            let cfg = load::load_config(config_path)?;
            let job = load::backup_job(&cfg)?;
            let run = BackupRun::new(job, run_mode)?;
            run.backup(&LogNotifier)
        }
    }
}

pub fn run_list(config_path: &Path, run_mode: RunMode) -> Result<u64> {
    let cfg = load::load_config(config_path)?;
    let job = load::backup_job(&cfg)?;
    let run = BackupRun::new(job, run_mode)?;
    for (path, times) in run.list_history() {
        for time in times {
            println!("{} {}", format_epoch(time), path);
        }
    }
    Ok(0)
}

pub fn run_compact(config_path: &Path, run_mode: RunMode) -> Result<u64> {
    let cfg = load::load_config(config_path)?;
    let job = load::backup_job(&cfg)?;
    let run = BackupRun::new(job, run_mode)?;
    let removed = run.compact()?;
    println!("removed {} empty generations", removed);
    Ok(0)
}

fn format_epoch(epoch: f64) -> String {
    match Local.timestamp_opt(epoch as i64, 0) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.format("%c").to_string(),
        LocalResult::None => format!("{}", epoch),
    }
}
