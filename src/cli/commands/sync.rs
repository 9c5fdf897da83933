use std::path::Path;

use crate::config::load;
use crate::error::Result;
use crate::sync;
use crate::types::RunMode;

pub fn run_sync(config_path: &Path, run_mode: RunMode) -> Result<u64> {
    let cfg = load::load_config(config_path)?;
    let job = load::sync_job(&cfg)?;
    let stats = sync::synchronize(&job, run_mode)?;
    Ok(stats.errors)
}
