use std::path::Path;

use regex::Regex;

use crate::cli::args::RestoreArgs;
use crate::config::load;
use crate::error::{ConfigError, Result};
use crate::restore::{self, RestoreRequest};
use crate::types::{RunMode, Stamp};
use crate::util;

pub fn run_restore(config_path: &Path, args: RestoreArgs, run_mode: RunMode) -> Result<u64> {
    let cfg = load::load_config(config_path)?;
    let job = load::backup_job(&cfg)?;

    let asof = match &args.asof {
        Some(text) => Some(
            text.parse::<Stamp>()
                .map_err(|e| ConfigError::Invalid(format!("--asof: {}", e)))?,
        ),
        None => None,
    };
    let request = RestoreRequest {
        machine: args.machine.unwrap_or_else(util::local_hostname),
        dest: args.dest,
        includes: compile("pattern", &args.patterns)?,
        excludes: compile("--exclude", &args.excludes)?,
        asof,
        threads: job.threads,
    };
    restore::restore(&job.root, &request, run_mode)
}

fn compile(what: &str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| ConfigError::Invalid(format!("{} {}: {}", what, p, e)).into())
        })
        .collect()
}
