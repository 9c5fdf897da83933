use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::model::BackupJob;
use crate::error::{ConfigError, Result};
use crate::manifest::{ManifestEntry, END_CONFIG_SENTINEL};

/// Serialize the job and its time window as the `key = value` block heading
/// a manifest log. List values are `;`-joined. A restarted run reads this
/// back instead of the YAML config, so the block is the authoritative record
/// of what the run was doing.
pub fn write_block<W: Write>(out: &mut W, job: &BackupJob, window: (f64, f64)) -> Result<()> {
    writeln!(out, "root = {}", job.root)?;
    writeln!(
        out,
        "dirs = {}",
        job.dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(";")
    )?;
    writeln!(
        out,
        "exclude_files = {}",
        job.exclude_files.as_ref().map(Regex::as_str).unwrap_or("")
    )?;
    writeln!(
        out,
        "exclude_dirs = {}",
        job.exclude_dirs
            .iter()
            .map(Regex::as_str)
            .collect::<Vec<_>>()
            .join(";")
    )?;
    writeln!(out, "log_email = {}", job.log_email.as_deref().unwrap_or(""))?;
    writeln!(out, "error_email = {}", job.error_email.as_deref().unwrap_or(""))?;
    writeln!(out, "threads = {}", job.threads)?;
    writeln!(out, "start_time = {}", window.0)?;
    writeln!(out, "end_time = {}", window.1)?;
    writeln!(out, "{}", END_CONFIG_SENTINEL)?;
    Ok(())
}

/// Everything needed to resume an aborted run: the reconstructed job, the
/// original window, and the local paths its log already accounts for.
#[derive(Debug)]
pub struct RestartPlan {
    pub job: BackupJob,
    pub window: (f64, f64),
    pub processed: HashSet<String>,
}

pub fn parse_restart_log(path: &Path, state_dir: &Path) -> Result<RestartPlan> {
    let contents = fs::read_to_string(path)?;

    let mut root = None;
    let mut dirs = Vec::new();
    let mut exclude_files = None;
    let mut exclude_dirs = Vec::new();
    let mut log_email = None;
    let mut error_email = None;
    let mut threads = 1usize;
    let mut start_time = None;
    let mut end_time = None;
    let mut processed = HashSet::new();

    let mut past_config = false;
    for line in contents.lines() {
        if past_config {
            if let Some(entry) = ManifestEntry::parse_line(line) {
                processed.insert(entry.local_path);
            }
            continue;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match key.as_str() {
            "end_config" => past_config = true,
            "root" => root = Some(value.to_string()),
            "dirs" => {
                dirs = split_list(value).into_iter().map(PathBuf::from).collect();
            }
            "exclude_files" if !value.is_empty() => {
                exclude_files = Some(compile(value)?);
            }
            "exclude_dirs" => {
                exclude_dirs = split_list(value)
                    .into_iter()
                    .map(|p| compile(&p))
                    .collect::<Result<Vec<_>>>()?;
            }
            "log_email" if !value.is_empty() => log_email = Some(value.to_string()),
            "error_email" if !value.is_empty() => error_email = Some(value.to_string()),
            "threads" => {
                threads = value
                    .parse::<usize>()
                    .map_err(|_| ConfigError::Parse(format!("threads = {}", value)))?
                    .max(1);
            }
            "start_time" => start_time = Some(parse_time(value)?),
            "end_time" => end_time = Some(parse_time(value)?),
            _ => {}
        }
    }

    let root =
        root.ok_or_else(|| ConfigError::Parse("restart log has no root".to_string()))?;
    if dirs.is_empty() {
        return Err(ConfigError::Parse("restart log has no dirs".to_string()).into());
    }
    let start_time = start_time
        .ok_or_else(|| ConfigError::Parse("restart log has no start_time".to_string()))?;
    let end_time =
        end_time.ok_or_else(|| ConfigError::Parse("restart log has no end_time".to_string()))?;

    Ok(RestartPlan {
        job: BackupJob {
            root,
            dirs,
            exclude_files,
            exclude_dirs,
            threads,
            log_email,
            error_email,
            state_dir: state_dir.to_path_buf(),
        },
        window: (start_time, end_time),
        processed,
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| ConfigError::Parse(format!("pattern {}: {}", pattern, e)).into())
}

fn parse_time(value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| ConfigError::Parse(format!("time value {}", value)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_job(state_dir: &Path) -> BackupJob {
        BackupJob {
            root: "file:///srv/backups".to_string(),
            dirs: vec![PathBuf::from("/home/u/docs"), PathBuf::from("/home/u/code")],
            exclude_files: Some(Regex::new(r".*\.tmp").expect("regex")),
            exclude_dirs: vec![Regex::new("/home/u/code/target").expect("regex")],
            threads: 3,
            log_email: Some("logs@example.org".to_string()),
            error_email: None,
            state_dir: state_dir.to_path_buf(),
        }
    }

    #[test]
    fn block_round_trips_through_restart_parse() {
        let dir = TempDir::new().expect("tempdir");
        let job = sample_job(dir.path());

        let mut block = Vec::new();
        write_block(&mut block, &job, (100.5, 200.25)).expect("write");
        let mut log = block.clone();
        log.extend_from_slice(b"/home/u/docs/a.txt;file:///r/a;transferred;na\n");
        log.extend_from_slice(b"/home/u/docs/b.txt;file:///r/b;error;oops\n");
        let log_path = dir.path().join("bkp.2024.01.01.10.00.00.log");
        fs::write(&log_path, &log).expect("write log");

        let plan = parse_restart_log(&log_path, dir.path()).expect("parse");
        assert_eq!(plan.job.root, job.root);
        assert_eq!(plan.job.dirs, job.dirs);
        assert_eq!(plan.job.threads, 3);
        assert_eq!(
            plan.job.exclude_files.as_ref().map(Regex::as_str),
            Some(r".*\.tmp")
        );
        assert_eq!(plan.window, (100.5, 200.25));
        assert_eq!(plan.processed.len(), 2);
        assert!(plan.processed.contains("/home/u/docs/b.txt"));
    }

    #[test]
    fn truncated_block_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let log_path = dir.path().join("bad.log");
        fs::write(&log_path, "root = file:///srv/backups\n").expect("write");
        assert!(parse_restart_log(&log_path, dir.path()).is_err());
    }
}
