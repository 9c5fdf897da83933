use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::model::{BackupJob, BackupSection, Config, SyncJob, SyncSection};
use crate::error::{ConfigError, Result, VaultError};
use crate::storage::Scheme;

pub fn load_config(path: &Path) -> Result<Config> {
    let mut contents = String::new();
    File::open(path)
        .map_err(VaultError::Io)?
        .read_to_string(&mut contents)
        .map_err(VaultError::Io)?;
    let cfg: Config = serde_yaml::from_str(&contents)
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(cfg)
}

pub fn backup_job(cfg: &Config) -> Result<BackupJob> {
    let section = cfg
        .backup
        .as_ref()
        .ok_or_else(|| ConfigError::Invalid("no backup section in config".to_string()))?;
    parse_backup_section(section)
}

pub fn sync_job(cfg: &Config) -> Result<SyncJob> {
    let section = cfg
        .sync
        .as_ref()
        .ok_or_else(|| ConfigError::Invalid("no sync section in config".to_string()))?;
    parse_sync_section(section)
}

fn parse_backup_section(section: &BackupSection) -> Result<BackupJob> {
    check_uri("backup root", &section.root)?;
    if section.dirs.is_empty() {
        return Err(ConfigError::Invalid("backup: dirs is empty".to_string()).into());
    }
    Ok(BackupJob {
        root: section.root.trim_end_matches('/').to_string(),
        dirs: section.dirs.iter().map(PathBuf::from).collect(),
        exclude_files: compile_optional("backup excludeFiles", &section.exclude_files)?,
        exclude_dirs: compile_all("backup excludeDirs", &section.exclude_dirs)?,
        threads: section.threads.max(1),
        log_email: section.log_email.clone(),
        error_email: section.error_email.clone(),
        state_dir: section
            .state_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir),
    })
}

fn parse_sync_section(section: &SyncSection) -> Result<SyncJob> {
    check_uri("sync target", &section.target)?;
    if section.dirs.is_empty() {
        return Err(ConfigError::Invalid("sync: dirs is empty".to_string()).into());
    }
    let state_dir = default_state_dir();
    Ok(SyncJob {
        target: section.target.trim_end_matches('/').to_string(),
        dirs: section.dirs.iter().map(PathBuf::from).collect(),
        exclude_files: compile_optional("sync excludeFiles", &section.exclude_files)?,
        exclude_dirs: compile_all("sync excludeDirs", &section.exclude_dirs)?,
        threads: section.threads.max(1),
        tombstone_path: section
            .tombstones
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| state_dir.join("tombstones")),
    })
}

fn check_uri(what: &str, uri: &str) -> Result<()> {
    if Scheme::of(uri).is_none() {
        return Err(ConfigError::Invalid(format!(
            "{} {} must be a file://, ssh:// or s3:// URI",
            what, uri
        ))
        .into());
    }
    Ok(())
}

fn compile_optional(what: &str, pattern: &Option<String>) -> Result<Option<Regex>> {
    match pattern {
        None => Ok(None),
        Some(p) if p.trim().is_empty() => Ok(None),
        Some(p) => Ok(Some(compile(what, p)?)),
    }
}

fn compile_all(what: &str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| compile(what, p))
        .collect()
}

fn compile(what: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| ConfigError::Invalid(format!("{} pattern {}: {}", what, pattern, e)).into())
}

pub fn default_state_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) if !home.trim().is_empty() => PathBuf::from(home).join(".genvault"),
        _ => PathBuf::from("/tmp/.genvault"),
    }
}
