use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSection>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BackupSection {
    /// Backup root URI, e.g. `file:///srv/backups`.
    pub root: String,
    pub dirs: Vec<String>,
    #[serde(default, rename = "excludeFiles", skip_serializing_if = "Option::is_none")]
    pub exclude_files: Option<String>,
    #[serde(default, rename = "excludeDirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default, rename = "logEmail", skip_serializing_if = "Option::is_none")]
    pub log_email: Option<String>,
    #[serde(default, rename = "errorEmail", skip_serializing_if = "Option::is_none")]
    pub error_email: Option<String>,
    #[serde(default, rename = "stateDir", skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncSection {
    /// Sync target URI; the mirrored tree lives directly under it.
    pub target: String,
    pub dirs: Vec<String>,
    #[serde(default, rename = "excludeFiles", skip_serializing_if = "Option::is_none")]
    pub exclude_files: Option<String>,
    #[serde(default, rename = "excludeDirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstones: Option<String>,
}

/// Validated backup job: URIs checked, patterns compiled, defaults filled.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub root: String,
    pub dirs: Vec<PathBuf>,
    pub exclude_files: Option<Regex>,
    pub exclude_dirs: Vec<Regex>,
    pub threads: usize,
    pub log_email: Option<String>,
    pub error_email: Option<String>,
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SyncJob {
    pub target: String,
    pub dirs: Vec<PathBuf>,
    pub exclude_files: Option<Regex>,
    pub exclude_dirs: Vec<Regex>,
    pub threads: usize,
    pub tombstone_path: PathBuf,
}

fn default_threads() -> usize {
    4
}
