use std::str::FromStr;

use crate::types::Stamp;

pub mod history;

/// Literal line terminating the config block at the head of every manifest
/// log; everything after it is entry lines.
pub const END_CONFIG_SENTINEL: &str = "end_config = True";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Transferred,
    Error,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Transferred => "transferred",
            EntryStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<EntryStatus> {
        match s {
            "transferred" => Some(EntryStatus::Transferred),
            "error" => Some(EntryStatus::Error),
            _ => None,
        }
    }
}

/// One manifest line: `local;remote;status;message`. The message of an
/// error entry may span lines in the source error; newlines are folded to
/// '/' so the manifest stays line-oriented.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub local_path: String,
    pub remote_path: String,
    pub status: EntryStatus,
    pub message: String,
}

impl ManifestEntry {
    pub fn transferred(local_path: impl Into<String>, remote_path: impl Into<String>) -> Self {
        ManifestEntry {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            status: EntryStatus::Transferred,
            message: "na".to_string(),
        }
    }

    pub fn error(
        local_path: impl Into<String>,
        remote_path: impl Into<String>,
        message: &str,
    ) -> Self {
        ManifestEntry {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            status: EntryStatus::Error,
            message: message.replace('\n', "/"),
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "{};{};{};{}",
            self.local_path,
            self.remote_path,
            self.status.as_str(),
            self.message
        )
    }

    pub fn parse_line(line: &str) -> Option<ManifestEntry> {
        let mut parts = line.splitn(4, ';');
        let local_path = parts.next()?.to_string();
        let remote_path = parts.next()?.to_string();
        let status = EntryStatus::parse(parts.next()?)?;
        let message = parts.next()?.to_string();
        Some(ManifestEntry {
            local_path,
            remote_path,
            status,
            message,
        })
    }
}

/// `bkp.<stamp>.log`, the name used both locally and in the sealed copy.
pub fn log_name(stamp: &Stamp) -> String {
    format!("bkp.{}.log", stamp)
}

/// Remote path of the sealed manifest inside a generation.
pub fn sealed_log_path(generation_root: &str, stamp: &Stamp) -> String {
    format!("{}/bkp/{}", generation_root.trim_end_matches('/'), log_name(stamp))
}

/// Sealed manifest location relative to the machine path, for history
/// resolution.
pub fn sealed_log_name(stamp: &Stamp) -> String {
    format!("{}/bkp/{}", stamp, log_name(stamp))
}

/// One backup run: its remote path, stamp, and the stamp's epoch time.
#[derive(Debug, Clone)]
pub struct Generation {
    pub path: String,
    pub stamp: Stamp,
    pub time: f64,
}

impl Generation {
    pub fn new(path: String, stamp: Stamp) -> Option<Generation> {
        let time = stamp.to_epoch().ok()?;
        Some(Generation { path, stamp, time })
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryStatus::parse(s).ok_or_else(|| format!("unknown entry status {}", s))
    }
}
