use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, LocalResult, NaiveDateTime, TimeZone};

/// Generation timestamps are local time, second resolution, lexically
/// sortable: `2024.03.07.22.15.41`.
pub const STAMP_FORMAT: &str = "%Y.%m.%d.%H.%M.%S";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stamp(String);

impl Stamp {
    pub fn from_epoch(epoch: f64) -> Result<Self, String> {
        if !epoch.is_finite() || epoch < 0.0 {
            return Err(format!("invalid epoch time {}", epoch));
        }
        match Local.timestamp_opt(epoch as i64, 0) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                Ok(Stamp(dt.format(STAMP_FORMAT).to_string()))
            }
            LocalResult::None => Err(format!("epoch {} has no local representation", epoch)),
        }
    }

    /// Epoch seconds of the stamp, interpreted in local time.
    pub fn to_epoch(&self) -> Result<f64, String> {
        let naive = NaiveDateTime::parse_from_str(&self.0, STAMP_FORMAT)
            .map_err(|e| format!("bad stamp {}: {}", self.0, e))?;
        match Local.from_local_datetime(&naive) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt.timestamp() as f64),
            LocalResult::None => Err(format!("stamp {} has no local representation", self.0)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Stamp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDateTime::parse_from_str(s, STAMP_FORMAT)
            .map_err(|e| format!("bad stamp {}: {}", s, e))?;
        Ok(Stamp(s.to_string()))
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunMode {
    pub dry_run: bool,
    pub verbose: bool,
}

pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
