use std::fs::{self, File, FileTimes};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::storage::Backend;
use crate::types::now_epoch;

/// Absolute local paths become remote key suffixes; '/' and the usual
/// filename characters stay readable, everything else is percent-escaped.
const PATH_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

pub fn escape_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_ESCAPE).to_string()
}

pub fn unescape_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

/// Fetch a small remote file into a string via a temp file. Any failure,
/// including absence, reads as `None`; callers treat the file as optional.
pub fn get_contents(backend: &dyn Backend, dir_uri: &str, name: &str) -> Option<String> {
    let remote = format!("{}/{}", dir_uri.trim_end_matches('/'), name);
    let tmp = NamedTempFile::new().ok()?;
    backend.get(&remote, tmp.path()).ok()?;
    fs::read_to_string(tmp.path()).ok()
}

/// Write a small remote file through a temp file; the remote copy is
/// stamped with the current time so sync peers see it as fresh.
pub fn put_contents(
    backend: &dyn Backend,
    dir_uri: &str,
    name: &str,
    contents: &str,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        return Ok(());
    }
    let remote = format!("{}/{}", dir_uri.trim_end_matches('/'), name);
    let mut tmp = NamedTempFile::new()?;
    tmp.write_all(contents.as_bytes())?;
    if !contents.ends_with('\n') {
        tmp.write_all(b"\n")?;
    }
    tmp.flush()?;
    backend.put(tmp.path(), &remote)?;
    let _ = backend.set_times(&remote, now_epoch());
    Ok(())
}

pub fn set_file_mtime(path: &Path, mtime: f64) -> Result<()> {
    let file = File::options().write(true).open(path)?;
    let times = FileTimes::new().set_modified(UNIX_EPOCH + Duration::from_secs_f64(mtime.max(0.0)));
    file.set_times(times)?;
    Ok(())
}

/// Match anchored at the start of `text`, leaving patterns that match
/// elsewhere in the string unanchored searches via `Regex::is_match`.
pub fn match_at_start(re: &Regex, text: &str) -> bool {
    re.find(text).map_or(false, |m| m.start() == 0)
}

pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

pub fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

/// Last path component of a slash-separated remote path or URI.
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalFs;
    use tempfile::TempDir;

    #[test]
    fn escape_round_trips_awkward_paths() {
        let original = "/home/user/my docs/a&b (final).txt";
        let escaped = escape_path(original);
        assert!(!escaped.contains(' '));
        assert!(!escaped.contains('&'));
        assert!(escaped.contains('/'));
        assert_eq!(unescape_path(&escaped), original);
    }

    #[test]
    fn contents_round_trip_and_absence() {
        let dir = TempDir::new().expect("tempdir");
        let backend = LocalFs;
        let base = format!("file://{}", dir.path().display());
        assert!(get_contents(&backend, &base, "next").is_none());
        put_contents(&backend, &base, "next", "1234.5", false).expect("put");
        let text = get_contents(&backend, &base, "next").expect("get");
        assert_eq!(text.trim(), "1234.5");
    }

    #[test]
    fn dry_run_put_writes_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let backend = LocalFs;
        let base = format!("file://{}", dir.path().display());
        put_contents(&backend, &base, "next", "99", true).expect("put");
        assert!(get_contents(&backend, &base, "next").is_none());
    }

    #[test]
    fn start_anchored_match() {
        let re = Regex::new(r"core\.\d+").expect("regex");
        assert!(match_at_start(&re, "core.1234"));
        assert!(!match_at_start(&re, "hardcore.1234"));
        assert!(re.is_match("hardcore.1234"));
    }

    #[test]
    fn set_file_mtime_sticks() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("f");
        fs::write(&path, "x").expect("write");
        set_file_mtime(&path, 1_500_000_000.0).expect("set");
        let meta = fs::metadata(&path).expect("meta");
        let mtime = meta
            .modified()
            .expect("modified")
            .duration_since(UNIX_EPOCH)
            .expect("epoch")
            .as_secs_f64();
        assert!((mtime - 1_500_000_000.0).abs() < 1.0);
    }
}
