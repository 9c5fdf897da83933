use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, StorageError};

pub mod local;

/// mtime and size of a stored file; mtime is float epoch seconds, the
/// resolution every persisted time in the system uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStat {
    pub mtime: f64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListEntry {
    Dir(String),
    File { path: String, mtime: f64, size: u64 },
}

impl ListEntry {
    pub fn path(&self) -> &str {
        match self {
            ListEntry::Dir(path) => path,
            ListEntry::File { path, .. } => path,
        }
    }
}

/// One storage backend per URI scheme. Paths on the remote side are full
/// URIs; the local side of get/put is a filesystem path.
pub trait Backend: Send + Sync {
    fn get(&self, remote: &str, local: &Path) -> Result<()>;
    fn put(&self, local: &Path, remote: &str) -> Result<()>;
    fn list(&self, path: &str, recursive: bool) -> Result<Vec<ListEntry>>;
    fn delete(&self, path: &str, recursive: bool) -> Result<()>;
    /// `Ok(None)` means the path does not exist; other failures are errors.
    fn stat(&self, path: &str) -> Result<Option<FileStat>>;
    /// Reachability probe used before starting a job.
    fn test(&self, path: &str) -> bool;
    fn set_times(&self, path: &str, mtime: f64) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    File,
    Ssh,
    S3,
}

impl Scheme {
    pub fn of(uri: &str) -> Option<Scheme> {
        if uri.starts_with("file://") {
            Some(Scheme::File)
        } else if uri.starts_with("ssh://") {
            Some(Scheme::Ssh)
        } else if uri.starts_with("s3://") {
            Some(Scheme::S3)
        } else {
            None
        }
    }
}

/// Resolve the backend for a URI once, at configuration time. Every path
/// handed to the returned backend must share the URI's scheme.
pub fn backend_for(uri: &str) -> Result<Arc<dyn Backend>> {
    match Scheme::of(uri) {
        Some(Scheme::File) => Ok(Arc::new(local::LocalFs)),
        Some(Scheme::Ssh) | Some(Scheme::S3) | None => {
            Err(StorageError::UnsupportedScheme(uri.to_string()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_dispatch() {
        assert_eq!(Scheme::of("file:///tmp/x"), Some(Scheme::File));
        assert_eq!(Scheme::of("ssh://host/tmp/x"), Some(Scheme::Ssh));
        assert_eq!(Scheme::of("s3://bucket/key"), Some(Scheme::S3));
        assert_eq!(Scheme::of("/tmp/x"), None);
    }

    #[test]
    fn only_file_backend_is_resolved() {
        assert!(backend_for("file:///tmp/x").is_ok());
        assert!(backend_for("ssh://host/x").is_err());
        assert!(backend_for("s3://bucket/x").is_err());
        assert!(backend_for("relative/path").is_err());
    }
}
