use std::fs;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Result, StorageError, VaultError};
use crate::storage::{Backend, FileStat, ListEntry};
use crate::util;

/// `file://` backend over std::fs. The path portion of every URI must be
/// absolute.
pub struct LocalFs;

fn fs_path(uri: &str) -> Result<&str> {
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    if !path.starts_with('/') {
        return Err(StorageError::Other(format!("path {} is not absolute", uri)).into());
    }
    Ok(path)
}

fn mtime_of(meta: &fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

impl Backend for LocalFs {
    fn get(&self, remote: &str, local: &Path) -> Result<()> {
        let src = fs_path(remote)?;
        ensure_parent(local)?;
        fs::copy(src, local).map_err(|e| {
            VaultError::message(format!("get {} -> {}: {}", remote, local.display(), e))
        })?;
        Ok(())
    }

    fn put(&self, local: &Path, remote: &str) -> Result<()> {
        let dst = Path::new(fs_path(remote)?);
        ensure_parent(dst)?;
        fs::copy(local, dst).map_err(|e| {
            VaultError::message(format!("put {} -> {}: {}", local.display(), remote, e))
        })?;
        Ok(())
    }

    fn list(&self, path: &str, recursive: bool) -> Result<Vec<ListEntry>> {
        let root = fs_path(path)?;
        let mut entries = Vec::new();
        if recursive {
            for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
                let entry = entry.map_err(|e| StorageError::Other(e.to_string()))?;
                if entry.file_type().is_dir() {
                    entries.push(ListEntry::Dir(format!("file://{}", entry.path().display())));
                } else if entry.file_type().is_file() {
                    let meta = entry.metadata().map_err(|e| StorageError::Other(e.to_string()))?;
                    entries.push(ListEntry::File {
                        path: format!("file://{}", entry.path().display()),
                        mtime: mtime_of(&meta),
                        size: meta.len(),
                    });
                }
            }
        } else {
            for entry in fs::read_dir(root)? {
                let entry = entry?;
                let meta = entry.metadata()?;
                let uri = format!("file://{}", entry.path().display());
                if meta.is_dir() {
                    entries.push(ListEntry::Dir(uri));
                } else if meta.is_file() {
                    entries.push(ListEntry::File {
                        path: uri,
                        mtime: mtime_of(&meta),
                        size: meta.len(),
                    });
                }
            }
        }
        Ok(entries)
    }

    fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        let target = Path::new(fs_path(path)?);
        if recursive && target.is_dir() {
            fs::remove_dir_all(target)?;
        } else {
            fs::remove_file(target)?;
        }
        Ok(())
    }

    fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        match fs::metadata(fs_path(path)?) {
            Ok(meta) => Ok(Some(FileStat {
                mtime: mtime_of(&meta),
                size: meta.len(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn test(&self, path: &str) -> bool {
        fs_path(path).map(|p| Path::new(p).exists()).unwrap_or(false)
    }

    fn set_times(&self, path: &str, mtime: f64) -> Result<()> {
        util::set_file_mtime(Path::new(fs_path(path)?), mtime)
    }
}
