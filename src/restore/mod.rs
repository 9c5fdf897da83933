use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use regex::Regex;
use tracing::{info, warn};

use crate::error::Result;
use crate::manifest::history::{self, PathFilter};
use crate::pool::WorkerPool;
use crate::storage::{self, Backend};
use crate::types::{now_epoch, RunMode, Stamp};
use crate::util;

/// What to restore: which machine's history, where to put it, which paths
/// qualify, and the as-of moment generations must not postdate.
#[derive(Debug)]
pub struct RestoreRequest {
    pub machine: String,
    pub dest: PathBuf,
    pub includes: Vec<Regex>,
    pub excludes: Vec<Regex>,
    pub asof: Option<Stamp>,
    pub threads: usize,
}

/// One resolved restore: the stored copy, the path it originally had, the
/// path it lands at, and the capture time its mtime is set to.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreCandidate {
    pub remote_path: String,
    pub original_path: String,
    pub local_path: PathBuf,
    pub time: f64,
}

/// Resolve the version of every qualifying path as of the cutoff. Pure
/// planning; nothing is copied. Candidates come back sorted by original
/// path so runs are reproducible.
pub fn plan_restore(
    backend: &dyn Backend,
    root: &str,
    request: &RestoreRequest,
) -> Result<Vec<RestoreCandidate>> {
    let machine_path = format!("{}/bkp/{}", root.trim_end_matches('/'), request.machine);
    let cutoff = match &request.asof {
        Some(stamp) => stamp.to_epoch().map_err(crate::error::VaultError::message)?,
        None => now_epoch(),
    };
    let filter = PathFilter::new(&request.includes, &request.excludes);
    let versions = history::resolve_versions(backend, &machine_path, cutoff, &filter);

    let mut candidates: Vec<RestoreCandidate> = versions
        .into_iter()
        .map(|(original_path, version)| {
            let relative = original_path.trim_start_matches('/');
            RestoreCandidate {
                remote_path: version.remote_path,
                local_path: request.dest.join(relative),
                original_path,
                time: version.time,
            }
        })
        .collect();
    candidates.sort_by(|a, b| a.original_path.cmp(&b.original_path));
    Ok(candidates)
}

/// Fetch the planned candidates through the worker pool, stamping each
/// restored file's mtime to its generation time, never the original mtime.
/// Returns the number of failed restores.
pub fn run_restore(
    backend: Arc<dyn Backend>,
    candidates: Vec<RestoreCandidate>,
    threads: usize,
    run_mode: RunMode,
) -> u64 {
    if candidates.is_empty() {
        info!("nothing to restore");
        return 0;
    }
    let errors = Arc::new(AtomicU64::new(0));
    let pool = {
        let backend = Arc::clone(&backend);
        let errors = Arc::clone(&errors);
        let dry_run = run_mode.dry_run;
        WorkerPool::start(threads, move |candidate: RestoreCandidate| {
            let result = if dry_run {
                Ok(())
            } else {
                backend
                    .get(&candidate.remote_path, &candidate.local_path)
                    .and_then(|()| util::set_file_mtime(&candidate.local_path, candidate.time))
            };
            match result {
                Ok(()) => {
                    info!(
                        "restored {} to {}",
                        candidate.remote_path,
                        candidate.local_path.display()
                    );
                }
                Err(err) => {
                    errors.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        "restore of {} failed: {}",
                        candidate.remote_path, err
                    );
                }
            }
        })
    };
    for candidate in candidates {
        pool.submit(candidate);
    }
    pool.drain();
    errors.load(Ordering::SeqCst)
}

/// Plan and run in one go, resolving the backend from the root URI.
pub fn restore(root: &str, request: &RestoreRequest, run_mode: RunMode) -> Result<u64> {
    let backend = storage::backend_for(root)?;
    let candidates = plan_restore(backend.as_ref(), root, request)?;
    info!("restoring {} files", candidates.len());
    Ok(run_restore(backend, candidates, request.threads, run_mode))
}
