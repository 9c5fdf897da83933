use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::model::SyncJob;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::storage::{self, Backend, ListEntry};
use crate::types::RunMode;
use crate::util;

/// Two-way transfers are mirror-relative: a local absolute path is appended
/// to the target URI verbatim, so the remote tree reads like the local one.
enum SyncTask {
    Push {
        local: PathBuf,
        remote: String,
        mtime: f64,
    },
    Fetch {
        remote: String,
        local: PathBuf,
        mtime: f64,
    },
}

/// Clock skew between the two sides is tolerated up to a second; equal-ish
/// mtimes mean no transfer in either direction.
const MTIME_TOLERANCE: f64 = 1.0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub pushes: u64,
    pub fetches: u64,
    pub errors: u64,
}

struct SyncState {
    visited_files: HashSet<String>,
    visited_dirs: HashSet<String>,
    markers: Vec<String>,
    tombstones: HashSet<String>,
    pushes: u64,
    fetches: u64,
}

/// One bidirectional pass over the configured dirs. Stateless between runs
/// except for the tombstone file; an unreachable target is a clean no-op.
pub fn synchronize(job: &SyncJob, run_mode: RunMode) -> Result<SyncStats> {
    let backend = storage::backend_for(&job.target)?;
    if !backend.test(&job.target) {
        warn!("sync target {} is unreachable, nothing to do", job.target);
        return Ok(SyncStats::default());
    }

    let mut state = SyncState {
        visited_files: HashSet::new(),
        visited_dirs: HashSet::new(),
        markers: Vec::new(),
        tombstones: load_tombstones(&job.tombstone_path),
        pushes: 0,
        fetches: 0,
    };

    let errors = Arc::new(AtomicU64::new(0));
    let pool = {
        let backend = Arc::clone(&backend);
        let errors = Arc::clone(&errors);
        let dry_run = run_mode.dry_run;
        WorkerPool::start(job.threads, move |task: SyncTask| {
            let result = if dry_run { Ok(()) } else { run_task(backend.as_ref(), &task) };
            if let Err(err) = result {
                errors.fetch_add(1, Ordering::SeqCst);
                warn!("sync transfer failed: {}", err);
            }
        })
    };

    for dir in &job.dirs {
        if let Err(err) = sync_directory(job, backend.as_ref(), dir, &pool, &mut state) {
            warn!("sync of {} failed: {}", dir.display(), err);
        }
    }

    pool.drain();

    // Markers only land after every transfer has settled, so a marker
    // always means "this directory was fully visited".
    let marker_node = format!(".sync.{}", util::local_hostname());
    let marker_body = format!("synchronized {}", chrono::Local::now().format("%c"));
    for dir in &state.markers {
        if let Err(err) =
            util::put_contents(backend.as_ref(), dir, &marker_node, &marker_body, run_mode.dry_run)
        {
            warn!("marker write in {} failed: {}", dir, err);
        }
    }

    if !run_mode.dry_run {
        write_tombstones(&job.tombstone_path, &state.visited_files)?;
    }

    let stats = SyncStats {
        pushes: state.pushes,
        fetches: state.fetches,
        errors: errors.load(Ordering::SeqCst),
    };
    info!(
        "sync complete: {} pushed, {} fetched, {} errors",
        stats.pushes, stats.fetches, stats.errors
    );
    Ok(stats)
}

fn run_task(backend: &dyn Backend, task: &SyncTask) -> Result<()> {
    match task {
        SyncTask::Push { local, remote, mtime } => {
            backend.put(local, remote)?;
            backend.set_times(remote, *mtime)
        }
        SyncTask::Fetch { remote, local, mtime } => {
            backend.get(remote, local)?;
            if *mtime >= 0.0 {
                util::set_file_mtime(local, *mtime)?;
            }
            Ok(())
        }
    }
}

fn sync_directory(
    job: &SyncJob,
    backend: &dyn Backend,
    dir: &std::path::Path,
    pool: &WorkerPool<SyncTask>,
    state: &mut SyncState,
) -> Result<()> {
    let dir = util::absolute(dir)?;
    let remote_root = format!("{}{}", job.target, dir.display());
    // One recursive listing up front; everything the local walk does not
    // account for afterwards only exists on the remote side.
    let remote_files = match backend.list(&remote_root, true) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("no remote listing for {}: {}", remote_root, err);
            Vec::new()
        }
    };

    let walker = WalkDir::new(&dir).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| descend(e, job)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("walk error under {}: {}", dir.display(), err);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            let remote_dir = format!("{}{}", job.target, entry.path().display());
            if state.visited_dirs.insert(remote_dir.clone()) {
                state.markers.push(remote_dir);
            }
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        if let Some(pattern) = &job.exclude_files {
            if util::match_at_start(pattern, &name) {
                continue;
            }
        }

        let local = entry.path().to_path_buf();
        let local_str = local.display().to_string();
        let remote = format!("{}{}", job.target, local_str);
        let local_mtime = match entry.metadata() {
            Ok(meta) => meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            Err(err) => {
                warn!("stat {} failed: {}", local_str, err);
                continue;
            }
        };
        let remote_mtime = match backend.stat(&remote) {
            Ok(Some(stat)) => stat.mtime,
            Ok(None) => -1.0,
            Err(err) => {
                warn!("remote stat {} failed: {}", remote, err);
                continue;
            }
        };
        state.visited_files.insert(remote.clone());

        if remote_mtime - local_mtime >= MTIME_TOLERANCE {
            debug!("fetch {} (remote newer by {:.1}s)", remote, remote_mtime - local_mtime);
            state.fetches += 1;
            pool.submit(SyncTask::Fetch {
                remote,
                local,
                mtime: remote_mtime,
            });
        } else if local_mtime - remote_mtime >= MTIME_TOLERANCE {
            debug!("push {} (local newer by {:.1}s)", local_str, local_mtime - remote_mtime);
            state.pushes += 1;
            pool.submit(SyncTask::Push {
                local,
                remote,
                mtime: local_mtime,
            });
        }
    }

    remote_only_pass(job, &remote_files, pool, state);
    Ok(())
}

/// Remote paths the local walk never touched: tombstoned ones were deleted
/// on this client and stay deleted; the rest are fetched.
fn remote_only_pass(
    job: &SyncJob,
    remote_files: &[ListEntry],
    pool: &WorkerPool<SyncTask>,
    state: &mut SyncState,
) {
    for entry in remote_files {
        let ListEntry::File { path, mtime, .. } = entry else {
            continue;
        };
        if state.visited_files.contains(path) {
            continue;
        }
        let Some(local_path) = path.strip_prefix(&job.target) else {
            continue;
        };
        let (ldir, lnode) = match local_path.rsplit_once('/') {
            Some(split) => split,
            None => continue,
        };
        if lnode.starts_with('.') {
            continue;
        }
        if ldir.contains("/.") {
            continue;
        }
        if job.exclude_dirs.iter().any(|re| re.is_match(ldir)) {
            continue;
        }
        if let Some(pattern) = &job.exclude_files {
            if util::match_at_start(pattern, lnode) {
                continue;
            }
        }

        if state.tombstones.contains(path) {
            debug!("skipping {}: deleted on this client", path);
        } else {
            debug!("fetch {} (remote only)", path);
            state.fetches += 1;
            pool.submit(SyncTask::Fetch {
                remote: path.clone(),
                local: PathBuf::from(local_path),
                mtime: *mtime,
            });
        }
        state.visited_files.insert(path.clone());

        let remote_dir = format!("{}{}", job.target, ldir);
        if state.visited_dirs.insert(remote_dir.clone()) {
            state.markers.push(remote_dir);
        }
    }
}

fn descend(entry: &walkdir::DirEntry, job: &SyncJob) -> bool {
    if !entry.file_type().is_dir() {
        return true;
    }
    if entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.') {
        return false;
    }
    let path = entry.path().display().to_string();
    !job.exclude_dirs.iter().any(|re| re.is_match(&path))
}

fn load_tombstones(path: &std::path::Path) -> HashSet<String> {
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => HashSet::new(),
    }
}

fn write_tombstones(path: &std::path::Path, visited: &HashSet<String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut paths: Vec<&String> = visited.iter().collect();
    paths.sort();
    let mut body = String::new();
    for p in paths {
        body.push_str(p);
        body.push('\n');
    }
    fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_job(target: &Path, src: &Path, state: &Path) -> SyncJob {
        SyncJob {
            target: format!("file://{}", target.display()),
            dirs: vec![src.to_path_buf()],
            exclude_files: None,
            exclude_dirs: Vec::new(),
            threads: 2,
            tombstone_path: state.join("tombstones"),
        }
    }

    fn run_mode() -> RunMode {
        RunMode {
            dry_run: false,
            verbose: false,
        }
    }

    fn remote_mirror(target: &Path, local: &Path) -> PathBuf {
        let local = util::absolute(local).expect("abs");
        target.join(local.display().to_string().trim_start_matches('/'))
    }

    #[test]
    fn first_pass_pushes_then_idempotent() {
        let target = TempDir::new().expect("tempdir");
        let src = TempDir::new().expect("tempdir");
        let state = TempDir::new().expect("tempdir");
        fs::write(src.path().join("a.txt"), "a").expect("write");
        fs::write(src.path().join("b.txt"), "b").expect("write");

        let job = test_job(target.path(), src.path(), state.path());
        let stats = synchronize(&job, run_mode()).expect("sync");
        assert_eq!(stats.pushes, 2);
        assert_eq!(stats.fetches, 0);
        assert_eq!(stats.errors, 0);

        let mirrored = remote_mirror(target.path(), &src.path().join("a.txt"));
        assert_eq!(fs::read_to_string(&mirrored).expect("read"), "a");

        // Visited remote dirs carry this client's sentinel marker.
        let marker_dir = remote_mirror(target.path(), src.path());
        let marker = marker_dir.join(format!(".sync.{}", util::local_hostname()));
        assert!(marker.exists());

        // The tombstone file records every visited remote path.
        let tombstones = fs::read_to_string(&job.tombstone_path).expect("read");
        assert_eq!(tombstones.lines().count(), 2);

        // A second pass finds both sides identical.
        let stats = synchronize(&job, run_mode()).expect("sync");
        assert_eq!(stats, SyncStats { pushes: 0, fetches: 0, errors: 0 });
    }

    #[test]
    fn locally_deleted_files_stay_deleted() {
        let target = TempDir::new().expect("tempdir");
        let src = TempDir::new().expect("tempdir");
        let state = TempDir::new().expect("tempdir");
        fs::write(src.path().join("gone.txt"), "x").expect("write");

        let job = test_job(target.path(), src.path(), state.path());
        synchronize(&job, run_mode()).expect("sync");
        let mirrored = remote_mirror(target.path(), &src.path().join("gone.txt"));
        assert!(mirrored.exists());

        // Delete locally; the remote copy must not come back.
        fs::remove_file(src.path().join("gone.txt")).expect("remove");
        let stats = synchronize(&job, run_mode()).expect("sync");
        assert_eq!(stats.fetches, 0);
        assert!(!src.path().join("gone.txt").exists());
        assert!(mirrored.exists());

        // The tombstone survives the rewrite for the next pass too.
        let tombstones = fs::read_to_string(&job.tombstone_path).expect("read");
        assert_eq!(tombstones.lines().count(), 1);
    }

    #[test]
    fn unseen_remote_files_are_fetched_with_their_mtime() {
        let target = TempDir::new().expect("tempdir");
        let src = TempDir::new().expect("tempdir");
        let state = TempDir::new().expect("tempdir");

        let job = test_job(target.path(), src.path(), state.path());
        synchronize(&job, run_mode()).expect("sync");

        // A peer drops a new file into the mirrored tree.
        let incoming_local = src.path().join("incoming.txt");
        let incoming_remote = remote_mirror(target.path(), &incoming_local);
        fs::create_dir_all(incoming_remote.parent().expect("parent")).expect("mkdir");
        fs::write(&incoming_remote, "from peer").expect("write");
        util::set_file_mtime(&incoming_remote, 1_600_000_000.0).expect("mtime");

        let stats = synchronize(&job, run_mode()).expect("sync");
        assert_eq!(stats.fetches, 1);
        assert_eq!(fs::read_to_string(&incoming_local).expect("read"), "from peer");
        let mtime = fs::metadata(&incoming_local)
            .expect("meta")
            .modified()
            .expect("modified")
            .duration_since(std::time::UNIX_EPOCH)
            .expect("epoch")
            .as_secs_f64();
        assert!((mtime - 1_600_000_000.0).abs() < 1.0);
    }

    #[test]
    fn newer_remote_content_wins_locally() {
        let target = TempDir::new().expect("tempdir");
        let src = TempDir::new().expect("tempdir");
        let state = TempDir::new().expect("tempdir");
        fs::write(src.path().join("doc.txt"), "stale").expect("write");
        util::set_file_mtime(&src.path().join("doc.txt"), 1_600_000_000.0).expect("mtime");

        let job = test_job(target.path(), src.path(), state.path());
        let mirrored = remote_mirror(target.path(), &src.path().join("doc.txt"));
        fs::create_dir_all(mirrored.parent().expect("parent")).expect("mkdir");
        fs::write(&mirrored, "fresh").expect("write");
        util::set_file_mtime(&mirrored, 1_600_000_100.0).expect("mtime");

        let stats = synchronize(&job, run_mode()).expect("sync");
        assert_eq!(stats.fetches, 1);
        assert_eq!(stats.pushes, 0);
        assert_eq!(
            fs::read_to_string(src.path().join("doc.txt")).expect("read"),
            "fresh"
        );
    }

    #[test]
    fn unreachable_target_is_a_quiet_noop() {
        let src = TempDir::new().expect("tempdir");
        let state = TempDir::new().expect("tempdir");
        fs::write(src.path().join("a.txt"), "a").expect("write");
        let job = SyncJob {
            target: "file:///definitely/not/mounted".to_string(),
            dirs: vec![src.path().to_path_buf()],
            exclude_files: None,
            exclude_dirs: Vec::new(),
            threads: 1,
            tombstone_path: state.path().join("tombstones"),
        };
        let stats = synchronize(&job, run_mode()).expect("sync");
        assert_eq!(stats, SyncStats::default());
        assert!(!job.tombstone_path.exists());
    }
}
