use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::block::{self, RestartPlan};
use crate::config::model::BackupJob;
use crate::error::{Result, VaultError};
use crate::logger::{AsyncLogger, Checkpoint};
use crate::manifest::{self, history, ManifestEntry};
use crate::notify::{self, Notifier, Report};
use crate::pool::WorkerPool;
use crate::storage::{self, Backend, ListEntry};
use crate::types::{now_epoch, RunMode, Stamp};
use crate::util;

struct CopyTask {
    local: PathBuf,
    remote: String,
}

/// One configured backup job bound to its backend and machine identity.
/// Generations for this machine live under `<root>/bkp/<machine>/`.
pub struct BackupRun {
    job: BackupJob,
    backend: Arc<dyn Backend>,
    run_mode: RunMode,
    machine: String,
    machine_path: String,
}

impl BackupRun {
    pub fn new(job: BackupJob, run_mode: RunMode) -> Result<BackupRun> {
        let backend = storage::backend_for(&job.root)?;
        if !backend.test(&job.root) {
            return Err(VaultError::message(format!(
                "backup root {} is unreachable",
                job.root
            )));
        }
        let machine = util::local_hostname();
        let machine_path = format!("{}/bkp/{}", job.root, machine);
        Ok(BackupRun {
            job,
            backend,
            run_mode,
            machine,
            machine_path,
        })
    }

    pub fn machine_path(&self) -> &str {
        &self.machine_path
    }

    /// Full backup pass: advance the cursor window, capture everything the
    /// window or the history demands, seal the manifest, deliver the report.
    /// Returns the number of file-level errors.
    pub fn backup(&self, notifier: &dyn Notifier) -> Result<u64> {
        self.alert_interrupted(notifier);

        let history = history::history_map(self.backend.as_ref(), &self.machine_path);

        // Cursor first: the end of this window is on record before any
        // copying starts, so a concurrent or later run cannot reuse it.
        let start_time = util::get_contents(self.backend.as_ref(), &self.machine_path, "next")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        let end_time = now_epoch();
        util::put_contents(
            self.backend.as_ref(),
            &self.machine_path,
            "next",
            &format!("{}", end_time),
            self.run_mode.dry_run,
        )?;

        let stamp = Stamp::from_epoch(end_time).map_err(VaultError::message)?;
        fs::create_dir_all(&self.job.state_dir)?;
        let local_log = self.job.state_dir.join(manifest::log_name(&stamp));
        let mut log_file = File::create(&local_log)?;
        block::write_block(&mut log_file, &self.job, (start_time, end_time))?;
        drop(log_file);

        self.drive(
            &stamp,
            (start_time, end_time),
            &history,
            HashSet::new(),
            local_log,
            notifier,
        )
    }

    /// Resume an aborted run from its manifest log: same window, same
    /// generation, already-logged paths skipped. The log is appended to and
    /// sealed as usual.
    pub fn restart(
        plan: RestartPlan,
        log_path: &Path,
        run_mode: RunMode,
        notifier: &dyn Notifier,
    ) -> Result<u64> {
        let run = BackupRun::new(plan.job, run_mode)?;
        let history = history::history_map(run.backend.as_ref(), &run.machine_path);
        let stamp = Stamp::from_epoch(plan.window.1).map_err(VaultError::message)?;
        run.drive(
            &stamp,
            plan.window,
            &history,
            plan.processed,
            log_path.to_path_buf(),
            notifier,
        )
    }

    fn drive(
        &self,
        stamp: &Stamp,
        window: (f64, f64),
        history: &HashMap<String, Vec<f64>>,
        processed: HashSet<String>,
        local_log: PathBuf,
        notifier: &dyn Notifier,
    ) -> Result<u64> {
        let generation_root = format!("{}/{}", self.machine_path, stamp);
        let remote_log = manifest::sealed_log_path(&generation_root, stamp);

        let logger = AsyncLogger::start(
            local_log.clone(),
            self.run_mode.verbose,
            Some(Checkpoint {
                backend: Arc::clone(&self.backend),
                remote_path: remote_log.clone(),
            }),
            self.run_mode.dry_run,
        );

        let errors = Arc::new(AtomicU64::new(0));
        let transferred = Arc::new(AtomicU64::new(0));
        let pool = {
            let backend = Arc::clone(&self.backend);
            let handle = logger.handle();
            let errors = Arc::clone(&errors);
            let transferred = Arc::clone(&transferred);
            let dry_run = self.run_mode.dry_run;
            WorkerPool::start(self.job.threads, move |task: CopyTask| {
                let local = task.local.display().to_string();
                let result = if dry_run {
                    Ok(())
                } else {
                    backend.put(&task.local, &task.remote)
                };
                let entry = match result {
                    Ok(()) => {
                        transferred.fetch_add(1, Ordering::SeqCst);
                        ManifestEntry::transferred(local, task.remote)
                    }
                    Err(err) => {
                        errors.fetch_add(1, Ordering::SeqCst);
                        warn!("copy failed: {}", err);
                        ManifestEntry::error(local, task.remote, &err.to_string())
                    }
                };
                handle.log(entry.to_line());
            })
        };

        for dir in &self.job.dirs {
            if let Err(err) =
                self.scan_directory(dir, &pool, &generation_root, window, history, &processed)
            {
                // A failing source dir must not abort the others.
                warn!("scan of {} failed: {}", dir.display(), err);
            }
        }

        pool.drain();
        logger.shutdown();

        let error_count = {
            let mut count = errors.load(Ordering::SeqCst);
            if !self.run_mode.dry_run {
                if let Err(err) = self.backend.put(&local_log, &remote_log) {
                    warn!("sealing manifest {} failed: {}", remote_log, err);
                    count += 1;
                }
            }
            count
        };
        info!(
            "generation {}: {} transferred, {} errors",
            stamp,
            transferred.load(Ordering::SeqCst),
            error_count
        );

        let body = fs::read_to_string(&local_log).unwrap_or_default();
        let report = if error_count > 0 {
            Report::error(&self.machine, body)
        } else {
            Report::success(&self.machine, body)
        };
        notify::send_with_retry(notifier, &report, notify::NOTIFY_TRIES, notify::NOTIFY_DELAY)?;
        // The local log only goes away once its content is delivered;
        // otherwise it stays behind for the interrupted-run alert.
        let _ = fs::remove_file(&local_log);
        Ok(error_count)
    }

    fn scan_directory(
        &self,
        dir: &Path,
        pool: &WorkerPool<CopyTask>,
        generation_root: &str,
        window: (f64, f64),
        history: &HashMap<String, Vec<f64>>,
        processed: &HashSet<String>,
    ) -> Result<()> {
        let exclude_dirs = &self.job.exclude_dirs;
        let walker = WalkDir::new(dir).follow_links(false).into_iter();
        for entry in walker.filter_entry(|e| should_descend(e, exclude_dirs)) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("walk error under {}: {}", dir.display(), err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            if let Some(pattern) = &self.job.exclude_files {
                if util::match_at_start(pattern, &name) {
                    debug!("excluding {} by file pattern", name);
                    continue;
                }
            }

            let local = util::absolute(entry.path())?;
            let local_str = local.display().to_string();
            if processed.contains(&local_str) {
                continue;
            }
            let mtime = match entry.metadata() {
                Ok(meta) => meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0),
                Err(err) => {
                    warn!("stat {} failed: {}", local.display(), err);
                    continue;
                }
            };

            let in_window = mtime >= window.0 && mtime < window.1;
            if in_window || !history.contains_key(&local_str) {
                let remote = format!("{}{}", generation_root, util::escape_path(&local_str));
                debug!("enqueue {} -> {}", local_str, remote);
                pool.submit(CopyTask { local, remote });
            }
        }
        Ok(())
    }

    /// Leftover manifest logs in the state dir mean an earlier run never
    /// finished; say so through the notifier, but never block the new run.
    fn alert_interrupted(&self, notifier: &dyn Notifier) {
        let pattern = match Regex::new(r"^bkp\.\d{4}\.\d{2}\.\d{2}\.\d{2}\.\d{2}\.\d{2}\.log$") {
            Ok(pattern) => pattern,
            Err(_) => return,
        };
        let entries = match fs::read_dir(&self.job.state_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        let mut leftovers = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if pattern.is_match(&name) {
                leftovers.push(name);
            }
        }
        if leftovers.is_empty() {
            return;
        }
        leftovers.sort();
        let body = format!(
            "aborted backups found, you may want to restart them:\n{}",
            leftovers.join("\n")
        );
        let report = Report::error(&self.machine, body);
        if let Err(err) =
            notify::send_with_retry(notifier, &report, notify::NOTIFY_TRIES, notify::NOTIFY_DELAY)
        {
            warn!("interrupted-run alert not delivered: {}", err);
        }
    }

    /// Every (capture time, path) pair recorded for this machine, sorted by
    /// path then time.
    pub fn list_history(&self) -> Vec<(String, Vec<f64>)> {
        let mut entries: Vec<(String, Vec<f64>)> =
            history::history_map(self.backend.as_ref(), &self.machine_path)
                .into_iter()
                .collect();
        for (_, times) in entries.iter_mut() {
            times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Delete generations that captured nothing, across every machine under
    /// the root. A generation is empty when its only subtree is the `bkp/`
    /// log directory. Returns how many were removed.
    pub fn compact(&self) -> Result<u64> {
        let base_path = format!("{}/bkp", self.job.root);
        let mut removed = 0;
        for machine in self.machines(&base_path)? {
            let machine_path = format!("{}/{}", base_path, machine);
            for generation in history::list_generations(self.backend.as_ref(), &machine_path) {
                let entries = self.backend.list(&generation.path, false)?;
                let empty = entries.iter().all(|entry| match entry {
                    ListEntry::Dir(path) => util::basename(path) == "bkp",
                    ListEntry::File { .. } => true,
                });
                if empty {
                    info!("removing empty generation {}", generation.path);
                    if !self.run_mode.dry_run {
                        self.backend.delete(&generation.path, true)?;
                    }
                    removed += 1;
                } else {
                    debug!("keeping non-empty generation {}", generation.path);
                }
            }
        }
        Ok(removed)
    }

    fn machines(&self, base_path: &str) -> Result<Vec<String>> {
        let entries = match self.backend.list(base_path, false) {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        Ok(entries
            .into_iter()
            .filter_map(|entry| match entry {
                ListEntry::Dir(path) => Some(util::basename(&path).to_string()),
                ListEntry::File { .. } => None,
            })
            .collect())
    }
}

fn should_descend(entry: &DirEntry, exclude_dirs: &[Regex]) -> bool {
    if !entry.file_type().is_dir() {
        return true;
    }
    if entry.depth() > 0 {
        if entry.file_name().to_string_lossy().starts_with('.') {
            return false;
        }
    }
    let path = entry.path().display().to_string();
    !exclude_dirs.iter().any(|re| re.is_match(&path))
}
