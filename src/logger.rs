use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::storage::Backend;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(300);

/// Cloneable producer side of the log channel. A send after the consumer
/// is gone is silently dropped; logging never fails a run.
#[derive(Clone)]
pub struct LogHandle {
    tx: Sender<String>,
}

impl LogHandle {
    pub fn log(&self, line: impl Into<String>) {
        let _ = self.tx.send(line.into());
    }
}

/// Remote location the local log is periodically uploaded to, so a crashed
/// run still leaves a partial manifest behind.
pub struct Checkpoint {
    pub backend: Arc<dyn Backend>,
    pub remote_path: String,
}

/// Single consumer thread appending log lines to a local file, mirroring
/// to stderr when verbose, checkpointing remotely every five minutes.
pub struct AsyncLogger {
    handle: LogHandle,
    worker: JoinHandle<()>,
}

impl AsyncLogger {
    pub fn start(
        local_path: PathBuf,
        mirror_stderr: bool,
        checkpoint: Option<Checkpoint>,
        dry_run: bool,
    ) -> AsyncLogger {
        let (tx, rx) = mpsc::channel::<String>();
        let worker = thread::spawn(move || {
            let mut last_checkpoint = Instant::now();
            loop {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => {
                        if let Err(err) = append_line(&local_path, &line) {
                            eprintln!("log write failed: {}", err);
                        }
                        if mirror_stderr {
                            eprintln!("{}", line);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if let Some(checkpoint) = &checkpoint {
                    if last_checkpoint.elapsed() > CHECKPOINT_INTERVAL {
                        last_checkpoint = Instant::now();
                        if !dry_run {
                            if let Err(err) =
                                checkpoint.backend.put(&local_path, &checkpoint.remote_path)
                            {
                                eprintln!("log checkpoint failed: {}", err);
                            }
                        }
                    }
                }
            }
        });
        AsyncLogger {
            handle: LogHandle { tx },
            worker,
        }
    }

    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    /// Close the channel and wait until every pending line is on disk.
    pub fn shutdown(self) {
        let AsyncLogger { handle, worker } = self;
        drop(handle);
        let _ = worker.join();
    }
}

fn append_line(path: &PathBuf, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    writeln!(file, "{}", line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn lines_are_flushed_by_shutdown() {
        let dir = TempDir::new().expect("tempdir");
        let log_path = dir.path().join("run.log");
        let logger = AsyncLogger::start(log_path.clone(), false, None, false);
        let handle = logger.handle();
        for n in 0..50 {
            handle.log(format!("line {}", n));
        }
        logger.shutdown();
        let text = fs::read_to_string(&log_path).expect("read");
        assert_eq!(text.lines().count(), 50);
        assert!(text.lines().next().expect("first").starts_with("line "));
    }

    #[test]
    fn handles_survive_cloning_across_threads() {
        let dir = TempDir::new().expect("tempdir");
        let log_path = dir.path().join("run.log");
        let logger = AsyncLogger::start(log_path.clone(), false, None, false);
        let mut threads = Vec::new();
        for t in 0..4 {
            let handle = logger.handle();
            threads.push(thread::spawn(move || {
                for n in 0..10 {
                    handle.log(format!("t{} n{}", t, n));
                }
            }));
        }
        for t in threads {
            t.join().expect("join");
        }
        logger.shutdown();
        let text = fs::read_to_string(&log_path).expect("read");
        assert_eq!(text.lines().count(), 40);
    }
}
