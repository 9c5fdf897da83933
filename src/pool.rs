use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Fixed pool of worker threads draining one shared queue. Tasks are
/// enqueued by the driver, the sender is dropped, and `drain` joins the
/// workers once the queue empties. Worker errors are the handler's problem;
/// the pool itself never fails a run.
pub struct WorkerPool<T: Send + 'static> {
    tx: Option<Sender<T>>,
    workers: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

impl<T: Send + 'static> WorkerPool<T> {
    pub fn start<F>(threads: usize, handler: F) -> WorkerPool<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel::<T>();
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(handler);
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::new();
        for _ in 0..threads.max(1) {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);
            let stop = Arc::clone(&stop);
            workers.push(thread::spawn(move || loop {
                let task = {
                    let guard = match rx.lock() {
                        Ok(guard) => guard,
                        Err(_) => return,
                    };
                    guard.recv_timeout(POLL_INTERVAL)
                };
                match task {
                    Ok(task) => handler(task),
                    Err(RecvTimeoutError::Timeout) => {
                        if stop.load(Ordering::SeqCst) {
                            return;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }));
        }

        WorkerPool {
            tx: Some(tx),
            workers,
            stop,
        }
    }

    pub fn submit(&self, task: T) {
        if let Some(tx) = &self.tx {
            // Send fails only when every worker has exited.
            let _ = tx.send(task);
        }
    }

    /// Close the queue and wait for the workers to finish what is enqueued.
    pub fn drain(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        self.tx.take();
        self.stop.store(true, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn every_task_is_processed_before_drain_returns() {
        let counter = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&counter);
        let pool = WorkerPool::start(4, move |n: u64| {
            seen.fetch_add(n, Ordering::SeqCst);
        });
        for n in 1..=100 {
            pool.submit(n);
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 5050);
    }

    #[test]
    fn zero_threads_still_runs_one_worker() {
        let counter = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&counter);
        let pool = WorkerPool::start(0, move |_: ()| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        pool.submit(());
        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_errors_do_not_stop_other_tasks() {
        let errors = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&errors);
        let pool = WorkerPool::start(2, move |n: u64| {
            // Per-task failures are recorded, never propagated.
            if n % 2 == 0 {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        for n in 0..10 {
            pool.submit(n);
        }
        pool.drain();
        assert_eq!(errors.load(Ordering::SeqCst), 5);
    }
}
