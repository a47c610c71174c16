//! Bounded worker pool for probe execution.
//!
//! A fixed set of long-lived threads pops jobs from a shared FIFO queue.
//! Submitting returns a handle that can be awaited with a timeout. After
//! shutdown no new work is accepted; a panicking job is caught and logged
//! and the worker keeps running.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::SchedulerError;

/// Minimum number of worker threads.
pub const MIN_THREADS: usize = 2;
/// Maximum number of worker threads.
pub const MAX_THREADS: usize = 32;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Job>,
    stopping: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    available: Condvar,
}

/// Result of waiting on a submitted task.
#[derive(Debug)]
pub enum WaitOutcome<T> {
    /// The job finished and produced a value.
    Ready(T),
    /// The job panicked or the pool dropped it before completion.
    Canceled,
    /// The timeout elapsed before the job finished.
    TimedOut,
}

/// Handle to a submitted job's eventual result.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Wait up to `timeout` for the job to complete.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => WaitOutcome::Ready(value),
            Err(RecvTimeoutError::Timeout) => WaitOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => WaitOutcome::Canceled,
        }
    }
}

/// Fixed-size thread pool with a FIFO job queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with `threads` workers, clamped to `[2, 32]`.
    pub fn new(threads: usize) -> Self {
        let threads = threads.clamp(MIN_THREADS, MAX_THREADS);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                stopping: false,
            }),
            available: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|i| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("argus-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        tracing::debug!("worker pool started with {threads} threads");

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Submit a job. Fails with `SubmitOnStoppedPool` after shutdown.
    pub fn submit<T, F>(&self, job: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let wrapped: Job = Box::new(move || {
            // If the receiver is gone nobody cares about the value.
            let _ = tx.send(job());
        });

        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopping {
                return Err(SchedulerError::SubmitOnStoppedPool);
            }
            state.queue.push_back(wrapped);
        }
        self.shared.available.notify_one();

        Ok(TaskHandle { rx })
    }

    /// Number of jobs waiting in the queue.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.state.lock().unwrap().stopping
    }

    pub fn thread_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Stop accepting work, wake the workers, and join them. Queued jobs
    /// that have not started are dropped; their handles report `Canceled`.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopping {
                return;
            }
            state.stopping = true;
            state.queue.clear();
        }
        self.shared.available.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
        tracing::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                if state.stopping {
                    return;
                }
                state = shared.available.wait(state).unwrap();
            }
        };

        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("worker task panicked; worker continues");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_submit_returns_value() {
        let pool = WorkerPool::new(2);
        let handle = pool.submit(|| 41 + 1).unwrap();
        match handle.wait_timeout(Duration::from_secs(5)) {
            WaitOutcome::Ready(v) => assert_eq!(v, 42),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_thread_count_clamped() {
        let pool = WorkerPool::new(1);
        assert_eq!(pool.thread_count(), MIN_THREADS);
        let pool = WorkerPool::new(100);
        assert_eq!(pool.thread_count(), MAX_THREADS);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(2);
        pool.shutdown();
        assert!(pool.is_stopping());
        let result = pool.submit(|| ());
        assert!(matches!(result, Err(SchedulerError::SubmitOnStoppedPool)));
    }

    #[test]
    fn test_panic_is_isolated() {
        let pool = WorkerPool::new(2);
        let handle = pool.submit(|| panic!("boom")).unwrap();
        match handle.wait_timeout(Duration::from_secs(5)) {
            WaitOutcome::Canceled => {}
            other => panic!("unexpected outcome: {other:?}"),
        }

        // The pool still works after a panic.
        let handle = pool.submit(|| "alive").unwrap();
        match handle.wait_timeout(Duration::from_secs(5)) {
            WaitOutcome::Ready(v) => assert_eq!(v, "alive"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_wait_timeout_on_slow_job() {
        let pool = WorkerPool::new(2);
        let handle = pool
            .submit(|| std::thread::sleep(Duration::from_millis(500)))
            .unwrap();
        match handle.wait_timeout(Duration::from_millis(20)) {
            WaitOutcome::TimedOut => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_all_jobs_run() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();
        for handle in handles {
            assert!(matches!(
                handle.wait_timeout(Duration::from_secs(5)),
                WaitOutcome::Ready(())
            ));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }
}
