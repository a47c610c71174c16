//! Task scheduling for probe execution.
//!
//! A min-heap of one-shot and repeating tasks ordered by their next run
//! time, drained by a single driver thread that hands due tasks to the
//! worker pool. Submission failures go through a fixed-delay retry policy;
//! a task that exhausts its retries is abandoned.

pub mod pool;

pub use pool::{TaskHandle, WaitOutcome, WorkerPool};

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::SchedulerError;

/// Fixed-delay retry policy for failed task submissions.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

type TaskFn = Arc<dyn Fn() + Send + Sync + 'static>;

struct ScheduledTask {
    id: u64,
    next_run: Instant,
    /// Zero for one-shot tasks.
    interval: Duration,
    job: TaskFn,
    failure_count: u32,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.next_run == other.next_run && self.id == other.id
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    // Reversed so the BinaryHeap pops the earliest next_run first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .next_run
            .cmp(&self.next_run)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct SchedulerShared {
    heap: Mutex<BinaryHeap<ScheduledTask>>,
    cv: Condvar,
    running: AtomicBool,
}

/// Min-heap scheduler driving tasks into a [`WorkerPool`].
pub struct Scheduler {
    pool: Arc<WorkerPool>,
    shared: Arc<SchedulerShared>,
    retry: RetryPolicy,
    next_id: AtomicU64,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self::with_retry_policy(pool, RetryPolicy::default())
    }

    pub fn with_retry_policy(pool: Arc<WorkerPool>, retry: RetryPolicy) -> Self {
        Self {
            pool,
            shared: Arc::new(SchedulerShared {
                heap: Mutex::new(BinaryHeap::new()),
                cv: Condvar::new(),
                running: AtomicBool::new(false),
            }),
            retry,
            next_id: AtomicU64::new(1),
            driver: Mutex::new(None),
        }
    }

    /// Schedule a task to run once after `delay`.
    pub fn schedule_once(&self, delay: Duration, job: impl Fn() + Send + Sync + 'static) -> u64 {
        self.push_task(delay, Duration::ZERO, Arc::new(job))
    }

    /// Schedule a task to run every `interval`, first run after `interval`.
    pub fn schedule_repeating(
        &self,
        interval: Duration,
        job: impl Fn() + Send + Sync + 'static,
    ) -> u64 {
        self.push_task(interval, interval, Arc::new(job))
    }

    fn push_task(&self, delay: Duration, interval: Duration, job: TaskFn) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut heap = self.shared.heap.lock().unwrap();
            heap.push(ScheduledTask {
                id,
                next_run: Instant::now() + delay,
                interval,
                job,
                failure_count: 0,
            });
        }
        self.shared.cv.notify_one();
        tracing::trace!("scheduled task {id} (delay {delay:?}, interval {interval:?})");
        id
    }

    /// Remove a scheduled task. Returns whether it was found.
    pub fn cancel(&self, id: u64) -> bool {
        let mut heap = self.shared.heap.lock().unwrap();
        let before = heap.len();
        let remaining: BinaryHeap<ScheduledTask> =
            heap.drain().filter(|task| task.id != id).collect();
        *heap = remaining;
        let found = heap.len() != before;
        if found {
            tracing::trace!("canceled task {id}");
        }
        found
    }

    /// Number of tasks currently scheduled.
    pub fn count(&self) -> usize {
        self.shared.heap.lock().unwrap().len()
    }

    /// Start the driver thread. Idempotent.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("starting scheduler");
        let shared = self.shared.clone();
        let pool = self.pool.clone();
        let retry = self.retry.clone();
        let handle = std::thread::Builder::new()
            .name("argus-scheduler".into())
            .spawn(move || driver_loop(&shared, &pool, &retry))
            .expect("failed to spawn scheduler thread");
        *self.driver.lock().unwrap() = Some(handle);
    }

    /// Stop the driver thread and join it. Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        tracing::info!("stopping scheduler");
        self.shared.cv.notify_all();
        if let Some(handle) = self.driver.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn driver_loop(shared: &SchedulerShared, pool: &WorkerPool, retry: &RetryPolicy) {
    tracing::debug!("scheduler loop started");

    while shared.running.load(Ordering::SeqCst) {
        let mut heap = shared.heap.lock().unwrap();

        let now = Instant::now();
        let next_run = match heap.peek() {
            Some(task) => task.next_run,
            None => {
                let _unused = shared.cv.wait(heap).unwrap();
                continue;
            }
        };

        if next_run > now {
            let _unused = shared.cv.wait_timeout(heap, next_run - now).unwrap();
            continue;
        }

        let Some(mut task) = heap.pop() else {
            continue;
        };
        drop(heap);

        let job = task.job.clone();
        match pool.submit(move || job()) {
            Ok(_) => {
                tracing::trace!("dispatched task {}", task.id);
                if !task.interval.is_zero() {
                    task.next_run = now + task.interval;
                    task.failure_count = 0;
                    shared.heap.lock().unwrap().push(task);
                }
            }
            Err(e) => {
                task.failure_count += 1;
                if task.failure_count <= retry.max_attempts {
                    tracing::warn!(
                        "failed to submit task {}: {e}; retry {}/{} in {:?}",
                        task.id,
                        task.failure_count,
                        retry.max_attempts,
                        retry.retry_delay
                    );
                    task.next_run = now + retry.retry_delay;
                    shared.heap.lock().unwrap().push(task);
                } else {
                    tracing::error!("{}", SchedulerError::RetryAbandoned(task.id));
                }
            }
        }
    }

    tracing::debug!("scheduler loop ended");
}
