//! Background refresh workers
//!
//! A fixed pool of threads draining a FIFO queue of refresh jobs. Each job
//! is keyed by `(snapshot, configuration)`; submitting a key that is already
//! queued and not yet started is coalesced into the queued job.
//!
//! Panicking jobs are caught and logged so one bad build never takes a
//! worker down or leaves `drain()` waiting forever.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use extscore_core::{Error, Result, SnapshotId, SourceConfig};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

/// Identity of one refresh job
pub type RefreshKey = (SnapshotId, SourceConfig);

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Jobs waiting in the queue
    pub queued: usize,
    /// Jobs currently running
    pub active: usize,
    /// Jobs finished (including panicked ones)
    pub completed: u64,
    /// Submissions folded into an already queued job
    pub coalesced: u64,
    /// Worker threads
    pub workers: usize,
}

struct Job {
    key: RefreshKey,
    work: Box<dyn FnOnce() + Send>,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    pending: HashSet<RefreshKey>,
}

struct SchedulerInner {
    queue: Mutex<Queue>,
    work_ready: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
    active: AtomicUsize,
    completed: AtomicU64,
    coalesced: AtomicU64,
}

/// Worker pool running cache refreshes off the notifying thread
pub struct BackgroundScheduler {
    inner: Arc<SchedulerInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl BackgroundScheduler {
    /// Start `num_threads` workers (at least one), named
    /// `extscore-refresh-0`, `extscore-refresh-1`, ...
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a worker thread cannot be spawned. Any
    /// workers already started are stopped.
    pub fn new(num_threads: usize) -> Result<Self> {
        let num_threads = num_threads.max(1);
        let scheduler = BackgroundScheduler {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(Queue::default()),
                work_ready: Condvar::new(),
                idle: Condvar::new(),
                shutdown: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
            }),
            workers: Mutex::new(Vec::with_capacity(num_threads)),
            num_threads,
        };

        for i in 0..num_threads {
            let inner = Arc::clone(&scheduler.inner);
            let spawned = std::thread::Builder::new()
                .name(format!("extscore-refresh-{}", i))
                .spawn(move || worker_loop(&inner));
            match spawned {
                Ok(handle) => scheduler.workers.lock().push(handle),
                Err(e) => {
                    scheduler.shutdown();
                    return Err(Error::InvalidOperation(format!(
                        "failed to spawn refresh worker: {}",
                        e
                    )));
                }
            }
        }
        Ok(scheduler)
    }

    /// Queue `work` under `key`.
    ///
    /// Returns `Ok(false)` when a job with the same key is already waiting;
    /// the new work is dropped in that case.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` after `shutdown()`.
    pub fn submit(&self, key: RefreshKey, work: impl FnOnce() + Send + 'static) -> Result<bool> {
        {
            let mut queue = self.inner.queue.lock();
            if self.inner.shutdown.load(Ordering::Acquire) {
                return Err(Error::InvalidOperation(
                    "refresh scheduler is shut down".to_string(),
                ));
            }
            if queue.pending.contains(&key) {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(target: "extscore::refresh", snapshot = %key.0, "Refresh already queued");
                return Ok(false);
            }
            queue.pending.insert(key.clone());
            queue.jobs.push_back(Job {
                key,
                work: Box::new(work),
            });
        }
        self.inner.work_ready.notify_one();
        Ok(true)
    }

    /// Block until the queue is empty and no job is running.
    /// Workers keep running afterwards.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.jobs.is_empty() || self.inner.active.load(Ordering::Acquire) > 0 {
            self.inner.idle.wait(&mut queue);
        }
    }

    /// Stop accepting work, let workers finish the queue, and join them.
    /// Idempotent.
    pub fn shutdown(&self) {
        {
            let _queue = self.inner.queue.lock();
            self.inner.shutdown.store(true, Ordering::Release);
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Current counters
    pub fn stats(&self) -> SchedulerStats {
        let queued = self.inner.queue.lock().jobs.len();
        SchedulerStats {
            queued,
            active: self.inner.active.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            workers: self.num_threads,
        }
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Marks a job finished even if it panics, and wakes `drain()` when the
/// pool goes idle.
struct ActiveJobGuard<'a> {
    inner: &'a SchedulerInner,
}

impl Drop for ActiveJobGuard<'_> {
    fn drop(&mut self) {
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
        // Under the queue lock so drain cannot miss the wakeup.
        let queue = self.inner.queue.lock();
        let prev = self.inner.active.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 && queue.jobs.is_empty() {
            self.inner.idle.notify_all();
        }
    }
}

fn worker_loop(inner: &SchedulerInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    queue.pending.remove(&job.key);
                    inner.active.fetch_add(1, Ordering::AcqRel);
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveJobGuard { inner };
        let snapshot = job.key.0;
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job.work)) {
            let message = e
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| e.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("(non-string panic)");
            error!(
                target: "extscore::refresh",
                snapshot = %snapshot,
                field = job.key.1.key_field(),
                "Refresh job panicked: {}",
                message
            );
        }
    }
}
