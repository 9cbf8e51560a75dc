//! Background worker pool for deferred callback dispatch.
//!
//! The engine does not own a scheduler or event loop; it hands deferred
//! callbacks to this pool and waits on its own completion signal. The pool
//! keeps a small set of OS threads:
//!
//! - Threads are spawned lazily up to `max_threads` when all existing
//!   threads are busy and work is pending.
//! - Threads above `min_threads` retire after sitting idle past the
//!   configured timeout.
//! - Shutdown is graceful: queued jobs finish, then threads drain within a
//!   bounded wait.
//!
//! A job that panics is isolated; the unwinding is caught so the worker
//! thread survives. Engines catch panics at their own dispatch boundary
//! before the job ever reaches this pool, so a panic escaping a job here
//! indicates a bug in the caller, not in user callbacks.

use crossbeam_queue::SegQueue;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::tracing_compat::{debug, trace};

/// Default idle timeout before retiring excess threads.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// A unit of work submitted to the pool.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Error returned when the pool cannot accept a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    /// The pool has been shut down and accepts no new work.
    #[error("worker pool is shut down")]
    Shutdown,
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Minimum number of threads kept alive.
    pub min_threads: usize,
    /// Maximum number of threads allowed.
    pub max_threads: usize,
    /// Idle timeout before retiring threads above the minimum.
    pub idle_timeout: Duration,
    /// Thread name prefix.
    pub thread_name_prefix: String,
}

impl WorkerPoolConfig {
    /// Creates a config with the given thread limits and default options.
    #[must_use]
    pub fn new(min_threads: usize, max_threads: usize) -> Self {
        Self {
            min_threads,
            max_threads,
            ..Self::default()
        }
    }

    /// Sets the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_threads: 1,
            // Generous ceiling: blocking waiters may occupy a worker while
            // their parent's callback runs on another.
            max_threads: 256,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_name_prefix: "promissory".to_string(),
        }
    }
}

struct PoolInner {
    min_threads: usize,
    max_threads: usize,
    idle_timeout: Duration,
    thread_name_prefix: String,
    queue: SegQueue<Job>,
    active_threads: AtomicUsize,
    busy_threads: AtomicUsize,
    pending_jobs: AtomicUsize,
    dispatched_total: AtomicUsize,
    shutdown: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

/// The worker pool.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("min_threads", &self.inner.min_threads)
            .field("max_threads", &self.inner.max_threads)
            .field("active_threads", &self.active_threads())
            .field("busy_threads", &self.busy_threads())
            .field("pending_jobs", &self.pending_jobs())
            .finish()
    }
}

impl WorkerPool {
    /// Creates a pool from the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads` is 0.
    #[must_use]
    pub fn new(config: WorkerPoolConfig) -> Self {
        assert!(config.max_threads > 0, "max_threads must be at least 1");
        let max_threads = config.max_threads.max(config.min_threads);

        let inner = Arc::new(PoolInner {
            min_threads: config.min_threads,
            max_threads,
            idle_timeout: config.idle_timeout,
            thread_name_prefix: config.thread_name_prefix,
            queue: SegQueue::new(),
            active_threads: AtomicUsize::new(0),
            busy_threads: AtomicUsize::new(0),
            pending_jobs: AtomicUsize::new(0),
            dispatched_total: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        });

        let pool = Self { inner };
        for _ in 0..pool.inner.min_threads {
            spawn_worker(&pool.inner);
        }
        pool
    }

    /// Submits a job to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::Shutdown`] if the pool no longer accepts work.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> Result<(), SpawnError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(SpawnError::Shutdown);
        }
        self.inner.queue.push(Box::new(job));
        self.inner.pending_jobs.fetch_add(1, Ordering::Relaxed);
        self.inner.dispatched_total.fetch_add(1, Ordering::Relaxed);
        trace!(pending = self.pending_jobs(), "job enqueued");

        maybe_spawn_worker(&self.inner);
        let _guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.condvar.notify_one();
        Ok(())
    }

    /// Returns the number of jobs waiting in the queue.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.inner.pending_jobs.load(Ordering::Relaxed)
    }

    /// Returns the number of live worker threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Returns the number of threads currently executing a job.
    #[must_use]
    pub fn busy_threads(&self) -> usize {
        self.inner.busy_threads.load(Ordering::Relaxed)
    }

    /// Returns the total number of jobs ever accepted.
    #[must_use]
    pub fn dispatched_total(&self) -> usize {
        self.inner.dispatched_total.load(Ordering::Relaxed)
    }

    /// Returns true if the pool has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops accepting new work. Queued jobs continue to execute.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let _guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.condvar.notify_all();
    }

    /// Shuts down and waits for worker threads to exit.
    ///
    /// Returns `true` if all threads exited within `timeout`.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = std::time::Instant::now() + timeout;
        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            {
                let _guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
                self.inner.condvar.notify_all();
            }
            thread::sleep(Duration::from_millis(5).min(remaining));
        }
        true
    }
}

fn spawn_worker(inner: &Arc<PoolInner>) {
    let id = inner.active_threads.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-worker-{}", inner.thread_name_prefix, id);
    let worker = Arc::clone(inner);

    let spawned = thread::Builder::new().name(name).spawn(move || {
        debug!("worker thread started");
        worker_loop(&worker);
        worker.active_threads.fetch_sub(1, Ordering::Relaxed);
        debug!("worker thread retired");
    });
    if spawned.is_err() {
        // OS refused the thread; existing workers will drain the queue.
        inner.active_threads.fetch_sub(1, Ordering::Relaxed);
    }
}

fn maybe_spawn_worker(inner: &Arc<PoolInner>) {
    let active = inner.active_threads.load(Ordering::Relaxed);
    let busy = inner.busy_threads.load(Ordering::Relaxed);
    let pending = inner.pending_jobs.load(Ordering::Relaxed);
    // Spawn when the queue outgrows the idle workers. Each unpopped job is
    // assumed to consume one idle worker: a notified worker that has not
    // popped yet would otherwise look available for every submission, and
    // back-to-back submissions would under-spawn and strand the later jobs
    // behind long-running ones.
    let idle = active.saturating_sub(busy);
    if pending > idle && active < inner.max_threads {
        spawn_worker(inner);
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending_jobs.fetch_sub(1, Ordering::Relaxed);
            inner.busy_threads.fetch_add(1, Ordering::Relaxed);
            let result = panic::catch_unwind(AssertUnwindSafe(job));
            inner.busy_threads.fetch_sub(1, Ordering::Relaxed);
            if result.is_err() {
                debug!("job panicked past its dispatch boundary");
            }
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let active = inner.active_threads.load(Ordering::Relaxed);
        let guard = inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        // A job may have been enqueued between the empty pop and taking the
        // lock; spawn notifies under this mutex, so re-check before waiting.
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        if active > inner.min_threads {
            let (_guard, result) = {
                let r = inner
                    .condvar
                    .wait_timeout(guard, inner.idle_timeout)
                    .unwrap_or_else(|e| e.into_inner());
                (r.0, r.1)
            };
            if result.timed_out()
                && inner.queue.is_empty()
                && inner.active_threads.load(Ordering::Relaxed) > inner.min_threads
            {
                break;
            }
        } else {
            let _guard = inner.condvar.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}
