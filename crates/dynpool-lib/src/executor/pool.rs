//! Managed worker pool
//!
//! A bounded thread pool with the usual admission order (core workers,
//! then the queue, then non-core workers, then the overflow policy) whose
//! tunables can be changed while tasks are running. Every overflow is
//! counted on an atomic counter that can be read without touching the pool
//! lock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::policy::{create_handler, CountingHandler, OverflowHandler, OverflowPolicyKind};
use super::queue::{create_queue, QueueKind, WorkQueue};
use super::Task;
use crate::error::PoolError;
use crate::models::PoolConfig;

/// Default idle timeout for non-core workers
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Point-in-time view of a pool.
///
/// Fields are read at slightly different instants; the snapshot is meant for
/// threshold checks and reporting, not for exact accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool_id: String,
    pub core_pool_size: usize,
    pub maximum_pool_size: usize,
    pub pool_size: usize,
    pub active_count: usize,
    pub largest_pool_size: usize,
    pub completed_task_count: u64,
    pub queue_kind: QueueKind,
    pub queue_size: usize,
    /// `None` for unbounded queues
    pub queue_remaining_capacity: Option<usize>,
    /// `None` for unbounded queues
    pub queue_capacity: Option<usize>,
    pub overflow_policy: String,
    pub overflow_count: u64,
    pub keep_alive_secs: u64,
    pub allow_core_thread_timeout: bool,
    pub shutdown: bool,
}

struct PoolState {
    queue: WorkQueue,
    /// Live worker threads
    workers: usize,
    /// Workers parked waiting for a task
    idle: usize,
    largest: usize,
    shutdown: bool,
}

struct PoolInner {
    id: String,
    name_prefix: String,
    queue_kind: QueueKind,
    state: Mutex<PoolState>,
    task_ready: Condvar,
    terminated: Condvar,
    core: AtomicUsize,
    max: AtomicUsize,
    keep_alive_ms: AtomicU64,
    allow_core_timeout: AtomicBool,
    active: AtomicUsize,
    completed: AtomicU64,
    overflow_count: Arc<AtomicU64>,
    handler: RwLock<Arc<dyn OverflowHandler>>,
    thread_seq: AtomicUsize,
}

/// Handle to a live worker pool.
///
/// Clones share the same pool. Worker threads keep the pool alive until
/// [`ManagedPool::shutdown`] is called and the backlog drains.
#[derive(Clone)]
pub struct ManagedPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ManagedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (core, max) = self.sizes();
        f.debug_struct("ManagedPool")
            .field("id", &self.inner.id)
            .field("core", &core)
            .field("max", &max)
            .field("queue_kind", &self.inner.queue_kind)
            .finish()
    }
}

impl ManagedPool {
    /// Start building a pool with the given id
    pub fn builder(id: impl Into<String>) -> PoolBuilder {
        PoolBuilder::new(id)
    }

    /// Build a pool from a declared configuration
    pub fn from_config(config: &PoolConfig) -> Result<Self, PoolError> {
        let mut builder = PoolBuilder::new(&config.pool_id);
        if let Some(prefix) = &config.thread_name_prefix {
            builder = builder.name_prefix(prefix.clone());
        }
        builder
            .core_pool_size(config.core_pool_size)
            .maximum_pool_size(config.maximum_pool_size)
            .queue(config.queue_kind, config.queue_capacity)
            .overflow_policy(config.overflow_policy)
            .keep_alive(Duration::from_secs(config.keep_alive_secs))
            .allow_core_thread_timeout(config.allow_core_thread_timeout)
            .build()
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn queue_kind(&self) -> QueueKind {
        self.inner.queue_kind
    }

    /// Submit a task for execution
    pub fn execute<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_task(Box::new(task))
    }

    /// Submit a task and receive its result on a one-shot channel.
    ///
    /// When a discarding policy drops the task the receiver resolves to an
    /// error because the sender is dropped.
    pub fn submit<F, T>(&self, task: F) -> Result<oneshot::Receiver<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(move || {
            let _ = tx.send(task());
        })?;
        Ok(rx)
    }

    pub(crate) fn execute_task(&self, task: Task) -> Result<(), PoolError> {
        let overflow = {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                Some(task)
            } else if state.workers < self.inner.core.load(Ordering::Acquire) {
                return spawn_worker(&self.inner, &mut state, Some(task));
            } else {
                let idle = state.idle;
                match state.queue.offer(task, idle) {
                    Ok(()) => {
                        if state.workers == 0 {
                            spawn_worker(&self.inner, &mut state, None)?;
                        }
                        self.inner.task_ready.notify_one();
                        return Ok(());
                    }
                    Err(task) => {
                        if state.workers < self.inner.max.load(Ordering::Acquire) {
                            return spawn_worker(&self.inner, &mut state, Some(task));
                        }
                        Some(task)
                    }
                }
            }
        };

        match overflow {
            Some(task) => {
                let handler = Arc::clone(&*self.inner.handler.read());
                handler.on_overflow(task, self)
            }
            None => Ok(()),
        }
    }

    /// Remove the oldest queued task, if any
    pub(crate) fn discard_oldest(&self) -> Option<Task> {
        self.inner.state.lock().queue.poll()
    }

    /// Core and maximum size, read together under the pool lock
    pub fn sizes(&self) -> (usize, usize) {
        let _state = self.inner.state.lock();
        (
            self.inner.core.load(Ordering::Acquire),
            self.inner.max.load(Ordering::Acquire),
        )
    }

    pub fn core_pool_size(&self) -> usize {
        self.inner.core.load(Ordering::Acquire)
    }

    pub fn maximum_pool_size(&self) -> usize {
        self.inner.max.load(Ordering::Acquire)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// Cumulative number of overflow events; never reset
    pub fn overflow_count(&self) -> u64 {
        self.inner.overflow_count.load(Ordering::Relaxed)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.inner.keep_alive_ms.load(Ordering::Acquire))
    }

    pub fn allows_core_thread_timeout(&self) -> bool {
        self.inner.allow_core_timeout.load(Ordering::Acquire)
    }

    /// Name of the installed overflow policy
    pub fn overflow_policy_name(&self) -> String {
        self.inner.handler.read().name().to_string()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Shut down and every worker has exited
    pub fn is_terminated(&self) -> bool {
        let state = self.inner.state.lock();
        state.shutdown && state.workers == 0
    }

    /// Take a snapshot of the pool's counters
    pub fn stats(&self) -> Result<PoolStats, PoolError> {
        let (pool_size, largest, queue_size, remaining, capacity, shutdown) = {
            let state = self.inner.state.lock();
            if state.shutdown && state.workers == 0 {
                return Err(PoolError::Terminated(self.inner.id.clone()));
            }
            (
                state.workers,
                state.largest,
                state.queue.len(),
                state.queue.remaining_capacity(),
                state.queue.capacity(),
                state.shutdown,
            )
        };

        Ok(PoolStats {
            pool_id: self.inner.id.clone(),
            core_pool_size: self.core_pool_size(),
            maximum_pool_size: self.maximum_pool_size(),
            pool_size,
            active_count: self.active_count(),
            largest_pool_size: largest,
            completed_task_count: self.inner.completed.load(Ordering::Relaxed),
            queue_kind: self.inner.queue_kind,
            queue_size,
            queue_remaining_capacity: remaining,
            queue_capacity: capacity,
            overflow_policy: self.overflow_policy_name(),
            overflow_count: self.overflow_count(),
            keep_alive_secs: self.keep_alive().as_secs(),
            allow_core_thread_timeout: self.allows_core_thread_timeout(),
            shutdown,
        })
    }

    /// Change the number of workers kept alive while idle.
    ///
    /// Fails if `core` would exceed the current maximum. Growing the core
    /// starts workers for already queued tasks; shrinking lets surplus
    /// workers retire at their next idle check.
    pub fn set_core_pool_size(&self, core: usize) -> Result<(), PoolError> {
        let mut state = self.inner.state.lock();
        let max = self.inner.max.load(Ordering::Acquire);
        if core > max {
            return Err(PoolError::InvalidSizes { core, max });
        }

        let previous = self.inner.core.swap(core, Ordering::AcqRel);
        if core < previous {
            self.inner.task_ready.notify_all();
        } else if core > previous {
            let mut to_start = (core - previous).min(state.queue.len());
            while to_start > 0 && state.workers < core {
                spawn_worker(&self.inner, &mut state, None)?;
                to_start -= 1;
            }
        }
        Ok(())
    }

    /// Change the upper bound on workers.
    ///
    /// Fails if `max` is zero or below the current core size.
    pub fn set_maximum_pool_size(&self, max: usize) -> Result<(), PoolError> {
        let state = self.inner.state.lock();
        let core = self.inner.core.load(Ordering::Acquire);
        if max == 0 || max < core {
            return Err(PoolError::InvalidSizes { core, max });
        }

        self.inner.max.store(max, Ordering::Release);
        if state.workers > max {
            self.inner.task_ready.notify_all();
        }
        Ok(())
    }

    pub fn set_keep_alive(&self, keep_alive: Duration) -> Result<(), PoolError> {
        let _state = self.inner.state.lock();
        if keep_alive.is_zero() && self.allows_core_thread_timeout() {
            return Err(PoolError::InvalidKeepAlive);
        }

        let previous = self
            .inner
            .keep_alive_ms
            .swap(keep_alive.as_millis() as u64, Ordering::AcqRel);
        if (keep_alive.as_millis() as u64) < previous {
            self.inner.task_ready.notify_all();
        }
        Ok(())
    }

    pub fn allow_core_thread_timeout(&self, allow: bool) -> Result<(), PoolError> {
        let _state = self.inner.state.lock();
        if allow && self.keep_alive().is_zero() {
            return Err(PoolError::InvalidKeepAlive);
        }

        let previous = self.inner.allow_core_timeout.swap(allow, Ordering::AcqRel);
        if allow && !previous {
            self.inner.task_ready.notify_all();
        }
        Ok(())
    }

    /// Replace the overflow policy with a built-in one
    pub fn set_overflow_policy(&self, kind: OverflowPolicyKind) {
        self.set_overflow_handler(create_handler(kind));
    }

    /// Replace the overflow handler; the new handler is counted like the old one
    pub fn set_overflow_handler(&self, handler: Arc<dyn OverflowHandler>) {
        let counted = CountingHandler::new(handler, Arc::clone(&self.inner.overflow_count));
        *self.inner.handler.write() = Arc::new(counted);
    }

    /// Change the queue capacity; only resizable queues accept this
    pub fn set_queue_capacity(&self, capacity: usize) -> Result<(), PoolError> {
        self.inner.state.lock().queue.set_capacity(capacity)
    }

    /// Stop accepting tasks; queued tasks still run
    pub fn shutdown(&self) {
        let (workers, queued) = {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            (state.workers, state.queue.len())
        };
        debug!(
            pool_id = %self.inner.id,
            workers,
            queued,
            "Shutting down pool"
        );
        self.inner.task_ready.notify_all();
        if workers == 0 {
            self.inner.terminated.notify_all();
        }
    }

    /// Wait until every worker has exited, returning false on timeout
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !(state.shutdown && state.workers == 0) {
            if self
                .inner
                .terminated
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.shutdown && state.workers == 0;
            }
        }
        true
    }
}

fn spawn_worker(
    inner: &Arc<PoolInner>,
    state: &mut PoolState,
    first: Option<Task>,
) -> Result<(), PoolError> {
    state.workers += 1;
    state.largest = state.largest.max(state.workers);

    let seq = inner.thread_seq.fetch_add(1, Ordering::Relaxed) + 1;
    let worker = Arc::clone(inner);
    let spawned = thread::Builder::new()
        .name(format!("{}-{}", inner.name_prefix, seq))
        .spawn(move || worker_loop(worker, first));

    if let Err(e) = spawned {
        state.workers -= 1;
        warn!(pool_id = %inner.id, error = %e, "Failed to start worker thread");
        return Err(PoolError::Spawn(e));
    }
    Ok(())
}

fn worker_loop(inner: Arc<PoolInner>, mut first: Option<Task>) {
    loop {
        let task = match first.take() {
            Some(task) => task,
            None => match inner.next_task() {
                Some(task) => task,
                None => break,
            },
        };

        inner.active.fetch_add(1, Ordering::Relaxed);
        let outcome = catch_unwind(AssertUnwindSafe(task));
        inner.active.fetch_sub(1, Ordering::Relaxed);
        inner.completed.fetch_add(1, Ordering::Relaxed);

        if outcome.is_err() {
            warn!(pool_id = %inner.id, "Task panicked; worker continues");
        }
    }
}

impl PoolInner {
    /// Block until a task is available, or return `None` when this worker
    /// should exit
    fn next_task(&self) -> Option<Task> {
        let mut state = self.state.lock();
        let mut timed_out = false;

        loop {
            if state.shutdown && state.queue.is_empty() {
                return self.retire(&mut state);
            }

            let core = self.core.load(Ordering::Acquire);
            let max = self.max.load(Ordering::Acquire);
            let timed = self.allow_core_timeout.load(Ordering::Acquire) || state.workers > core;

            if (state.workers > max || (timed && timed_out))
                && (state.workers > 1 || state.queue.is_empty())
            {
                return self.retire(&mut state);
            }

            if let Some(task) = state.queue.poll() {
                return Some(task);
            }

            state.idle += 1;
            if timed {
                let keep_alive = Duration::from_millis(self.keep_alive_ms.load(Ordering::Acquire));
                timed_out = self.task_ready.wait_for(&mut state, keep_alive).timed_out();
            } else {
                self.task_ready.wait(&mut state);
                timed_out = false;
            }
            state.idle -= 1;
        }
    }

    fn retire(&self, state: &mut PoolState) -> Option<Task> {
        state.workers -= 1;
        if state.workers == 0 {
            self.terminated.notify_all();
        }
        None
    }
}

/// Builder for [`ManagedPool`]
pub struct PoolBuilder {
    id: String,
    core: usize,
    max: usize,
    queue_kind: QueueKind,
    queue_capacity: Option<usize>,
    handler: Arc<dyn OverflowHandler>,
    keep_alive: Duration,
    allow_core_timeout: bool,
    name_prefix: Option<String>,
}

impl PoolBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            core: 1,
            max: 1,
            queue_kind: QueueKind::default(),
            queue_capacity: None,
            handler: create_handler(OverflowPolicyKind::default()),
            keep_alive: DEFAULT_KEEP_ALIVE,
            allow_core_timeout: false,
            name_prefix: None,
        }
    }

    pub fn core_pool_size(mut self, core: usize) -> Self {
        self.core = core;
        self
    }

    pub fn maximum_pool_size(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    pub fn queue(mut self, kind: QueueKind, capacity: Option<usize>) -> Self {
        self.queue_kind = kind;
        self.queue_capacity = capacity;
        self
    }

    pub fn overflow_policy(mut self, kind: OverflowPolicyKind) -> Self {
        self.handler = create_handler(kind);
        self
    }

    /// Install a custom overflow handler
    pub fn overflow_handler(mut self, handler: Arc<dyn OverflowHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn allow_core_thread_timeout(mut self, allow: bool) -> Self {
        self.allow_core_timeout = allow;
        self
    }

    /// Prefix for worker thread names; defaults to the pool id
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn build(self) -> Result<ManagedPool, PoolError> {
        if self.max == 0 || self.core > self.max {
            return Err(PoolError::InvalidSizes {
                core: self.core,
                max: self.max,
            });
        }
        if self.allow_core_timeout && self.keep_alive.is_zero() {
            return Err(PoolError::InvalidKeepAlive);
        }

        let overflow_count = Arc::new(AtomicU64::new(0));
        let handler: Arc<dyn OverflowHandler> =
            Arc::new(CountingHandler::new(self.handler, Arc::clone(&overflow_count)));

        let inner = PoolInner {
            name_prefix: self.name_prefix.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            queue_kind: self.queue_kind,
            state: Mutex::new(PoolState {
                queue: create_queue(self.queue_kind, self.queue_capacity),
                workers: 0,
                idle: 0,
                largest: 0,
                shutdown: false,
            }),
            task_ready: Condvar::new(),
            terminated: Condvar::new(),
            core: AtomicUsize::new(self.core),
            max: AtomicUsize::new(self.max),
            keep_alive_ms: AtomicU64::new(self.keep_alive.as_millis() as u64),
            allow_core_timeout: AtomicBool::new(self.allow_core_timeout),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            overflow_count,
            handler: RwLock::new(handler),
            thread_seq: AtomicUsize::new(0),
        };

        Ok(ManagedPool {
            inner: Arc::new(inner),
        })
    }
}
