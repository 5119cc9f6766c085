//! Overflow policies
//!
//! An overflow handler decides what happens to a task the pool cannot queue
//! or run. Every handler installed on a pool is wrapped in a
//! [`CountingHandler`] so overflow events are counted regardless of policy.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ManagedPool, Task};
use crate::error::{ConfigError, PoolError};

/// Behaviour invoked when a pool is saturated
pub trait OverflowHandler: Send + Sync {
    /// Handle a task that could not be accepted
    fn on_overflow(&self, task: Task, pool: &ManagedPool) -> Result<(), PoolError>;

    /// Name reported in alarms and pool statistics
    fn name(&self) -> &str;
}

/// Built-in overflow policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicyKind {
    /// Refuse the task with an error
    #[default]
    #[serde(alias = "AbortPolicy")]
    Abort,
    /// Run the task on the submitting thread
    #[serde(alias = "CallerRunsPolicy")]
    CallerRuns,
    /// Drop the task silently
    #[serde(alias = "DiscardPolicy")]
    Discard,
    /// Drop the oldest queued task and retry the submission
    #[serde(alias = "DiscardOldestPolicy")]
    DiscardOldest,
}

impl OverflowPolicyKind {
    pub const ALL: [OverflowPolicyKind; 4] = [
        OverflowPolicyKind::Abort,
        OverflowPolicyKind::CallerRuns,
        OverflowPolicyKind::Discard,
        OverflowPolicyKind::DiscardOldest,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OverflowPolicyKind::Abort => "AbortPolicy",
            OverflowPolicyKind::CallerRuns => "CallerRunsPolicy",
            OverflowPolicyKind::Discard => "DiscardPolicy",
            OverflowPolicyKind::DiscardOldest => "DiscardOldestPolicy",
        }
    }

    fn snake_name(&self) -> &'static str {
        match self {
            OverflowPolicyKind::Abort => "abort",
            OverflowPolicyKind::CallerRuns => "caller_runs",
            OverflowPolicyKind::Discard => "discard",
            OverflowPolicyKind::DiscardOldest => "discard_oldest",
        }
    }
}

impl fmt::Display for OverflowPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for OverflowPolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OverflowPolicyKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s) || kind.snake_name() == s)
            .ok_or_else(|| ConfigError::UnknownOverflowPolicy(s.to_string()))
    }
}

/// Create the handler for a built-in policy
pub fn create_handler(kind: OverflowPolicyKind) -> Arc<dyn OverflowHandler> {
    match kind {
        OverflowPolicyKind::Abort => Arc::new(AbortPolicy),
        OverflowPolicyKind::CallerRuns => Arc::new(CallerRunsPolicy),
        OverflowPolicyKind::Discard => Arc::new(DiscardPolicy),
        OverflowPolicyKind::DiscardOldest => Arc::new(DiscardOldestPolicy),
    }
}

#[derive(Debug, Default)]
pub struct AbortPolicy;

impl OverflowHandler for AbortPolicy {
    fn on_overflow(&self, _task: Task, pool: &ManagedPool) -> Result<(), PoolError> {
        let (core, max) = pool.sizes();
        Err(PoolError::Rejected {
            pool_id: pool.id().to_string(),
            reason: format!(
                "pool saturated (core {}, max {}, queue {})",
                core,
                max,
                pool.queue_kind()
            ),
        })
    }

    fn name(&self) -> &str {
        OverflowPolicyKind::Abort.name()
    }
}

#[derive(Debug, Default)]
pub struct CallerRunsPolicy;

impl OverflowHandler for CallerRunsPolicy {
    fn on_overflow(&self, task: Task, pool: &ManagedPool) -> Result<(), PoolError> {
        if !pool.is_shutdown() {
            task();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        OverflowPolicyKind::CallerRuns.name()
    }
}

#[derive(Debug, Default)]
pub struct DiscardPolicy;

impl OverflowHandler for DiscardPolicy {
    fn on_overflow(&self, _task: Task, pool: &ManagedPool) -> Result<(), PoolError> {
        debug!(pool_id = %pool.id(), "Discarding task");
        Ok(())
    }

    fn name(&self) -> &str {
        OverflowPolicyKind::Discard.name()
    }
}

#[derive(Debug, Default)]
pub struct DiscardOldestPolicy;

impl OverflowHandler for DiscardOldestPolicy {
    fn on_overflow(&self, task: Task, pool: &ManagedPool) -> Result<(), PoolError> {
        if pool.is_shutdown() {
            return Ok(());
        }

        // Nothing queued to make room for: the incoming task is the one dropped
        match pool.discard_oldest() {
            Some(_oldest) => pool.execute_task(task),
            None => {
                debug!(pool_id = %pool.id(), "No queued task to discard, dropping new task");
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        OverflowPolicyKind::DiscardOldest.name()
    }
}

/// Decorator that counts every overflow before delegating
pub struct CountingHandler {
    inner: Arc<dyn OverflowHandler>,
    count: Arc<AtomicU64>,
}

impl CountingHandler {
    pub fn new(inner: Arc<dyn OverflowHandler>, count: Arc<AtomicU64>) -> Self {
        Self { inner, count }
    }

    /// The wrapped handler
    pub fn inner(&self) -> &Arc<dyn OverflowHandler> {
        &self.inner
    }
}

impl OverflowHandler for CountingHandler {
    fn on_overflow(&self, task: Task, pool: &ManagedPool) -> Result<(), PoolError> {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.inner.on_overflow(task, pool)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
