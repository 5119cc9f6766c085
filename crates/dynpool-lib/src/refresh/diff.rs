//! Tunable-level comparison of two pool configurations

use tracing::warn;

use crate::executor::OverflowPolicyKind;
use crate::models::PoolConfig;
use crate::notifier::FieldChange;

/// Field names used in change reports
pub mod fields {
    pub const CORE_POOL_SIZE: &str = "corePoolSize";
    pub const MAXIMUM_POOL_SIZE: &str = "maximumPoolSize";
    pub const QUEUE_CAPACITY: &str = "queueCapacity";
    pub const KEEP_ALIVE_TIME: &str = "keepAliveTime";
    pub const OVERFLOW_POLICY: &str = "overflowPolicy";
    pub const ALLOW_CORE_THREAD_TIMEOUT: &str = "allowCoreThreadTimeOut";
}

/// Old and new value of every tunable that differs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub core_pool_size: Option<(usize, usize)>,
    pub maximum_pool_size: Option<(usize, usize)>,
    pub queue_capacity: Option<(Option<usize>, usize)>,
    pub keep_alive_secs: Option<(u64, u64)>,
    pub overflow_policy: Option<(OverflowPolicyKind, OverflowPolicyKind)>,
    pub allow_core_thread_timeout: Option<(bool, bool)>,
}

fn changed<T: PartialEq + Copy>(old: T, new: T) -> Option<(T, T)> {
    (old != new).then_some((old, new))
}

impl ConfigDiff {
    /// Compare the tunables of two configurations of the same pool.
    ///
    /// Alarm and notify settings are not tunables and never appear here.
    pub fn between(old: &PoolConfig, new: &PoolConfig) -> Self {
        let queue_capacity = match new.queue_capacity {
            Some(capacity) if old.queue_capacity != Some(capacity) => {
                Some((old.queue_capacity, capacity))
            }
            _ => None,
        };

        Self {
            core_pool_size: changed(old.core_pool_size, new.core_pool_size),
            maximum_pool_size: changed(old.maximum_pool_size, new.maximum_pool_size),
            queue_capacity,
            keep_alive_secs: changed(old.keep_alive_secs, new.keep_alive_secs),
            overflow_policy: changed(old.overflow_policy, new.overflow_policy),
            allow_core_thread_timeout: changed(
                old.allow_core_thread_timeout,
                new.allow_core_thread_timeout,
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Report entries in a fixed field order
    pub fn field_changes(&self) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        if let Some((old, new)) = self.core_pool_size {
            changes.push(FieldChange::new(fields::CORE_POOL_SIZE, old, new));
        }
        if let Some((old, new)) = self.maximum_pool_size {
            changes.push(FieldChange::new(fields::MAXIMUM_POOL_SIZE, old, new));
        }
        if let Some((old, new)) = self.queue_capacity {
            let old = old.map(|c| c.to_string()).unwrap_or_else(|| "unbounded".to_string());
            changes.push(FieldChange::new(fields::QUEUE_CAPACITY, old, new));
        }
        if let Some((old, new)) = self.keep_alive_secs {
            changes.push(FieldChange::new(
                fields::KEEP_ALIVE_TIME,
                format!("{}s", old),
                format!("{}s", new),
            ));
        }
        if let Some((old, new)) = self.overflow_policy {
            changes.push(FieldChange::new(fields::OVERFLOW_POLICY, old, new));
        }
        if let Some((old, new)) = self.allow_core_thread_timeout {
            changes.push(FieldChange::new(fields::ALLOW_CORE_THREAD_TIMEOUT, old, new));
        }
        changes
    }
}

/// Drop queue changes a live pool cannot take.
///
/// The queue kind is fixed at construction, and only resizable queues accept
/// a new capacity; both are reset to the declared values with a warning.
pub fn reconcile_queue(declared: &PoolConfig, mut merged: PoolConfig) -> PoolConfig {
    if merged.queue_kind != declared.queue_kind {
        warn!(
            pool_id = %declared.pool_id,
            current = %declared.queue_kind,
            requested = %merged.queue_kind,
            "Queue kind cannot change on a live pool, ignoring"
        );
        merged.queue_kind = declared.queue_kind;
    }

    if merged.queue_capacity != declared.queue_capacity
        && !declared.queue_kind.supports_resize()
    {
        warn!(
            pool_id = %declared.pool_id,
            queue = %declared.queue_kind,
            current = ?declared.queue_capacity,
            requested = ?merged.queue_capacity,
            "Queue does not support capacity changes, keeping current capacity"
        );
        merged.queue_capacity = declared.queue_capacity;
    }

    merged
}
