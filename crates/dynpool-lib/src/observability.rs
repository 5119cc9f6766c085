//! Observability infrastructure for managed pools
//!
//! Provides:
//! - Prometheus metrics (per-pool gauges, alarm and config-change counters, monitor latency)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::executor::PoolStats;

/// Buckets for one monitor run (in seconds)
const MONITOR_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

static GLOBAL_METRICS: OnceLock<PoolMetricsInner> = OnceLock::new();

struct PoolMetricsInner {
    core_pool_size: IntGaugeVec,
    maximum_pool_size: IntGaugeVec,
    pool_size: IntGaugeVec,
    active_count: IntGaugeVec,
    queue_size: IntGaugeVec,
    queue_capacity: IntGaugeVec,
    overflow_total: IntGaugeVec,
    completed_tasks: IntGaugeVec,
    alarms_total: IntCounterVec,
    config_changes_total: IntCounterVec,
    check_errors_total: IntCounter,
    monitor_run_seconds: Histogram,
}

impl PoolMetricsInner {
    fn new() -> Self {
        Self {
            core_pool_size: register_int_gauge_vec!(
                "dynpool_core_pool_size",
                "Configured core worker count",
                &["pool_id"]
            )
            .expect("Failed to register core_pool_size"),

            maximum_pool_size: register_int_gauge_vec!(
                "dynpool_maximum_pool_size",
                "Configured maximum worker count",
                &["pool_id"]
            )
            .expect("Failed to register maximum_pool_size"),

            pool_size: register_int_gauge_vec!(
                "dynpool_pool_size",
                "Live worker threads",
                &["pool_id"]
            )
            .expect("Failed to register pool_size"),

            active_count: register_int_gauge_vec!(
                "dynpool_active_count",
                "Workers currently running a task",
                &["pool_id"]
            )
            .expect("Failed to register active_count"),

            queue_size: register_int_gauge_vec!(
                "dynpool_queue_size",
                "Tasks waiting in the pool queue",
                &["pool_id"]
            )
            .expect("Failed to register queue_size"),

            queue_capacity: register_int_gauge_vec!(
                "dynpool_queue_capacity",
                "Queue capacity, -1 when unbounded",
                &["pool_id"]
            )
            .expect("Failed to register queue_capacity"),

            overflow_total: register_int_gauge_vec!(
                "dynpool_overflow_total",
                "Tasks handed to the overflow policy since the pool started",
                &["pool_id"]
            )
            .expect("Failed to register overflow_total"),

            completed_tasks: register_int_gauge_vec!(
                "dynpool_completed_tasks",
                "Tasks completed since the pool started",
                &["pool_id"]
            )
            .expect("Failed to register completed_tasks"),

            alarms_total: register_int_counter_vec!(
                "dynpool_alarms_total",
                "Alarms raised by the health monitor",
                &["pool_id", "kind"]
            )
            .expect("Failed to register alarms_total"),

            config_changes_total: register_int_counter_vec!(
                "dynpool_config_changes_total",
                "Configuration changes applied to live pools",
                &["pool_id"]
            )
            .expect("Failed to register config_changes_total"),

            check_errors_total: register_int_counter!(
                "dynpool_check_errors_total",
                "Health checks that failed to read pool state"
            )
            .expect("Failed to register check_errors_total"),

            monitor_run_seconds: register_histogram!(
                "dynpool_monitor_run_seconds",
                "Time spent on one health monitor run",
                MONITOR_BUCKETS.to_vec()
            )
            .expect("Failed to register monitor_run_seconds"),
        }
    }
}

/// Handle to the process-wide pool metrics.
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct PoolMetrics {
    _private: (),
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PoolMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PoolMetricsInner {
        GLOBAL_METRICS.get_or_init(PoolMetricsInner::new)
    }

    /// Publish a pool snapshot
    pub fn record_pool(&self, stats: &PoolStats) {
        let inner = self.inner();
        let id = [stats.pool_id.as_str()];
        inner.core_pool_size.with_label_values(&id).set(stats.core_pool_size as i64);
        inner
            .maximum_pool_size
            .with_label_values(&id)
            .set(stats.maximum_pool_size as i64);
        inner.pool_size.with_label_values(&id).set(stats.pool_size as i64);
        inner.active_count.with_label_values(&id).set(stats.active_count as i64);
        inner.queue_size.with_label_values(&id).set(stats.queue_size as i64);
        inner
            .queue_capacity
            .with_label_values(&id)
            .set(stats.queue_capacity.map(|c| c as i64).unwrap_or(-1));
        inner.overflow_total.with_label_values(&id).set(stats.overflow_count as i64);
        inner
            .completed_tasks
            .with_label_values(&id)
            .set(stats.completed_task_count as i64);
    }

    /// Drop every series of a pool that is no longer hosted
    pub fn forget_pool(&self, pool_id: &str) {
        let inner = self.inner();
        for gauge in [
            &inner.core_pool_size,
            &inner.maximum_pool_size,
            &inner.pool_size,
            &inner.active_count,
            &inner.queue_size,
            &inner.queue_capacity,
            &inner.overflow_total,
            &inner.completed_tasks,
        ] {
            let _ = gauge.remove_label_values(&[pool_id]);
        }
    }

    pub fn inc_alarm(&self, pool_id: &str, kind: &str) {
        self.inner().alarms_total.with_label_values(&[pool_id, kind]).inc();
    }

    pub fn inc_config_change(&self, pool_id: &str) {
        self.inner().config_changes_total.with_label_values(&[pool_id]).inc();
    }

    pub fn inc_check_errors(&self) {
        self.inner().check_errors_total.inc();
    }

    pub fn observe_monitor_run(&self, duration_secs: f64) {
        self.inner().monitor_run_seconds.observe(duration_secs);
    }
}

/// Structured logger for pool lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    application: String,
}

impl StructuredLogger {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
        }
    }

    pub fn log_startup(&self, version: &str, pools: usize) {
        info!(
            event = "host_started",
            application = %self.application,
            version = %version,
            pools = pools,
            "Pool host started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "host_shutdown",
            application = %self.application,
            reason = %reason,
            "Pool host shutting down"
        );
    }

    pub fn log_pool_created(&self, pool_id: &str, core: usize, max: usize, queue: &str) {
        info!(
            event = "pool_created",
            application = %self.application,
            pool_id = %pool_id,
            core_pool_size = core,
            maximum_pool_size = max,
            queue = %queue,
            "Pool created"
        );
    }

    /// Log an applied change; `changes` is rendered as `field: old => new`
    pub fn log_config_change(&self, pool_id: &str, changes: &[String]) {
        info!(
            event = "pool_config_changed",
            application = %self.application,
            pool_id = %pool_id,
            changes = %changes.join(", "),
            "Pool configuration changed"
        );
    }

    pub fn log_refresh_rejected(&self, pool_id: &str, reason: &str) {
        warn!(
            event = "pool_config_rejected",
            application = %self.application,
            pool_id = %pool_id,
            reason = %reason,
            "Pool configuration rejected, keeping previous settings"
        );
    }

    pub fn log_alarm(&self, pool_id: &str, kind: &str, detail: &str) {
        warn!(
            event = "pool_alarm",
            application = %self.application,
            pool_id = %pool_id,
            kind = %kind,
            detail = %detail,
            "Pool alarm raised"
        );
    }
}
