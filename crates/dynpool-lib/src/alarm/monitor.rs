//! Periodic pool health monitor
//!
//! Samples every registered pool on a fixed delay, raises saturation and
//! overflow alarms, and refreshes the per-pool gauges.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::AlarmKind;
use crate::executor::PoolStats;
use crate::health::{components, HealthRegistry};
use crate::models::AlarmSettings;
use crate::notifier::{AlarmRequest, Delivery, NotifierDispatcher};
use crate::observability::{PoolMetrics, StructuredLogger};
use crate::registry::{PoolHolder, PoolRegistry};

/// How the first non-zero overflow count seen for a pool is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstOverflowPolicy {
    /// Alarm, as if the previous count were zero
    #[default]
    Alarm,
    /// Record it as the baseline without alarming
    Baseline,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Delay between the end of one run and the start of the next (default: 5 seconds)
    pub interval: Duration,
    /// Delay before the first run (default: none)
    pub initial_delay: Duration,
    pub first_overflow: FirstOverflowPolicy,
    /// Refresh the per-pool gauges on every run
    pub collect_metrics: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            initial_delay: Duration::ZERO,
            first_overflow: FirstOverflowPolicy::default(),
            collect_metrics: true,
        }
    }
}

/// What one run observed
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub pools_checked: usize,
    /// Every alarm detected, with what the dispatcher did with it
    pub alarms: Vec<(String, AlarmKind, Delivery)>,
    pub check_errors: usize,
}

impl RunSummary {
    pub fn alarms_of(&self, kind: AlarmKind) -> usize {
        self.alarms.iter().filter(|(_, k, _)| *k == kind).count()
    }
}

pub struct HealthMonitor {
    registry: Arc<PoolRegistry>,
    dispatcher: Arc<NotifierDispatcher>,
    config: MonitorConfig,
    metrics: Option<PoolMetrics>,
    health: Option<HealthRegistry>,
    /// Map of pool_id -> overflow count at the last check
    overflow_baselines: DashMap<String, u64>,
    logger: StructuredLogger,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<PoolRegistry>,
        dispatcher: Arc<NotifierDispatcher>,
        config: MonitorConfig,
    ) -> Self {
        let logger = StructuredLogger::new(dispatcher.identity().application_name.clone());
        Self {
            registry,
            dispatcher,
            config,
            metrics: None,
            health: None,
            overflow_baselines: DashMap::new(),
            logger,
        }
    }

    pub fn with_metrics(mut self, metrics: PoolMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Spawn the monitor loop on the current runtime
    pub fn start(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let monitor = Arc::new(self);
        let join = tokio::spawn(async move { monitor.run(shutdown_rx).await });
        MonitorHandle { shutdown_tx, join }
    }

    /// Run until `shutdown` fires; a run in progress always completes
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            first_overflow = ?self.config.first_overflow,
            "Starting pool health monitor"
        );

        let mut delay = self.config.initial_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let summary = self.run_once().await;
                    debug!(
                        pools = summary.pools_checked,
                        alarms = summary.alarms.len(),
                        errors = summary.check_errors,
                        "Monitor run complete"
                    );
                    delay = self.config.interval;
                }
                _ = shutdown.recv() => {
                    info!("Stopping pool health monitor");
                    break;
                }
            }
        }
    }

    /// Check every registered pool once
    pub async fn run_once(&self) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        for holder in self.registry.list_all() {
            summary.pools_checked += 1;

            // The overflow counter is lock-free and stays readable when stats are not
            let overflow_count = holder.pool.overflow_count();
            let previous = self.observe_overflow(&holder.pool_id, overflow_count);
            let alarm = &holder.config.alarm;

            let overflow_alarm = previous.map(|previous| {
                (
                    AlarmKind::Overflow,
                    format!("overflowed tasks {} => {}", previous, overflow_count),
                )
            });

            let mut alarms = Vec::new();

            match holder.pool.stats() {
                Ok(stats) => {
                    if self.config.collect_metrics {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_pool(&stats);
                        }
                    }
                    if queue_saturated(&stats, alarm) {
                        alarms.push((
                            AlarmKind::QueueSaturation,
                            format!(
                                "queue {}/{}",
                                stats.queue_size,
                                stats.queue_capacity.unwrap_or_default()
                            ),
                        ));
                    }
                    if workers_saturated(&stats, alarm) {
                        alarms.push((
                            AlarmKind::ActiveSaturation,
                            format!("active {}/{}", stats.active_count, stats.maximum_pool_size),
                        ));
                    }
                }
                Err(e) => {
                    summary.check_errors += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_check_errors();
                    }
                    warn!(pool_id = %holder.pool_id, error = %e, "Failed to read pool state");
                }
            }

            if !alarm.enable {
                continue;
            }

            alarms.extend(overflow_alarm);
            for (kind, detail) in alarms {
                let delivery = self.raise(&holder, kind, &detail).await;
                summary.alarms.push((holder.pool_id.clone(), kind, delivery));
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.observe_monitor_run(start.elapsed().as_secs_f64());
        }
        if let Some(health) = &self.health {
            health
                .record_run(components::MONITOR, summary.check_errors, "pool checks")
                .await;
        }

        summary
    }

    /// Compare against the stored baseline and move it forward.
    ///
    /// The baseline is tracked even while alarms are disabled, so enabling
    /// them later does not report old overflows.
    /// Returns the previous baseline when the counter moved past it.
    fn observe_overflow(&self, pool_id: &str, current: u64) -> Option<u64> {
        let mut baseline = self.overflow_baselines.entry(pool_id.to_string()).or_insert_with(|| {
            match self.config.first_overflow {
                FirstOverflowPolicy::Alarm => 0,
                FirstOverflowPolicy::Baseline => current,
            }
        });

        if current > *baseline {
            Some(std::mem::replace(&mut *baseline, current))
        } else {
            None
        }
    }

    async fn raise(&self, holder: &PoolHolder, kind: AlarmKind, detail: &str) -> Delivery {
        if let Some(metrics) = &self.metrics {
            metrics.inc_alarm(&holder.pool_id, kind.as_str());
        }

        let request = AlarmRequest {
            pool_id: holder.pool_id.clone(),
            kind,
            interval_minutes: holder.config.notify.interval_minutes,
            receives: holder.config.notify.receives.clone(),
            pool: holder.pool.clone(),
        };
        let delivery = self.dispatcher.dispatch_alarm(&request).await;
        if delivery == Delivery::Suppressed {
            debug!(pool_id = %holder.pool_id, kind = %kind, detail = %detail, "Alarm inside cooldown");
        } else {
            self.logger.log_alarm(&holder.pool_id, kind.as_str(), detail);
        }
        delivery
    }
}

fn percent(part: usize, whole: usize) -> u32 {
    (part as f64 * 100.0 / whole as f64).round() as u32
}

/// Queue usage at or above threshold; unbounded and zero-capacity queues never alarm
///
/// A synchronous queue holds a task for an instant during hand-off; its
/// configured capacity is zero, so it is skipped before looking at the size.
fn queue_saturated(stats: &PoolStats, alarm: &AlarmSettings) -> bool {
    if matches!(stats.queue_capacity, None | Some(0)) {
        return false;
    }
    let Some(remaining) = stats.queue_remaining_capacity else {
        return false;
    };
    let capacity = stats.queue_size + remaining;
    capacity > 0 && percent(stats.queue_size, capacity) >= alarm.queue_threshold
}

fn workers_saturated(stats: &PoolStats, alarm: &AlarmSettings) -> bool {
    stats.maximum_pool_size > 0
        && percent(stats.active_count, stats.maximum_pool_size) >= alarm.active_threshold
}

/// Stops a spawned monitor
pub struct MonitorHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop and wait for the current run to finish
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join.await {
            warn!(error = %e, "Monitor task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ManagedPool, QueueKind};
    use crate::models::PoolConfig;
    use crate::notifier::AppIdentity;

    fn stats(queue_size: usize, remaining: Option<usize>, active: usize, max: usize) -> PoolStats {
        PoolStats {
            pool_id: "p".to_string(),
            core_pool_size: 1,
            maximum_pool_size: max,
            pool_size: active,
            active_count: active,
            largest_pool_size: active,
            completed_task_count: 0,
            queue_kind: QueueKind::ArrayBlocking,
            queue_size,
            queue_remaining_capacity: remaining,
            queue_capacity: remaining.map(|r| r + queue_size),
            overflow_policy: "AbortPolicy".to_string(),
            overflow_count: 0,
            keep_alive_secs: 60,
            allow_core_thread_timeout: false,
            shutdown: false,
        }
    }

    fn monitor(first_overflow: FirstOverflowPolicy) -> HealthMonitor {
        let dispatcher = Arc::new(NotifierDispatcher::new(
            AppIdentity::new("app", "test").with_host("127.0.0.1"),
        ));
        HealthMonitor::new(
            Arc::new(PoolRegistry::new()),
            dispatcher,
            MonitorConfig {
                first_overflow,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_queue_threshold_uses_rounded_percentage() {
        let alarm = AlarmSettings::default();
        assert!(queue_saturated(&stats(95, Some(5), 0, 10), &alarm));
        // 79.5% rounds up to 80%
        assert!(queue_saturated(&stats(159, Some(41), 0, 10), &alarm));
        assert!(!queue_saturated(&stats(79, Some(21), 0, 10), &alarm));
    }

    #[test]
    fn test_unbounded_and_zero_capacity_queues_skip() {
        let alarm = AlarmSettings::default();
        assert!(!queue_saturated(&stats(1000, None, 0, 10), &alarm));
        assert!(!queue_saturated(&stats(0, Some(0), 0, 10), &alarm));
    }

    #[test]
    fn test_synchronous_hand_off_is_not_saturation() {
        let mut handing_off = stats(1, Some(0), 0, 1);
        handing_off.queue_kind = QueueKind::Synchronous;
        handing_off.queue_capacity = Some(0);
        assert!(!queue_saturated(&handing_off, &AlarmSettings::default()));
    }

    #[test]
    fn test_idle_synchronous_pool_never_reports_full_queue() {
        let pool = ManagedPool::builder("sync")
            .core_pool_size(1)
            .maximum_pool_size(1)
            .queue(QueueKind::Synchronous, None)
            .build()
            .unwrap();
        let alarm = AlarmSettings::default();

        for _ in 0..500 {
            let _ = pool.execute(|| {});
            let stats = pool.stats().unwrap();
            assert!(!queue_saturated(&stats, &alarm), "{:?}", stats);
        }
        pool.shutdown();
    }

    #[test]
    fn test_worker_threshold() {
        let alarm = AlarmSettings::default();
        assert!(workers_saturated(&stats(0, None, 8, 10), &alarm));
        assert!(!workers_saturated(&stats(0, None, 7, 10), &alarm));
        assert!(!workers_saturated(&stats(0, None, 0, 0), &alarm));
    }

    #[test]
    fn test_overflow_baseline_moves_forward() {
        let monitor = monitor(FirstOverflowPolicy::Alarm);
        assert_eq!(monitor.observe_overflow("p", 3), Some(0));
        assert_eq!(monitor.observe_overflow("p", 3), None);
        assert_eq!(monitor.observe_overflow("p", 5), Some(3));
        assert_eq!(monitor.observe_overflow("p", 5), None);
    }

    #[test]
    fn test_first_overflow_as_baseline() {
        let monitor = monitor(FirstOverflowPolicy::Baseline);
        assert_eq!(monitor.observe_overflow("p", 3), None);
        assert_eq!(monitor.observe_overflow("p", 4), Some(3));
    }

    #[tokio::test]
    async fn test_terminated_pool_counts_as_check_error() {
        let monitor = monitor(FirstOverflowPolicy::Alarm);
        let config = PoolConfig::new("gone", 1, 1);
        let pool = ManagedPool::from_config(&config).unwrap();
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(1)));
        monitor.registry.register("gone", pool, config.clone());

        let healthy = PoolConfig::new("ok", 1, 1);
        monitor
            .registry
            .register("ok", ManagedPool::from_config(&healthy).unwrap(), healthy);

        let summary = monitor.run_once().await;
        assert_eq!(summary.pools_checked, 2);
        assert_eq!(summary.check_errors, 1);
    }

    #[tokio::test]
    async fn test_overflow_checked_when_stats_fail() {
        let monitor = monitor(FirstOverflowPolicy::Alarm);
        let config = PoolConfig::new("closed", 1, 1);
        let pool = ManagedPool::from_config(&config).unwrap();
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(1)));
        assert!(pool.execute(|| {}).is_err());
        assert!(pool.execute(|| {}).is_err());
        monitor.registry.register("closed", pool, config);

        let summary = monitor.run_once().await;
        assert_eq!(summary.check_errors, 1);
        assert_eq!(summary.alarms_of(AlarmKind::Overflow), 1);
        assert_eq!(summary.alarms_of(AlarmKind::QueueSaturation), 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let handle = monitor(FirstOverflowPolicy::Alarm).start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop().await;
    }
}
