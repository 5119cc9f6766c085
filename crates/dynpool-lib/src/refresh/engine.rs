//! Applies configuration pushed by a feed to live pools
//!
//! Each request is merged onto the pool's declared configuration, validated,
//! diffed and applied in an order that never leaves `core > max` on the live
//! pool. Requests for the same pool are serialized; different pools proceed
//! independently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::diff::{reconcile_queue, ConfigDiff};
use crate::error::{PoolError, RefreshError};
use crate::executor::ManagedPool;
use crate::health::{components, HealthRegistry};
use crate::models::PoolConfigUpdate;
use crate::notifier::{ConfigChangeEvent, NotifierDispatcher};
use crate::observability::{PoolMetrics, StructuredLogger};
use crate::registry::PoolRegistry;

/// Result of a single refresh request
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// No pool is registered under the requested id
    UnknownPool,
    /// No tunable differs from the declared configuration
    Unchanged,
    /// Tunables were applied and reported
    Applied(ConfigChangeEvent),
}

/// Tally of a full-snapshot refresh
#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    pub applied: Vec<String>,
    pub unchanged: Vec<String>,
    pub unknown: Vec<String>,
    /// Pool id and error message for every rejected or failed request
    pub failed: Vec<(String, String)>,
}

/// Reconfiguration engine
pub struct ConfigRefresher {
    registry: Arc<PoolRegistry>,
    dispatcher: Arc<NotifierDispatcher>,
    /// Map of pool_id -> lock serializing refreshes of that pool
    locks: DashMap<String, Arc<Mutex<()>>>,
    metrics: Option<PoolMetrics>,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl ConfigRefresher {
    pub fn new(registry: Arc<PoolRegistry>, dispatcher: Arc<NotifierDispatcher>) -> Self {
        let logger = StructuredLogger::new(dispatcher.identity().application_name.clone());
        Self {
            registry,
            dispatcher,
            locks: DashMap::new(),
            metrics: None,
            health: None,
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

    fn lock_for(&self, pool_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(pool_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Apply one pool's update
    pub async fn apply_config(
        &self,
        update: PoolConfigUpdate,
    ) -> Result<RefreshOutcome, RefreshError> {
        // Unknown ids never get a lock entry
        let result = if self.registry.get(&update.pool_id).is_none() {
            warn!(pool_id = %update.pool_id, "Refresh requested for unknown pool, ignoring");
            Ok(RefreshOutcome::UnknownPool)
        } else {
            let lock = self.lock_for(&update.pool_id);
            let _guard = lock.lock().await;
            self.apply_locked(&update).await
        };
        if let Some(health) = &self.health {
            match &result {
                Err(e) => health.set_degraded(components::REFRESHER, e.to_string()).await,
                Ok(_) => health.set_healthy(components::REFRESHER).await,
            }
        }
        result
    }

    async fn apply_locked(
        &self,
        update: &PoolConfigUpdate,
    ) -> Result<RefreshOutcome, RefreshError> {
        let pool_id = update.pool_id.as_str();
        let Some(holder) = self.registry.get(pool_id) else {
            warn!(pool_id = %pool_id, "Pool removed before refresh ran, ignoring");
            return Ok(RefreshOutcome::UnknownPool);
        };

        let merged = reconcile_queue(&holder.config, holder.config.merge(update));
        if let Err(source) = merged.validate() {
            self.logger.log_refresh_rejected(pool_id, &source.to_string());
            return Err(RefreshError::InvalidConfig {
                pool_id: pool_id.to_string(),
                source,
            });
        }

        let diff = ConfigDiff::between(&holder.config, &merged);
        if diff.is_empty() {
            if merged != holder.config {
                debug!(pool_id = %pool_id, "Storing updated alarm and notify settings");
                self.registry.update_config(pool_id, merged);
            }
            return Ok(RefreshOutcome::Unchanged);
        }

        apply_diff(&holder.pool, &diff).map_err(|source| {
            warn!(pool_id = %pool_id, error = %source, "Pool refused configuration change");
            RefreshError::Apply {
                pool_id: pool_id.to_string(),
                source,
            }
        })?;

        let changes = diff.field_changes();
        let rendered: Vec<String> = changes
            .iter()
            .map(|c| format!("{}: {} => {}", c.field, c.old, c.new))
            .collect();
        self.logger.log_config_change(pool_id, &rendered);
        if let Some(metrics) = &self.metrics {
            metrics.inc_config_change(pool_id);
        }

        let identity = self.dispatcher.identity();
        let event = ConfigChangeEvent {
            pool_id: pool_id.to_string(),
            queue_name: merged.queue_kind.name().to_string(),
            changes,
            timestamp: Utc::now(),
            host: identity.host_address().to_string(),
            application_name: identity.application_name.clone(),
            active_profile: identity.active_profile.clone(),
            receives: merged.notify.receives.clone(),
        };

        self.registry.update_config(pool_id, merged);
        self.dispatcher.dispatch_change(&event).await;

        Ok(RefreshOutcome::Applied(event))
    }

    /// Apply a full snapshot; a failing pool does not stop the others
    pub async fn apply_all(&self, updates: Vec<PoolConfigUpdate>) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        for update in updates {
            let pool_id = update.pool_id.clone();
            match self.apply_config(update).await {
                Ok(RefreshOutcome::Applied(_)) => summary.applied.push(pool_id),
                Ok(RefreshOutcome::Unchanged) => summary.unchanged.push(pool_id),
                Ok(RefreshOutcome::UnknownPool) => summary.unknown.push(pool_id),
                Err(e) => summary.failed.push((pool_id, e.to_string())),
            }
        }

        info!(
            applied = summary.applied.len(),
            unchanged = summary.unchanged.len(),
            unknown = summary.unknown.len(),
            failed = summary.failed.len(),
            "Configuration snapshot applied"
        );
        summary
    }
}

/// Push a validated diff into the live pool.
///
/// Core and max are ordered so the pool never holds `core > max`: when the
/// new core exceeds the pool's current max, max moves first.
fn apply_diff(pool: &ManagedPool, diff: &ConfigDiff) -> Result<(), PoolError> {
    let new_core = diff.core_pool_size.map(|(_, new)| new);
    let new_max = diff.maximum_pool_size.map(|(_, new)| new);

    match new_core {
        Some(core) if core > pool.maximum_pool_size() => {
            if let Some(max) = new_max {
                pool.set_maximum_pool_size(max)?;
            }
            pool.set_core_pool_size(core)?;
        }
        _ => {
            if let Some(core) = new_core {
                pool.set_core_pool_size(core)?;
            }
            if let Some(max) = new_max {
                pool.set_maximum_pool_size(max)?;
            }
        }
    }

    // Keep-alive must be non-zero before core timeout is switched on
    match (diff.keep_alive_secs, diff.allow_core_thread_timeout) {
        (keep_alive, Some((_, true))) => {
            if let Some((_, secs)) = keep_alive {
                pool.set_keep_alive(Duration::from_secs(secs))?;
            }
            pool.allow_core_thread_timeout(true)?;
        }
        (keep_alive, allow) => {
            if let Some((_, allow)) = allow {
                pool.allow_core_thread_timeout(allow)?;
            }
            if let Some((_, secs)) = keep_alive {
                pool.set_keep_alive(Duration::from_secs(secs))?;
            }
        }
    }

    if let Some((_, policy)) = diff.overflow_policy {
        pool.set_overflow_policy(policy);
    }
    if let Some((_, capacity)) = diff.queue_capacity {
        pool.set_queue_capacity(capacity)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::QueueKind;
    use crate::models::PoolConfig;
    use crate::notifier::{AlarmEvent, AppIdentity, Notifier};
    use crate::refresh::fields;
    use async_trait::async_trait;
    use tokio::sync::{mpsc, Semaphore};

    /// Holds change reports for pool `a` until the gate opens
    struct GatedNotifier {
        entered: mpsc::UnboundedSender<String>,
        gate: Arc<Semaphore>,
        changes: parking_lot::Mutex<Vec<ConfigChangeEvent>>,
    }

    #[async_trait]
    impl Notifier for GatedNotifier {
        fn platform(&self) -> &str {
            "GATED"
        }

        async fn send_alarm(&self, _alarm: &AlarmEvent) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send_change(&self, change: &ConfigChangeEvent) -> anyhow::Result<()> {
            if change.pool_id == "a" {
                let _ = self.entered.send(change.pool_id.clone());
                self.gate.acquire().await?.forget();
            }
            self.changes.lock().push(change.clone());
            Ok(())
        }
    }

    fn setup(config: PoolConfig) -> (ConfigRefresher, Arc<PoolRegistry>) {
        let registry = Arc::new(PoolRegistry::new());
        let pool = ManagedPool::from_config(&config).unwrap();
        registry.register(config.pool_id.clone(), pool, config);
        let dispatcher = Arc::new(NotifierDispatcher::new(
            AppIdentity::new("app", "test").with_host("127.0.0.1"),
        ));
        (ConfigRefresher::new(Arc::clone(&registry), dispatcher), registry)
    }

    #[tokio::test]
    async fn test_unknown_pool_is_not_an_error() {
        let (refresher, _) = setup(PoolConfig::new("p", 1, 2));
        let outcome = refresher
            .apply_config(PoolConfigUpdate::new("missing").core_pool_size(3))
            .await
            .unwrap();
        assert!(matches!(outcome, RefreshOutcome::UnknownPool));
    }

    #[tokio::test]
    async fn test_unknown_pools_leave_no_lock_behind() {
        let (refresher, _) = setup(PoolConfig::new("p", 1, 2));
        for i in 0..10 {
            refresher
                .apply_config(PoolConfigUpdate::new(format!("missing-{}", i)).core_pool_size(1))
                .await
                .unwrap();
        }
        assert!(refresher.locks.is_empty());

        refresher
            .apply_config(PoolConfigUpdate::new("p").maximum_pool_size(3))
            .await
            .unwrap();
        assert_eq!(refresher.locks.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_pool_refreshes_are_serialized() {
        let registry = Arc::new(PoolRegistry::new());
        for config in [PoolConfig::new("a", 2, 4), PoolConfig::new("b", 1, 2)] {
            let pool = ManagedPool::from_config(&config).unwrap();
            registry.register(config.pool_id.clone(), pool, config);
        }
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let notifier = Arc::new(GatedNotifier {
            entered: entered_tx,
            gate: Arc::clone(&gate),
            changes: parking_lot::Mutex::new(Vec::new()),
        });
        let dispatcher = NotifierDispatcher::new(
            AppIdentity::new("app", "test").with_host("127.0.0.1"),
        )
        .with_platform("GATED");
        dispatcher.register_notifier(notifier.clone());
        let refresher = Arc::new(ConfigRefresher::new(Arc::clone(&registry), Arc::new(dispatcher)));

        let first = tokio::spawn({
            let refresher = Arc::clone(&refresher);
            async move {
                refresher
                    .apply_config(PoolConfigUpdate::new("a").maximum_pool_size(8))
                    .await
            }
        });
        // First refresh is parked inside its report, holding the pool's lock
        assert_eq!(entered_rx.recv().await.as_deref(), Some("a"));

        let second = tokio::spawn({
            let refresher = Arc::clone(&refresher);
            async move {
                refresher
                    .apply_config(PoolConfigUpdate::new("a").maximum_pool_size(12))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());
        assert!(entered_rx.try_recv().is_err());

        // Another pool is not blocked by `a`
        let other = tokio::time::timeout(
            Duration::from_secs(1),
            refresher.apply_config(PoolConfigUpdate::new("b").maximum_pool_size(3)),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(matches!(other, RefreshOutcome::Applied(_)));

        gate.add_permits(2);
        assert!(matches!(first.await.unwrap().unwrap(), RefreshOutcome::Applied(_)));
        assert!(matches!(second.await.unwrap().unwrap(), RefreshOutcome::Applied(_)));

        let changes = notifier.changes.lock().clone();
        let reports: Vec<_> = changes
            .iter()
            .filter(|c| c.pool_id == "a")
            .map(|c| c.change(fields::MAXIMUM_POOL_SIZE).unwrap().clone())
            .collect();
        assert_eq!(reports.len(), 2);
        assert_eq!((reports[0].old.as_str(), reports[0].new.as_str()), ("4", "8"));
        assert_eq!((reports[1].old.as_str(), reports[1].new.as_str()), ("8", "12"));
        assert_eq!(registry.get("a").unwrap().pool.sizes(), (2, 12));
        assert_eq!(registry.get("b").unwrap().pool.sizes(), (1, 3));
    }

    #[tokio::test]
    async fn test_grow_core_past_old_max() {
        let (refresher, registry) = setup(PoolConfig::new("p", 5, 10));
        let outcome = refresher
            .apply_config(PoolConfigUpdate::new("p").core_pool_size(15).maximum_pool_size(20))
            .await
            .unwrap();

        assert!(matches!(outcome, RefreshOutcome::Applied(_)));
        let holder = registry.get("p").unwrap();
        assert_eq!(holder.pool.sizes(), (15, 20));
        assert_eq!(holder.config.core_pool_size, 15);
    }

    #[tokio::test]
    async fn test_shrink_both_bounds() {
        let (refresher, registry) = setup(PoolConfig::new("p", 5, 10));
        refresher
            .apply_config(PoolConfigUpdate::new("p").core_pool_size(2).maximum_pool_size(3))
            .await
            .unwrap();
        assert_eq!(registry.get("p").unwrap().pool.sizes(), (2, 3));
    }

    #[tokio::test]
    async fn test_invalid_merge_leaves_pool_untouched() {
        let (refresher, registry) = setup(PoolConfig::new("p", 5, 10));
        let err = refresher
            .apply_config(PoolConfigUpdate::new("p").core_pool_size(12))
            .await
            .unwrap_err();

        assert_eq!(err.pool_id(), "p");
        assert!(matches!(err, RefreshError::InvalidConfig { .. }));
        let holder = registry.get("p").unwrap();
        assert_eq!(holder.pool.sizes(), (5, 10));
        assert_eq!(holder.config.core_pool_size, 5);
    }

    #[tokio::test]
    async fn test_same_update_twice_is_unchanged() {
        let (refresher, _) = setup(PoolConfig::new("p", 2, 4));
        let update = PoolConfigUpdate::new("p").maximum_pool_size(8);

        assert!(matches!(
            refresher.apply_config(update.clone()).await.unwrap(),
            RefreshOutcome::Applied(_)
        ));
        assert!(matches!(
            refresher.apply_config(update).await.unwrap(),
            RefreshOutcome::Unchanged
        ));
    }

    #[tokio::test]
    async fn test_alarm_settings_stored_silently() {
        let (refresher, registry) = setup(PoolConfig::new("p", 2, 4));
        let mut update = PoolConfigUpdate::new("p");
        update.alarm = Some(crate::models::AlarmSettings {
            enable: false,
            queue_threshold: 50,
            active_threshold: 60,
        });

        let outcome = refresher.apply_config(update).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Unchanged));
        assert!(!registry.get("p").unwrap().config.alarm.enable);
    }

    #[tokio::test]
    async fn test_capacity_change_ignored_for_fixed_queue() {
        let mut config = PoolConfig::new("p", 1, 2);
        config.queue_kind = QueueKind::LinkedBlocking;
        config.queue_capacity = Some(100);
        let (refresher, registry) = setup(config);

        let outcome = refresher
            .apply_config(PoolConfigUpdate::new("p").queue_capacity(500))
            .await
            .unwrap();
        assert!(matches!(outcome, RefreshOutcome::Unchanged));
        assert_eq!(registry.get("p").unwrap().config.queue_capacity, Some(100));
    }

    #[tokio::test]
    async fn test_enable_core_timeout_with_new_keep_alive() {
        let mut config = PoolConfig::new("p", 1, 2);
        config.keep_alive_secs = 0;
        let (refresher, registry) = setup(config);

        let mut update = PoolConfigUpdate::new("p").keep_alive_secs(30);
        update.allow_core_thread_timeout = Some(true);
        refresher.apply_config(update).await.unwrap();

        let pool = registry.get("p").unwrap().pool;
        assert!(pool.allows_core_thread_timeout());
        assert_eq!(pool.keep_alive(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_apply_all_continues_past_failures() {
        let (refresher, registry) = setup(PoolConfig::new("a", 1, 2));
        let config = PoolConfig::new("b", 1, 2);
        registry.register("b", ManagedPool::from_config(&config).unwrap(), config);

        let summary = refresher
            .apply_all(vec![
                PoolConfigUpdate::new("a").core_pool_size(9),
                PoolConfigUpdate::new("b").maximum_pool_size(6),
                PoolConfigUpdate::new("c").maximum_pool_size(6),
            ])
            .await;

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "a");
        assert_eq!(summary.applied, vec!["b".to_string()]);
        assert_eq!(summary.unknown, vec!["c".to_string()]);
    }
}
