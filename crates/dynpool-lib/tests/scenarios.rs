//! End-to-end scenarios across pool, registry, refresher, monitor and dispatcher

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{recording_dispatcher, Blocker};
use dynpool_lib::alarm::{AlarmKind, FirstOverflowPolicy, HealthMonitor, MonitorConfig};
use dynpool_lib::refresh::fields;
use dynpool_lib::{
    ConfigRefresher, ManagedPool, OverflowPolicyKind, PoolConfig, PoolConfigUpdate, PoolRegistry,
    QueueKind, RefreshOutcome,
};

fn register(registry: &PoolRegistry, config: PoolConfig) -> ManagedPool {
    let pool = ManagedPool::from_config(&config).unwrap();
    registry.register(config.pool_id.clone(), pool.clone(), config);
    pool
}

#[tokio::test]
async fn queue_saturation_raises_one_alarm() {
    let registry = Arc::new(PoolRegistry::new());
    let mut config = PoolConfig::new("orders", 5, 10);
    config.queue_kind = QueueKind::ArrayBlocking;
    config.queue_capacity = Some(100);
    config.alarm.queue_threshold = 80;
    let pool = register(&registry, config);

    let blocker = Blocker::occupy(&pool, 5);
    for _ in 0..95 {
        pool.execute(|| {}).unwrap();
    }

    let (dispatcher, recorder) = recording_dispatcher();
    let monitor = HealthMonitor::new(Arc::clone(&registry), dispatcher, MonitorConfig::default());
    let summary = monitor.run_once().await;

    assert_eq!(summary.alarms_of(AlarmKind::QueueSaturation), 1);
    assert_eq!(summary.alarms_of(AlarmKind::ActiveSaturation), 0);
    {
        let alarms = recorder.alarms.lock();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].kind, AlarmKind::QueueSaturation);
        assert_eq!(alarms[0].queue_size, 95);
        assert_eq!(alarms[0].queue_capacity, Some(100));
        assert_eq!(alarms[0].queue_name, "ArrayBlockingQueue");
        assert_eq!(alarms[0].host, "10.1.2.3");
    }

    // Still saturated, but inside the cooldown window
    monitor.run_once().await;
    assert_eq!(recorder.alarms.lock().len(), 1);

    blocker.release();
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[tokio::test]
async fn max_change_reports_only_changed_field() {
    let registry = Arc::new(PoolRegistry::new());
    register(&registry, PoolConfig::new("orders", 5, 10));
    let (dispatcher, recorder) = recording_dispatcher();
    let refresher = ConfigRefresher::new(Arc::clone(&registry), dispatcher);

    let outcome = refresher
        .apply_config(PoolConfigUpdate::new("orders").core_pool_size(5).maximum_pool_size(20))
        .await
        .unwrap();
    assert!(matches!(outcome, RefreshOutcome::Applied(_)));

    let changes = recorder.changes.lock();
    assert_eq!(changes.len(), 1);
    let change = changes[0].change(fields::MAXIMUM_POOL_SIZE).unwrap();
    assert_eq!((change.old.as_str(), change.new.as_str()), ("10", "20"));
    assert!(changes[0].change(fields::CORE_POOL_SIZE).is_none());
    assert_eq!(changes[0].application_name, "it-app");
    assert_eq!(registry.get("orders").unwrap().pool.sizes(), (5, 20));
}

#[tokio::test]
async fn repeated_update_sends_no_second_event() {
    let registry = Arc::new(PoolRegistry::new());
    register(&registry, PoolConfig::new("orders", 2, 4));
    let (dispatcher, recorder) = recording_dispatcher();
    let refresher = ConfigRefresher::new(Arc::clone(&registry), dispatcher);

    let update = PoolConfigUpdate::new("orders")
        .maximum_pool_size(6)
        .overflow_policy(OverflowPolicyKind::CallerRuns);
    refresher.apply_config(update.clone()).await.unwrap();
    let second = refresher.apply_config(update).await.unwrap();

    assert!(matches!(second, RefreshOutcome::Unchanged));
    assert_eq!(recorder.changes.lock().len(), 1);
    assert_eq!(
        registry.get("orders").unwrap().pool.overflow_policy_name(),
        "CallerRunsPolicy"
    );
}

#[tokio::test]
async fn core_never_observed_above_max_while_growing() {
    let registry = Arc::new(PoolRegistry::new());
    let pool = register(&registry, PoolConfig::new("orders", 5, 10));
    let (dispatcher, _recorder) = recording_dispatcher();
    let refresher = ConfigRefresher::new(Arc::clone(&registry), dispatcher);

    let stop = Arc::new(AtomicBool::new(false));
    let observer = {
        let pool = pool.clone();
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut violations = 0;
            while !stop.load(Ordering::Relaxed) {
                let (core, max) = pool.sizes();
                if core > max {
                    violations += 1;
                }
            }
            violations
        })
    };

    for (core, max) in [(15, 20), (3, 4), (30, 40), (5, 10)] {
        refresher
            .apply_config(PoolConfigUpdate::new("orders").core_pool_size(core).maximum_pool_size(max))
            .await
            .unwrap();
        assert_eq!(pool.sizes(), (core, max));
    }

    stop.store(true, Ordering::Relaxed);
    assert_eq!(observer.join().unwrap(), 0);
}

#[test]
fn every_policy_counts_each_overflow() {
    for policy in OverflowPolicyKind::ALL {
        let pool = ManagedPool::builder(format!("count-{}", policy.name()))
            .queue(QueueKind::Synchronous, None)
            .overflow_policy(policy)
            .build()
            .unwrap();
        let blocker = Blocker::occupy(&pool, 1);

        for _ in 0..7 {
            let _ = pool.execute(|| {});
        }
        assert_eq!(pool.overflow_count(), 7, "policy {}", policy);

        blocker.release();
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
    }
}

#[tokio::test]
async fn overflow_alarm_only_when_count_grows() {
    let registry = Arc::new(PoolRegistry::new());
    let mut config = PoolConfig::new("orders", 1, 1);
    config.queue_kind = QueueKind::Synchronous;
    config.notify.interval_minutes = 0;
    let pool = register(&registry, config);
    let blocker = Blocker::occupy(&pool, 1);

    let (dispatcher, recorder) = recording_dispatcher();
    let monitor = HealthMonitor::new(
        Arc::clone(&registry),
        dispatcher,
        MonitorConfig {
            first_overflow: FirstOverflowPolicy::Alarm,
            ..Default::default()
        },
    );

    for _ in 0..3 {
        assert!(pool.execute(|| {}).is_err());
    }
    assert_eq!(monitor.run_once().await.alarms_of(AlarmKind::Overflow), 1);

    // 3 -> 3
    assert_eq!(monitor.run_once().await.alarms_of(AlarmKind::Overflow), 0);

    // 3 -> 5
    for _ in 0..2 {
        assert!(pool.execute(|| {}).is_err());
    }
    assert_eq!(monitor.run_once().await.alarms_of(AlarmKind::Overflow), 1);

    let overflow_alarms: Vec<u64> = recorder
        .alarms
        .lock()
        .iter()
        .filter(|a| a.kind == AlarmKind::Overflow)
        .map(|a| a.overflow_count)
        .collect();
    assert_eq!(overflow_alarms, vec![3, 5]);

    blocker.release();
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[tokio::test]
async fn disabled_alarms_stay_quiet() {
    let registry = Arc::new(PoolRegistry::new());
    let mut config = PoolConfig::new("quiet", 1, 1);
    config.alarm.enable = false;
    let pool = register(&registry, config);
    let blocker = Blocker::occupy(&pool, 1);

    let (dispatcher, recorder) = recording_dispatcher();
    let monitor = HealthMonitor::new(Arc::clone(&registry), dispatcher, MonitorConfig::default());
    let summary = monitor.run_once().await;

    assert_eq!(summary.pools_checked, 1);
    assert!(summary.alarms.is_empty());
    assert!(recorder.alarms.lock().is_empty());

    blocker.release();
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}
