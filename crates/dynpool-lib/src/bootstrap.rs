//! Bootstrap configuration and pool construction

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::alarm::{FirstOverflowPolicy, MonitorConfig};
use crate::error::{BootstrapError, ConfigError};
use crate::executor::ManagedPool;
use crate::models::{PoolConfig, PoolConfigUpdate};
use crate::notifier::AppIdentity;
use crate::observability::{PoolMetrics, StructuredLogger};
use crate::registry::PoolRegistry;

fn default_true() -> bool {
    true
}

fn default_application_name() -> String {
    "dynpool".to_string()
}

fn default_active_profile() -> String {
    "default".to_string()
}

fn default_collect_interval() -> u64 {
    5
}

/// Channel the dispatcher delivers to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPlatformConfig {
    /// Platform identifier, e.g. `LOG`
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Publish per-pool gauges on every monitor run
    #[serde(default = "default_true")]
    pub collect_metrics: bool,
    /// Seconds between monitor runs
    #[serde(default = "default_collect_interval")]
    pub collect_interval_secs: u64,
    #[serde(default)]
    pub first_overflow: FirstOverflowPolicy,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enable: true,
            collect_metrics: true,
            collect_interval_secs: default_collect_interval(),
            first_overflow: FirstOverflowPolicy::default(),
        }
    }
}

impl MonitorSettings {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(self.collect_interval_secs.max(1)),
            first_overflow: self.first_overflow,
            collect_metrics: self.collect_metrics,
            ..Default::default()
        }
    }
}

/// Everything the host needs to build its pools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Master switch; when off no pools are built
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_application_name")]
    pub application_name: String,
    #[serde(default = "default_active_profile")]
    pub active_profile: String,
    #[serde(default)]
    pub notify_platforms: Option<NotifyPlatformConfig>,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub executors: Vec<PoolConfig>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enable: true,
            application_name: default_application_name(),
            active_profile: default_active_profile(),
            notify_platforms: None,
            monitor: MonitorSettings::default(),
            executors: Vec::new(),
        }
    }
}

impl BootstrapConfig {
    /// Validate every executor and reject duplicate ids
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for executor in &self.executors {
            executor.validate()?;
            if !seen.insert(executor.pool_id.as_str()) {
                return Err(ConfigError::DuplicatePoolId(executor.pool_id.clone()));
            }
        }
        Ok(())
    }

    pub fn identity(&self) -> AppIdentity {
        AppIdentity::new(&self.application_name, &self.active_profile)
    }

    pub fn platform(&self) -> Option<String> {
        self.notify_platforms
            .as_ref()
            .map(|p| p.platform.clone())
            .filter(|p| !p.trim().is_empty())
    }

    /// Every executor as a full refresh request
    pub fn updates(&self) -> Vec<PoolConfigUpdate> {
        self.executors.iter().cloned().map(PoolConfigUpdate::from).collect()
    }
}

/// Build and register every configured pool.
///
/// Fails before creating anything if any executor is invalid. Returns the
/// number of pools registered; zero when the master switch is off.
pub fn build_pools(config: &BootstrapConfig, registry: &PoolRegistry) -> Result<usize, BootstrapError> {
    if !config.enable {
        info!("Dynamic pools disabled, nothing to build");
        return Ok(0);
    }

    config.validate()?;
    let logger = StructuredLogger::new(&config.application_name);

    for executor in &config.executors {
        let pool = ManagedPool::from_config(executor).map_err(|source| BootstrapError::Pool {
            pool_id: executor.pool_id.clone(),
            source,
        })?;
        logger.log_pool_created(
            &executor.pool_id,
            executor.core_pool_size,
            executor.maximum_pool_size,
            executor.queue_kind.name(),
        );
        registry.register(executor.pool_id.clone(), pool, executor.clone());
    }

    Ok(config.executors.len())
}

/// Shut down and unregister every pool, waiting up to `grace` for each to drain.
///
/// Blocks the calling thread. Metric series of removed pools are dropped.
/// Returns the ids of pools still running tasks at the deadline.
pub fn shutdown_pools(
    registry: &PoolRegistry,
    metrics: Option<&PoolMetrics>,
    grace: Duration,
) -> Vec<String> {
    let holders = registry.list_all();
    for holder in &holders {
        holder.pool.shutdown();
    }

    let mut undrained = Vec::new();
    for holder in holders {
        if !holder.pool.await_termination(grace) {
            warn!(pool_id = %holder.pool_id, "Pool did not drain before shutdown deadline");
            undrained.push(holder.pool_id.clone());
        }
        registry.remove(&holder.pool_id);
        if let Some(metrics) = metrics {
            metrics.forget_pool(&holder.pool_id);
        }
    }
    undrained
}
