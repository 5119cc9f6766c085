//! Live-tunable worker pools
//!
//! This crate provides:
//! - Bounded worker pools whose sizes, queue capacity, idle timeout and
//!   overflow policy can change while they run
//! - A registry that makes pools discoverable by id
//! - A reconfiguration engine that applies only the tunables that changed
//! - A health monitor raising rate-limited saturation and overflow alarms
//! - Notification dispatch to pluggable channels
//! - Health checks and Prometheus metrics for the host

pub mod alarm;
pub mod bootstrap;
pub mod error;
pub mod executor;
pub mod health;
pub mod models;
pub mod notifier;
pub mod observability;
pub mod refresh;
pub mod registry;

pub use alarm::{AlarmKind, AlarmRateLimiter, FirstOverflowPolicy, HealthMonitor, MonitorConfig};
pub use bootstrap::{build_pools, shutdown_pools, BootstrapConfig};
pub use error::{BootstrapError, ConfigError, PoolError, RefreshError};
pub use executor::{ManagedPool, OverflowPolicyKind, PoolStats, QueueKind};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use notifier::{Notifier, NotifierDispatcher};
pub use observability::{PoolMetrics, StructuredLogger};
pub use refresh::{ConfigRefresher, RefreshOutcome};
pub use registry::{PoolHolder, PoolRegistry};
