//! Payloads handed to notification channels

use std::net::UdpSocket;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alarm::AlarmKind;
use crate::error::PoolError;
use crate::executor::ManagedPool;

/// Environment variable that overrides host address discovery
pub const HOST_ADDRESS_ENV: &str = "DYNPOOL_HOST_ADDRESS";

/// Who is sending: application, profile and host address.
///
/// The host address is looked up on first use and cached for the life of the
/// identity.
#[derive(Debug, Clone, Default)]
pub struct AppIdentity {
    pub application_name: String,
    pub active_profile: String,
    host: Arc<OnceLock<String>>,
}

impl AppIdentity {
    pub fn new(application_name: impl Into<String>, active_profile: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            active_profile: active_profile.into(),
            host: Arc::new(OnceLock::new()),
        }
    }

    /// Use a fixed host address instead of discovering one
    pub fn with_host(self, host: impl Into<String>) -> Self {
        let _ = self.host.set(host.into());
        self
    }

    pub fn host_address(&self) -> &str {
        self.host.get_or_init(resolve_host_address)
    }

    pub fn host_resolved(&self) -> bool {
        self.host.get().is_some()
    }
}

fn resolve_host_address() -> String {
    if let Ok(addr) = std::env::var(HOST_ADDRESS_ENV) {
        if !addr.trim().is_empty() {
            return addr;
        }
    }

    // Connecting a UDP socket sends nothing; it only selects the outbound interface
    let probe = UdpSocket::bind(("0.0.0.0", 0)).and_then(|socket| {
        socket.connect(("8.8.8.8", 80))?;
        socket.local_addr()
    });

    match probe {
        Ok(addr) => addr.ip().to_string(),
        Err(e) => {
            debug!(error = %e, "Could not determine host address, using loopback");
            "127.0.0.1".to_string()
        }
    }
}

/// An alarm that has been detected but not yet admitted.
///
/// Only the fields the rate limiter needs are filled in; [`AlarmRequest::capture`]
/// builds the full payload once the alarm is admitted.
#[derive(Debug, Clone)]
pub struct AlarmRequest {
    pub pool_id: String,
    pub kind: AlarmKind,
    pub interval_minutes: u64,
    pub receives: Vec<String>,
    pub pool: ManagedPool,
}

impl AlarmRequest {
    /// Read the pool and fill in the full alarm payload
    pub fn capture(&self, identity: &AppIdentity) -> Result<AlarmEvent, PoolError> {
        let stats = self.pool.stats()?;
        Ok(AlarmEvent {
            pool_id: self.pool_id.clone(),
            kind: self.kind,
            core_pool_size: stats.core_pool_size,
            maximum_pool_size: stats.maximum_pool_size,
            active_pool_size: stats.active_count,
            current_pool_size: stats.pool_size,
            largest_pool_size: stats.largest_pool_size,
            completed_task_count: stats.completed_task_count,
            queue_name: stats.queue_kind.name().to_string(),
            queue_size: stats.queue_size,
            queue_remaining_capacity: stats.queue_remaining_capacity,
            queue_capacity: stats.queue_capacity,
            overflow_policy: stats.overflow_policy,
            overflow_count: stats.overflow_count,
            timestamp: Utc::now(),
            host: identity.host_address().to_string(),
            application_name: identity.application_name.clone(),
            active_profile: identity.active_profile.clone(),
            receives: self.receives.clone(),
        })
    }
}

/// Fully populated alarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub pool_id: String,
    pub kind: AlarmKind,
    pub core_pool_size: usize,
    pub maximum_pool_size: usize,
    pub active_pool_size: usize,
    pub current_pool_size: usize,
    pub largest_pool_size: usize,
    pub completed_task_count: u64,
    pub queue_name: String,
    pub queue_size: usize,
    pub queue_remaining_capacity: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub overflow_policy: String,
    pub overflow_count: u64,
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub application_name: String,
    pub active_profile: String,
    pub receives: Vec<String>,
}

/// One tunable that differed between the old and new configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, old: impl ToString, new: impl ToString) -> Self {
        Self {
            field: field.into(),
            old: old.to_string(),
            new: new.to_string(),
        }
    }
}

/// Report of a configuration change applied to a live pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChangeEvent {
    pub pool_id: String,
    pub queue_name: String,
    /// Only the fields that differed, in a stable order
    pub changes: Vec<FieldChange>,
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub application_name: String,
    pub active_profile: String,
    pub receives: Vec<String>,
}

impl ConfigChangeEvent {
    pub fn change(&self, field: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }
}
