//! Core data models for pool configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::executor::{OverflowPolicyKind, QueueKind};

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> u32 {
    80
}

fn default_notify_interval() -> u64 {
    5
}

/// Threshold alarm settings for one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSettings {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Queue saturation percentage that raises an alarm
    #[serde(default = "default_threshold")]
    pub queue_threshold: u32,
    /// Worker saturation percentage that raises an alarm
    #[serde(default = "default_threshold")]
    pub active_threshold: u32,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            enable: true,
            queue_threshold: default_threshold(),
            active_threshold: default_threshold(),
        }
    }
}

/// Who is told about a pool, and how often at most
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifySettings {
    #[serde(default)]
    pub receives: Vec<String>,
    /// Minimum minutes between two alarms of the same kind
    #[serde(default = "default_notify_interval")]
    pub interval_minutes: u64,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            receives: Vec::new(),
            interval_minutes: default_notify_interval(),
        }
    }
}

/// Declared configuration of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_id: String,
    pub core_pool_size: usize,
    pub maximum_pool_size: usize,
    #[serde(default)]
    pub queue_kind: QueueKind,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub overflow_policy: OverflowPolicyKind,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub allow_core_thread_timeout: bool,
    #[serde(default)]
    pub alarm: AlarmSettings,
    #[serde(default)]
    pub notify: NotifySettings,
    /// Worker thread name prefix; the pool id when unset. Fixed at build time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_name_prefix: Option<String>,
}

impl PoolConfig {
    /// Unchecked; run `validate` before building a pool from it.
    pub fn new(pool_id: impl Into<String>, core_pool_size: usize, maximum_pool_size: usize) -> Self {
        Self {
            pool_id: pool_id.into(),
            core_pool_size,
            maximum_pool_size,
            queue_kind: QueueKind::default(),
            queue_capacity: None,
            overflow_policy: OverflowPolicyKind::default(),
            keep_alive_secs: default_keep_alive_secs(),
            allow_core_thread_timeout: false,
            alarm: AlarmSettings::default(),
            notify: NotifySettings::default(),
            thread_name_prefix: None,
        }
    }

    /// Check the invariants a pool configuration must hold
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_id.trim().is_empty() {
            return Err(ConfigError::EmptyPoolId);
        }
        if self.maximum_pool_size == 0 {
            return Err(ConfigError::ZeroMaximum(self.pool_id.clone()));
        }
        if self.core_pool_size > self.maximum_pool_size {
            return Err(ConfigError::CoreExceedsMax {
                pool_id: self.pool_id.clone(),
                core: self.core_pool_size,
                max: self.maximum_pool_size,
            });
        }
        if self.allow_core_thread_timeout && self.keep_alive_secs == 0 {
            return Err(ConfigError::ZeroKeepAlive(self.pool_id.clone()));
        }

        for (field, value) in [
            ("queue", self.alarm.queue_threshold),
            ("active", self.alarm.active_threshold),
        ] {
            if value > 100 {
                return Err(ConfigError::ThresholdOutOfRange {
                    pool_id: self.pool_id.clone(),
                    field,
                    value,
                });
            }
        }

        Ok(())
    }

    /// Overlay an update; fields the update leaves unset keep their value
    pub fn merge(&self, update: &PoolConfigUpdate) -> PoolConfig {
        PoolConfig {
            pool_id: self.pool_id.clone(),
            core_pool_size: update.core_pool_size.unwrap_or(self.core_pool_size),
            maximum_pool_size: update.maximum_pool_size.unwrap_or(self.maximum_pool_size),
            queue_kind: update.queue_kind.unwrap_or(self.queue_kind),
            queue_capacity: update.queue_capacity.or(self.queue_capacity),
            overflow_policy: update.overflow_policy.unwrap_or(self.overflow_policy),
            keep_alive_secs: update.keep_alive_secs.unwrap_or(self.keep_alive_secs),
            allow_core_thread_timeout: update
                .allow_core_thread_timeout
                .unwrap_or(self.allow_core_thread_timeout),
            alarm: update.alarm.clone().unwrap_or_else(|| self.alarm.clone()),
            notify: update.notify.clone().unwrap_or_else(|| self.notify.clone()),
            thread_name_prefix: self.thread_name_prefix.clone(),
        }
    }
}

/// Partial pool configuration received from a config feed.
///
/// `None` means the field is not being changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfigUpdate {
    #[serde(default)]
    pub pool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_pool_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_pool_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_kind: Option<QueueKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow_policy: Option<OverflowPolicyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_core_thread_timeout: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<AlarmSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifySettings>,
}

impl PoolConfigUpdate {
    pub fn new(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            ..Default::default()
        }
    }

    pub fn core_pool_size(mut self, core: usize) -> Self {
        self.core_pool_size = Some(core);
        self
    }

    pub fn maximum_pool_size(mut self, max: usize) -> Self {
        self.maximum_pool_size = Some(max);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicyKind) -> Self {
        self.overflow_policy = Some(policy);
        self
    }

    pub fn keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive_secs = Some(secs);
        self
    }
}

impl From<PoolConfig> for PoolConfigUpdate {
    fn from(config: PoolConfig) -> Self {
        Self {
            pool_id: config.pool_id,
            core_pool_size: Some(config.core_pool_size),
            maximum_pool_size: Some(config.maximum_pool_size),
            queue_kind: Some(config.queue_kind),
            queue_capacity: config.queue_capacity,
            overflow_policy: Some(config.overflow_policy),
            keep_alive_secs: Some(config.keep_alive_secs),
            allow_core_thread_timeout: Some(config.allow_core_thread_timeout),
            alarm: Some(config.alarm),
            notify: Some(config.notify),
        }
    }
}
