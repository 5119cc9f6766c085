//! Threshold alarms
//!
//! The monitor samples every registered pool on a fixed delay and raises
//! alarms through the dispatcher; the rate limiter keeps repeated alarms of
//! the same kind from flooding a channel.

pub mod monitor;
pub mod rate_limiter;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use monitor::{FirstOverflowPolicy, HealthMonitor, MonitorConfig, MonitorHandle, RunSummary};
pub use rate_limiter::AlarmRateLimiter;

/// What an alarm is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    /// Queue usage reached its threshold
    QueueSaturation,
    /// Busy workers reached their threshold of the maximum
    ActiveSaturation,
    /// The overflow policy ran since the last check
    Overflow,
}

impl AlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::QueueSaturation => "Capacity",
            AlarmKind::ActiveSaturation => "Activity",
            AlarmKind::Overflow => "Reject",
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
