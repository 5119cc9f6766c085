//! Live reconfiguration of registered pools

pub mod diff;
pub mod engine;

pub use diff::{fields, reconcile_queue, ConfigDiff};
pub use engine::{ConfigRefresher, RefreshOutcome, RefreshSummary};
