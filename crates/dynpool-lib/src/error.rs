//! Error types shared across the pool library

use thiserror::Error;

use crate::executor::QueueKind;

/// Errors raised by a managed worker pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// The overflow policy refused the task
    #[error("task rejected by pool {pool_id}: {reason}")]
    Rejected { pool_id: String, reason: String },

    /// A size assignment would break `core <= max` or leave the pool without workers
    #[error("invalid pool sizes: core {core} must not exceed max {max}, and max must be at least 1")]
    InvalidSizes { core: usize, max: usize },

    /// The queue kind has a fixed capacity
    #[error("queue kind {0} does not support live capacity changes")]
    UnsupportedResize(QueueKind),

    /// Core threads may only time out with a non-zero keep-alive
    #[error("keep-alive must be non-zero while core threads are allowed to time out")]
    InvalidKeepAlive,

    /// The pool has been shut down and all of its workers have exited
    #[error("pool {0} has terminated")]
    Terminated(String),

    /// The OS refused to start another worker thread
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors raised while validating or interpreting pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("pool {pool_id}: core pool size {core} exceeds maximum pool size {max}")]
    CoreExceedsMax {
        pool_id: String,
        core: usize,
        max: usize,
    },

    #[error("pool {0}: maximum pool size must be at least 1")]
    ZeroMaximum(String),

    #[error("pool {pool_id}: {field} threshold {value} is above 100%")]
    ThresholdOutOfRange {
        pool_id: String,
        field: &'static str,
        value: u32,
    },

    #[error("pool {0}: keep-alive must be non-zero when core threads may time out")]
    ZeroKeepAlive(String),

    #[error("pool id must not be empty")]
    EmptyPoolId,

    #[error("duplicate pool id {0}")]
    DuplicatePoolId(String),

    #[error("no matching queue kind was found: {0}")]
    UnknownQueueKind(String),

    #[error("no matching overflow policy was found: {0}")]
    UnknownOverflowPolicy(String),
}

/// Errors returned by the reconfiguration engine
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The merged configuration violates an invariant; nothing was changed
    #[error("rejected configuration for pool {pool_id}: {source}")]
    InvalidConfig {
        pool_id: String,
        #[source]
        source: ConfigError,
    },

    /// The live pool refused a validated change
    #[error("failed to apply configuration to pool {pool_id}: {source}")]
    Apply {
        pool_id: String,
        #[source]
        source: PoolError,
    },
}

impl RefreshError {
    /// Pool id the failed request was addressed to
    pub fn pool_id(&self) -> &str {
        match self {
            RefreshError::InvalidConfig { pool_id, .. } | RefreshError::Apply { pool_id, .. } => {
                pool_id
            }
        }
    }
}

/// Errors raised while building the configured pools
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build pool {pool_id}: {source}")]
    Pool {
        pool_id: String,
        #[source]
        source: PoolError,
    },
}
