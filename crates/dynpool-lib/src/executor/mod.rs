//! Resizable worker pools
//!
//! Provides the managed pool itself, the queue catalog it can be built with,
//! and the overflow policies applied when it is saturated.

pub mod policy;
pub mod pool;
pub mod queue;

pub use policy::{create_handler, CountingHandler, OverflowHandler, OverflowPolicyKind};
pub use pool::{ManagedPool, PoolBuilder, PoolStats, DEFAULT_KEEP_ALIVE};
pub use queue::{create_queue, QueueKind, WorkQueue, DEFAULT_QUEUE_CAPACITY};

/// Unit of work accepted by a pool
pub type Task = Box<dyn FnOnce() + Send + 'static>;
