//! Work queue catalog
//!
//! Named queue kinds and the storage backing a pool's backlog. A `WorkQueue`
//! is not synchronized on its own; the owning pool guards it with its state
//! lock.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Task;
use crate::error::{ConfigError, PoolError};

/// Capacity used by bounded kinds when no capacity is configured
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Queue kinds a pool can be built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Fixed-capacity array queue
    #[serde(alias = "ArrayBlockingQueue")]
    ArrayBlocking,
    /// Linked queue, bounded when a capacity is given
    #[default]
    #[serde(alias = "LinkedBlockingQueue")]
    LinkedBlocking,
    /// Linked double-ended queue, bounded when a capacity is given
    #[serde(alias = "LinkedBlockingDeque")]
    LinkedBlockingDeque,
    /// No storage: a task is only accepted when an idle worker can take it
    #[serde(alias = "SynchronousQueue")]
    Synchronous,
    /// Unbounded linked queue; capacity is ignored
    #[serde(alias = "LinkedTransferQueue")]
    LinkedTransfer,
    /// Bounded linked queue whose capacity can change at runtime
    #[serde(alias = "ResizableCapacityLinkedBlockingQueue")]
    ResizableLinkedBlocking,
}

impl QueueKind {
    pub const ALL: [QueueKind; 6] = [
        QueueKind::ArrayBlocking,
        QueueKind::LinkedBlocking,
        QueueKind::LinkedBlockingDeque,
        QueueKind::Synchronous,
        QueueKind::LinkedTransfer,
        QueueKind::ResizableLinkedBlocking,
    ];

    /// Display name used in alarm and change payloads
    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::ArrayBlocking => "ArrayBlockingQueue",
            QueueKind::LinkedBlocking => "LinkedBlockingQueue",
            QueueKind::LinkedBlockingDeque => "LinkedBlockingDeque",
            QueueKind::Synchronous => "SynchronousQueue",
            QueueKind::LinkedTransfer => "LinkedTransferQueue",
            QueueKind::ResizableLinkedBlocking => "ResizableCapacityLinkedBlockingQueue",
        }
    }

    fn snake_name(&self) -> &'static str {
        match self {
            QueueKind::ArrayBlocking => "array_blocking",
            QueueKind::LinkedBlocking => "linked_blocking",
            QueueKind::LinkedBlockingDeque => "linked_blocking_deque",
            QueueKind::Synchronous => "synchronous",
            QueueKind::LinkedTransfer => "linked_transfer",
            QueueKind::ResizableLinkedBlocking => "resizable_linked_blocking",
        }
    }

    /// Whether the capacity may be changed on a live pool
    pub fn supports_resize(&self) -> bool {
        matches!(self, QueueKind::ResizableLinkedBlocking)
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for QueueKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s) || kind.snake_name() == s)
            .ok_or_else(|| ConfigError::UnknownQueueKind(s.to_string()))
    }
}

/// Backlog storage for a pool
pub struct WorkQueue {
    kind: QueueKind,
    /// `None` means unbounded
    capacity: Option<usize>,
    items: VecDeque<Task>,
}

/// Create the queue for `kind`, honouring `capacity` where the kind allows it
pub fn create_queue(kind: QueueKind, capacity: Option<usize>) -> WorkQueue {
    let capacity = match kind {
        QueueKind::ArrayBlocking | QueueKind::ResizableLinkedBlocking => {
            Some(capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY))
        }
        QueueKind::LinkedBlocking | QueueKind::LinkedBlockingDeque => capacity,
        QueueKind::Synchronous => Some(0),
        QueueKind::LinkedTransfer => None,
    };

    WorkQueue {
        kind,
        capacity,
        items: VecDeque::new(),
    }
}

impl WorkQueue {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured capacity, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Free slots, `None` when unbounded
    pub fn remaining_capacity(&self) -> Option<usize> {
        self.capacity.map(|cap| cap.saturating_sub(self.items.len()))
    }

    /// Try to enqueue a task, handing it back when there is no room.
    ///
    /// `idle_workers` is the number of workers currently parked waiting for
    /// work; a synchronous queue only accepts a task that one of them can
    /// take immediately.
    pub(crate) fn offer(&mut self, task: Task, idle_workers: usize) -> Result<(), Task> {
        let has_room = match (self.kind, self.capacity) {
            (QueueKind::Synchronous, _) => self.items.len() < idle_workers,
            (_, Some(cap)) => self.items.len() < cap,
            (_, None) => true,
        };

        if has_room {
            self.items.push_back(task);
            Ok(())
        } else {
            Err(task)
        }
    }

    /// Take the oldest task
    pub(crate) fn poll(&mut self) -> Option<Task> {
        self.items.pop_front()
    }

    /// Change the capacity of a resizable queue.
    ///
    /// Shrinking below the current length keeps every queued task; new
    /// offers are refused until the backlog drains under the new capacity.
    pub(crate) fn set_capacity(&mut self, capacity: usize) -> Result<(), PoolError> {
        if !self.kind.supports_resize() {
            return Err(PoolError::UnsupportedResize(self.kind));
        }
        self.capacity = Some(capacity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Task {
        Box::new(|| {})
    }

    #[test]
    fn test_parse_queue_kind_names() {
        assert_eq!(
            "LinkedBlockingQueue".parse::<QueueKind>().unwrap(),
            QueueKind::LinkedBlocking
        );
        assert_eq!(
            "resizable_linked_blocking".parse::<QueueKind>().unwrap(),
            QueueKind::ResizableLinkedBlocking
        );
        assert!(matches!(
            "PriorityBlockingQueue".parse::<QueueKind>(),
            Err(ConfigError::UnknownQueueKind(_))
        ));
    }

    #[test]
    fn test_bounded_queue_refuses_when_full() {
        let mut queue = create_queue(QueueKind::ArrayBlocking, Some(2));
        assert!(queue.offer(noop(), 0).is_ok());
        assert!(queue.offer(noop(), 0).is_ok());
        assert!(queue.offer(noop(), 0).is_err());
        assert_eq!(queue.remaining_capacity(), Some(0));
    }

    #[test]
    fn test_default_capacities() {
        assert_eq!(
            create_queue(QueueKind::ArrayBlocking, None).capacity(),
            Some(DEFAULT_QUEUE_CAPACITY)
        );
        assert_eq!(create_queue(QueueKind::LinkedBlocking, None).capacity(), None);
        assert_eq!(create_queue(QueueKind::LinkedTransfer, Some(10)).capacity(), None);
        assert_eq!(create_queue(QueueKind::Synchronous, Some(10)).capacity(), Some(0));
    }

    #[test]
    fn test_synchronous_queue_needs_idle_worker() {
        let mut queue = create_queue(QueueKind::Synchronous, None);
        assert!(queue.offer(noop(), 0).is_err());
        assert!(queue.offer(noop(), 1).is_ok());
        assert!(queue.offer(noop(), 1).is_err());
    }

    #[test]
    fn test_only_resizable_queue_changes_capacity() {
        let mut fixed = create_queue(QueueKind::LinkedBlocking, Some(10));
        assert!(matches!(
            fixed.set_capacity(20),
            Err(PoolError::UnsupportedResize(QueueKind::LinkedBlocking))
        ));

        let mut resizable = create_queue(QueueKind::ResizableLinkedBlocking, Some(1));
        assert!(resizable.offer(noop(), 0).is_ok());
        assert!(resizable.offer(noop(), 0).is_err());
        resizable.set_capacity(3).unwrap();
        assert!(resizable.offer(noop(), 0).is_ok());
        assert_eq!(resizable.remaining_capacity(), Some(1));
    }
}
