//! The tagged unit of work placed on worker queues.

use crate::operation::Operation;
use crate::packet::Packet;
use core::fmt;

/// A zero-argument action submitted for execution on a worker thread.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work on a worker queue.
///
/// Workers branch on the variant: packets still need deserialization,
/// operations publish to the worker's `current_operation` slot, runnables
/// just run. The distinction is deliberately not hidden behind a uniform
/// trait.
pub enum Task {
    /// An already-constructed in-process operation.
    Operation(Box<dyn Operation>),
    /// A serialized envelope, deserialized by the worker that dequeues it.
    Packet(Packet),
    /// An opaque action, e.g. internal housekeeping.
    Exec(Runnable),
    /// The priority wakeup sentinel.
    ///
    /// Enqueued on a work FIFO purely to return control from a sleeping
    /// worker's blocking take so the priority drain runs. Processing it
    /// does nothing, and extra sentinels are harmless.
    Wakeup,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(op) => f
                .debug_struct("Operation")
                .field("call_id", &op.call_id())
                .field("partition_id", &op.partition_id())
                .finish_non_exhaustive(),
            Self::Packet(packet) => f.debug_tuple("Packet").field(packet).finish(),
            Self::Exec(_) => f.write_str("Exec"),
            Self::Wakeup => f.write_str("Wakeup"),
        }
    }
}

impl Task {
    /// True for the wakeup sentinel.
    #[must_use]
    pub fn is_wakeup(&self) -> bool {
        matches!(self, Self::Wakeup)
    }
}
