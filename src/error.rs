//! Dispatcher error types.
//!
//! Only submission-time failures are surfaced here. Faults that occur on
//! worker threads after a task has been accepted (deserialization failures,
//! handler errors, panics) are inspected, logged, and dropped so that a
//! single bad task cannot wedge a worker; see the failure notes on
//! [`OperationScheduler`](crate::scheduler::OperationScheduler).

use core::fmt;

/// Which queue refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTarget {
    /// The private work queue of one partition worker.
    Partition(usize),
    /// The work queue shared by the generic pool.
    Generic,
    /// The response worker's queue.
    Response,
}

impl fmt::Display for QueueTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partition(thread_id) => write!(f, "partition worker {thread_id}"),
            Self::Generic => f.write_str("generic pool"),
            Self::Response => f.write_str("response worker"),
        }
    }
}

/// Errors surfaced by the scheduler's submission entry points.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ScheduleError {
    /// A named-executor operation declared partition affinity or urgency.
    ///
    /// Operations handed to an external executor leave the partition model
    /// entirely, so neither property can be honored there.
    #[error("operation bound for executor `{executor}` {reason}")]
    InvalidRouting {
        /// The executor the operation asked for.
        executor: String,
        /// Which property made the routing invalid.
        reason: &'static str,
    },

    /// No executor is registered under the requested name.
    #[error("no executor registered under name `{0}`")]
    ExecutorNotFound(String),

    /// A bounded work queue refused the task.
    ///
    /// Raised only when a queue capacity is configured and the overload
    /// policy is `Reject`, or when a `Block` submitter observes shutdown
    /// while waiting for room.
    #[error("work queue for {target} is full (capacity {capacity})")]
    Rejected {
        /// The queue that refused the task.
        target: QueueTarget,
        /// The configured capacity of that queue.
        capacity: usize,
    },
}
