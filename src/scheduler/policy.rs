//! Thread-role policy.
//!
//! Worker threads register their role in a thread-local; the predicates in
//! this module answer whether the *current* thread may execute or invoke
//! an operation with a given partition id. The scheduler never changes its
//! routing based on these answers. The invocation layer calls them to
//! choose between running an operation in place and dispatching it, which
//! is how reentrancy hazards (an I/O thread executing user code, a
//! partition worker waiting on a foreign partition) are kept out of the
//! node.

use std::cell::Cell;

/// Role of the current thread, as seen by the dispatch policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    /// Partition worker, with its index in the partition pool.
    Partition(usize),
    /// Generic worker, with its index in the generic pool.
    Generic(usize),
    /// The response worker.
    Response,
    /// A transport I/O thread. Never runs user operations.
    Io,
}

thread_local! {
    static CURRENT_ROLE: Cell<Option<ThreadRole>> = const { Cell::new(None) };
}

/// Returns the role registered for the current thread, if any.
///
/// Threads that never registered (application threads calling into the
/// node) have no role.
#[must_use]
pub fn current_role() -> Option<ThreadRole> {
    CURRENT_ROLE.get()
}

/// Scoped registration of the current thread's role.
///
/// Restores the previous role on drop so nested registrations unwind
/// correctly.
#[derive(Debug)]
pub struct ScopedRole {
    prev: Option<ThreadRole>,
}

impl ScopedRole {
    /// Registers `role` for the current thread until the guard drops.
    #[must_use]
    pub fn new(role: ThreadRole) -> Self {
        Self {
            prev: CURRENT_ROLE.replace(Some(role)),
        }
    }
}

impl Drop for ScopedRole {
    fn drop(&mut self) {
        CURRENT_ROLE.set(self.prev);
    }
}

/// Marks the current thread as a transport I/O thread while the guard
/// lives.
///
/// Transports call this from each of their threads so the role predicates
/// can keep user operations off them.
#[must_use]
pub fn register_io_thread() -> ScopedRole {
    ScopedRole::new(ThreadRole::Io)
}

/// Index of the partition worker owning `partition_id`.
pub(crate) fn partition_index(partition_id: i32, partition_threads: usize) -> usize {
    debug_assert!(partition_id >= 0);
    partition_id as usize % partition_threads
}

/// True when a thread with `role` may execute an operation with
/// `partition_id` synchronously on itself.
pub(crate) fn may_run(role: Option<ThreadRole>, partition_id: i32, partition_threads: usize) -> bool {
    if role == Some(ThreadRole::Io) {
        return false;
    }
    if partition_id < 0 {
        return true;
    }
    match role {
        Some(ThreadRole::Partition(thread_id)) => {
            thread_id == partition_index(partition_id, partition_threads)
        }
        _ => false,
    }
}

/// True when a thread with `role` may submit and potentially wait on an
/// operation with `partition_id`.
///
/// A partition worker waiting on a foreign partition would deadlock the
/// moment both partitions map to waiting workers, so cross-partition
/// invocation from partition workers is refused.
pub(crate) fn may_invoke(
    role: Option<ThreadRole>,
    partition_id: i32,
    partition_threads: usize,
) -> bool {
    match role {
        Some(ThreadRole::Partition(thread_id)) => {
            partition_id < 0 || thread_id == partition_index(partition_id, partition_threads)
        }
        Some(ThreadRole::Generic(_) | ThreadRole::Response) => true,
        Some(ThreadRole::Io) => false,
        None => true,
    }
}
