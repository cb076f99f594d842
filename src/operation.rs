//! The operation model: what the dispatcher needs to know about a unit of
//! work.
//!
//! The scheduler treats operations as opaque. It reads the routing metadata
//! exposed by [`Operation`], hands the operation to the configured handler
//! on the right thread, and never looks inside the payload.

use std::net::SocketAddr;

/// Network identity of the member that submitted an operation.
pub type Address = SocketAddr;

/// Partition id meaning "not bound to any partition".
///
/// Tasks routed with this id go to the shared generic pool instead of a
/// partition worker.
pub const GENERIC_PARTITION_ID: i32 = -1;

/// An in-process operation, ready to execute.
pub trait Operation: Send + 'static {
    /// Invocation id correlating this operation with its response.
    fn call_id(&self) -> u64;

    /// Address of the submitting member.
    fn caller_address(&self) -> Address;

    /// Partition this operation belongs to.
    ///
    /// Only meaningful when [`partition_aware`](Self::partition_aware)
    /// returns true; routing ignores it otherwise.
    fn partition_id(&self) -> i32;

    /// Whether execution must be serialized with other operations on the
    /// same partition.
    fn partition_aware(&self) -> bool;

    /// Whether this operation may bypass queued non-urgent work.
    fn urgent(&self) -> bool {
        false
    }

    /// Name of an external executor to run on instead of the operation
    /// threads.
    ///
    /// Named-executor operations opt out of the partition model entirely:
    /// they must be neither partition aware nor urgent.
    fn executor_name(&self) -> Option<&str> {
        None
    }
}

/// The partition an operation is routed by: its own partition id when
/// partition aware, [`GENERIC_PARTITION_ID`] otherwise.
#[must_use]
pub fn execution_partition_id(op: &dyn Operation) -> i32 {
    if op.partition_aware() {
        op.partition_id()
    } else {
        GENERIC_PARTITION_ID
    }
}

/// Identity snapshot of an executing operation.
///
/// A worker publishes this to its `current_operation` slot for the duration
/// of the handler call. Other threads match it by all three fields; the
/// snapshot is `Copy` so the slot can be a single-writer atomic cell rather
/// than a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSignature {
    /// Address of the submitting member.
    pub caller: Address,
    /// Partition the operation was routed by (may be
    /// [`GENERIC_PARTITION_ID`]).
    pub partition_id: i32,
    /// Invocation id.
    pub call_id: u64,
}

impl OperationSignature {
    /// Captures the signature of `op` as routed with `partition_id`.
    #[must_use]
    pub fn capture(op: &dyn Operation, partition_id: i32) -> Self {
        Self {
            caller: op.caller_address(),
            partition_id,
            call_id: op.call_id(),
        }
    }

    /// True when every field matches the probe.
    #[must_use]
    pub fn matches(&self, caller: Address, partition_id: i32, call_id: u64) -> bool {
        self.call_id == call_id && self.partition_id == partition_id && self.caller == caller
    }
}
