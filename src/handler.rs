//! Interfaces the scheduler consumes.
//!
//! The scheduler only routes; these collaborators do the actual work.
//! They are injected at construction as trait objects, bundled in
//! [`SchedulerServices`], so workers stay unit-testable without a whole
//! node behind them.

use crate::operation::Operation;
use crate::packet::Packet;
use crate::task::Runnable;
use core::fmt;
use std::any::Any;
use std::sync::Arc;

/// Boxed error produced by handler callbacks.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A deserialized response, opaque to the scheduler.
///
/// The response worker threads it straight from
/// [`ResponsePacketHandler::deserialize`] into
/// [`ResponsePacketHandler::process`] without inspecting it.
pub type Response = Box<dyn Any + Send>;

/// Deserializes and executes operations.
pub trait OperationHandler: Send + Sync {
    /// Deserializes a packet into an operation.
    ///
    /// `Ok(None)` means the packet decodes to nothing and is dropped.
    /// Must not block on the network.
    fn deserialize(&self, packet: &Packet) -> Result<Option<Box<dyn Operation>>, HandlerError>;

    /// Executes an operation synchronously.
    ///
    /// May fail or panic; must eventually return. Response publishing is
    /// the handler's business.
    fn process(&self, operation: &dyn Operation) -> Result<(), HandlerError>;
}

/// Applies inbound response packets to the pending-invocation registry.
pub trait ResponsePacketHandler: Send + Sync {
    /// Deserializes a response packet.
    fn deserialize(&self, packet: &Packet) -> Result<Response, HandlerError>;

    /// Applies a deserialized response.
    fn process(&self, response: Response) -> Result<(), HandlerError>;
}

/// Looks up named executors for operations that opt out of the partition
/// model.
pub trait ExecutionService: Send + Sync {
    /// Returns the executor registered under `name`, if any.
    fn executor(&self, name: &str) -> Option<Arc<dyn ExternalExecutor>>;
}

/// A generic work pool outside the scheduler.
pub trait ExternalExecutor: Send + Sync {
    /// Runs `task` on the pool.
    fn execute(&self, task: Runnable);
}

/// An execution service with no executors registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExecutors;

impl ExecutionService for NoExecutors {
    fn executor(&self, _name: &str) -> Option<Arc<dyn ExternalExecutor>> {
        None
    }
}

/// Reports whether the owning node still accepts work.
///
/// Consulted when a bounded queue rejects a packet: a rejection during
/// node shutdown is swallowed, any other rejection is surfaced.
pub trait NodeStateProbe: Send + Sync {
    /// True while the node is active.
    fn is_active(&self) -> bool;
}

/// A node-state probe that always reports active. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysActive;

impl NodeStateProbe for AlwaysActive {
    fn is_active(&self) -> bool {
        true
    }
}

/// A fault caught on a worker thread, offered for inspection before it is
/// logged and dropped.
pub enum WorkerFault<'a> {
    /// A handler returned an error.
    Handler(&'a (dyn std::error::Error + Send + Sync)),
    /// A task panicked; the payload is whatever the panic carried.
    Panic(&'a (dyn Any + Send)),
}

impl WorkerFault<'_> {
    /// Best-effort human-readable description of the fault.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Handler(err) => err.to_string(),
            Self::Panic(payload) => payload_message(*payload)
                .unwrap_or("non-string panic payload")
                .to_string(),
        }
    }
}

impl fmt::Debug for WorkerFault<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler(_) => f.debug_tuple("Handler").field(&self.describe()).finish(),
            Self::Panic(_) => f.debug_tuple("Panic").field(&self.describe()).finish(),
        }
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

/// Classifies worker faults before they are logged.
///
/// The process-wide analog of an out-of-memory inspector: implementations
/// get first look at every fault caught on a worker thread and may flag
/// allocation failures or feed a crash reporter. Inspection must not
/// panic.
pub trait FaultInspector: Send + Sync {
    /// Called with every fault caught on a worker thread.
    fn inspect(&self, fault: &WorkerFault<'_>);
}

/// A fault inspector that does nothing. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpInspector;

impl FaultInspector for NoOpInspector {
    fn inspect(&self, _fault: &WorkerFault<'_>) {}
}

/// The collaborator bundle injected into the scheduler.
#[derive(Clone)]
pub struct SchedulerServices {
    /// Deserializes and executes operations.
    pub operations: Arc<dyn OperationHandler>,
    /// Applies response packets to the pending-invocation registry.
    pub responses: Arc<dyn ResponsePacketHandler>,
    /// Registry of named executors.
    pub executors: Arc<dyn ExecutionService>,
    /// Node liveness probe.
    pub node_state: Arc<dyn NodeStateProbe>,
    /// Fault classifier consulted before logging.
    pub fault_inspector: Arc<dyn FaultInspector>,
}

impl SchedulerServices {
    /// Bundles the mandatory collaborators with the default node-state
    /// probe and fault inspector.
    #[must_use]
    pub fn new(
        operations: Arc<dyn OperationHandler>,
        responses: Arc<dyn ResponsePacketHandler>,
        executors: Arc<dyn ExecutionService>,
    ) -> Self {
        Self {
            operations,
            responses,
            executors,
            node_state: Arc::new(AlwaysActive),
            fault_inspector: Arc::new(NoOpInspector),
        }
    }

    /// Replaces the node-state probe.
    #[must_use]
    pub fn with_node_state(mut self, probe: Arc<dyn NodeStateProbe>) -> Self {
        self.node_state = probe;
        self
    }

    /// Replaces the fault inspector.
    #[must_use]
    pub fn with_fault_inspector(mut self, inspector: Arc<dyn FaultInspector>) -> Self {
        self.fault_inspector = inspector;
        self
    }
}

impl fmt::Debug for SchedulerServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerServices").finish_non_exhaustive()
    }
}
