//! Operation worker threads.
//!
//! One worker type serves both pools. A partition worker owns its queue
//! pair; generic workers share one pair and compete on it. The loop blocks
//! only on the work FIFO: priority items never block, they are drained to
//! exhaustion before each FIFO item, and a wakeup sentinel on the FIFO
//! guarantees a sleeping worker notices them.

use crate::config::WorkerFailurePolicy;
use crate::handler::{SchedulerServices, WorkerFault};
use crate::operation::{execution_partition_id, Address, Operation, OperationSignature};
use crate::packet::Packet;
use crate::scheduler::park::Parker;
use crate::scheduler::policy::{ScopedRole, ThreadRole};
use crate::scheduler::queue::WorkQueue;
use crate::task::{Runnable, Task};
use crate::tracing_compat::{error, trace};
use crossbeam_utils::atomic::AtomicCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SPIN_LIMIT: u32 = 64;
const YIELD_LIMIT: u32 = 16;
/// Park backstop so shutdown is observed even if an unpark goes missing.
pub(crate) const PARK_BACKSTOP: Duration = Duration::from_millis(1);

/// State of one operation worker, shared with the dispatcher.
///
/// `current_operation` and `processed_count` follow the single-writer
/// discipline: only the owning worker writes them, every other thread
/// reads. Readers tolerate staleness.
#[derive(Debug)]
pub(crate) struct WorkerState {
    /// Index within the worker's pool.
    pub(crate) thread_id: usize,
    /// True for partition workers, false for the generic pool.
    pub(crate) partition_specific: bool,
    /// Work FIFO. Owned by partition workers, shared across the generic
    /// pool.
    pub(crate) work: Arc<WorkQueue<Task>>,
    /// Priority queue drained ahead of every FIFO item. Never bounded.
    pub(crate) priority: Arc<WorkQueue<Task>>,
    /// Parker the dispatcher unparks after offering work.
    pub(crate) parker: Parker,
    /// Tasks processed by this worker, wakeup sentinels included.
    pub(crate) processed_count: AtomicU64,
    /// Identity of the operation executing right now, if any.
    pub(crate) current_operation: AtomicCell<Option<OperationSignature>>,
}

impl WorkerState {
    pub(crate) fn new(
        thread_id: usize,
        partition_specific: bool,
        work: Arc<WorkQueue<Task>>,
        priority: Arc<WorkQueue<Task>>,
    ) -> Self {
        Self {
            thread_id,
            partition_specific,
            work,
            priority,
            parker: Parker::new(),
            processed_count: AtomicU64::new(0),
            current_operation: AtomicCell::new(None),
        }
    }

    /// True when the operation executing right now matches the probe on
    /// all three fields.
    pub(crate) fn is_executing(&self, caller: Address, partition_id: i32, call_id: u64) -> bool {
        self.current_operation
            .load()
            .is_some_and(|sig| sig.matches(caller, partition_id, call_id))
    }

    pub(crate) fn processed_count(&self) -> u64 {
        self.processed_count.load(Ordering::Acquire)
    }
}

/// Clears `current_operation` on every exit path of the handler call,
/// panic unwinds included.
struct CurrentOpGuard<'a>(&'a WorkerState);

impl Drop for CurrentOpGuard<'_> {
    fn drop(&mut self) {
        self.0.current_operation.store(None);
    }
}

/// The scheduling loop run by partition and generic worker threads.
pub(crate) struct OperationWorker {
    pub(crate) state: Arc<WorkerState>,
    pub(crate) services: SchedulerServices,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) failure_policy: WorkerFailurePolicy,
    pub(crate) on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl OperationWorker {
    /// Thread entry point.
    pub(crate) fn run(self) {
        let role = if self.state.partition_specific {
            ThreadRole::Partition(self.state.thread_id)
        } else {
            ThreadRole::Generic(self.state.thread_id)
        };
        let _role = ScopedRole::new(role);

        if let Some(hook) = &self.on_thread_start {
            hook();
        }
        self.run_guarded();
        if let Some(hook) = &self.on_thread_stop {
            hook();
        }
    }

    /// Runs the scheduling loop, applying the failure policy to any panic
    /// that escapes it.
    fn run_guarded(&self) {
        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.run_loop())) {
                Ok(()) => return,
                Err(payload) => {
                    let fault = WorkerFault::Panic(payload.as_ref());
                    self.services.fault_inspector.inspect(&fault);
                    error!(
                        worker = self.state.thread_id,
                        partition_specific = self.state.partition_specific,
                        "panic escaped the scheduling loop: {}",
                        fault.describe()
                    );
                    match self.failure_policy {
                        WorkerFailurePolicy::Restart => {}
                        WorkerFailurePolicy::Escalate => {
                            error!(
                                worker = self.state.thread_id,
                                "escalating worker failure to scheduler shutdown"
                            );
                            self.shutdown.store(true, Ordering::Release);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn run_loop(&self) {
        loop {
            let Some(task) = self.take() else { return };
            self.drain_priority();
            self.process(task);
        }
    }

    /// Blocking pop from the work FIFO.
    ///
    /// Returns `None` once shutdown is observed. Spins briefly, yields,
    /// then parks with a short backstop so shutdown is seen even when no
    /// unpark is delivered.
    fn take(&self) -> Option<Task> {
        let mut backoff = 0_u32;
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(task) = self.state.work.poll() {
                return Some(task);
            }
            if backoff < SPIN_LIMIT {
                std::hint::spin_loop();
                backoff += 1;
            } else if backoff < SPIN_LIMIT + YIELD_LIMIT {
                std::thread::yield_now();
                backoff += 1;
            } else {
                self.state.parker.park_timeout(PARK_BACKSTOP);
            }
        }
    }

    fn drain_priority(&self) {
        while let Some(task) = self.state.priority.poll() {
            self.process(task);
        }
    }

    pub(crate) fn process(&self, task: Task) {
        // Single writer: only this worker increments.
        self.state.processed_count.fetch_add(1, Ordering::Release);

        match task {
            Task::Wakeup => {}
            Task::Exec(run) => self.run_runnable(run),
            Task::Packet(packet) => self.run_packet(packet),
            Task::Operation(op) => {
                let partition_id = execution_partition_id(op.as_ref());
                self.run_operation(&*op, partition_id);
            }
        }
    }

    fn run_runnable(&self, run: Runnable) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(run)) {
            let fault = WorkerFault::Panic(payload.as_ref());
            self.services.fault_inspector.inspect(&fault);
            error!(
                worker = self.state.thread_id,
                "task panicked: {}",
                fault.describe()
            );
        }
    }

    fn run_packet(&self, packet: Packet) {
        let operation = match self.services.operations.deserialize(&packet) {
            Ok(Some(operation)) => operation,
            Ok(None) => return,
            Err(err) => {
                let fault = WorkerFault::Handler(err.as_ref());
                self.services.fault_inspector.inspect(&fault);
                error!(
                    worker = self.state.thread_id,
                    partition_id = packet.partition_id(),
                    "failed to deserialize packet: {}",
                    fault.describe()
                );
                return;
            }
        };
        let partition_id = execution_partition_id(operation.as_ref());
        self.run_operation(operation.as_ref(), partition_id);
    }

    fn run_operation(&self, operation: &dyn Operation, partition_id: i32) {
        let signature = OperationSignature::capture(operation, partition_id);
        trace!(
            worker = self.state.thread_id,
            call_id = signature.call_id,
            partition_id,
            "executing operation"
        );

        self.state.current_operation.store(Some(signature));
        let _clear = CurrentOpGuard(&self.state);

        match panic::catch_unwind(AssertUnwindSafe(|| {
            self.services.operations.process(operation)
        })) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let fault = WorkerFault::Handler(err.as_ref());
                self.services.fault_inspector.inspect(&fault);
                error!(
                    worker = self.state.thread_id,
                    call_id = signature.call_id,
                    "failed to process operation: {}",
                    fault.describe()
                );
            }
            Err(payload) => {
                let fault = WorkerFault::Panic(payload.as_ref());
                self.services.fault_inspector.inspect(&fault);
                error!(
                    worker = self.state.thread_id,
                    call_id = signature.call_id,
                    "operation panicked: {}",
                    fault.describe()
                );
            }
        }
    }
}
