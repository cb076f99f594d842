//! The operation scheduler.
//!
//! A fixed set of long-lived worker threads in three roles:
//!
//! - **Partition workers** each own a private work FIFO and priority
//!   queue and serve the partitions mapping to them by
//!   `partition_id % partition_threads`. One consumer per queue means
//!   strict per-partition FIFO without per-partition locks.
//! - **Generic workers** share one FIFO and one priority queue, so
//!   non-partitioned work is picked up by whichever worker is free.
//! - The **response worker** drains response packets on its own thread.
//!
//! The dispatcher classifies each submission, resolves its partition and
//! urgency, and routes it to the right queue pair. Urgent tasks go on the
//! priority queue plus a [`Task::Wakeup`] sentinel on the work FIFO; the
//! sentinel exists only to return control from a sleeping worker's
//! blocking take so the priority drain runs. Workers own their queues;
//! submitters hold shared read-through references.

mod park;
pub mod policy;
mod queue;
mod response;
mod worker;

pub use policy::{current_role, register_io_thread, ScopedRole, ThreadRole};

use crate::config::{OverloadPolicy, SchedulerConfig};
use crate::error::{QueueTarget, ScheduleError};
use crate::handler::{SchedulerServices, WorkerFault};
use crate::operation::{execution_partition_id, Address, Operation};
use crate::packet::Packet;
use crate::task::Task;
use crate::tracing_compat::{error, info, trace, warn};
use core::fmt;
use park::WakeGroup;
use parking_lot::Mutex;
use queue::WorkQueue;
use response::{ResponseState, ResponseWorker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use worker::{OperationWorker, WorkerState};

/// Routes operations, packets, and runnables to worker threads while
/// preserving partition affinity, priority, and thread-role invariants.
///
/// Construction starts every worker immediately; [`shutdown`] (also run on
/// drop) signals them and joins each with a bounded wait. Submission entry
/// points are callable from any thread.
///
/// Faults on worker threads (deserialization failures, handler errors,
/// panics) never surface through the submission API: they are offered to
/// the configured fault inspector, logged, and dropped, and the worker
/// keeps running.
///
/// [`shutdown`]: OperationScheduler::shutdown
pub struct OperationScheduler {
    partition_workers: Vec<Arc<WorkerState>>,
    generic_workers: Vec<Arc<WorkerState>>,
    generic_work: Arc<WorkQueue<Task>>,
    generic_priority: Arc<WorkQueue<Task>>,
    generic_wake: WakeGroup,
    response: Arc<ResponseState>,
    services: SchedulerServices,
    partition_threads: usize,
    termination_timeout: Duration,
    overload_policy: OverloadPolicy,
    shutdown: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl OperationScheduler {
    /// Creates the scheduler and starts all worker threads.
    ///
    /// # Panics
    ///
    /// Panics when the operating system refuses to spawn a worker thread.
    #[must_use]
    pub fn new(config: SchedulerConfig, services: SchedulerServices) -> Self {
        let mut config = config;
        config.normalize();

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles =
            Vec::with_capacity(config.partition_threads + config.generic_threads + 1);

        let mut partition_workers = Vec::with_capacity(config.partition_threads);
        for thread_id in 0..config.partition_threads {
            // Each partition worker owns its queue pair: operations for a
            // partition must never be drained by another thread.
            let state = Arc::new(WorkerState::new(
                thread_id,
                true,
                Arc::new(WorkQueue::new(config.queue_capacity)),
                Arc::new(WorkQueue::new(0)),
            ));
            handles.push(spawn_operation_worker(
                &config,
                &services,
                &shutdown,
                "partition",
                Arc::clone(&state),
            ));
            partition_workers.push(state);
        }

        let generic_work: Arc<WorkQueue<Task>> =
            Arc::new(WorkQueue::new(config.queue_capacity));
        let generic_priority: Arc<WorkQueue<Task>> = Arc::new(WorkQueue::new(0));
        let mut generic_workers = Vec::with_capacity(config.generic_threads);
        for thread_id in 0..config.generic_threads {
            let state = Arc::new(WorkerState::new(
                thread_id,
                false,
                Arc::clone(&generic_work),
                Arc::clone(&generic_priority),
            ));
            handles.push(spawn_operation_worker(
                &config,
                &services,
                &shutdown,
                "generic",
                Arc::clone(&state),
            ));
            generic_workers.push(state);
        }
        let generic_wake = WakeGroup::new(
            generic_workers
                .iter()
                .map(|state| state.parker.clone())
                .collect(),
        );

        let response = Arc::new(ResponseState::new(config.queue_capacity));
        let response_worker = ResponseWorker {
            state: Arc::clone(&response),
            services: services.clone(),
            shutdown: Arc::clone(&shutdown),
            failure_policy: config.worker_failure_policy,
        };
        handles.push(
            std::thread::Builder::new()
                .name(format!("{}-response", config.thread_name_prefix))
                .stack_size(config.thread_stack_size)
                .spawn(move || response_worker.run())
                .expect("failed to spawn response worker thread"),
        );

        info!(
            generic = config.generic_threads,
            partition = config.partition_threads,
            "starting operation workers"
        );

        Self {
            partition_workers,
            generic_workers,
            generic_work,
            generic_priority,
            generic_wake,
            response,
            services,
            partition_threads: config.partition_threads,
            termination_timeout: config.termination_timeout,
            overload_policy: config.overload_policy,
            shutdown,
            handles: Mutex::new(handles),
        }
    }

    /// Submits a locally produced operation.
    ///
    /// Operations naming an external executor are handed to that executor
    /// and must be neither partition aware nor urgent. Everything else is
    /// routed by the operation's partition and urgency.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::InvalidRouting`], [`ScheduleError::ExecutorNotFound`],
    /// or [`ScheduleError::Rejected`] under a bounded queue.
    pub fn submit_operation(&self, operation: Box<dyn Operation>) -> Result<(), ScheduleError> {
        if let Some(name) = operation.executor_name().map(str::to_owned) {
            return self.submit_to_executor(operation, name);
        }
        let partition_id = execution_partition_id(operation.as_ref());
        let urgent = operation.urgent();
        self.route(Task::Operation(operation), partition_id, urgent)
    }

    /// Submits a non-urgent housekeeping task with partition affinity.
    ///
    /// A negative `partition_id` routes to the generic pool.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::Rejected`] under a bounded queue.
    pub fn submit_task(
        &self,
        partition_id: i32,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), ScheduleError> {
        self.route(Task::Exec(Box::new(task)), partition_id, false)
    }

    /// Submits an inbound transport packet.
    ///
    /// Response packets go to the response worker; everything else is
    /// routed by the packet's partition id and urgency flag.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::Rejected`] under a bounded queue, unless the node
    /// is already inactive, in which case the rejection is swallowed.
    pub fn submit_packet(&self, packet: Packet) -> Result<(), ScheduleError> {
        let result = if packet.is_response() {
            self.offer_bounded(&self.response.queue, packet, QueueTarget::Response)
                .map(|()| self.response.parker.unpark())
        } else {
            let partition_id = packet.partition_id();
            let urgent = packet.is_urgent();
            self.route(Task::Packet(packet), partition_id, urgent)
        };

        match result {
            Err(ScheduleError::Rejected { .. }) if !self.services.node_state.is_active() => {
                trace!("swallowing rejected packet on inactive node");
                Ok(())
            }
            other => other,
        }
    }

    fn submit_to_executor(
        &self,
        operation: Box<dyn Operation>,
        name: String,
    ) -> Result<(), ScheduleError> {
        let Some(executor) = self.services.executors.executor(&name) else {
            return Err(ScheduleError::ExecutorNotFound(name));
        };
        if operation.partition_aware() {
            return Err(ScheduleError::InvalidRouting {
                executor: name,
                reason: "must not be partition aware",
            });
        }
        if operation.urgent() {
            return Err(ScheduleError::InvalidRouting {
                executor: name,
                reason: "must not be urgent",
            });
        }

        // Runs outside the partition model; failures are inspected and
        // logged like any other worker fault.
        let services = self.services.clone();
        executor.execute(Box::new(move || {
            if let Err(err) = services.operations.process(operation.as_ref()) {
                let fault = WorkerFault::Handler(err.as_ref());
                services.fault_inspector.inspect(&fault);
                error!(
                    "operation failed on external executor: {}",
                    fault.describe()
                );
            }
        }));
        Ok(())
    }

    /// Routes a task to the queue pair owning `partition_id`.
    fn route(&self, task: Task, partition_id: i32, urgent: bool) -> Result<(), ScheduleError> {
        if partition_id < 0 {
            if urgent {
                self.generic_priority.push(task);
                self.generic_work.push(Task::Wakeup);
            } else {
                self.offer_bounded(&self.generic_work, task, QueueTarget::Generic)?;
            }
            self.generic_wake.wake_one();
        } else {
            let index = policy::partition_index(partition_id, self.partition_threads);
            let worker = &self.partition_workers[index];
            if urgent {
                worker.priority.push(task);
                worker.work.push(Task::Wakeup);
            } else {
                self.offer_bounded(
                    &worker.work,
                    task,
                    QueueTarget::Partition(worker.thread_id),
                )?;
            }
            worker.parker.unpark();
        }
        Ok(())
    }

    /// Offers onto a bounded work FIFO, applying the overload policy on
    /// refusal. With the default unbounded queues the offer cannot fail.
    fn offer_bounded<T>(
        &self,
        queue: &WorkQueue<T>,
        item: T,
        target: QueueTarget,
    ) -> Result<(), ScheduleError> {
        match queue.offer(item) {
            Ok(()) => Ok(()),
            Err(refused) => match self.overload_policy {
                OverloadPolicy::Reject => Err(ScheduleError::Rejected {
                    target,
                    capacity: queue.capacity(),
                }),
                OverloadPolicy::Drop => {
                    error!(
                        queue = %target,
                        capacity = queue.capacity(),
                        "dropping task: work queue at capacity"
                    );
                    drop(refused);
                    Ok(())
                }
                OverloadPolicy::Block => {
                    let mut item = refused;
                    loop {
                        if self.shutdown.load(Ordering::Acquire) {
                            return Err(ScheduleError::Rejected {
                                target,
                                capacity: queue.capacity(),
                            });
                        }
                        match queue.offer(item) {
                            Ok(()) => return Ok(()),
                            Err(refused) => {
                                item = refused;
                                std::thread::yield_now();
                            }
                        }
                    }
                }
            },
        }
    }

    /// Number of operations executing right now, across both pools.
    #[must_use]
    pub fn running_operation_count(&self) -> usize {
        self.partition_workers
            .iter()
            .chain(&self.generic_workers)
            .filter(|state| state.current_operation.load().is_some())
            .count()
    }

    /// Approximate depth of all work FIFOs (partition plus generic).
    #[must_use]
    pub fn operation_queue_size(&self) -> usize {
        let partition: usize = self.partition_workers.iter().map(|s| s.work.len()).sum();
        partition + self.generic_work.len()
    }

    /// Approximate depth of all priority queues.
    #[must_use]
    pub fn priority_queue_size(&self) -> usize {
        let partition: usize = self
            .partition_workers
            .iter()
            .map(|s| s.priority.len())
            .sum();
        partition + self.generic_priority.len()
    }

    /// Approximate depth of the response queue.
    #[must_use]
    pub fn response_queue_size(&self) -> usize {
        self.response.queue.len()
    }

    /// True when some worker is executing the operation identified by all
    /// three fields at the moment of observation.
    ///
    /// With a non-negative partition id this is a single read against the
    /// owning worker's slot; otherwise every generic worker is scanned.
    #[must_use]
    pub fn is_operation_executing(
        &self,
        caller: Address,
        partition_id: i32,
        call_id: u64,
    ) -> bool {
        if partition_id < 0 {
            self.generic_workers
                .iter()
                .any(|state| state.is_executing(caller, partition_id, call_id))
        } else {
            let index = policy::partition_index(partition_id, self.partition_threads);
            self.partition_workers[index].is_executing(caller, partition_id, call_id)
        }
    }

    /// True when the current thread may execute an operation with
    /// `partition_id` synchronously on itself.
    #[must_use]
    pub fn may_run_on_current_thread(&self, partition_id: i32) -> bool {
        policy::may_run(current_role(), partition_id, self.partition_threads)
    }

    /// True when the current thread may submit and potentially wait on an
    /// operation with `partition_id` without risking inversion deadlocks.
    #[must_use]
    pub fn may_invoke_from_current_thread(&self, partition_id: i32) -> bool {
        policy::may_invoke(current_role(), partition_id, self.partition_threads)
    }

    /// Number of partition workers. The partition-to-worker mapping is
    /// `partition_id % partition_thread_count`, stable for the scheduler's
    /// lifetime.
    #[must_use]
    pub fn partition_thread_count(&self) -> usize {
        self.partition_threads
    }

    /// Number of generic workers.
    #[must_use]
    pub fn generic_thread_count(&self) -> usize {
        self.generic_workers.len()
    }

    /// Per-worker counters as an operator-greppable text block.
    #[must_use]
    pub fn performance_report(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        for state in &self.partition_workers {
            let _ = writeln!(
                out,
                "partition-{} processed={} pending={}",
                state.thread_id,
                state.processed_count(),
                state.work.len()
            );
        }
        let _ = writeln!(out, "pending generic operations {}", self.generic_work.len());
        for state in &self.generic_workers {
            let _ = writeln!(
                out,
                "generic-{} processed={}",
                state.thread_id,
                state.processed_count()
            );
        }
        let _ = writeln!(
            out,
            "response processed={} pending={}",
            self.response.processed_responses(),
            self.response.queue.len()
        );
        out
    }

    /// Signals shutdown, wakes every worker, and joins each thread with
    /// the configured bounded wait.
    ///
    /// Queued tasks are not drained: once the flag is set, workers exit on
    /// their next wakeup. Idempotent; a second call joins nothing.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        for state in &self.partition_workers {
            state.parker.unpark();
        }
        self.generic_wake.wake_all();
        self.response.parker.unpark();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            await_termination(handle, self.termination_timeout);
        }
    }
}

impl fmt::Display for OperationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OperationScheduler{{partition_workers: {}, generic_workers: {}}}",
            self.partition_workers.len(),
            self.generic_workers.len()
        )
    }
}

impl fmt::Debug for OperationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationScheduler")
            .field("partition_workers", &self.partition_workers.len())
            .field("generic_workers", &self.generic_workers.len())
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for OperationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_operation_worker(
    config: &SchedulerConfig,
    services: &SchedulerServices,
    shutdown: &Arc<AtomicBool>,
    pool: &str,
    state: Arc<WorkerState>,
) -> JoinHandle<()> {
    let worker = OperationWorker {
        state: Arc::clone(&state),
        services: services.clone(),
        shutdown: Arc::clone(shutdown),
        failure_policy: config.worker_failure_policy,
        on_thread_start: config.on_thread_start.clone(),
        on_thread_stop: config.on_thread_stop.clone(),
    };
    std::thread::Builder::new()
        .name(format!(
            "{}-{pool}-{}",
            config.thread_name_prefix, state.thread_id
        ))
        .stack_size(config.thread_stack_size)
        .spawn(move || worker.run())
        .expect("failed to spawn operation worker thread")
}

/// Joins a worker thread, abandoning it with a warning once the deadline
/// passes. Rust threads cannot be interrupted, so an overrunning handler
/// keeps its thread; the join must not hold shutdown hostage.
fn await_termination(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "worker thread did not terminate in time; abandoning"
            );
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    if handle.join().is_err() {
        error!("worker thread terminated by panic");
    }
}
