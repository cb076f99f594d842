//! Shared fixtures for the scheduler scenario tests: recording handlers, a
//! controllable operation model, and polling helpers.

#![allow(dead_code)]

use gridsched::config::SchedulerConfig;
use gridsched::handler::{
    ExecutionService, ExternalExecutor, FaultInspector, HandlerError, NoExecutors,
    OperationHandler, Response, ResponsePacketHandler, SchedulerServices, WorkerFault,
};
use gridsched::operation::{Address, Operation};
use gridsched::packet::{Packet, FLAG_OP, FLAG_RESPONSE, FLAG_URGENT};
use gridsched::scheduler::OperationScheduler;
use gridsched::task::Runnable;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Generous deadline for polling assertions.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn caller() -> Address {
    "10.1.1.1:5701".parse().expect("valid caller address")
}

/// Test operation with explicit routing metadata.
pub struct TestOp {
    pub call_id: u64,
    pub partition_id: i32,
    pub partition_aware: bool,
    pub urgent: bool,
    pub executor: Option<String>,
}

impl TestOp {
    pub fn partition(call_id: u64, partition_id: i32) -> Self {
        Self {
            call_id,
            partition_id,
            partition_aware: true,
            urgent: false,
            executor: None,
        }
    }

    pub fn generic(call_id: u64) -> Self {
        Self {
            call_id,
            partition_id: -1,
            partition_aware: false,
            urgent: false,
            executor: None,
        }
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    pub fn on_executor(mut self, name: &str) -> Self {
        self.executor = Some(name.to_string());
        self
    }
}

impl Operation for TestOp {
    fn call_id(&self) -> u64 {
        self.call_id
    }

    fn caller_address(&self) -> Address {
        caller()
    }

    fn partition_id(&self) -> i32 {
        self.partition_id
    }

    fn partition_aware(&self) -> bool {
        self.partition_aware
    }

    fn urgent(&self) -> bool {
        self.urgent
    }

    fn executor_name(&self) -> Option<&str> {
        self.executor.as_deref()
    }
}

/// One observed execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub call_id: u64,
    pub partition_id: i32,
    pub thread_name: String,
}

/// A gate a handler blocks on until the test releases it.
#[derive(Default)]
pub struct Gate {
    released: Mutex<bool>,
    cvar: Condvar,
}

impl Gate {
    pub fn release(&self) {
        *self.released.lock().expect("gate lock") = true;
        self.cvar.notify_all();
    }

    pub fn wait(&self) {
        let mut released = self.released.lock().expect("gate lock");
        while !*released {
            released = self.cvar.wait(released).expect("gate wait");
        }
    }
}

/// Operation handler that records every execution (at completion time) and
/// can delay or block specific call ids.
#[derive(Default)]
pub struct RecordingHandler {
    executions: Mutex<Vec<Execution>>,
    delays: Mutex<HashMap<u64, Duration>>,
    gates: Mutex<HashMap<u64, Arc<Gate>>>,
    fails: Mutex<HashSet<u64>>,
}

impl RecordingHandler {
    pub fn delay(&self, call_id: u64, delay: Duration) {
        self.delays
            .lock()
            .expect("delays lock")
            .insert(call_id, delay);
    }

    /// Makes the handler return an error after executing `call_id`.
    pub fn fail(&self, call_id: u64) {
        self.fails.lock().expect("fails lock").insert(call_id);
    }

    /// Makes `call_id` block inside the handler until the gate is
    /// released.
    pub fn gate(&self, call_id: u64) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates
            .lock()
            .expect("gates lock")
            .insert(call_id, Arc::clone(&gate));
        gate
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.executions.lock().expect("executions lock").clone()
    }

    pub fn call_ids(&self) -> Vec<u64> {
        self.executions().iter().map(|e| e.call_id).collect()
    }

    pub fn execution_count(&self) -> usize {
        self.executions.lock().expect("executions lock").len()
    }
}

impl OperationHandler for RecordingHandler {
    fn deserialize(&self, packet: &Packet) -> Result<Option<Box<dyn Operation>>, HandlerError> {
        // Wire format used by the tests: 8 little-endian bytes of call id.
        // An empty payload decodes to nothing.
        if packet.payload().is_empty() {
            return Ok(None);
        }
        let bytes: [u8; 8] = packet
            .payload()
            .try_into()
            .map_err(|_| HandlerError::from("payload must be 8 bytes"))?;
        let call_id = u64::from_le_bytes(bytes);
        let partition_id = packet.partition_id();
        Ok(Some(Box::new(TestOp {
            call_id,
            partition_id,
            partition_aware: partition_id >= 0,
            urgent: packet.is_urgent(),
            executor: None,
        })))
    }

    fn process(&self, operation: &dyn Operation) -> Result<(), HandlerError> {
        let delay = self
            .delays
            .lock()
            .expect("delays lock")
            .get(&operation.call_id())
            .copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let gate = self
            .gates
            .lock()
            .expect("gates lock")
            .get(&operation.call_id())
            .cloned();
        if let Some(gate) = gate {
            gate.wait();
        }

        self.executions
            .lock()
            .expect("executions lock")
            .push(Execution {
                call_id: operation.call_id(),
                partition_id: operation.partition_id(),
                thread_name: thread::current().name().unwrap_or("<unnamed>").to_string(),
            });

        if self
            .fails
            .lock()
            .expect("fails lock")
            .contains(&operation.call_id())
        {
            return Err("injected handler failure".into());
        }
        Ok(())
    }
}

/// Fault inspector counting what it sees, by kind.
#[derive(Default)]
pub struct CountingInspector {
    pub handler_faults: AtomicUsize,
    pub panic_faults: AtomicUsize,
}

impl FaultInspector for CountingInspector {
    fn inspect(&self, fault: &WorkerFault<'_>) {
        match fault {
            WorkerFault::Handler(_) => self.handler_faults.fetch_add(1, Ordering::SeqCst),
            WorkerFault::Panic(_) => self.panic_faults.fetch_add(1, Ordering::SeqCst),
        };
    }
}

/// Response handler recording applied call ids.
#[derive(Default)]
pub struct RecordingResponseHandler {
    applied: Mutex<Vec<u64>>,
}

impl RecordingResponseHandler {
    pub fn applied(&self) -> Vec<u64> {
        self.applied.lock().expect("applied lock").clone()
    }
}

impl ResponsePacketHandler for RecordingResponseHandler {
    fn deserialize(&self, packet: &Packet) -> Result<Response, HandlerError> {
        let bytes: [u8; 8] = packet
            .payload()
            .try_into()
            .map_err(|_| HandlerError::from("payload must be 8 bytes"))?;
        Ok(Box::new(u64::from_le_bytes(bytes)))
    }

    fn process(&self, response: Response) -> Result<(), HandlerError> {
        let call_id = response
            .downcast::<u64>()
            .map_err(|_| HandlerError::from("unexpected response type"))?;
        self.applied.lock().expect("applied lock").push(*call_id);
        Ok(())
    }
}

/// Executor that runs tasks inline on the submitting thread.
#[derive(Default)]
pub struct InlineExecutor {
    pub executed: AtomicUsize,
}

impl ExternalExecutor for InlineExecutor {
    fn execute(&self, task: Runnable) {
        self.executed.fetch_add(1, Ordering::SeqCst);
        task();
    }
}

/// Execution service backed by a name-to-executor map.
#[derive(Default)]
pub struct MapExecutionService {
    executors: HashMap<String, Arc<dyn ExternalExecutor>>,
}

impl MapExecutionService {
    pub fn single(name: &str, executor: Arc<dyn ExternalExecutor>) -> Self {
        let mut executors: HashMap<String, Arc<dyn ExternalExecutor>> = HashMap::new();
        executors.insert(name.to_string(), executor);
        Self { executors }
    }
}

impl ExecutionService for MapExecutionService {
    fn executor(&self, name: &str) -> Option<Arc<dyn ExternalExecutor>> {
        self.executors.get(name).cloned()
    }
}

/// A running scheduler plus its recording collaborators.
pub struct Fixture {
    pub scheduler: OperationScheduler,
    pub operations: Arc<RecordingHandler>,
    pub responses: Arc<RecordingResponseHandler>,
}

pub fn fixture(partition_threads: usize, generic_threads: usize) -> Fixture {
    fixture_with(partition_threads, generic_threads, Arc::new(NoExecutors))
}

pub fn fixture_with(
    partition_threads: usize,
    generic_threads: usize,
    executors: Arc<dyn ExecutionService>,
) -> Fixture {
    let config = SchedulerConfig {
        partition_threads,
        generic_threads,
        thread_name_prefix: "test-sched".to_string(),
        ..SchedulerConfig::default()
    };
    fixture_custom(config, move |mut services| {
        services.executors = executors;
        services
    })
}

/// Builds a fixture from a full config, letting the caller decorate the
/// service bundle (node-state probe, fault inspector, executors).
pub fn fixture_custom(
    config: SchedulerConfig,
    decorate: impl FnOnce(SchedulerServices) -> SchedulerServices,
) -> Fixture {
    let operations = Arc::new(RecordingHandler::default());
    let responses = Arc::new(RecordingResponseHandler::default());
    let services = decorate(SchedulerServices::new(
        Arc::clone(&operations) as Arc<dyn OperationHandler>,
        Arc::clone(&responses) as Arc<dyn ResponsePacketHandler>,
        Arc::new(NoExecutors),
    ));
    Fixture {
        scheduler: OperationScheduler::new(config, services),
        operations,
        responses,
    }
}

/// Polls until `probe` returns true or the deadline passes.
pub fn wait_until(timeout: Duration, probe: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    probe()
}

pub fn op_packet(call_id: u64, partition_id: i32, urgent: bool) -> Packet {
    let mut flags = FLAG_OP;
    if urgent {
        flags |= FLAG_URGENT;
    }
    Packet::new(flags, partition_id, call_id.to_le_bytes().to_vec())
}

pub fn response_packet(call_id: u64) -> Packet {
    Packet::new(FLAG_RESPONSE, -1, call_id.to_le_bytes().to_vec())
}
