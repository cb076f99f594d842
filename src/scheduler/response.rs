//! The response worker.
//!
//! A single thread applies inbound response packets to the pending
//! invocation registry. Its loop mirrors the operation workers minus the
//! priority channel, and every fault is swallowed after inspection: one
//! malformed response must not stall the queue behind it.

use crate::config::WorkerFailurePolicy;
use crate::handler::{SchedulerServices, WorkerFault};
use crate::packet::Packet;
use crate::scheduler::park::Parker;
use crate::scheduler::policy::{ScopedRole, ThreadRole};
use crate::scheduler::queue::WorkQueue;
use crate::scheduler::worker::PARK_BACKSTOP;
use crate::tracing_compat::error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const SPIN_LIMIT: u32 = 64;
const YIELD_LIMIT: u32 = 16;

/// State of the response worker, shared with the dispatcher.
#[derive(Debug)]
pub(crate) struct ResponseState {
    /// Inbound response packets.
    pub(crate) queue: WorkQueue<Packet>,
    /// Parker the dispatcher unparks after offering a packet.
    pub(crate) parker: Parker,
    /// Responses processed, single writer.
    pub(crate) processed_responses: AtomicU64,
}

impl ResponseState {
    pub(crate) fn new(queue_capacity: usize) -> Self {
        Self {
            queue: WorkQueue::new(queue_capacity),
            parker: Parker::new(),
            processed_responses: AtomicU64::new(0),
        }
    }

    pub(crate) fn processed_responses(&self) -> u64 {
        self.processed_responses.load(Ordering::Acquire)
    }
}

/// The loop run by the response worker thread.
pub(crate) struct ResponseWorker {
    pub(crate) state: Arc<ResponseState>,
    pub(crate) services: SchedulerServices,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) failure_policy: WorkerFailurePolicy,
}

impl ResponseWorker {
    /// Thread entry point.
    pub(crate) fn run(self) {
        let _role = ScopedRole::new(ThreadRole::Response);
        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.run_loop())) {
                Ok(()) => return,
                Err(payload) => {
                    let fault = WorkerFault::Panic(payload.as_ref());
                    self.services.fault_inspector.inspect(&fault);
                    error!(
                        "panic escaped the response loop: {}",
                        fault.describe()
                    );
                    match self.failure_policy {
                        WorkerFailurePolicy::Restart => {}
                        WorkerFailurePolicy::Escalate => {
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
            let Some(packet) = self.take() else { return };
            self.process(packet);
        }
    }

    fn take(&self) -> Option<Packet> {
        let mut backoff = 0_u32;
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(packet) = self.state.queue.poll() {
                return Some(packet);
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

    pub(crate) fn process(&self, packet: Packet) {
        self.state
            .processed_responses
            .fetch_add(1, Ordering::Release);

        let response = match self.services.responses.deserialize(&packet) {
            Ok(response) => response,
            Err(err) => {
                let fault = WorkerFault::Handler(err.as_ref());
                self.services.fault_inspector.inspect(&fault);
                error!("failed to deserialize response: {}", fault.describe());
                return;
            }
        };

        match panic::catch_unwind(AssertUnwindSafe(|| {
            self.services.responses.process(response)
        })) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let fault = WorkerFault::Handler(err.as_ref());
                self.services.fault_inspector.inspect(&fault);
                error!("failed to process response: {}", fault.describe());
            }
            Err(payload) => {
                let fault = WorkerFault::Panic(payload.as_ref());
                self.services.fault_inspector.inspect(&fault);
                error!("response handler panicked: {}", fault.describe());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{
        AlwaysActive, HandlerError, NoExecutors, NoOpInspector, OperationHandler, Response,
        ResponsePacketHandler,
    };
    use crate::operation::Operation;
    use crate::packet::FLAG_RESPONSE;
    use std::sync::Mutex;

    struct NoOperations;

    impl OperationHandler for NoOperations {
        fn deserialize(
            &self,
            _packet: &Packet,
        ) -> Result<Option<Box<dyn Operation>>, HandlerError> {
            Ok(None)
        }

        fn process(&self, _operation: &dyn Operation) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingResponses {
        applied: Mutex<Vec<u8>>,
        deserialize_fails: bool,
        process_fails: bool,
    }

    impl ResponsePacketHandler for RecordingResponses {
        fn deserialize(&self, packet: &Packet) -> Result<Response, HandlerError> {
            if self.deserialize_fails {
                return Err("short response frame".into());
            }
            Ok(Box::new(packet.payload().first().copied().unwrap_or(0)))
        }

        fn process(&self, response: Response) -> Result<(), HandlerError> {
            if self.process_fails {
                return Err("no pending invocation".into());
            }
            let value = response.downcast::<u8>().expect("u8 response");
            self.applied.lock().expect("lock").push(*value);
            Ok(())
        }
    }

    fn response_worker(handler: Arc<RecordingResponses>) -> ResponseWorker {
        let services = SchedulerServices {
            operations: Arc::new(NoOperations),
            responses: handler,
            executors: Arc::new(NoExecutors),
            node_state: Arc::new(AlwaysActive),
            fault_inspector: Arc::new(NoOpInspector),
        };
        ResponseWorker {
            state: Arc::new(ResponseState::new(0)),
            services,
            shutdown: Arc::new(AtomicBool::new(false)),
            failure_policy: WorkerFailurePolicy::Restart,
        }
    }

    #[test]
    fn responses_are_deserialized_and_applied() {
        let handler = Arc::new(RecordingResponses::default());
        let worker = response_worker(Arc::clone(&handler));

        worker.process(Packet::new(FLAG_RESPONSE, -1, vec![7]));
        worker.process(Packet::new(FLAG_RESPONSE, -1, vec![8]));

        assert_eq!(handler.applied.lock().expect("lock").as_slice(), &[7, 8]);
        assert_eq!(worker.state.processed_responses(), 2);
    }

    #[test]
    fn deserialize_failure_does_not_stall_the_queue() {
        let handler = Arc::new(RecordingResponses {
            deserialize_fails: true,
            ..RecordingResponses::default()
        });
        let worker = response_worker(Arc::clone(&handler));

        worker.process(Packet::new(FLAG_RESPONSE, -1, vec![7]));

        assert!(handler.applied.lock().expect("lock").is_empty());
        assert_eq!(worker.state.processed_responses(), 1);
    }

    #[test]
    fn process_failure_is_swallowed() {
        let handler = Arc::new(RecordingResponses {
            process_fails: true,
            ..RecordingResponses::default()
        });
        let worker = response_worker(Arc::clone(&handler));

        worker.process(Packet::new(FLAG_RESPONSE, -1, vec![7]));
        worker.process(Packet::new(FLAG_RESPONSE, -1, vec![8]));

        assert_eq!(worker.state.processed_responses(), 2);
    }
}
