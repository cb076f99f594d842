//! Partition-affine operation scheduling for an in-memory data grid node.
//!
//! A node receives work from two directions: operations produced locally
//! and packets delivered by the transport. Every unit of work must run on
//! the right thread. Operations on partition `p` always run on the same
//! partition worker, serially and without per-partition locks; work bound
//! to no partition goes to a shared generic pool; response packets get
//! their own thread so responses are never stuck behind operations. Urgent
//! work must be able to overtake a deep FIFO without losing the wakeup of
//! a sleeping worker. This crate is that dispatch core.
//!
//! What executes the work is pluggable: the scheduler calls into an
//! [`OperationHandler`](handler::OperationHandler) and a
//! [`ResponsePacketHandler`](handler::ResponsePacketHandler) injected at
//! construction, and only decides *which thread, in which order*.
//!
//! # Example
//!
//! ```
//! use gridsched::config::SchedulerConfig;
//! use gridsched::handler::{
//!     HandlerError, NoExecutors, OperationHandler, Response, ResponsePacketHandler,
//!     SchedulerServices,
//! };
//! use gridsched::operation::Operation;
//! use gridsched::packet::Packet;
//! use gridsched::scheduler::OperationScheduler;
//! use std::sync::Arc;
//!
//! struct Noop;
//!
//! impl OperationHandler for Noop {
//!     fn deserialize(&self, _: &Packet) -> Result<Option<Box<dyn Operation>>, HandlerError> {
//!         Ok(None)
//!     }
//!     fn process(&self, _: &dyn Operation) -> Result<(), HandlerError> {
//!         Ok(())
//!     }
//! }
//!
//! impl ResponsePacketHandler for Noop {
//!     fn deserialize(&self, _: &Packet) -> Result<Response, HandlerError> {
//!         Ok(Box::new(()))
//!     }
//!     fn process(&self, _: Response) -> Result<(), HandlerError> {
//!         Ok(())
//!     }
//! }
//!
//! let services = SchedulerServices::new(Arc::new(Noop), Arc::new(Noop), Arc::new(NoExecutors));
//! let config = SchedulerConfig {
//!     partition_threads: 2,
//!     generic_threads: 2,
//!     ..SchedulerConfig::default()
//! };
//! let scheduler = OperationScheduler::new(config, services);
//!
//! scheduler.submit_task(7, || {
//!     // Runs on the partition worker owning partition 7.
//! })?;
//! scheduler.shutdown();
//! # Ok::<(), gridsched::error::ScheduleError>(())
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handler;
pub mod operation;
pub mod packet;
pub mod scheduler;
pub mod task;
pub mod tracing_compat;

pub use config::SchedulerConfig;
pub use error::ScheduleError;
pub use handler::SchedulerServices;
pub use scheduler::OperationScheduler;
