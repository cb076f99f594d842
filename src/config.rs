//! Scheduler configuration.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `partition_threads` | `max(2, cores)` |
//! | `generic_threads` | `max(2, cores / 2)` |
//! | `termination_timeout` | 3 s per thread |
//! | `thread_name_prefix` | `"gridsched"` |
//! | `thread_stack_size` | 2 MiB |
//! | `queue_capacity` | 0 (unbounded) |
//! | `overload_policy` | `Reject` |
//! | `worker_failure_policy` | `Restart` |
//!
//! `cores` is [`std::thread::available_parallelism`]. A zero in either
//! thread count (or a zero capacity/timeout) means "use the default";
//! [`SchedulerConfig::normalize`] resolves those before the scheduler
//! starts. Environment overrides are layered on top by
//! [`SchedulerConfig::overlay_env`].

use crate::tracing_compat::warn;
use core::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Bounded wait per worker thread during shutdown.
pub const DEFAULT_TERMINATION_TIMEOUT: Duration = Duration::from_secs(3);

const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_THREAD_NAME_PREFIX: &str = "gridsched";

/// Refusal behavior when a bounded work queue is at capacity.
///
/// Only work FIFOs are ever bounded; priority queues and the wakeup
/// sentinel bypass any configured capacity so urgency can never be
/// refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverloadPolicy {
    /// Surface [`Rejected`](crate::error::ScheduleError::Rejected) to the
    /// submitter.
    #[default]
    Reject,
    /// Block the submitting thread until the queue drains or the
    /// scheduler shuts down.
    Block,
    /// Drop the task and log at error level.
    Drop,
}

/// What a worker thread does after a panic escapes its scheduling loop.
///
/// Task-level faults never reach this point; they are caught, inspected,
/// and logged inside the loop. This policy covers the pathological case of
/// a panic in the scheduling machinery itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerFailurePolicy {
    /// Re-enter the scheduling loop on the same thread.
    ///
    /// A partition worker that stayed down would wedge every partition it
    /// owns, so this is the default.
    #[default]
    Restart,
    /// Trip scheduler shutdown, for nodes that prefer fail-stop over
    /// running with a possibly inconsistent worker.
    Escalate,
}

/// Scheduler configuration.
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Partition worker count (0 = derive from available parallelism).
    pub partition_threads: usize,
    /// Generic worker count (0 = derive from available parallelism).
    pub generic_threads: usize,
    /// Bounded wait per worker thread during shutdown.
    pub termination_timeout: Duration,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Stack size per worker thread.
    pub thread_stack_size: usize,
    /// Work-queue capacity (0 = unbounded).
    pub queue_capacity: usize,
    /// Refusal behavior when a bounded work queue is full.
    pub overload_policy: OverloadPolicy,
    /// Behavior after a panic escapes a worker's scheduling loop.
    pub worker_failure_policy: WorkerFailurePolicy,
    /// Callback executed when an operation worker thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback executed when an operation worker thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl SchedulerConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.partition_threads == 0 {
            self.partition_threads = Self::default_partition_threads();
        }
        if self.generic_threads == 0 {
            self.generic_threads = Self::default_generic_threads();
        }
        if self.termination_timeout.is_zero() {
            self.termination_timeout = DEFAULT_TERMINATION_TIMEOUT;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = DEFAULT_THREAD_STACK_SIZE;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    /// Default partition worker count: every core, at least two.
    ///
    /// Partition workers are the serial execution lanes of the node, so
    /// they get the full core count.
    #[must_use]
    pub fn default_partition_threads() -> usize {
        cores().max(2)
    }

    /// Default generic worker count: half the cores, at least two.
    #[must_use]
    pub fn default_generic_threads() -> usize {
        (cores() / 2).max(2)
    }

    /// Applies `GRIDSCHED_*` environment overrides on top of `self`.
    ///
    /// Recognized: `GRIDSCHED_PARTITION_THREADS`,
    /// `GRIDSCHED_GENERIC_THREADS`, `GRIDSCHED_TERMINATION_TIMEOUT_MS`.
    /// Unparsable values are ignored with a warning.
    pub fn overlay_env(&mut self) {
        if let Some(count) = env_usize("GRIDSCHED_PARTITION_THREADS") {
            self.partition_threads = count;
        }
        if let Some(count) = env_usize("GRIDSCHED_GENERIC_THREADS") {
            self.generic_threads = count;
        }
        if let Some(millis) = env_usize("GRIDSCHED_TERMINATION_TIMEOUT_MS") {
            self.termination_timeout = Duration::from_millis(millis as u64);
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            partition_threads: Self::default_partition_threads(),
            generic_threads: Self::default_generic_threads(),
            termination_timeout: DEFAULT_TERMINATION_TIMEOUT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
            queue_capacity: 0,
            overload_policy: OverloadPolicy::default(),
            worker_failure_policy: WorkerFailurePolicy::default(),
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("partition_threads", &self.partition_threads)
            .field("generic_threads", &self.generic_threads)
            .field("termination_timeout", &self.termination_timeout)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("queue_capacity", &self.queue_capacity)
            .field("overload_policy", &self.overload_policy)
            .field("worker_failure_policy", &self.worker_failure_policy)
            .finish_non_exhaustive()
    }
}

fn cores() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn env_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_sane() {
        let config = SchedulerConfig::default();
        assert!(config.partition_threads >= 2);
        assert!(config.generic_threads >= 2);
        assert_eq!(config.termination_timeout, DEFAULT_TERMINATION_TIMEOUT);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.overload_policy, OverloadPolicy::Reject);
        assert_eq!(config.worker_failure_policy, WorkerFailurePolicy::Restart);
    }

    #[test]
    fn normalize_fills_zeroes() {
        let mut config = SchedulerConfig {
            partition_threads: 0,
            generic_threads: 0,
            termination_timeout: Duration::ZERO,
            thread_name_prefix: String::new(),
            thread_stack_size: 0,
            ..SchedulerConfig::default()
        };
        config.normalize();

        assert_eq!(
            config.partition_threads,
            SchedulerConfig::default_partition_threads()
        );
        assert_eq!(
            config.generic_threads,
            SchedulerConfig::default_generic_threads()
        );
        assert_eq!(config.termination_timeout, DEFAULT_TERMINATION_TIMEOUT);
        assert_eq!(config.thread_name_prefix, DEFAULT_THREAD_NAME_PREFIX);
        assert!(config.thread_stack_size > 0);
    }

    #[test]
    fn normalize_keeps_explicit_values() {
        let mut config = SchedulerConfig {
            partition_threads: 4,
            generic_threads: 3,
            queue_capacity: 256,
            ..SchedulerConfig::default()
        };
        config.normalize();

        assert_eq!(config.partition_threads, 4);
        assert_eq!(config.generic_threads, 3);
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn env_overlay_overrides_counts() {
        std::env::set_var("GRIDSCHED_PARTITION_THREADS", "7");
        std::env::set_var("GRIDSCHED_GENERIC_THREADS", "not-a-number");
        std::env::set_var("GRIDSCHED_TERMINATION_TIMEOUT_MS", "1500");

        let mut config = SchedulerConfig::default();
        let generic_before = config.generic_threads;
        config.overlay_env();

        assert_eq!(config.partition_threads, 7);
        assert_eq!(config.generic_threads, generic_before);
        assert_eq!(config.termination_timeout, Duration::from_millis(1500));

        std::env::remove_var("GRIDSCHED_PARTITION_THREADS");
        std::env::remove_var("GRIDSCHED_GENERIC_THREADS");
        std::env::remove_var("GRIDSCHED_TERMINATION_TIMEOUT_MS");
    }
}
