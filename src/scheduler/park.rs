//! Parking and wakeup for idle workers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Blocks an idle worker until new work is offered.
///
/// Permit semantics: an unpark delivered before the park is consumed by
/// the next park, so a wakeup sent while the worker is mid-loop is never
/// lost. Multiple unparks coalesce into one permit.
#[derive(Debug, Clone)]
pub(crate) struct Parker {
    inner: Arc<ParkerInner>,
}

#[derive(Debug)]
struct ParkerInner {
    permit: AtomicBool,
    sleepers: AtomicUsize,
    mutex: Mutex<()>,
    cvar: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ParkerInner {
                permit: AtomicBool::new(false),
                sleepers: AtomicUsize::new(0),
                mutex: Mutex::new(()),
                cvar: Condvar::new(),
            }),
        }
    }

    fn try_take_permit(&self) -> bool {
        self.inner
            .permit
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // A panicking unparker cannot corrupt a () payload; keep parking.
        self.inner
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Parks the current thread until unparked or `timeout` elapses.
    pub(crate) fn park_timeout(&self, timeout: Duration) {
        if self.try_take_permit() {
            return;
        }
        if timeout.is_zero() {
            return;
        }

        self.inner.sleepers.fetch_add(1, Ordering::SeqCst);
        let (guard, _timed_out) = self
            .inner
            .cvar
            .wait_timeout_while(self.lock(), timeout, |()| !self.try_take_permit())
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.sleepers.fetch_sub(1, Ordering::SeqCst);
        drop(guard);
    }

    /// Wakes the parked worker, or leaves a permit for its next park.
    pub(crate) fn unpark(&self) {
        if self
            .inner
            .permit
            .compare_exchange(false, true, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            // Permit already pending; the next park consumes it.
            return;
        }
        if self.inner.sleepers.load(Ordering::SeqCst) == 0 {
            return;
        }
        // Take the mutex before notifying so the permit store cannot slot
        // between a sleeper's predicate check and its wait.
        let _guard = self.lock();
        self.inner.cvar.notify_one();
    }
}

/// Round-robin wakeup over the generic pool's parkers.
///
/// The generic queue pair is shared, so a submitter wakes "some" idle
/// worker rather than a specific one; shutdown wakes all of them.
#[derive(Debug)]
pub(crate) struct WakeGroup {
    parkers: Vec<Parker>,
    next: AtomicUsize,
}

impl WakeGroup {
    pub(crate) fn new(parkers: Vec<Parker>) -> Self {
        Self {
            parkers,
            next: AtomicUsize::new(0),
        }
    }

    pub(crate) fn wake_one(&self) {
        if self.parkers.is_empty() {
            return;
        }
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.parkers.len();
        self.parkers[slot].unpark();
    }

    pub(crate) fn wake_all(&self) {
        for parker in &self.parkers {
            parker.unpark();
        }
    }
}
