//! Blocking bridge from a promise to the calling thread.

use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use pledge_types::{Outcome, WaitError};

use crate::callback::{Payload, ProgressFn};
use crate::deferred::Promise;
use crate::listener::Notify;

/// Condvar-guarded slot filled once by the listener `wait` attaches.
struct WaitSlot<T> {
    outcome: Mutex<Option<Outcome<T>>>,
    ready: Condvar,
}

impl<T> WaitSlot<T> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn fill(&self, outcome: Outcome<T>) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(outcome);
            self.ready.notify_all();
        }
    }

    fn take(&self, timeout: Option<Duration>) -> Option<Outcome<T>> {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(timeout) = timeout else {
            while slot.is_none() {
                slot = self.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
            }
            return slot.take();
        };

        let deadline = Instant::now() + timeout;
        while slot.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
        slot.take()
    }
}

/// Holds the slot weakly so a waiter that gave up leaves nothing alive.
struct SlotListener<T>(Weak<WaitSlot<T>>);

impl<T: Payload> Notify<T> for SlotListener<T> {
    fn progress_handler(&self) -> Option<ProgressFn> {
        None
    }

    fn notify(self: Box<Self>, outcome: &Outcome<T>) {
        if let Some(slot) = self.0.upgrade() {
            slot.fill(outcome.clone());
        }
    }

    fn is_abandoned(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl<T: Payload> Promise<T> {
    /// Block the calling thread until this promise settles.
    ///
    /// `None` or a zero timeout waits without bound. Must not be called from
    /// inside a handler running on the same executor that would settle it.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<T, WaitError> {
        let timeout = timeout.filter(|t| !t.is_zero());
        let slot = Arc::new(WaitSlot::new());
        self.subscribe(Box::new(SlotListener(Arc::downgrade(&slot))));

        let outcome = slot.take(timeout);
        if outcome.is_none() {
            drop(slot);
            self.prune_abandoned();
        }
        match outcome {
            Some(Outcome::Resolved(value)) => Ok(value),
            Some(Outcome::Rejected(failure)) => Err(WaitError::Rejected(failure)),
            Some(Outcome::Cancelled(failure)) => Err(WaitError::Cancelled(failure)),
            None => {
                let waited = timeout.unwrap_or_default();
                tracing::debug!(?waited, "Timed out waiting for promise");
                Err(WaitError::Timeout(waited))
            }
        }
    }
}
