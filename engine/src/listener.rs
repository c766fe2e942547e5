//! Queued listeners and how a notified listener settles its child.

use std::panic::{AssertUnwindSafe, catch_unwind};

use pledge_types::{ExecutorError, Outcome};

use crate::callback::{Callback, Callbacks, Errback, Payload, ProgressFn, Step};
use crate::deferred::{Deferred, settle_logged};
use crate::executor::Task;

/// Type-erased view of a listener queued on a `Deferred<T>`.
pub(crate) trait Notify<T>: Send {
    fn progress_handler(&self) -> Option<ProgressFn>;

    /// Consume the listener, settling its child from `outcome`.
    fn notify(self: Box<Self>, outcome: &Outcome<T>);

    /// Nobody is left to receive the notification.
    fn is_abandoned(&self) -> bool {
        false
    }
}

/// A handler triple paired with the child Deferred it settles.
pub(crate) struct Listener<T, U> {
    on_success: Callback<T, U>,
    on_failure: Option<Errback<U>>,
    on_progress: Option<ProgressFn>,
    child: Deferred<U>,
}

impl<T, U> Listener<T, U> {
    pub fn new(callbacks: Callbacks<T, U>, child: Deferred<U>) -> Self {
        Self {
            on_success: callbacks.on_success,
            on_failure: callbacks.on_failure,
            on_progress: callbacks.on_progress,
            child,
        }
    }
}

impl<T: Payload, U: Payload> Notify<T> for Listener<T, U> {
    fn progress_handler(&self) -> Option<ProgressFn> {
        self.on_progress.clone()
    }

    fn notify(self: Box<Self>, outcome: &Outcome<T>) {
        let Self {
            on_success,
            on_failure,
            child,
            ..
        } = *self;

        match (outcome, on_success, on_failure) {
            (Outcome::Resolved(value), Callback::Identity(pass), _) => {
                settle_logged(child.resolve(pass(value.clone())));
            }
            (Outcome::Resolved(value), Callback::Handler(handler), _) => {
                let value = value.clone();
                child.run_handler(move || handler(value));
            }
            (Outcome::Rejected(failure) | Outcome::Cancelled(failure), _, Some(errback)) => {
                let failure = failure.clone();
                child.run_handler(move || errback(failure));
            }
            (Outcome::Rejected(failure), _, None) => {
                settle_logged(child.reject(failure.clone()));
            }
            (Outcome::Cancelled(failure), _, None) => {
                settle_logged(child.propagate_cancel(failure.clone()));
            }
        }
    }
}

impl<U: Payload> Deferred<U> {
    /// Run a user handler on the executor and settle `self` from what it produced.
    pub(crate) fn run_handler(self, handler: impl FnOnce() -> Step<U> + Send + 'static) {
        let target = self.clone();
        let fallback = self.clone();
        let task = Task::new(move || {
            let step = catch_unwind(AssertUnwindSafe(handler));
            target.apply(step);
        })
        .on_abandon(move || settle_logged(fallback.reject_unavailable(ExecutorError::Abandoned)));
        if let Err(err) = self.engine().executor().submit(task) {
            tracing::warn!(error = %err, "Failed to submit handler; rejecting chained promise");
            settle_logged(self.reject_unavailable(err));
        }
    }
}
