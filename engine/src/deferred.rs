//! The resolution state machine.
//!
//! A [`Deferred`] is the write side of an asynchronous result and a
//! [`Promise`] the read-only, chainable view of the same allocation. Every
//! transition runs under the entity's own mutex; no user code (handlers,
//! cancellers, progress callbacks) ever runs while that mutex is held, and no
//! operation holds two entity locks at once.
//!
//! Rejections that settle with an empty listener queue are handed to the
//! engine's failure sink and retracted as soon as a listener is given the
//! failure. The sink is called with the lock released as well.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use pledge_config::RejectMode;
use pledge_types::{ExecutorError, Failure, Outcome, Progress, PromiseError, panic_message};

use crate::callback::{Callbacks, Payload, ProgressFn, Step};
use crate::engine::Engine;
use crate::executor::Task;
use crate::listener::{Listener, Notify};
use crate::sink::TrackingHandle;

/// Invoked when cancellation of a pending Deferred is requested.
///
/// Returns whether the underlying work was actually cancelled.
pub trait Canceller: Send {
    fn cancel(&mut self, may_interrupt: bool) -> bool;
}

impl<F> Canceller for F
where
    F: FnMut(bool) -> bool + Send,
{
    fn cancel(&mut self, may_interrupt: bool) -> bool {
        self(may_interrupt)
    }
}

enum Phase<T> {
    Pending,
    /// A deferred-mode rejection has been submitted and not yet applied.
    Rejecting,
    Settled(Outcome<T>),
}

/// Which phase a settlement is allowed to start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Pending,
    Rejecting,
}

/// Sink registration of a rejection that settled with nobody listening.
enum Leak {
    Untracked,
    /// The sink is being told about the failure with the lock released.
    Registering,
    /// A listener arrived while the failure was still being registered.
    Observed,
    Tracked(TrackingHandle),
}

struct State<T> {
    phase: Phase<T>,
    listeners: Vec<Box<dyn Notify<T>>>,
    canceller: Option<Box<dyn Canceller>>,
    leak: Leak,
}

impl<T> State<T> {
    fn label(&self) -> &'static str {
        match &self.phase {
            Phase::Pending => "pending",
            Phase::Rejecting => "rejecting",
            Phase::Settled(Outcome::Resolved(_)) => "resolved",
            Phase::Settled(Outcome::Rejected(_)) => "rejected",
            Phase::Settled(Outcome::Cancelled(_)) => "cancelled",
        }
    }
}

struct Inner<T> {
    engine: Arc<Engine>,
    state: Mutex<State<T>>,
}

impl<T: Payload> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, outcome: Outcome<T>, expect: Expect) -> Result<(), PromiseError> {
        let (listeners, unobserved) = {
            let mut state = self.lock();
            let allowed = match state.phase {
                Phase::Pending => true,
                Phase::Rejecting => expect == Expect::Rejecting,
                Phase::Settled(_) => false,
            };
            if !allowed {
                return Err(PromiseError::AlreadySettled);
            }

            state.canceller = None;
            let listeners = std::mem::take(&mut state.listeners);
            let unobserved = matches!(outcome, Outcome::Rejected(_))
                && listeners.iter().all(|listener| listener.is_abandoned());
            if unobserved {
                state.leak = Leak::Registering;
            }
            state.phase = Phase::Settled(outcome.clone());
            (listeners, unobserved)
        };

        if unobserved && let Outcome::Rejected(failure) = &outcome {
            self.register_leak(failure);
        }
        for listener in listeners {
            listener.notify(&outcome);
        }
        Ok(())
    }

    fn register_leak(&self, failure: &Failure) {
        let handle = if let Some(sink) = self.engine.failure_sink() {
            sink.failed(failure)
        } else {
            tracing::warn!(failure = %failure, "Uncollected failure");
            None
        };
        let Some(handle) = handle else {
            self.lock().leak = Leak::Untracked;
            return;
        };

        let mut state = self.lock();
        let leak = std::mem::replace(&mut state.leak, Leak::Untracked);
        if matches!(leak, Leak::Registering) {
            state.leak = Leak::Tracked(handle);
            return;
        }
        drop(state);
        self.retract_leak(handle);
    }

    fn retract_leak(&self, handle: TrackingHandle) {
        if let Some(sink) = self.engine.failure_sink() {
            sink.collected(handle);
        }
    }

    fn enqueue(&self, listener: Box<dyn Notify<T>>) {
        let (outcome, retract) = {
            let mut state = self.lock();
            let settled = match &state.phase {
                Phase::Settled(outcome) => Some(outcome.clone()),
                Phase::Pending | Phase::Rejecting => None,
            };
            let Some(outcome) = settled else {
                state.listeners.push(listener);
                return;
            };
            let retract = match std::mem::replace(&mut state.leak, Leak::Untracked) {
                Leak::Tracked(handle) => Some(handle),
                Leak::Registering | Leak::Observed => {
                    state.leak = Leak::Observed;
                    None
                }
                Leak::Untracked => None,
            };
            (outcome, retract)
        };
        if let Some(handle) = retract {
            self.retract_leak(handle);
        }
        listener.notify(&outcome);
    }

    /// Drop queued listeners whose receiver has gone away.
    fn prune_abandoned(&self) {
        self.lock()
            .listeners
            .retain(|listener| !listener.is_abandoned());
    }

    fn progress(&self, update: Progress) {
        let handlers: Vec<ProgressFn> = self
            .lock()
            .listeners
            .iter()
            .filter_map(|listener| listener.progress_handler())
            .collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(update))).is_err() {
                tracing::warn!(progress = %update, "Progress handler panicked");
            }
        }
    }

    fn cancel(&self, may_interrupt: bool) -> bool {
        let mut canceller = {
            let mut state = self.lock();
            if !matches!(state.phase, Phase::Pending) {
                return false;
            }
            match state.canceller.take() {
                Some(canceller) => canceller,
                None => return false,
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| canceller.cancel(may_interrupt)));
        let reason = match result {
            Ok(true) => Failure::cancelled(),
            Ok(false) => {
                let mut state = self.lock();
                if matches!(state.phase, Phase::Pending) && state.canceller.is_none() {
                    state.canceller = Some(canceller);
                }
                return false;
            }
            Err(payload) => Failure::cancelled_with(format!(
                "canceller panicked: {}",
                panic_message(&*payload)
            )),
        };

        // A chained parent may already have propagated its own cancellation here.
        self.settle(Outcome::Cancelled(reason), Expect::Pending).is_ok() || self.is_cancelled()
    }

    fn outcome(&self) -> Option<Outcome<T>> {
        match &self.lock().phase {
            Phase::Settled(outcome) => Some(outcome.clone()),
            Phase::Pending | Phase::Rejecting => None,
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.lock().phase, Phase::Settled(_))
    }

    fn is_cancelled(&self) -> bool {
        matches!(self.lock().phase, Phase::Settled(Outcome::Cancelled(_)))
    }
}

/// Log a settlement that lost a race instead of surfacing it.
pub(crate) fn settle_logged(result: Result<(), PromiseError>) {
    if let Err(err) = result {
        tracing::debug!(error = %err, "Chained settlement skipped");
    }
}

/// Write side of an asynchronous result.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Payload> Deferred<T> {
    #[must_use]
    pub fn new(engine: &Arc<Engine>) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine: Arc::clone(engine),
                state: Mutex::new(State {
                    phase: Phase::Pending,
                    listeners: Vec::new(),
                    canceller: None,
                    leak: Leak::Untracked,
                }),
            }),
        }
    }

    #[must_use]
    pub fn with_canceller(engine: &Arc<Engine>, canceller: impl Canceller + 'static) -> Self {
        let deferred = Self::new(engine);
        deferred.set_canceller(canceller);
        deferred
    }

    /// The read-only view of this Deferred.
    #[must_use]
    pub fn promise(&self) -> Promise<T> {
        Promise {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.inner.engine
    }

    pub fn resolve(&self, value: T) -> Result<(), PromiseError> {
        self.inner.settle(Outcome::Resolved(value), Expect::Pending)
    }

    /// Reject with `failure`, synchronously or via the executor depending on
    /// the engine's [`RejectMode`].
    pub fn reject(&self, failure: Failure) -> Result<(), PromiseError> {
        match self.inner.engine.reject_mode() {
            RejectMode::Immediate => self.reject_now(failure),
            RejectMode::Deferred => self.reject_later(failure),
        }
    }

    /// Reject synchronously regardless of the engine's mode.
    pub fn reject_now(&self, failure: Failure) -> Result<(), PromiseError> {
        self.inner.settle(Outcome::Rejected(failure), Expect::Pending)
    }

    fn reject_later(&self, failure: Failure) -> Result<(), PromiseError> {
        {
            let mut state = self.inner.lock();
            if !matches!(state.phase, Phase::Pending) {
                return Err(PromiseError::AlreadySettled);
            }
            state.phase = Phase::Rejecting;
        }

        let inner = Arc::clone(&self.inner);
        let fallback = Arc::clone(&self.inner);
        let abandoned = failure.clone();
        let task = Task::new(move || {
            settle_logged(inner.settle(Outcome::Rejected(failure), Expect::Rejecting));
        })
        .on_abandon(move || {
            settle_logged(fallback.settle(Outcome::Rejected(abandoned), Expect::Rejecting));
        });
        let submitted = self.inner.engine.executor().submit(task);
        if let Err(err) = submitted {
            let mut state = self.inner.lock();
            if matches!(state.phase, Phase::Rejecting) {
                state.phase = Phase::Pending;
            }
            return Err(err.into());
        }
        Ok(())
    }

    pub(crate) fn propagate_cancel(&self, failure: Failure) -> Result<(), PromiseError> {
        self.inner.settle(Outcome::Cancelled(failure), Expect::Pending)
    }

    pub(crate) fn reject_unavailable(&self, err: ExecutorError) -> Result<(), PromiseError> {
        self.reject_now(Failure::executor_unavailable(err))
    }

    /// Settle from a handler's result; a panic becomes a rejection.
    pub(crate) fn apply(&self, step: thread::Result<Step<T>>) {
        match step {
            Ok(Step::Value(value)) => settle_logged(self.resolve(value)),
            Ok(Step::Fail(failure)) => settle_logged(self.reject(failure)),
            Ok(Step::Adopt(promise)) => promise.forward_to(self.clone()),
            Err(payload) => {
                let failure = Failure::from_panic(&*payload);
                tracing::debug!(failure = %failure, "Handler panicked");
                settle_logged(self.reject(failure));
            }
        }
    }

    /// Deliver `update` to the progress handler of every queued listener.
    pub fn progress(&self, update: Progress) {
        self.inner.progress(update);
    }

    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.inner.cancel(may_interrupt)
    }

    /// Install or replace the canceller. Ignored once settled.
    pub fn set_canceller(&self, canceller: impl Canceller + 'static) {
        let mut state = self.inner.lock();
        if matches!(state.phase, Phase::Pending) {
            state.canceller = Some(Box::new(canceller));
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

impl<T: Payload> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.inner.lock().label())
            .finish()
    }
}

/// Read-only, chainable view of a Deferred's eventual outcome.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Payload> Promise<T> {
    /// Attach a full handler triple. The returned promise settles from
    /// whatever the matching handler produces; cancelling it cancels `self`.
    pub fn then_with<U: Payload>(&self, callbacks: Callbacks<T, U>) -> Promise<U> {
        let child = Deferred::<U>::new(&self.inner.engine);
        let parent = Arc::downgrade(&self.inner);
        child.set_canceller(move |may_interrupt: bool| {
            parent
                .upgrade()
                .is_some_and(|parent| parent.cancel(may_interrupt))
        });
        let promise = child.promise();
        self.inner
            .enqueue(Box::new(Listener::new(callbacks, child)));
        promise
    }

    pub fn then<U: Payload>(
        &self,
        on_success: impl FnOnce(T) -> Step<U> + Send + 'static,
    ) -> Promise<U> {
        self.then_with(Callbacks::new(on_success))
    }

    pub fn then_or_else<U: Payload>(
        &self,
        on_success: impl FnOnce(T) -> Step<U> + Send + 'static,
        on_failure: impl FnOnce(Failure) -> Step<U> + Send + 'static,
    ) -> Promise<U> {
        self.then_with(Callbacks::new(on_success).or_else(on_failure))
    }

    pub fn add_callback<U: Payload>(
        &self,
        on_success: impl FnOnce(T) -> Step<U> + Send + 'static,
    ) -> Promise<U> {
        self.then(on_success)
    }

    /// Handle failures only; values pass through unchanged.
    pub fn add_errback(
        &self,
        on_failure: impl FnOnce(Failure) -> Step<T> + Send + 'static,
    ) -> Promise<T> {
        self.then_with(Callbacks::identity().or_else(on_failure))
    }

    pub fn add_both<U: Payload>(
        &self,
        on_success: impl FnOnce(T) -> Step<U> + Send + 'static,
        on_failure: impl FnOnce(Failure) -> Step<U> + Send + 'static,
    ) -> Promise<U> {
        self.then_or_else(on_success, on_failure)
    }

    /// A child that settles exactly as `self` does.
    pub fn chain(&self) -> Promise<T> {
        self.then_with(Callbacks::identity())
    }

    /// Queue a raw listener; it is notified synchronously on settlement.
    pub(crate) fn subscribe(&self, listener: Box<dyn Notify<T>>) {
        self.inner.enqueue(listener);
    }

    pub(crate) fn prune_abandoned(&self) {
        self.inner.prune_abandoned();
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Settle `target` with this promise's outcome, forwarding progress too.
    pub(crate) fn forward_to(&self, target: Deferred<T>) {
        let progress_target = target.clone();
        let callbacks = Callbacks::identity()
            .on_progress(move |update| progress_target.progress(update));
        self.inner
            .enqueue(Box::new(Listener::new(callbacks, target)));
    }

    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.inner.cancel(may_interrupt)
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// The settled outcome, if any. Does not count as observing a failure.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.inner.outcome()
    }

    /// Whether both views share the same backing Deferred.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Payload> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.inner.lock().label())
            .finish()
    }
}
