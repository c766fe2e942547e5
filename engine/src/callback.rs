//! Handler types attached to a promise.

use std::sync::Arc;

use pledge_types::{Failure, Progress};

use crate::deferred::Promise;

/// Bound shared by every value that flows through a promise.
///
/// Values are cloned once per listener, so cheap clones are preferable.
pub trait Payload: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> Payload for T {}

/// What a handler produced.
pub enum Step<U> {
    /// Resolve the chained promise with this value.
    Value(U),
    /// Reject the chained promise with this failure.
    Fail(Failure),
    /// Settle the chained promise with whatever this promise settles with.
    Adopt(Promise<U>),
}

impl<U> From<Result<U, Failure>> for Step<U> {
    fn from(result: Result<U, Failure>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(failure) => Self::Fail(failure),
        }
    }
}

impl<U> From<Promise<U>> for Step<U> {
    fn from(promise: Promise<U>) -> Self {
        Self::Adopt(promise)
    }
}

impl<U> std::fmt::Debug for Step<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Step::Value(..)"),
            Self::Fail(failure) => f.debug_tuple("Step::Fail").field(failure).finish(),
            Self::Adopt(_) => f.write_str("Step::Adopt(..)"),
        }
    }
}

/// Success transform from `T` to `U`.
pub enum Callback<T, U> {
    /// Pass-through; settles the chained promise without touching the executor.
    Identity(fn(T) -> U),
    Handler(Box<dyn FnOnce(T) -> Step<U> + Send>),
}

impl<T> Callback<T, T> {
    #[must_use]
    pub fn identity() -> Self {
        Self::Identity(std::convert::identity)
    }
}

impl<T, U> Callback<T, U> {
    pub fn handler(f: impl FnOnce(T) -> Step<U> + Send + 'static) -> Self {
        Self::Handler(Box::new(f))
    }

    #[must_use]
    pub const fn is_identity(&self) -> bool {
        matches!(self, Self::Identity(_))
    }
}

pub type Errback<U> = Box<dyn FnOnce(Failure) -> Step<U> + Send>;

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// The (success, failure, progress) triple handed to `then_with`.
pub struct Callbacks<T, U> {
    pub(crate) on_success: Callback<T, U>,
    pub(crate) on_failure: Option<Errback<U>>,
    pub(crate) on_progress: Option<ProgressFn>,
}

impl<T, U> Callbacks<T, U> {
    pub fn new(on_success: impl FnOnce(T) -> Step<U> + Send + 'static) -> Self {
        Self {
            on_success: Callback::handler(on_success),
            on_failure: None,
            on_progress: None,
        }
    }

    #[must_use]
    pub fn or_else(mut self, on_failure: impl FnOnce(Failure) -> Step<U> + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(on_failure));
        self
    }

    #[must_use]
    pub fn on_progress(mut self, on_progress: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Split into (success, failure, progress) for callers that run the
    /// handlers themselves.
    pub fn into_parts(self) -> (Callback<T, U>, Option<Errback<U>>, Option<ProgressFn>) {
        (self.on_success, self.on_failure, self.on_progress)
    }
}

impl<T> Callbacks<T, T> {
    /// No success transform; failures propagate unless `or_else` is added.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            on_success: Callback::identity(),
            on_failure: None,
            on_progress: None,
        }
    }
}
