//! Failure payloads.
//!
//! A [`Failure`] is the value carried through rejection channels. It is a cheap
//! shared handle so every listener can receive the same payload, and so the
//! leak detector can track it through a [`WeakFailure`] without keeping it
//! alive.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Weak};

/// A causing error attached to a failure.
pub type Cause = Arc<dyn Error + Send + Sync + 'static>;

/// Classification of a failure payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Produced by a caller rejecting a Deferred or a handler returning a failure.
    Rejected,
    /// Produced by a successful cancellation.
    Cancelled,
    /// A user handler panicked while a listener was being notified.
    HandlerPanic,
    /// The executor refused or dropped the unit of work that would have run a handler.
    ExecutorUnavailable,
}

impl FailureKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Rejected => "callback failed",
            Self::Cancelled => "cancelled",
            Self::HandlerPanic => "handler panicked",
            Self::ExecutorUnavailable => "executor unavailable",
        }
    }
}

struct FailureInner {
    kind: FailureKind,
    message: Option<String>,
    cause: Option<Cause>,
}

/// An asynchronous error, distinct from a successful result by type.
#[derive(Clone)]
pub struct Failure {
    inner: Arc<FailureInner>,
}

impl Failure {
    fn build(kind: FailureKind, message: Option<String>, cause: Option<Cause>) -> Self {
        Self {
            inner: Arc::new(FailureInner {
                kind,
                message,
                cause,
            }),
        }
    }

    /// A rejection carrying only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self::build(FailureKind::Rejected, Some(message.into()), None)
    }

    /// A rejection caused by an error value.
    #[must_use]
    pub fn from_error<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::build(FailureKind::Rejected, None, Some(Arc::new(error)))
    }

    /// A rejection with both a message and a causing error.
    #[must_use]
    pub fn with_cause<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::build(
            FailureKind::Rejected,
            Some(message.into()),
            Some(Arc::new(cause)),
        )
    }

    /// The reason stored by a successful cancellation.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::build(FailureKind::Cancelled, None, None)
    }

    /// A cancellation whose canceller faulted.
    #[must_use]
    pub fn cancelled_with(message: impl Into<String>) -> Self {
        Self::build(FailureKind::Cancelled, Some(message.into()), None)
    }

    /// Convert a caught panic payload into a failure.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::build(
            FailureKind::HandlerPanic,
            Some(panic_message(payload)),
            None,
        )
    }

    #[must_use]
    pub fn executor_unavailable<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::build(
            FailureKind::ExecutorUnavailable,
            None,
            Some(Arc::new(error)),
        )
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.inner.kind
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.inner.message.as_deref()
    }

    #[must_use]
    pub fn cause(&self) -> Option<&Cause> {
        self.inner.cause.as_ref()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.kind == FailureKind::Cancelled
    }

    /// Iterate the nested cause chain, outermost first.
    pub fn causes(&self) -> impl Iterator<Item = &(dyn Error + 'static)> {
        std::iter::successors(self.source(), |&err| err.source())
    }

    /// Whether both handles refer to the same payload.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A tracking reference that does not keep the payload alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakFailure {
        WeakFailure(Arc::downgrade(&self.inner))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.inner.kind.label())?;
        if let Some(message) = &self.inner.message {
            write!(f, ": {message}")?;
        }
        if let Some(cause) = &self.inner.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("kind", &self.inner.kind)
            .field("message", &self.inner.message)
            .field("cause", &self.inner.cause.as_ref().map(ToString::to_string))
            .finish()
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .cause
            .as_deref()
            .map(|cause| cause as &(dyn Error + 'static))
    }
}

/// Weak handle to a failure payload.
///
/// Reports reclaimed once every strong [`Failure`] handle has been dropped.
#[derive(Clone)]
pub struct WeakFailure(Weak<FailureInner>);

impl WeakFailure {
    #[must_use]
    pub fn is_reclaimed(&self) -> bool {
        self.0.strong_count() == 0
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Failure> {
        self.0.upgrade().map(|inner| Failure { inner })
    }
}

impl fmt::Debug for WeakFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakFailure")
            .field("reclaimed", &self.is_reclaimed())
            .finish()
    }
}

/// Render a panic payload as text.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
