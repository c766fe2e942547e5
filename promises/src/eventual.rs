use pledge_engine::{Payload, Promise};
use pledge_types::Failure;

/// A value that is ready now, failed already, or still pending.
///
/// Input to the facade operations that accept "either a value or a promise".
#[derive(Debug, Clone)]
pub enum Eventual<T: Payload> {
    Ready(T),
    Failed(Failure),
    Pending(Promise<T>),
}

impl<T: Payload> Eventual<T> {
    #[must_use]
    pub const fn is_promise(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl<T: Payload> From<Promise<T>> for Eventual<T> {
    fn from(promise: Promise<T>) -> Self {
        Self::Pending(promise)
    }
}

impl<T: Payload> From<Failure> for Eventual<T> {
    fn from(failure: Failure) -> Self {
        Self::Failed(failure)
    }
}
