//! Settled result of a Deferred.

use crate::Failure;

/// Terminal payload of a settled Deferred.
///
/// Cancellation is a special rejection: it carries a failure like
/// [`Outcome::Rejected`] but stays distinguishable for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E = Failure> {
    Resolved(T),
    Rejected(E),
    Cancelled(E),
}

impl<T, E> Outcome<T, E> {
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// True for both rejection and cancellation.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !self.is_resolved()
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Rejected(_) | Self::Cancelled(_) => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Resolved(_) => None,
            Self::Rejected(err) | Self::Cancelled(err) => Some(err),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U, E> {
        match self {
            Self::Resolved(value) => Outcome::Resolved(f(value)),
            Self::Rejected(err) => Outcome::Rejected(err),
            Self::Cancelled(err) => Outcome::Cancelled(err),
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Resolved(value) => Ok(value),
            Self::Rejected(err) | Self::Cancelled(err) => Err(err),
        }
    }
}
