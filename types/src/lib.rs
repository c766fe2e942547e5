//! Core value types for Pledge.
//!
//! This crate contains pure value types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the workspace.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod failure;
mod outcome;

pub use failure::{Cause, Failure, FailureKind, WeakFailure, panic_message};
pub use outcome::Outcome;

use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Progress
// ============================================================================

/// Completion counter emitted while a fan-in is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Progress {
    completed: usize,
    total: usize,
}

impl Progress {
    #[must_use]
    pub const fn new(completed: usize, total: usize) -> Self {
        Self { completed, total }
    }

    #[must_use]
    pub const fn completed(self) -> usize {
        self.completed
    }

    #[must_use]
    pub const fn total(self) -> usize {
        self.total
    }

    #[must_use]
    pub const fn is_complete(self) -> bool {
        self.completed >= self.total
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// The executor refused a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("executor is closed")]
    Closed,
    #[error("executor rejected task: {0}")]
    Rejected(String),
    /// The executor accepted the task but dropped it without running it,
    /// typically because its runtime shut down.
    #[error("executor dropped task without running it")]
    Abandoned,
}

/// Programming faults returned to the call site that misused a Deferred.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromiseError {
    #[error("deferred is already settled")]
    AlreadySettled,
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Outcome of a blocking wait that did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum WaitError {
    #[error("timed out after {0:?} waiting for promise")]
    Timeout(Duration),
    #[error("promise rejected: {0}")]
    Rejected(#[source] Failure),
    #[error("promise cancelled: {0}")]
    Cancelled(#[source] Failure),
}

impl WaitError {
    /// The failure carried by a rejection or cancellation.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Rejected(failure) | Self::Cancelled(failure) => Some(failure),
            Self::Timeout(_) => None,
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
