//! Failure sink capability: where unobserved rejections are reported.

use pledge_types::Failure;

/// Opaque token issued by a [`FailureSink`] for one tracked failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackingHandle(u64);

impl TrackingHandle {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Receives rejections that settled with nobody listening.
///
/// The engine calls `failed` when a Deferred is rejected with an empty
/// listener queue, and `collected` once a listener is later handed that
/// failure. Implementations must not retain a strong [`Failure`] handle.
pub trait FailureSink: Send + Sync {
    /// Start tracking `failure`. `None` means the sink refused it.
    fn failed(&self, failure: &Failure) -> Option<TrackingHandle>;

    /// The failure behind `handle` was observed; stop tracking it.
    fn collected(&self, handle: TrackingHandle);
}
