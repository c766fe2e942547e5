//! Deferred/Promise engine for Pledge.
//!
//! A [`Deferred`] is settled exactly once (resolved, rejected or cancelled)
//! and its [`Promise`] view chains handlers that run on an injected
//! [`Executor`]. Rejections nobody listens to are reported to an optional
//! [`FailureSink`].

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod callback;
mod deferred;
mod engine;
mod executor;
mod listener;
mod sink;
mod wait;

pub use callback::{Callback, Callbacks, Errback, Payload, ProgressFn, Step};
pub use deferred::{Canceller, Deferred, Promise};
pub use engine::Engine;
pub use executor::{Executor, ScheduledTask, Task, TimerClaim, TokioExecutor};
pub use sink::{FailureSink, TrackingHandle};
