//! Pledge: deferred results with chaining, cancellation and fan-in.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pledge::{PledgeConfig, PromisesService, Step, TokioExecutor};
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let executor = Arc::new(TokioExecutor::new(runtime.handle().clone()));
//! let service = PromisesService::new(executor, PledgeConfig::default()).unwrap();
//!
//! let deferred = service.defer::<u32>();
//! let next = deferred.promise().then(|v| Step::Value(v + 1));
//! deferred.resolve(41).unwrap();
//! assert_eq!(next.wait(None).unwrap(), 42);
//! ```

mod eventual;
mod gather;
mod service;

pub use eventual::Eventual;
pub use service::PromisesService;

pub use pledge_collector::{FailureCollector, LeakReporter, SweepSummary, TracingReporter};
pub use pledge_config::{CollectorConfig, ConfigError, PledgeConfig, RejectMode};
pub use pledge_engine::{
    Callback, Callbacks, Canceller, Deferred, Engine, Errback, Executor, FailureSink, Payload,
    Promise, ProgressFn, ScheduledTask, Step, Task, TimerClaim, TokioExecutor, TrackingHandle,
};
pub use pledge_types::{
    Cause, ExecutorError, Failure, FailureKind, Outcome, Progress, PromiseError, WaitError,
    WeakFailure,
};
