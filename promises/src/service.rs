//! `PromisesService`: the entry point that owns an engine and its collector.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use pledge_collector::FailureCollector;
use pledge_config::{ConfigError, PledgeConfig};
use pledge_engine::{
    Callback, Callbacks, Canceller, Deferred, Engine, Executor, FailureSink, Payload, Promise,
    Step, Task,
};
use pledge_types::{ExecutorError, Failure, WaitError};

use crate::Eventual;
use crate::gather;

/// Factory and orchestration helpers over one shared [`Engine`].
pub struct PromisesService {
    engine: Arc<Engine>,
    collector: Option<Arc<FailureCollector>>,
}

impl PromisesService {
    /// Build the engine and, unless disabled, install and start the failure
    /// collector as its sink. The whole config is validated first, so a
    /// disabled collector section must still be well formed.
    pub fn new(executor: Arc<dyn Executor>, config: PledgeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = Engine::new(Arc::clone(&executor), config.reject_mode);
        let collector = if config.collector.enabled {
            let collector = Arc::new(FailureCollector::new(executor, config.collector)?);
            engine.set_failure_sink(collector.clone());
            collector.start();
            Some(collector)
        } else {
            tracing::info!("Failure collector disabled");
            None
        };
        Ok(Self { engine, collector })
    }

    /// Replace the installed failure sink.
    #[must_use]
    pub fn with_failure_sink(self, sink: Arc<dyn FailureSink>) -> Self {
        self.engine.set_failure_sink(sink);
        self
    }

    pub fn set_failure_sink(&self, sink: Arc<dyn FailureSink>) {
        self.engine.set_failure_sink(sink);
    }

    /// Remove `sink` if it is the installed one.
    pub fn unset_failure_sink(&self, sink: &Arc<dyn FailureSink>) -> bool {
        self.engine.unset_failure_sink(sink)
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    #[must_use]
    pub fn collector(&self) -> Option<&FailureCollector> {
        self.collector.as_deref()
    }

    #[must_use]
    pub fn defer<T: Payload>(&self) -> Deferred<T> {
        self.engine.defer()
    }

    #[must_use]
    pub fn defer_with_canceller<T: Payload>(
        &self,
        canceller: impl Canceller + 'static,
    ) -> Deferred<T> {
        Deferred::with_canceller(&self.engine, canceller)
    }

    /// A promise already resolved with `value`.
    #[must_use]
    pub fn resolved<T: Payload>(&self, value: T) -> Promise<T> {
        let deferred = self.defer();
        settle(deferred.resolve(value));
        deferred.promise()
    }

    /// A promise already rejected with `failure`.
    #[must_use]
    pub fn rejected<T: Payload>(&self, failure: Failure) -> Promise<T> {
        let deferred = self.defer();
        settle(deferred.reject_now(failure));
        deferred.promise()
    }

    /// Apply `callbacks` to `value`.
    ///
    /// A pending value chains through [`Promise::then_with`]. A ready value or
    /// failure runs the matching handler on the calling thread and wraps its
    /// result in a settled promise.
    pub fn when<T: Payload, U: Payload>(
        &self,
        value: Eventual<T>,
        callbacks: Callbacks<T, U>,
    ) -> Promise<U> {
        let step = match value {
            Eventual::Pending(promise) => return promise.then_with(callbacks),
            Eventual::Ready(value) => match callbacks.into_parts().0 {
                Callback::Identity(pass) => Ok(Step::Value(pass(value))),
                Callback::Handler(handler) => catch_unwind(AssertUnwindSafe(move || handler(value))),
            },
            Eventual::Failed(failure) => match callbacks.into_parts().1 {
                Some(errback) => catch_unwind(AssertUnwindSafe(move || errback(failure))),
                None => Ok(Step::Fail(failure)),
            },
        };

        match step {
            Ok(Step::Value(value)) => self.resolved(value),
            Ok(Step::Fail(failure)) => self.rejected(failure),
            Ok(Step::Adopt(promise)) => promise,
            Err(payload) => self.rejected(Failure::from_panic(&*payload)),
        }
    }

    /// Resolve with every input's value in input order once all succeed.
    ///
    /// The first failure rejects the result; later outcomes are ignored.
    /// Progress `completed/total` is emitted after each success.
    pub fn when_each<T: Payload>(&self, inputs: Vec<Eventual<T>>) -> Promise<Vec<T>> {
        gather::when_each(self.defer(), inputs).promise()
    }

    /// Block until `value` is available. `None` or zero waits without bound.
    pub fn wait_for<T: Payload>(
        &self,
        value: Eventual<T>,
        timeout: Option<Duration>,
    ) -> Result<T, WaitError> {
        match value {
            Eventual::Ready(value) => Ok(value),
            Eventual::Failed(failure) => Err(WaitError::Rejected(failure)),
            Eventual::Pending(promise) => promise.wait(timeout),
        }
    }

    /// A promise resolved with `value` after `duration`.
    ///
    /// Cancelling it cancels the timer, so the value is never delivered.
    pub fn delay<T: Payload>(&self, duration: Duration, value: T) -> Promise<T> {
        let deferred = self.defer::<T>();
        let target = deferred.clone();
        let fallback = deferred.clone();
        let task = Task::new(move || settle(target.resolve(value))).on_abandon(move || {
            settle(fallback.reject_now(Failure::executor_unavailable(ExecutorError::Abandoned)));
        });
        let scheduled = self.engine.executor().schedule(duration, task);
        match scheduled {
            Ok(mut timer) => deferred.set_canceller(move |_: bool| timer.cancel()),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to schedule delayed value");
                settle(deferred.reject_now(Failure::executor_unavailable(err)));
            }
        }
        deferred.promise()
    }

    /// Stop the collector and detach it from the engine.
    pub fn shutdown(&self) {
        if let Some(collector) = &self.collector {
            let sink: Arc<dyn FailureSink> = collector.clone();
            self.engine.unset_failure_sink(&sink);
            collector.shutdown();
        }
    }
}

impl std::fmt::Debug for PromisesService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromisesService")
            .field("engine", &self.engine)
            .field("collector", &self.collector)
            .finish()
    }
}

fn settle(result: Result<(), pledge_types::PromiseError>) {
    if let Err(err) = result {
        tracing::debug!(error = %err, "Settlement skipped");
    }
}
