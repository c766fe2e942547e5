//! Shared wiring every Deferred created by one service points at.

use std::sync::{Arc, PoisonError, RwLock};

use pledge_config::RejectMode;

use crate::callback::Payload;
use crate::deferred::Deferred;
use crate::executor::Executor;
use crate::sink::FailureSink;

/// The injected executor, the optional failure sink, and the rejection mode.
pub struct Engine {
    executor: Arc<dyn Executor>,
    failure_sink: RwLock<Option<Arc<dyn FailureSink>>>,
    reject_mode: RejectMode,
}

fn same_sink(a: &Arc<dyn FailureSink>, b: &Arc<dyn FailureSink>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

impl Engine {
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, reject_mode: RejectMode) -> Arc<Self> {
        tracing::debug!(reject_mode = reject_mode.as_str(), "Creating promise engine");
        Arc::new(Self {
            executor,
            failure_sink: RwLock::new(None),
            reject_mode,
        })
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    #[must_use]
    pub fn reject_mode(&self) -> RejectMode {
        self.reject_mode
    }

    #[must_use]
    pub fn failure_sink(&self) -> Option<Arc<dyn FailureSink>> {
        self.failure_sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_failure_sink(&self, sink: Arc<dyn FailureSink>) {
        tracing::info!("Set failure sink");
        *self
            .failure_sink
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    /// Remove `sink` if it is the one installed. Returns whether it was removed.
    pub fn unset_failure_sink(&self, sink: &Arc<dyn FailureSink>) -> bool {
        let mut slot = self
            .failure_sink
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| same_sink(current, sink)) {
            tracing::info!("Unset failure sink");
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Create a pending Deferred bound to this engine.
    #[must_use]
    pub fn defer<T: Payload>(self: &Arc<Self>) -> Deferred<T> {
        Deferred::new(self)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("reject_mode", &self.reject_mode)
            .field("has_failure_sink", &self.failure_sink().is_some())
            .finish_non_exhaustive()
    }
}
