//! Executor capability: where units of work run.
//!
//! The engine never owns threads. Every handler invocation, deferred
//! rejection and timer is handed to an [`Executor`] supplied by the host.
//! [`TokioExecutor`] adapts a tokio runtime handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use pledge_types::ExecutorError;
use tokio::runtime::Handle;

/// A unit of work.
///
/// A task may carry a fallback that runs if the executor drops it after
/// accepting it, for example because the backing runtime shut down. Work an
/// executor refuses outright is discarded without the fallback; the caller
/// sees the error instead.
pub struct Task {
    run: Option<Box<dyn FnOnce() + Send>>,
    on_abandon: Option<Box<dyn FnOnce() + Send>>,
}

impl Task {
    pub fn new(run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            run: Some(Box::new(run)),
            on_abandon: None,
        }
    }

    /// Run `fallback` if this task is dropped without being run.
    #[must_use]
    pub fn on_abandon(mut self, fallback: impl FnOnce() + Send + 'static) -> Self {
        self.on_abandon = Some(Box::new(fallback));
        self
    }

    pub fn run(mut self) {
        self.on_abandon = None;
        if let Some(run) = self.run.take() {
            run();
        }
    }

    /// Drop without running the fallback.
    pub fn discard(mut self) {
        self.on_abandon = None;
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.run.take().is_some()
            && let Some(fallback) = self.on_abandon.take()
        {
            tracing::warn!("Executor dropped a task without running it");
            fallback();
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("pending", &self.run.is_some())
            .field("has_fallback", &self.on_abandon.is_some())
            .finish()
    }
}

/// Accepts units of work for immediate or delayed execution.
///
/// Implementations must accept submissions from many threads at once. Work
/// that will never run must either be refused with an error (and discarded)
/// or dropped, which fires the task's fallback; it must never vanish silently.
pub trait Executor: Send + Sync {
    fn submit(&self, task: Task) -> Result<(), ExecutorError>;

    fn schedule(&self, delay: Duration, task: Task) -> Result<ScheduledTask, ExecutorError>;
}

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Handle to a delayed unit of work.
///
/// Firing and cancelling race through a single atomic claim, so a task either
/// runs or is cancelled, never both.
pub struct ScheduledTask {
    claim: Arc<AtomicU8>,
    abort: Option<Box<dyn FnOnce() + Send>>,
}

/// The firing side of a [`ScheduledTask`], moved into the timer body.
pub struct TimerClaim(Arc<AtomicU8>);

impl TimerClaim {
    /// Claim the right to run. Returns false if the task was cancelled.
    #[must_use]
    pub fn fire(&self) -> bool {
        self.0
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == CANCELLED
    }
}

/// Timer body owned by the spawned sleep. Dropped before firing, its task
/// falls back unless the timer was cancelled on purpose.
struct TimerBody {
    claim: TimerClaim,
    task: Option<Task>,
}

impl TimerBody {
    fn fire(&mut self) {
        if self.claim.fire()
            && let Some(task) = self.task.take()
        {
            task.run();
        }
    }
}

impl Drop for TimerBody {
    fn drop(&mut self) {
        if let Some(task) = self.task.take()
            && self.claim.is_cancelled()
        {
            task.discard();
        }
    }
}

impl ScheduledTask {
    /// Create an armed handle and its firing claim.
    #[must_use]
    pub fn arm() -> (Self, TimerClaim) {
        let claim = Arc::new(AtomicU8::new(ARMED));
        (
            Self {
                claim: Arc::clone(&claim),
                abort: None,
            },
            TimerClaim(claim),
        )
    }

    /// Hook run after a successful cancel, e.g. to abort the backing timer.
    pub fn on_cancel(&mut self, abort: impl FnOnce() + Send + 'static) {
        self.abort = Some(Box::new(abort));
    }

    /// Cancel the task. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self) -> bool {
        let cancelled = self
            .claim
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled && let Some(abort) = self.abort.take() {
            abort();
        }
        cancelled
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.claim.load(Ordering::Acquire) == FIRED
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.claim.load(Ordering::Acquire) == CANCELLED
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("fired", &self.is_fired())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// [`Executor`] backed by a tokio runtime.
///
/// `close()` makes every later submission fail with [`ExecutorError::Closed`]
/// so callers fail fast instead of waiting on work that will never run.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: Handle,
    closed: Arc<AtomicBool>,
}

impl TokioExecutor {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Executor for the runtime the caller is running in, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("Closing executor");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self, task: Task) -> Result<Task, ExecutorError> {
        if self.is_closed() {
            task.discard();
            Err(ExecutorError::Closed)
        } else {
            Ok(task)
        }
    }
}

impl Executor for TokioExecutor {
    fn submit(&self, task: Task) -> Result<(), ExecutorError> {
        let task = self.check_open(task)?;
        self.handle.spawn(async move { task.run() });
        Ok(())
    }

    fn schedule(&self, delay: Duration, task: Task) -> Result<ScheduledTask, ExecutorError> {
        let task = self.check_open(task)?;
        let (mut scheduled, claim) = ScheduledTask::arm();
        let mut body = TimerBody {
            claim,
            task: Some(task),
        };
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            body.fire();
        });
        scheduled.on_cancel(move || join.abort());
        Ok(scheduled)
    }
}

impl std::fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioExecutor")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
