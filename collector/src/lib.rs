//! Failure collector: reports rejections that were dropped without ever being
//! handed to a listener.
//!
//! The collector never keeps a failure alive. Each registration stores a
//! [`WeakFailure`] next to a diagnostic rendered at registration time; a
//! periodic sweep on the executor reports every record whose payload has been
//! reclaimed. Reports are rate limited per sweep and the number of live
//! records is capped.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Local;
use pledge_config::{CollectorConfig, ConfigError};
use pledge_engine::{Executor, FailureSink, ScheduledTask, Task, TrackingHandle};
use pledge_types::{Failure, WeakFailure};

/// Destination for leak reports.
pub trait LeakReporter: Send + Sync {
    fn report(&self, diagnostic: &str);
}

/// Reports leaks as `tracing` errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl LeakReporter for TracingReporter {
    fn report(&self, diagnostic: &str) {
        tracing::error!("Uncollected failure: {diagnostic}");
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Leaks reported by this sweep.
    pub reported: usize,
    /// Reclaimed records left for a later sweep because the quota ran out.
    pub backlog: usize,
}

struct Record {
    failure: WeakFailure,
    diagnostic: String,
}

#[derive(Default)]
struct State {
    /// Keyed by registration order.
    records: BTreeMap<u64, Record>,
    next_id: u64,
    timer: Option<ScheduledTask>,
    /// Bumped per timer request; only the newest request may store its handle.
    epoch: u64,
    running: bool,
    finished: bool,
}

struct Shared {
    config: CollectorConfig,
    executor: Arc<dyn Executor>,
    reporter: Arc<dyn LeakReporter>,
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove up to one quota of reclaimed records, oldest first.
    fn take_reports(&self, state: &mut State) -> (Vec<String>, SweepSummary) {
        let quota = self.config.max_errors_per_tick as usize;
        let dead: Vec<u64> = state
            .records
            .iter()
            .filter(|(_, record)| record.failure.is_reclaimed())
            .map(|(id, _)| *id)
            .collect();
        let reports: Vec<String> = dead
            .iter()
            .take(quota)
            .filter_map(|id| state.records.remove(id))
            .map(|record| record.diagnostic)
            .collect();
        let summary = SweepSummary {
            reported: reports.len(),
            backlog: dead.len().saturating_sub(quota),
        };
        (reports, summary)
    }

    fn emit(&self, reports: &[String]) {
        for diagnostic in reports {
            self.reporter.report(diagnostic);
        }
    }

    fn sweep(&self) -> SweepSummary {
        let (reports, summary) = self.take_reports(&mut self.lock());
        self.emit(&reports);
        summary
    }

    fn stop(&self, reason: &str) {
        let mut state = self.lock();
        if state.running {
            state.running = false;
            tracing::warn!("{reason}; collector stopped");
        }
    }

    fn schedule(self: &Arc<Self>, delay: Duration) {
        let epoch = {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            state.epoch += 1;
            state.epoch
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let abandoned = Weak::clone(&weak);
        let task = Task::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.tick();
            }
        })
        .on_abandon(move || {
            if let Some(shared) = abandoned.upgrade() {
                shared.stop("Failure sweep dropped by executor");
            }
        });
        let scheduled = self.executor.schedule(delay, task);

        let mut state = self.lock();
        match scheduled {
            Ok(mut timer) => {
                if state.finished {
                    drop(state);
                    timer.cancel();
                } else if state.epoch == epoch {
                    state.timer = Some(timer);
                }
            }
            Err(err) => {
                state.running = false;
                tracing::warn!(error = %err, "Failed to schedule failure sweep; collector stopped");
            }
        }
    }

    fn tick(self: &Arc<Self>) {
        let (reports, summary) = {
            let mut state = self.lock();
            if state.finished {
                return;
            }
            self.take_reports(&mut state)
        };
        self.emit(&reports);
        let delay = if summary.backlog > 0 {
            self.config.cooldown()
        } else {
            self.config.interval()
        };
        if summary.reported > 0 {
            tracing::debug!(
                reported = summary.reported,
                backlog = summary.backlog,
                ?delay,
                "Rescheduling failure sweep"
            );
        }
        self.schedule(delay);
    }
}

/// Tracks unobserved failures and reports the ones that leak.
///
/// Install it as an engine's [`FailureSink`], then call [`start`](Self::start)
/// to begin the periodic sweep.
#[derive(Clone)]
pub struct FailureCollector {
    shared: Arc<Shared>,
}

impl FailureCollector {
    pub fn new(executor: Arc<dyn Executor>, config: CollectorConfig) -> Result<Self, ConfigError> {
        Self::with_reporter(executor, config, Arc::new(TracingReporter))
    }

    /// Validates `config` before building the collector.
    pub fn with_reporter(
        executor: Arc<dyn Executor>,
        config: CollectorConfig,
        reporter: Arc<dyn LeakReporter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                executor,
                reporter,
                state: Mutex::new(State::default()),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CollectorConfig {
        &self.shared.config
    }

    /// Begin sweeping. Calling it again, or after shutdown, does nothing.
    pub fn start(&self) {
        {
            let mut state = self.shared.lock();
            if state.running || state.finished {
                return;
            }
            state.running = true;
        }
        tracing::info!(
            interval_ms = self.shared.config.interval_ms,
            max_errors_per_tick = self.shared.config.max_errors_per_tick,
            "Failure collector started"
        );
        self.shared.schedule(self.shared.config.interval());
    }

    /// Cancel the pending sweep. Tracked records are kept but never reported.
    pub fn shutdown(&self) {
        let timer = {
            let mut state = self.shared.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            state.running = false;
            state.timer.take()
        };
        if let Some(mut timer) = timer {
            timer.cancel();
        }
        tracing::info!(tracked = self.tracked(), "Failure collector stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Number of live records.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.shared.lock().records.len()
    }

    /// Run one sweep on the calling thread.
    pub fn sweep_now(&self) -> SweepSummary {
        self.shared.sweep()
    }
}

impl FailureSink for FailureCollector {
    fn failed(&self, failure: &Failure) -> Option<TrackingHandle> {
        let mut state = self.shared.lock();
        let cap = self.shared.config.hard_max_tracked;
        if cap != 0 && state.records.len() >= cap {
            tracing::debug!(cap, "Failure collector full; not tracking failure");
            return None;
        }

        let id = state.next_id;
        state.next_id += 1;
        state.records.insert(
            id,
            Record {
                failure: failure.downgrade(),
                diagnostic: render(failure),
            },
        );
        Some(TrackingHandle::new(id))
    }

    fn collected(&self, handle: TrackingHandle) {
        self.shared.lock().records.remove(&handle.id());
    }
}

impl std::fmt::Debug for FailureCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("FailureCollector")
            .field("tracked", &state.records.len())
            .field("running", &state.running)
            .field("finished", &state.finished)
            .finish_non_exhaustive()
    }
}

/// Timestamp, classification, message and the nested cause chain.
fn render(failure: &Failure) -> String {
    let mut out = format!(
        "[{}] {}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        failure.kind().label()
    );
    if let Some(message) = failure.message() {
        let _ = write!(out, ": {message}");
    }
    for cause in failure.causes() {
        let _ = write!(out, "\n  caused by: {cause}");
    }
    out
}
