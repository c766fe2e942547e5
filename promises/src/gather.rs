//! Fan-in of many eventual values into one promise of a vector.

use std::sync::{Arc, Mutex, PoisonError};

use pledge_engine::{Callbacks, Deferred, Payload, Step};
use pledge_types::{Failure, Progress, PromiseError};

use crate::Eventual;

struct Slots<T> {
    results: Vec<Option<T>>,
    completed: usize,
    /// Set by the first failure, before the aggregate's rejection lands.
    failed: bool,
}

/// Aggregate state shared by every input's handlers.
struct Gather<T: Payload> {
    aggregate: Deferred<Vec<T>>,
    slots: Mutex<Slots<T>>,
}

impl<T: Payload> Gather<T> {
    fn succeed(&self, index: usize, value: T) {
        let results = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if slots.failed || self.aggregate.is_done() || slots.results[index].is_some() {
                return;
            }
            slots.results[index] = Some(value);
            slots.completed += 1;
            let total = slots.results.len();

            // Emitted under the slot lock so `completed` never goes backwards.
            self.aggregate.progress(Progress::new(slots.completed, total));
            if slots.completed < total {
                return;
            }
            std::mem::take(&mut slots.results)
        };

        let values: Vec<T> = results.into_iter().flatten().collect();
        if let Err(err) = self.aggregate.resolve(values) {
            tracing::debug!(error = %err, "Fan-in already settled");
        }
    }

    fn fail(&self, index: usize, failure: Failure) {
        {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if slots.failed {
                tracing::debug!(index, "Ignoring failure after fan-in failed");
                return;
            }
            slots.failed = true;
        }

        match self.aggregate.reject(failure.clone()) {
            Ok(()) => tracing::debug!(index, "Fan-in rejected by input"),
            Err(PromiseError::Executor(err)) => {
                tracing::warn!(index, error = %err, "Rejecting fan-in inline");
                if let Err(err) = self.aggregate.reject_now(failure) {
                    tracing::debug!(index, error = %err, "Fan-in already settled");
                }
            }
            Err(err) => tracing::debug!(index, error = %err, "Ignoring failure after fan-in settled"),
        }
    }
}

/// Resolve with every input's value in input order, or reject with the first
/// failure observed.
pub(crate) fn when_each<T: Payload>(
    aggregate: Deferred<Vec<T>>,
    inputs: Vec<Eventual<T>>,
) -> Deferred<Vec<T>> {
    if inputs.is_empty() {
        if let Err(err) = aggregate.resolve(Vec::new()) {
            tracing::debug!(error = %err, "Fan-in already settled");
        }
        return aggregate;
    }

    let gather = Arc::new(Gather {
        aggregate: aggregate.clone(),
        slots: Mutex::new(Slots {
            results: vec![None; inputs.len()],
            completed: 0,
            failed: false,
        }),
    });

    for (index, input) in inputs.into_iter().enumerate() {
        match input {
            Eventual::Ready(value) => gather.succeed(index, value),
            Eventual::Failed(failure) => gather.fail(index, failure),
            Eventual::Pending(promise) => {
                let on_value = Arc::clone(&gather);
                let on_failure = Arc::clone(&gather);
                let _observed = promise.then_with(
                    Callbacks::new(move |value| {
                        on_value.succeed(index, value);
                        Step::Value(())
                    })
                    .or_else(move |failure| {
                        on_failure.fail(index, failure);
                        Step::Value(())
                    }),
                );
            }
        }
    }
    aggregate
}
