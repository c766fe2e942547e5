//! `when_each` fan-in ordering, progress and failure behavior

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pledge::{Callbacks, Eventual, Failure, Progress, RejectMode};

use crate::common::{WAIT, runtime, service};

#[test]
fn results_follow_input_order_not_completion_order() -> anyhow::Result<()> {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let inputs: Vec<_> = (0..3).map(|_| service.defer::<String>()).collect();
    let all = service.when_each(inputs.iter().map(|d| Eventual::Pending(d.promise())).collect());

    inputs[1].resolve("r1".to_string())?;
    inputs[2].resolve("r2".to_string())?;
    assert!(!all.is_done());
    inputs[0].resolve("r0".to_string())?;

    assert_eq!(all.wait(WAIT)?, vec!["r0", "r1", "r2"]);
    Ok(())
}

#[test]
fn first_failure_wins() {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let inputs: Vec<_> = (0..3).map(|_| service.defer::<i32>()).collect();
    let all = service.when_each(inputs.iter().map(|d| Eventual::Pending(d.promise())).collect());

    inputs[2].reject(Failure::new("third")).unwrap();
    let err = all.wait(WAIT).unwrap_err();
    assert_eq!(err.failure().and_then(Failure::message), Some("third"));

    inputs[0].resolve(0).unwrap();
    inputs[1].reject(Failure::new("second")).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let outcome = all.outcome().unwrap();
    assert_eq!(outcome.failure().and_then(Failure::message), Some("third"));
}

#[test]
fn progress_counts_up_to_total() {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let inputs: Vec<_> = (0..4).map(|_| service.defer::<usize>()).collect();
    let all = service.when_each(inputs.iter().map(|d| Eventual::Pending(d.promise())).collect());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let tracked = all.then_with(Callbacks::identity().on_progress(move |p: Progress| {
        sink.lock().unwrap().push(p);
    }));

    for (i, deferred) in inputs.iter().enumerate().rev() {
        deferred.resolve(i).unwrap();
    }
    assert_eq!(tracked.wait(WAIT).unwrap(), vec![0, 1, 2, 3]);

    let seen = seen.lock().unwrap();
    let completed: Vec<usize> = seen.iter().map(|p| p.completed()).collect();
    assert_eq!(completed, vec![1, 2, 3, 4]);
    assert!(seen.iter().all(|p| p.total() == 4));
    assert!(seen.last().is_some_and(|p| p.is_complete()));
}

#[test]
fn mixed_ready_failed_and_pending_inputs() {
    let rt = runtime();
    let service = service(&rt, RejectMode::Immediate);
    let ok = service.when_each(vec![
        Eventual::Ready(1),
        service.delay(Duration::from_millis(5), 2).into(),
        service.resolved(3).into(),
    ]);
    assert_eq!(ok.wait(WAIT).unwrap(), vec![1, 2, 3]);

    let failed = service.when_each(vec![
        Eventual::Ready(1),
        Eventual::Failed(Failure::new("input failed")),
        service.delay(Duration::from_millis(5), 3).into(),
    ]);
    assert!(failed.wait(WAIT).is_err());
}

#[test]
fn empty_input_resolves_immediately() {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let all = service.when_each::<u8>(Vec::new());
    assert!(all.is_done());
    assert!(all.wait(WAIT).unwrap().is_empty());
}
