//! Blocking retrieval through `wait_for`

use std::thread;
use std::time::{Duration, Instant};

use pledge::{Eventual, Failure, RejectMode, WaitError};

use crate::common::{runtime, service};

#[test]
fn returns_exact_value_without_timeout() -> anyhow::Result<()> {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let deferred = service.defer::<Vec<u8>>();
    let writer = deferred.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        writer.resolve(vec![1, 2, 3])
    });
    let value = service.wait_for(deferred.promise().into(), None)?;
    assert_eq!(value, vec![1, 2, 3]);
    handle.join().expect("writer thread")?;
    Ok(())
}

#[test]
fn returns_exact_failure_without_timeout() {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let deferred = service.defer::<u8>();
    let failure = Failure::new("bad input");
    deferred.reject(failure.clone()).unwrap();
    match service.wait_for(deferred.promise().into(), None) {
        Err(WaitError::Rejected(got)) => assert!(got.ptr_eq(&failure)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn short_timeout_raises_timeout() {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let deferred = service.defer::<u8>();
    let started = Instant::now();
    let err = service
        .wait_for(deferred.promise().into(), Some(Duration::from_millis(25)))
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(25));
    assert!(!deferred.is_done());
}

#[test]
fn ready_and_failed_inputs_return_at_once() {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    assert_eq!(service.wait_for(Eventual::Ready("now"), None).unwrap(), "now");
    let err = service
        .wait_for(Eventual::<()>::Failed(Failure::new("already")), None)
        .unwrap_err();
    assert_eq!(err.to_string(), "promise rejected: callback failed: already");
}

#[test]
fn cancellation_is_reported_as_cancelled() {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let deferred = service.defer_with_canceller::<u8>(|_: bool| true);
    assert!(deferred.cancel(true));
    let err = service
        .wait_for(deferred.promise().into(), Some(Duration::from_secs(1)))
        .unwrap_err();
    assert!(matches!(err, WaitError::Cancelled(ref f) if f.is_cancelled()));
}
