//! Delayed values and timer cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use pledge::{RejectMode, Step, WaitError};

use crate::common::{WAIT, runtime, service};

#[test]
fn delay_resolves_no_earlier_than_requested() -> anyhow::Result<()> {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let started = Instant::now();
    let value = service.delay(Duration::from_millis(40), 7_u64).wait(WAIT)?;
    assert_eq!(value, 7);
    assert!(started.elapsed() >= Duration::from_millis(40));
    Ok(())
}

#[test]
fn cancelled_delay_settles_cancelled_and_never_fires() {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let delivered = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&delivered);
    let delayed = service.delay(Duration::from_millis(40), "late");
    let observed = delayed.then(move |v| {
        flag.store(true, Ordering::SeqCst);
        Step::Value(v)
    });

    assert!(delayed.cancel(false));
    assert!(delayed.is_cancelled());
    assert!(matches!(observed.wait(WAIT), Err(WaitError::Cancelled(_))));

    std::thread::sleep(Duration::from_millis(100));
    assert!(!delivered.load(Ordering::SeqCst));
    assert!(!delayed.cancel(false));
}

#[test]
fn cancel_after_fire_is_noop() {
    let rt = runtime();
    let service = service(&rt, RejectMode::Deferred);
    let delayed = service.delay(Duration::from_millis(5), 1);
    assert_eq!(delayed.wait(WAIT).unwrap(), 1);
    assert!(!delayed.cancel(true));
    assert!(!delayed.is_cancelled());
}
