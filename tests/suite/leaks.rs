//! Leak detection for rejections nobody observed

use std::sync::Arc;
use std::time::{Duration, Instant};

use pledge::{
    CollectorConfig, FailureCollector, FailureSink, PromisesService, RejectMode, Step,
    SweepSummary,
};
use tokio::runtime::Runtime;

use crate::common::{ChannelReporter, WAIT, executor, runtime, service};

fn with_collector(
    rt: &Runtime,
    reject_mode: RejectMode,
    config: CollectorConfig,
) -> (PromisesService, Arc<FailureCollector>, std::sync::mpsc::Receiver<String>) {
    let (reporter, rx) = ChannelReporter::new();
    let collector = Arc::new(
        FailureCollector::with_reporter(executor(rt), config, reporter)
            .expect("valid collector config"),
    );
    let sink: Arc<dyn FailureSink> = collector.clone();
    let service = service(rt, reject_mode).with_failure_sink(sink);
    (service, collector, rx)
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn unobserved_rejection_reported_once_after_drop() {
    let rt = runtime();
    let (service, collector, rx) =
        with_collector(&rt, RejectMode::Immediate, CollectorConfig::default());

    let deferred = service.defer::<i32>();
    deferred.reject(pledge::Failure::new("nobody listened")).unwrap();
    assert_eq!(collector.tracked(), 1);
    assert_eq!(collector.sweep_now().reported, 0);

    drop(deferred);
    assert_eq!(collector.sweep_now().reported, 1);
    assert_eq!(collector.sweep_now().reported, 0);

    let report = rx.try_recv().unwrap();
    assert!(report.ends_with("callback failed: nobody listened"), "{report}");
    assert!(rx.try_recv().is_err());
}

#[test]
fn deferred_rejection_is_tracked_once_it_settles() {
    let rt = runtime();
    let (service, collector, _rx) =
        with_collector(&rt, RejectMode::Deferred, CollectorConfig::default());

    let deferred = service.defer::<i32>();
    deferred.reject(pledge::Failure::new("later")).unwrap();
    assert!(wait_until(|| collector.tracked() == 1));

    let observed = deferred.promise().add_errback(|_| Step::Value(0));
    assert_eq!(collector.tracked(), 0);
    assert_eq!(observed.wait(WAIT).unwrap(), 0);
}

#[test]
fn errback_attached_in_same_call_stack_prevents_report() {
    let rt = runtime();
    let (service, collector, rx) =
        with_collector(&rt, RejectMode::Deferred, CollectorConfig::default());

    let deferred = service.defer::<i32>();
    deferred.reject(pledge::Failure::new("boom")).unwrap();
    let handled = deferred.promise().add_errback(|failure| {
        assert_eq!(failure.message(), Some("boom"));
        Step::Value(1)
    });
    assert_eq!(handled.wait(WAIT).unwrap(), 1);

    drop(deferred);
    drop(handled);
    assert_eq!(collector.tracked(), 0);
    assert_eq!(collector.sweep_now(), SweepSummary::default());
    assert!(rx.try_recv().is_err());
}

#[test]
fn reports_are_rate_limited_per_sweep() {
    let rt = runtime();
    let (service, collector, rx) =
        with_collector(&rt, RejectMode::Immediate, CollectorConfig::default());

    for i in 0..5 {
        let deferred = service.defer::<()>();
        deferred
            .reject(pledge::Failure::new(format!("leak {i}")))
            .unwrap();
    }
    assert_eq!(
        collector.sweep_now(),
        SweepSummary {
            reported: 2,
            backlog: 3
        }
    );
    assert_eq!(rx.try_iter().count(), 2);
    assert_eq!(collector.sweep_now().reported, 2);
    assert_eq!(collector.sweep_now().reported, 1);
    assert_eq!(rx.try_iter().count(), 3);
}

#[test]
fn registrations_beyond_hard_cap_are_refused() {
    let rt = runtime();
    let config = CollectorConfig {
        hard_max_tracked: 3,
        ..CollectorConfig::default()
    };
    let (service, collector, _rx) = with_collector(&rt, RejectMode::Immediate, config);

    let kept: Vec<_> = (0..5)
        .map(|i| {
            let deferred = service.defer::<()>();
            deferred
                .reject(pledge::Failure::new(format!("held {i}")))
                .unwrap();
            deferred
        })
        .collect();
    assert_eq!(collector.tracked(), 3);
    drop(kept);
    assert_eq!(collector.sweep_now().reported, 2);
}

#[test]
fn background_sweep_reports_without_help() {
    let rt = runtime();
    let config = CollectorConfig {
        interval_ms: 20,
        ..CollectorConfig::default()
    };
    let (service, collector, rx) = with_collector(&rt, RejectMode::Immediate, config);
    collector.start();

    let _ = service.rejected::<u8>(pledge::Failure::new("dropped on the floor"));
    let report = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(report.contains("dropped on the floor"));

    collector.shutdown();
    assert_eq!(collector.tracked(), 0);
}

#[test]
fn backlog_beyond_quota_drains_before_next_interval() {
    let rt = runtime();
    let config = CollectorConfig {
        interval_ms: 1000,
        max_errors_per_tick: 2,
        max_per_second: 20,
        ..CollectorConfig::default()
    };
    let interval = config.interval();
    let (service, collector, rx) = with_collector(&rt, RejectMode::Immediate, config);

    for i in 0..5 {
        let _ = service.rejected::<()>(pledge::Failure::new(format!("burst {i}")));
    }
    assert_eq!(collector.tracked(), 5);
    collector.start();

    let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let first_at = Instant::now();
    let rest: Vec<String> = (0..4)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert!(first_at.elapsed() < interval / 2, "{:?}", first_at.elapsed());
    assert!(first.ends_with("burst 0"));
    assert!(rest[3].ends_with("burst 4"));

    collector.shutdown();
}
