//! Shared test utilities and fixtures

#![allow(dead_code)]

use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use pledge::{
    CollectorConfig, LeakReporter, PledgeConfig, PromisesService, RejectMode, TokioExecutor,
};
use tokio::runtime::{Builder, Runtime};
use tracing_subscriber::EnvFilter;

pub const WAIT: Option<Duration> = Some(Duration::from_secs(5));

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn runtime() -> Runtime {
    init_tracing();
    Builder::new_multi_thread()
        .worker_threads(2)
        .enable_time()
        .build()
        .expect("build test runtime")
}

pub fn executor(rt: &Runtime) -> Arc<TokioExecutor> {
    Arc::new(TokioExecutor::new(rt.handle().clone()))
}

/// Service without a collector.
pub fn service(rt: &Runtime, reject_mode: RejectMode) -> PromisesService {
    let config = PledgeConfig {
        reject_mode,
        collector: CollectorConfig {
            enabled: false,
            ..CollectorConfig::default()
        },
    };
    PromisesService::new(executor(rt), config).expect("valid test config")
}

/// Leak reporter that forwards every diagnostic to a channel.
pub struct ChannelReporter(Mutex<mpsc::Sender<String>>);

impl ChannelReporter {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self(Mutex::new(tx))), rx)
    }
}

impl LeakReporter for ChannelReporter {
    fn report(&self, diagnostic: &str) {
        let _ = self
            .0
            .lock()
            .expect("reporter lock")
            .send(diagnostic.to_string());
    }
}
