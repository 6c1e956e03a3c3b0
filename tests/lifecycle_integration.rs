//! Integration tests: handler binding, start/stop/restart and teardown.

mod common;

use std::convert::Infallible;
use std::thread;
use std::time::Duration;

use microbatch::{BatchError, EngineConfig, MicroBatcher};

use common::GENEROUS;

fn identity() -> MicroBatcher<u64, u64> {
    let b = MicroBatcher::new(common::config(4, 0.005)).unwrap();
    b.set_handler(|xs: Vec<u64>| Ok::<_, Infallible>(xs)).unwrap();
    b
}

#[test]
fn configuration_errors_surface_immediately() {
    let b = MicroBatcher::<u64, u64>::new(common::config(4, 0.005)).unwrap();
    assert!(matches!(b.start(), Err(BatchError::HandlerNotSet)));
    assert!(matches!(b.submit(1), Err(BatchError::HandlerNotSet)));
    assert!(matches!(b.enqueue(1), Err(BatchError::HandlerNotSet)));

    b.set_handler(|xs: Vec<u64>| Ok::<_, Infallible>(xs)).unwrap();
    assert!(matches!(
        b.set_handler(|xs: Vec<u64>| Ok::<_, Infallible>(xs)),
        Err(BatchError::HandlerAlreadySet)
    ));
    assert_eq!(b.pending(), 0, "rejected submits never reach the queue");
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let cfg = EngineConfig {
        poll_interval: Duration::ZERO,
        ..EngineConfig::default()
    };
    assert!(matches!(
        MicroBatcher::<u64, u64>::new(cfg),
        Err(BatchError::InvalidConfig(_))
    ));
}

#[test]
fn worker_thread_carries_configured_name() {
    let cfg = common::config(1, 0.005).with_worker_name("embed-batcher");
    let b = MicroBatcher::<u64, String>::new(cfg).unwrap();
    b.set_handler(|xs: Vec<u64>| {
        let name = thread::current().name().unwrap_or_default().to_string();
        Ok::<_, Infallible>(xs.iter().map(|_| name.clone()).collect())
    })
    .unwrap();
    b.start().unwrap();
    assert_eq!(b.submit(0).unwrap(), "embed-batcher");
}

#[test]
fn stop_then_start_serves_queued_requests() {
    let b = identity();
    b.start().unwrap();
    assert_eq!(b.submit(1).unwrap(), 1);
    b.stop();
    assert!(!b.is_running());

    let queued: Vec<_> = (10..13u64).map(|x| b.enqueue(x).unwrap()).collect();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(b.pending(), 3);

    b.start().unwrap();
    let outs: Vec<u64> = queued
        .into_iter()
        .map(|h| h.wait_for_result(Some(GENEROUS)).unwrap())
        .collect();
    assert_eq!(outs, vec![10, 11, 12]);
}

#[test]
fn stop_waits_for_in_flight_batch() {
    let b = MicroBatcher::<u64, u64>::new(common::config(1, 0.005)).unwrap();
    b.set_handler(|xs: Vec<u64>| {
        thread::sleep(Duration::from_millis(50));
        Ok::<_, Infallible>(xs)
    })
    .unwrap();
    b.start().unwrap();

    let h = b.enqueue(7).unwrap();
    // Let the worker pick it up, then stop while the handler sleeps.
    thread::sleep(Duration::from_millis(15));
    b.stop();

    let completion = h.wait_completion(Some(GENEROUS)).unwrap();
    assert_eq!(completion.result.unwrap(), 7);
    assert!(completion.latency >= Duration::from_millis(50));
}

#[test]
fn submit_timeout_reports_timeout_not_failure() {
    let b = identity();
    let err = b.submit_timeout(1, Duration::from_millis(10)).unwrap_err();
    assert!(matches!(err, BatchError::Timeout(_)));
    assert!(!err.is_batch_failure());
}

#[test]
fn drop_joins_the_worker() {
    let b = identity();
    b.start().unwrap();
    assert_eq!(b.submit(3).unwrap(), 3);
    drop(b);
}

#[test]
fn latency_is_reported_per_request() {
    let b = MicroBatcher::<u64, u64>::new(common::config(16, 0.02)).unwrap();
    b.set_handler(|xs: Vec<u64>| Ok::<_, Infallible>(xs)).unwrap();
    b.start().unwrap();

    let completion = b.enqueue(5).unwrap().wait_completion(Some(GENEROUS)).unwrap();
    assert_eq!(completion.result.unwrap(), 5);
    // A lone request waits for the deadline flush before completing.
    assert!(completion.latency >= Duration::from_millis(10));
    assert!(b.stats().max_latency >= Duration::from_millis(10));
}
