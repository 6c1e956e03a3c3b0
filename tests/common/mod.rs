#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use microbatch::{EngineConfig, MicroBatcher};

pub fn config(max_size: usize, timeout_secs: f64) -> EngineConfig {
    EngineConfig::from_secs_f64(max_size, timeout_secs).expect("valid config")
}

/// Handler calls as the engine made them, in order.
pub type CallLog = Arc<Mutex<Vec<Vec<u64>>>>;

/// Started batcher whose handler squares each input and records every call.
pub fn squaring_batcher(max_size: usize, timeout_secs: f64) -> (MicroBatcher<u64, u64>, CallLog) {
    let batcher = MicroBatcher::new(config(max_size, timeout_secs)).expect("valid config");
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();
    batcher
        .set_handler(move |xs: Vec<u64>| {
            seen.lock().unwrap().push(xs.clone());
            Ok::<_, Infallible>(xs.into_iter().map(|x| x * x).collect())
        })
        .expect("first handler");
    batcher.start().expect("start");
    (batcher, log)
}

/// Upper bound for any single wait in these tests; far above any flush timeout.
pub const GENEROUS: Duration = Duration::from_secs(10);
