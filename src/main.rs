use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use microbatch::{BatchError, EngineConfig, MicroBatcher};

#[derive(Parser)]
#[command(about = "Micro-batching engine demo and load driver")]
struct Args {
    /// Max requests per handler call
    #[arg(short, long, default_value_t = microbatch::constants::DEFAULT_MAX_SIZE)]
    max_size: usize,

    /// Max seconds an under-full batch waits before flushing
    #[arg(short, long, default_value_t = 0.01)]
    timeout: f64,

    /// Assembly poll interval in seconds
    #[arg(short, long, default_value_t = 0.001)]
    poll: f64,

    /// Print stats deltas every N seconds (0 = off)
    #[arg(short, long, default_value_t = 0)]
    report: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Square 0..n from n concurrent threads and verify every result (default)
    Smoke {
        #[arg(short, long, default_value_t = 10)]
        n: u64,
    },
    /// Throughput with many submitting threads
    Bench {
        /// Number of submitting threads
        #[arg(short, long, default_value_t = 8)]
        threads: usize,
        /// Requests per thread
        #[arg(short = 'n', long, default_value_t = 10_000)]
        requests: u64,
        /// Simulated per-batch handler cost in microseconds
        #[arg(short, long, default_value_t = 200)]
        cost_us: u64,
    },
    /// Handler fails every Nth batch; show how failures fan out
    Fail {
        #[arg(short, long, default_value_t = 3)]
        every: u64,
        #[arg(short, long, default_value_t = 40)]
        requests: u64,
    },
}

fn spawn_reporter(batcher: Arc<MicroBatcher<u64, u64>>, interval_secs: u64) {
    thread::Builder::new()
        .name("stats-reporter".into())
        .spawn(move || {
            let mut last = batcher.stats();
            loop {
                thread::sleep(Duration::from_secs(interval_secs));
                let snap = batcher.stats();
                let d = snap.delta_since(&last);
                info!(
                    interval_secs,
                    submitted = d.submitted,
                    batches = d.batches,
                    avg_batch = d.avg_batch_size(),
                    full = d.full_flushes,
                    deadline = d.deadline_flushes,
                    failed = d.failed_batches,
                    handler_time = ?d.handler_time,
                    max_latency = ?snap.max_latency,
                    queued = batcher.pending(),
                    "stats"
                );
                last = snap;
            }
        })
        .expect("failed to spawn stats reporter");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_secs_f64(args.max_size, args.timeout)
        .and_then(|c| c.with_poll_interval_secs_f64(args.poll))
        .expect("invalid configuration");
    info!(
        max_size = config.max_size,
        timeout = ?config.timeout,
        poll_interval = ?config.poll_interval,
        "microbatch"
    );

    let batcher = Arc::new(MicroBatcher::<u64, u64>::new(config).expect("invalid configuration"));

    match args.command.unwrap_or(Command::Smoke { n: 10 }) {
        Command::Smoke { n } => {
            install_square(&batcher, Duration::ZERO);
            start(&batcher, args.report);
            smoke(&batcher, n);
        }
        Command::Bench {
            threads,
            requests,
            cost_us,
        } => {
            install_square(&batcher, Duration::from_micros(cost_us));
            start(&batcher, args.report);
            bench(&batcher, threads, requests);
        }
        Command::Fail { every, requests } => {
            let calls = AtomicU64::new(0);
            batcher
                .set_handler(move |xs: Vec<u64>| {
                    let call = calls.fetch_add(1, Ordering::Relaxed) + 1;
                    if every > 0 && call % every == 0 {
                        return Err(format!("injected failure on batch {call}"));
                    }
                    Ok(xs)
                })
                .expect("handler already set");
            start(&batcher, args.report);
            fail(&batcher, requests);
        }
    }

    batcher.stop();
    let s = batcher.stats();
    info!(
        submitted = s.submitted,
        batches = s.batches,
        avg_batch = s.avg_batch_size(),
        full = s.full_flushes,
        deadline = s.deadline_flushes,
        failed = s.failed_batches,
        max_batch = s.max_batch_len,
        max_latency = ?s.max_latency,
        "final stats"
    );
}

fn install_square(batcher: &MicroBatcher<u64, u64>, cost: Duration) {
    batcher
        .set_handler(move |xs: Vec<u64>| {
            if !cost.is_zero() {
                thread::sleep(cost);
            }
            Ok::<_, std::convert::Infallible>(xs.into_iter().map(|x| x * x).collect())
        })
        .expect("handler already set");
}

fn start(batcher: &Arc<MicroBatcher<u64, u64>>, report_secs: u64) {
    batcher.start().expect("failed to start batch worker");
    if report_secs > 0 {
        spawn_reporter(batcher.clone(), report_secs);
    }
}

fn smoke(batcher: &MicroBatcher<u64, u64>, n: u64) {
    let results: Vec<(u64, u64)> = thread::scope(|s| {
        let joins: Vec<_> = (0..n)
            .map(|i| s.spawn(move || (i, batcher.submit(i).expect("submit failed"))))
            .collect();
        joins
            .into_iter()
            .map(|j| j.join().expect("caller thread panicked"))
            .collect()
    });
    for (i, got) in &results {
        assert_eq!(*got, i * i, "input {i} got {got}");
    }
    info!(
        requests = n,
        batches = batcher.stats().batches,
        "smoke test: PASSED"
    );
}

fn bench(batcher: &MicroBatcher<u64, u64>, threads: usize, requests: u64) {
    let start = Instant::now();
    thread::scope(|s| {
        for t in 0..threads as u64 {
            s.spawn(move || {
                for i in 0..requests {
                    let x = t * requests + i;
                    let got = batcher.submit(x).expect("submit failed");
                    assert_eq!(got, x * x);
                }
            });
        }
    });
    let elapsed = start.elapsed();
    let total = threads as u64 * requests;
    info!(
        total,
        elapsed = ?elapsed,
        rps = (total as f64 / elapsed.as_secs_f64()).round(),
        "bench complete"
    );
}

fn fail(batcher: &MicroBatcher<u64, u64>, requests: u64) {
    let (ok, failed) = thread::scope(|s| {
        let joins: Vec<_> = (0..requests)
            .map(|i| s.spawn(move || batcher.submit(i)))
            .collect();
        let mut ok = 0u64;
        let mut failed = 0u64;
        for j in joins {
            match j.join().expect("caller thread panicked") {
                Ok(_) => ok += 1,
                Err(e @ BatchError::Handler(_)) => {
                    warn!(error = %e, "request failed with its batch");
                    failed += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        (ok, failed)
    });
    info!(ok, failed, "fail demo complete");
}
