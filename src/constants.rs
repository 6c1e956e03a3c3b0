use std::time::Duration;

/// Upper bound on requests per handler invocation when none is configured.
pub const DEFAULT_MAX_SIZE: usize = 32;

/// How long an under-full batch may wait before it is flushed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

/// Assembly-loop polling granularity. Bounds flush-timing precision.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Name given to the background batching thread.
pub const DEFAULT_WORKER_NAME: &str = "microbatch-worker";

const _: () = assert!(DEFAULT_MAX_SIZE > 0, "max_size must be positive");
const _: () = assert!(
    DEFAULT_POLL_INTERVAL.as_nanos() > 0,
    "poll interval must be positive"
);
const _: () = assert!(
    DEFAULT_POLL_INTERVAL.as_nanos() <= DEFAULT_TIMEOUT.as_nanos(),
    "poll interval coarser than the flush timeout"
);
