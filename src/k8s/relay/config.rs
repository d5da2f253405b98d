/**
 * Configuration constants for the watch sources and event bus
 */
use std::time::Duration;

/// Maximum backoff time in seconds between restart attempts
pub const MAX_BACKOFF_SECONDS: u64 = 60;

/// Initial backoff time in milliseconds
pub const INITIAL_BACKOFF_MILLIS: u64 = 1000;

/// Watch stream timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
pub const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Events a subscriber may fall behind by before it is disconnected
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Interval between SSE keep-alive comments
pub const KEEP_ALIVE_SECONDS: u64 = 15;

/// Tuning for a relay pipeline
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// First delay after a failed list or watch
    pub initial_backoff: Duration,
    /// Upper bound for the doubling delay
    pub max_backoff: Duration,
    /// Server-side watch timeout passed to the API server
    pub watch_timeout_secs: u32,
    /// Per-subscriber queue depth beyond the bootstrap batch
    pub subscriber_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MILLIS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECONDS),
            watch_timeout_secs: WATCH_TIMEOUT_SECONDS,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(MAX_BACKOFF_SECONDS > 0, "MAX_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_MILLIS > 0, "INITIAL_BACKOFF_MILLIS must be greater than 0");
    assert!(INITIAL_BACKOFF_MILLIS <= MAX_BACKOFF_SECONDS * 1000, "initial backoff must not exceed the cap");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(DEFAULT_SUBSCRIBER_BUFFER > 0, "DEFAULT_SUBSCRIBER_BUFFER must be greater than 0");
    assert!(KEEP_ALIVE_SECONDS > 0, "KEEP_ALIVE_SECONDS must be greater than 0");
};
