//! Bridge configuration.
//!
//! All tunables live in [`BridgeConfig`]; the defaults match the values the
//! visualization host ships with. Components take their slice of the config
//! at construction time, so a paused-clock test can shrink every window to
//! milliseconds without touching the components themselves.

use std::time::Duration;

/// Default timeout for a pending request before it auto-rejects.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default debounce interval for coalesced updates (caps at 60 flushes/sec).
pub const DEFAULT_DEBOUNCE_INTERVAL: Duration = Duration::from_millis(16);

/// Default number of coalesced replacements that forces an immediate flush.
pub const DEFAULT_COALESCE_HARD_CAP: usize = 10;

/// Default maximum number of query cache entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Default time-to-live for a cached query result.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Default consecutive-failure count that trips the circuit breaker.
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 5;

/// Default window in which breaker failures are counted.
pub const DEFAULT_BREAKER_WINDOW: Duration = Duration::from_secs(10);

/// Default cooldown before an open breaker allows a half-open probe.
pub const DEFAULT_BREAKER_COOLDOWN: Duration = Duration::from_secs(30);

/// Default maximum number of concurrently executing handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Configuration for a [`Bridge`](crate::Bridge) instance.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// How long a pending request waits before rejecting with a timeout.
    pub request_timeout: Duration,
    /// Flush interval for the debounce/coalesce scheduler.
    pub debounce_interval: Duration,
    /// Coalesced update count that triggers an immediate flush.
    pub coalesce_hard_cap: usize,
    /// Maximum query cache entries before bulk eviction.
    pub cache_capacity: usize,
    /// Time-to-live applied to cached query results.
    pub cache_ttl: Duration,
    /// Failures within `breaker_window` that trip the circuit.
    pub breaker_threshold: u32,
    /// Window in which breaker failures accumulate.
    pub breaker_window: Duration,
    /// Cooldown before an open circuit allows a single probe.
    pub breaker_cooldown: Duration,
    /// Maximum handlers executing at once.
    pub max_concurrent_handlers: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            debounce_interval: DEFAULT_DEBOUNCE_INTERVAL,
            coalesce_hard_cap: DEFAULT_COALESCE_HARD_CAP,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: DEFAULT_CACHE_TTL,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_window: DEFAULT_BREAKER_WINDOW,
            breaker_cooldown: DEFAULT_BREAKER_COOLDOWN,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }
}
