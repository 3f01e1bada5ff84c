//! Circuit breaker for the optimized query path.
//!
//! A failure-isolation state machine: `Closed` passes calls through and
//! counts failures inside a sliding window; crossing the threshold trips to
//! `Open`, where calls short-circuit with [`BridgeError::CircuitOpen`]
//! without touching the downstream. After the cooldown, exactly one caller
//! becomes the `HalfOpen` probe; its outcome decides between reset and
//! another cooldown. Concurrent callers during the probe are still rejected.
//!
//! Callers obtain a [`CallPermit`] via [`CircuitBreaker::preflight`] and
//! settle it with [`CallPermit::succeed`] or [`CallPermit::fail`]. Dropping
//! an unsettled permit releases the probe slot without a state change, so an
//! abandoned probe cannot wedge the breaker in `HalfOpen`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{BridgeError, Result};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls short-circuit until the cooldown elapses.
    Open,
    /// One probe call is in flight (or about to be).
    HalfOpen,
}

impl BreakerState {
    /// Wire-friendly name, used in statistics snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "halfOpen",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Failure-isolation state machine.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerInner>>,
    threshold: u32,
    window: Duration,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Create a breaker that trips after `threshold` failures within
    /// `window` and probes again after `cooldown`.
    pub fn new(threshold: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                window_start: None,
                opened_at: None,
                probe_in_flight: false,
            })),
            threshold: threshold.max(1),
            window,
            cooldown,
        }
    }

    /// Ask to make a call.
    ///
    /// Returns a [`CallPermit`] when the call may proceed, or
    /// [`BridgeError::CircuitOpen`] when it must short-circuit. The permit's
    /// `probe` flag is set when this call is the single half-open probe.
    pub fn preflight(&self) -> Result<CallPermit> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        match inner.state {
            BreakerState::Closed => Ok(CallPermit::new(self.clone(), false)),
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::debug!("circuit breaker half-open; allowing probe");
                    Ok(CallPermit::new(self.clone(), true))
                } else {
                    Err(BridgeError::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(BridgeError::CircuitOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(CallPermit::new(self.clone(), true))
                }
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Failures counted in the current window.
    pub fn failure_count(&self) -> u32 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failure_count
    }

    /// Force the breaker back to `Closed` with counters cleared.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.window_start = None;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if probe {
            tracing::info!("circuit breaker probe succeeded; closing");
            inner.state = BreakerState::Closed;
            inner.failure_count = 0;
            inner.window_start = None;
            inner.opened_at = None;
            inner.probe_in_flight = false;
        }
        // A plain closed-state success does not reset the window: a flapping
        // downstream must not escape the threshold by interleaving successes.
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if probe {
            tracing::warn!("circuit breaker probe failed; reopening");
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            return;
        }

        if inner.state != BreakerState::Closed {
            return;
        }

        let now = Instant::now();
        let window_expired = inner
            .window_start
            .map(|start| now.duration_since(start) > self.window)
            .unwrap_or(true);

        if window_expired {
            inner.window_start = Some(now);
            inner.failure_count = 1;
        } else {
            inner.failure_count += 1;
        }

        if inner.failure_count >= self.threshold {
            tracing::warn!(
                failures = inner.failure_count,
                "circuit breaker tripped open"
            );
            inner.state = BreakerState::Open;
            inner.opened_at = Some(now);
        }
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.probe_in_flight = false;
    }
}

/// Permission to make one call through the breaker.
///
/// Must be settled with [`succeed`](Self::succeed) or [`fail`](Self::fail);
/// dropping it unsettled releases the probe slot only.
#[derive(Debug)]
pub struct CallPermit {
    breaker: CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl CallPermit {
    fn new(breaker: CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// True when this call is the single half-open probe.
    #[inline]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Record a successful call.
    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe);
    }

    /// Record a failed call.
    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}
