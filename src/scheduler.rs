//! Debounce/coalesce scheduler for high-frequency updates.
//!
//! Render commands and viewport deltas arrive in bursts far above the rate
//! the other side can usefully consume. The scheduler collapses each burst to
//! at most one flush per interval and key: the first update for a key starts
//! a timer; later updates replace the stored payload last-write-wins WITHOUT
//! resetting the timer, so staleness is bounded by the interval. A key whose
//! coalesced count reaches the hard cap flushes immediately instead.
//!
//! Latency-sensitive updates (viewport pan/zoom) use
//! [`UpdateScheduler::schedule_immediate`], which applies synchronously and
//! supersedes any pending coalesced update for the key — a superseded update
//! is dropped whole, never partially applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;

/// Callback invoked with the final coalesced payload.
pub type FlushFn = Box<dyn FnOnce(Value) + Send + 'static>;

struct Slot {
    payload: Value,
    flush: FlushFn,
    coalesced: usize,
    generation: u64,
}

/// Per-key debounce/coalesce scheduler.
///
/// Cloning shares the pending-slot table. Requires a tokio runtime for the
/// flush timers.
#[derive(Clone)]
pub struct UpdateScheduler {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    interval: Duration,
    hard_cap: usize,
    generation: Arc<AtomicU64>,
}

impl UpdateScheduler {
    /// Create a scheduler flushing at most once per `interval` per key, with
    /// an immediate flush once `hard_cap` updates have coalesced.
    pub fn new(interval: Duration, hard_cap: usize) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            interval,
            hard_cap: hard_cap.max(2),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule a coalesced update for `key`.
    ///
    /// The first call for a key arms a timer for the debounce interval and
    /// flushes exactly once when it fires. Calls arriving before the flush
    /// replace the payload and callback (last-write-wins) without resetting
    /// the timer. When the coalesced count reaches the hard cap, the pending
    /// update flushes immediately and the armed timer becomes a no-op.
    pub fn schedule<F>(&self, key: &str, payload: Value, flush: F)
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let capped = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

            match slots.get_mut(key) {
                Some(slot) => {
                    slot.payload = payload;
                    slot.flush = Box::new(flush);
                    slot.coalesced += 1;

                    if slot.coalesced >= self.hard_cap {
                        tracing::debug!(key, coalesced = slot.coalesced, "hard cap; flushing now");
                        slots.remove(key)
                    } else {
                        None
                    }
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    slots.insert(
                        key.to_string(),
                        Slot {
                            payload,
                            flush: Box::new(flush),
                            coalesced: 1,
                            generation,
                        },
                    );
                    self.arm_timer(key.to_string(), generation);
                    None
                }
            }
        };

        // Invoked outside the lock: the callback may send over the transport.
        if let Some(slot) = capped {
            (slot.flush)(slot.payload);
        }
    }

    /// Apply a latency-sensitive update synchronously, bypassing coalescing.
    ///
    /// Any pending coalesced update for the key is superseded (its timer
    /// becomes a no-op and its payload is dropped) so a stale flush cannot
    /// land after this newer payload.
    pub fn schedule_immediate<F>(&self, key: &str, payload: Value, apply: F)
    where
        F: FnOnce(Value),
    {
        {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.remove(key);
        }
        apply(payload);
    }

    /// Drop a pending coalesced update without flushing it.
    ///
    /// Returns `true` if one was pending.
    pub fn cancel(&self, key: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Drop every pending coalesced update without flushing.
    ///
    /// Returns how many were pending. Armed timers find no slot and become
    /// no-ops.
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let count = slots.len();
        slots.clear();
        count
    }

    /// Number of keys with a pending flush.
    pub fn pending_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn arm_timer(&self, key: String, generation: u64) {
        let slots = Arc::clone(&self.slots);
        let interval = self.interval;

        tokio::spawn(async move {
            tokio::time::sleep(interval).await;

            let fired = {
                let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
                match slots.get(&key) {
                    // Only flush the slot this timer was armed for; a
                    // hard-cap flush or supersede already consumed it.
                    Some(slot) if slot.generation == generation => slots.remove(&key),
                    _ => None,
                }
            };

            if let Some(slot) = fired {
                (slot.flush)(slot.payload);
            }
        });
    }
}
