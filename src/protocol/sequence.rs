//! Advisory per-channel sequence validation.
//!
//! Each logical channel (one per handler family in practice) carries its own
//! monotonic counter. A stale sequence id is flagged and logged but the
//! payload is still processed: strict rejection would drop legitimate
//! concurrent updates from independent producers sharing a channel id space,
//! so ordering here is diagnostic, not enforced. The validator only orders
//! data updates — RPC completion order is handled by correlation ids.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Per-channel monotonic sequence tracker.
///
/// Cloning is intentionally not provided; share via `Arc` (or through the
/// bridge facade). The single mutex is held only for the read-modify-write
/// of the channel map, never across an await.
#[derive(Debug, Default)]
pub struct SequenceValidator {
    channels: Mutex<HashMap<String, u64>>,
}

impl SequenceValidator {
    /// Create a validator with no channel state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check an incoming sequence id against the channel's last accepted id.
    ///
    /// Returns `true` and advances the stored id when `sequence_id` is
    /// strictly greater than the last accepted value (the first id on a
    /// channel is always accepted). Returns `false` otherwise — the message
    /// is flagged as out-of-order but the caller still processes it.
    pub fn accept(&self, channel: &str, sequence_id: u64) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);

        match channels.get_mut(channel) {
            Some(last) if sequence_id <= *last => {
                tracing::warn!(
                    channel,
                    sequence_id,
                    last_sequence_id = *last,
                    "out-of-order update; processing anyway"
                );
                false
            }
            Some(last) => {
                *last = sequence_id;
                true
            }
            None => {
                channels.insert(channel.to_string(), sequence_id);
                true
            }
        }
    }

    /// Last accepted sequence id for a channel, if any update was accepted.
    pub fn last_sequence_id(&self, channel: &str) -> Option<u64> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .copied()
    }

    /// Forget a channel's sequence state (e.g. when the embedded side reloads
    /// and restarts its counters).
    pub fn reset(&self, channel: &str) {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
    }
}
