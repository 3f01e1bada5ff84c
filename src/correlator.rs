//! Caller-side request correlation.
//!
//! Every outbound request gets a fresh id and a pending entry holding the
//! resolver for the caller's future. Responses may arrive in any order; the
//! id is the only thing that ties them back. A pending request resolves
//! exactly once — success, failure, or timeout — never both, never neither:
//! the entry is removed atomically by whichever path gets there first, and
//! the losing path finds nothing to resolve.
//!
//! Timeouts are the only automatic cancellation mechanism. Handler execution
//! on the far side is not preemptible; a response arriving after its request
//! timed out hits the unknown-id path and is logged and dropped, not
//! surfaced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};
use crate::protocol::ResponseEnvelope;

struct PendingRequest {
    resolver: oneshot::Sender<Result<Value>>,
    timeout_task: JoinHandle<()>,
    created_at: Instant,
}

/// Tracks in-flight requests and matches responses back by id.
///
/// Cloning shares the pending table. Requires a tokio runtime for the
/// timeout timers.
#[derive(Clone)]
pub struct RequestCorrelator {
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
    counter: Arc<AtomicU64>,
    timeout: Duration,
}

impl RequestCorrelator {
    /// Create a correlator whose pending requests auto-reject after
    /// `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            counter: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    /// Generate a fresh request id: monotonic counter plus a unix-millis
    /// timestamp, so ids cannot collide across process restarts.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("{}-{}", n, millis)
    }

    /// Register a pending request under `id` and return the receiver the
    /// caller awaits. Arms the timeout timer.
    pub fn register(&self, id: &str) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();

        let timeout_task = {
            let pending = Arc::clone(&self.pending);
            let id = id.to_string();
            let timeout = self.timeout;

            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;

                let entry = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);

                if let Some(request) = entry {
                    tracing::warn!(id, timeout_ms = timeout.as_millis() as u64, "request timed out");
                    let _ = request.resolver.send(Err(BridgeError::Timeout));
                }
            })
        };

        let replaced = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.to_string(),
                PendingRequest {
                    resolver: tx,
                    timeout_task,
                    created_at: Instant::now(),
                },
            );

        // Ids are unique by construction; a replaced entry would mean a
        // caller reused one. Resolve it as cancelled rather than leaking.
        if let Some(stale) = replaced {
            stale.timeout_task.abort();
            let _ = stale
                .resolver
                .send(Err(BridgeError::Cancelled("request id reused".into())));
        }

        rx
    }

    /// Resolve the pending request for `id` with the given outcome.
    ///
    /// Returns `false` when no request matches — the already-completed /
    /// already-timed-out race, logged and otherwise ignored.
    pub fn resolve(&self, id: &str, outcome: Result<Value>) -> bool {
        let entry = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        match entry {
            Some(request) => {
                request.timeout_task.abort();
                let _ = request.resolver.send(outcome);
                true
            }
            None => {
                tracing::warn!(id, "unknown request id; dropping response");
                false
            }
        }
    }

    /// Resolve from an inbound response envelope.
    pub fn resolve_response(&self, response: ResponseEnvelope) -> bool {
        let outcome = if response.success {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::HandlerExecution(
                response
                    .error
                    .unwrap_or_else(|| "unspecified handler error".into()),
            ))
        };
        self.resolve(&response.id, outcome)
    }

    /// Remove a pending request without resolving it (used when the
    /// transport rejected the send; the caller already holds the error).
    pub fn discard(&self, id: &str) {
        let entry = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(request) = entry {
            request.timeout_task.abort();
        }
    }

    /// Reject every pending request with a cancellation error.
    ///
    /// Returns the number of requests rejected. Best-effort: in-flight
    /// handler work on the far side still runs to completion; its late
    /// responses hit the unknown-id path.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, PendingRequest)> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let count = drained.len();
        for (id, request) in drained {
            tracing::debug!(id, reason, "cancelling pending request");
            request.timeout_task.abort();
            let _ = request
                .resolver
                .send(Err(BridgeError::Cancelled(reason.to_string())));
        }
        count
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Age of the oldest pending request, if any.
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|r| r.created_at.elapsed())
            .max()
    }
}
