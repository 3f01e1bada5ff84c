//! Handler-side context.
//!
//! Each dispatch hands the handler a [`HandlerContext`]: its family and
//! request id, a way to push asynchronous notifications back across the
//! boundary, the [`QueryGate`] for cached/guarded reads, and the late-bound
//! collaborators (database, view model) injected at startup.
//!
//! # Example
//!
//! ```ignore
//! async fn execute_filter(method: String, params: Map<String, Value>, ctx: HandlerContext)
//!     -> HandlerResult
//! {
//!     let store = ctx.collaborator::<NodeStore>("database")?;
//!     ctx.query_gate()
//!         .execute(sql, &bound, limit, offset, || store.run(sql, &bound))
//!         .await
//! }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use crate::breaker::CircuitBreaker;
use crate::cache::QueryCache;
use crate::config::{
    DEFAULT_BREAKER_COOLDOWN, DEFAULT_BREAKER_THRESHOLD, DEFAULT_BREAKER_WINDOW,
    DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL,
};
use crate::error::{BridgeError, Result};
use crate::protocol::{Envelope, EnvelopeCodec};
use crate::query::QueryGate;
use crate::transport::Transport;

/// Late-bound collaborator registry.
///
/// Collaborators (database, view model) are optional at construction and
/// bound exactly once during startup. Handlers that run before binding fail
/// fast with [`BridgeError::NotInitialized`] instead of silently no-opping.
#[derive(Clone, Default)]
pub struct Collaborators {
    slots: Arc<Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl Collaborators {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a collaborator under `name`. Set-once: rebinding is rejected.
    pub fn bind<T: Send + Sync + 'static>(&self, name: &str, value: Arc<T>) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(name) {
            return Err(BridgeError::Validation(format!(
                "collaborator already bound: {}",
                name
            )));
        }
        slots.insert(name.to_string(), value);
        Ok(())
    }

    /// Fetch a collaborator by name and type.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::NotInitialized(name.to_string()))?;

        slot.downcast::<T>()
            .map_err(|_| BridgeError::NotInitialized(format!("{} (type mismatch)", name)))
    }

    /// True when a collaborator is bound under `name`.
    pub fn is_bound(&self, name: &str) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

/// Context passed to handlers for one dispatch.
///
/// Cloneable and safe to move into spawned tasks; a context without a
/// transport (testing mode) turns notifications into no-ops.
#[derive(Clone)]
pub struct HandlerContext {
    family: String,
    request_id: String,
    transport: Option<Arc<dyn Transport>>,
    collaborators: Collaborators,
    gate: QueryGate,
    notify_counter: Arc<AtomicU64>,
}

impl HandlerContext {
    /// Create a fully wired context.
    pub fn new(
        family: impl Into<String>,
        request_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        collaborators: Collaborators,
        gate: QueryGate,
        notify_counter: Arc<AtomicU64>,
    ) -> Self {
        Self {
            family: family.into(),
            request_id: request_id.into(),
            transport: Some(transport),
            collaborators,
            gate,
            notify_counter,
        }
    }

    /// Create a detached context for testing handlers without a transport.
    pub fn detached(family: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            request_id: request_id.into(),
            transport: None,
            collaborators: Collaborators::new(),
            gate: QueryGate::new(
                QueryCache::new(DEFAULT_CACHE_CAPACITY),
                CircuitBreaker::new(
                    DEFAULT_BREAKER_THRESHOLD,
                    DEFAULT_BREAKER_WINDOW,
                    DEFAULT_BREAKER_COOLDOWN,
                ),
                DEFAULT_CACHE_TTL,
            ),
            notify_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handler family this dispatch targets.
    #[inline]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Correlation id of the request being handled.
    #[inline]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Cached/breaker-guarded query execution.
    pub fn query_gate(&self) -> &QueryGate {
        &self.gate
    }

    /// The late-bound collaborator registry.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Fetch a collaborator, failing fast when unbound.
    pub fn collaborator<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.collaborators.get(name)
    }

    /// Push an asynchronous notification to the far side.
    ///
    /// Notifications are fire-and-forget request envelopes with a fresh id;
    /// the far side's eventual response is discarded on the unknown-id path.
    /// In detached mode this is a no-op.
    pub fn notify(&self, method: &str, params: Map<String, Value>) -> Result<()> {
        let transport = match &self.transport {
            Some(t) => t,
            None => return Ok(()),
        };

        let envelope = Envelope::with_params(notification_id(&self.notify_counter), method, params);
        let channel = envelope.family().to_string();
        let bytes = EnvelopeCodec::encode(&envelope)?;
        transport.send(&channel, bytes)
    }
}

/// Fresh id for a pushed notification: `evt-<counter>-<unix millis>`.
pub(crate) fn notification_id(counter: &AtomicU64) -> String {
    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("evt-{}-{}", n, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WireMessage;
    use crate::transport::loopback;
    use serde_json::json;

    #[derive(Debug)]
    struct FakeStore {
        rows: usize,
    }

    #[test]
    fn test_collaborator_bind_and_get() {
        let collaborators = Collaborators::new();
        collaborators
            .bind("database", Arc::new(FakeStore { rows: 7 }))
            .unwrap();

        let store: Arc<FakeStore> = collaborators.get("database").unwrap();
        assert_eq!(store.rows, 7);
        assert!(collaborators.is_bound("database"));
    }

    #[test]
    fn test_unbound_collaborator_fails_fast() {
        let collaborators = Collaborators::new();
        let err = collaborators.get::<FakeStore>("database").unwrap_err();
        assert!(matches!(err, BridgeError::NotInitialized(_)));
    }

    #[test]
    fn test_rebind_rejected() {
        let collaborators = Collaborators::new();
        collaborators
            .bind("database", Arc::new(FakeStore { rows: 1 }))
            .unwrap();
        let err = collaborators
            .bind("database", Arc::new(FakeStore { rows: 2 }))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[test]
    fn test_type_mismatch_fails_fast() {
        let collaborators = Collaborators::new();
        collaborators.bind("database", Arc::new(42u32)).unwrap();
        let err = collaborators.get::<FakeStore>("database").unwrap_err();
        assert!(matches!(err, BridgeError::NotInitialized(_)));
    }

    #[test]
    fn test_detached_context_accessors() {
        let ctx = HandlerContext::detached("filters", "1-1");
        assert_eq!(ctx.family(), "filters");
        assert_eq!(ctx.request_id(), "1-1");
    }

    #[test]
    fn test_notify_without_transport_is_noop() {
        let ctx = HandlerContext::detached("filters", "1-1");
        assert!(ctx.notify("render.commands", Map::new()).is_ok());
    }

    #[tokio::test]
    async fn test_notify_sends_request_envelope() {
        let ((transport, _rx), (_peer, mut peer_rx)) = loopback();
        let ctx = HandlerContext::new(
            "sync",
            "1-1",
            Arc::new(transport),
            Collaborators::new(),
            HandlerContext::detached("x", "0").gate,
            Arc::new(AtomicU64::new(0)),
        );

        let mut params = Map::new();
        params.insert("progress".into(), json!(0.5));
        ctx.notify("sync.progress", params).unwrap();

        let msg = peer_rx.recv().await.unwrap();
        assert_eq!(msg.channel, "sync");
        match EnvelopeCodec::decode(&msg.payload).unwrap() {
            WireMessage::Request(env) => {
                assert!(env.id.starts_with("evt-"));
                assert_eq!(env.method, "sync.progress");
                assert_eq!(env.params.get("progress"), Some(&json!(0.5)));
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_notification_ids_are_unique() {
        let counter = AtomicU64::new(0);
        let a = notification_id(&counter);
        let b = notification_id(&counter);
        assert_ne!(a, b);
        assert!(a.starts_with("evt-1-"));
        assert!(b.starts_with("evt-2-"));
    }

    #[test]
    fn test_context_is_clone() {
        let ctx = HandlerContext::detached("filters", "1-1");
        let clone = ctx.clone();
        assert_eq!(clone.family(), ctx.family());
    }
}
