//! Handler registration and the message router.
//!
//! Handlers are registered per family; `dispatch` resolves the family from
//! the method name, invokes the handler, and wraps every outcome in a
//! response envelope carrying elapsed wall-clock duration. Routing misses,
//! validation failures, and handler errors all travel the same correlation
//! path as success — callers always receive a definite resolution.
//!
//! Three administrative methods are served by the router itself for every
//! registered family: `ping` (liveness), `getStatistics` (performance
//! snapshot), and `cancelPendingRequests` (best-effort abandon of in-flight
//! work on the caller side).

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};

use crate::error::{BridgeError, Result};
use crate::handler::HandlerContext;
use crate::monitor::PerformanceMonitor;
use crate::protocol::{operation_of, Envelope, ResponseEnvelope};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for handler invocations.
pub type HandlerResult = Result<Value>;

/// A handler family: addressable by name, accepts `(method, params)`,
/// asynchronously produces a result or an error.
pub trait BridgeHandler: Send + Sync + 'static {
    /// Handle one operation. `method` is the full method name
    /// (`family.operation`).
    fn call(
        &self,
        method: &str,
        params: Map<String, Value>,
        ctx: HandlerContext,
    ) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter turning an async closure into a [`BridgeHandler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(String, Map<String, Value>, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(String, Map<String, Value>, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> BridgeHandler for FnHandler<F, Fut>
where
    F: Fn(String, Map<String, Value>, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(
        &self,
        method: &str,
        params: Map<String, Value>,
        ctx: HandlerContext,
    ) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(method.to_string(), params, ctx))
    }
}

/// Hooks the facade installs for the administrative methods.
pub struct AdminHooks {
    /// Extended statistics snapshot (operations + cache + breaker).
    pub statistics: Arc<dyn Fn() -> Value + Send + Sync>,
    /// Reject all pending caller-side requests; returns how many.
    pub cancel_pending: Arc<dyn Fn() -> usize + Send + Sync>,
}

/// Resolves and dispatches inbound request envelopes.
pub struct MessageRouter {
    handlers: HashMap<String, Arc<dyn BridgeHandler>>,
    monitor: PerformanceMonitor,
    admin: OnceLock<AdminHooks>,
}

impl MessageRouter {
    /// Create a router recording into the given monitor.
    pub fn new(monitor: PerformanceMonitor) -> Self {
        Self {
            handlers: HashMap::new(),
            monitor,
            admin: OnceLock::new(),
        }
    }

    /// Register a handler for a family name.
    pub fn register(&mut self, family: &str, handler: impl BridgeHandler) {
        self.register_arc(family, Arc::new(handler));
    }

    /// Register an already-shared handler.
    pub fn register_arc(&mut self, family: &str, handler: Arc<dyn BridgeHandler>) {
        self.handlers.insert(family.to_string(), handler);
    }

    /// Install the admin hooks. Set-once; later calls are ignored.
    pub fn set_admin(&self, hooks: AdminHooks) {
        let _ = self.admin.set(hooks);
    }

    /// True when a family is registered.
    pub fn is_registered(&self, family: &str) -> bool {
        self.handlers.contains_key(family)
    }

    /// Registered family names.
    pub fn families(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Dispatch a request envelope to its handler.
    ///
    /// Never fails: every outcome, including routing misses and handler
    /// panics-converted-to-errors upstream, becomes a response envelope with
    /// the elapsed duration, and one monitor sample is recorded.
    pub async fn dispatch(&self, envelope: Envelope, ctx: HandlerContext) -> ResponseEnvelope {
        let start = Instant::now();
        let id = envelope.id.clone();
        let method = envelope.method.clone();

        let outcome = self.dispatch_inner(envelope, ctx).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(result) => {
                let payload_bytes = result.to_string().len();
                self.monitor.record(&method, duration_ms, true, payload_bytes);
                ResponseEnvelope::ok(id, result, duration_ms)
            }
            Err(e) => {
                tracing::debug!(method = %method, id = %id, error = %e, "dispatch failed");
                self.monitor.record(&method, duration_ms, false, 0);
                ResponseEnvelope::fail(id, e.to_string(), duration_ms)
            }
        }
    }

    async fn dispatch_inner(&self, envelope: Envelope, ctx: HandlerContext) -> HandlerResult {
        if !is_valid_method_name(&envelope.method) {
            // Audit the offending name before answering with a generic
            // error: the caller must not learn routing internals.
            tracing::warn!(
                method = %envelope.method,
                id = %envelope.id,
                "rejected disallowed method name"
            );
            return Err(BridgeError::Validation("invalid method name".into()));
        }

        let family = envelope.family();
        let handler = self
            .handlers
            .get(family)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownHandler(family.to_string()))?;

        match operation_of(&envelope.method) {
            "ping" => Ok(json!({ "pong": true, "timestamp": unix_millis() })),
            "getStatistics" => Ok(self.statistics_snapshot()),
            "cancelPendingRequests" => {
                let cancelled = self
                    .admin
                    .get()
                    .map(|hooks| (hooks.cancel_pending)())
                    .unwrap_or(0);
                Ok(json!({ "cancelled": cancelled }))
            }
            _ => handler.call(&envelope.method, envelope.params, ctx).await,
        }
    }

    fn statistics_snapshot(&self) -> Value {
        match self.admin.get() {
            Some(hooks) => (hooks.statistics)(),
            None => serde_json::to_value(self.monitor.snapshot()).unwrap_or(Value::Null),
        }
    }
}

/// Method names are `family.operation` in a restricted alphabet; anything
/// else is rejected before routing.
fn is_valid_method_name(method: &str) -> bool {
    !method.is_empty()
        && method
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
