//! Bridge facade and builder.
//!
//! [`Bridge`] wires the envelope codec, sequence validator, router,
//! correlator, query cache, circuit breaker, scheduler, and monitor into the
//! single entry point both sides use: [`Bridge::send`] for outbound
//! request/response calls, [`Bridge::handle_incoming`] for bytes arriving
//! from the transport, and [`Bridge::notify`] / the coalesced push helpers
//! for fire-and-forget data updates.
//!
//! Shared state is explicit and passed by `Arc` — there is no global or
//! actor-pinned state; handlers reach collaborators through the late-bound
//! registry on their context.
//!
//! # Example
//!
//! ```ignore
//! let ((host_transport, host_rx), _embedded) = transport::loopback();
//!
//! let bridge = Bridge::builder(host_transport)
//!     .handler_fn("filters", |method, params, ctx| async move {
//!         // resolve collaborators, run the query through ctx.query_gate()
//!         Ok(json!({"count": 0}))
//!     })
//!     .build();
//!
//! bridge.spawn_inbound(host_rx);
//! let result = bridge.send("filters.executeFilter", params).await?;
//! ```

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::breaker::CircuitBreaker;
use crate::cache::QueryCache;
use crate::config::BridgeConfig;
use crate::correlator::RequestCorrelator;
use crate::error::{BridgeError, Result};
use crate::handler::context::notification_id;
use crate::handler::{AdminHooks, BridgeHandler, Collaborators, FnHandler, HandlerContext, HandlerResult, MessageRouter};
use crate::monitor::PerformanceMonitor;
use crate::protocol::{family_of, Envelope, EnvelopeCodec, SequenceValidator, WireMessage};
use crate::query::QueryGate;
use crate::scheduler::UpdateScheduler;
use crate::transport::{InboundReceiver, Transport};

/// The cross-boundary request/response bridge.
///
/// Construct via [`Bridge::builder`]; always used behind an `Arc`.
pub struct Bridge {
    config: BridgeConfig,
    router: MessageRouter,
    correlator: RequestCorrelator,
    sequences: SequenceValidator,
    scheduler: UpdateScheduler,
    cache: QueryCache,
    breaker: CircuitBreaker,
    monitor: PerformanceMonitor,
    transport: Arc<dyn Transport>,
    collaborators: Collaborators,
    permits: Arc<Semaphore>,
    notify_counter: Arc<AtomicU64>,
}

impl Bridge {
    /// Start building a bridge over the given transport.
    pub fn builder(transport: impl Transport) -> BridgeBuilder {
        BridgeBuilder::new(transport)
    }

    /// Send a request and await its response.
    ///
    /// The returned future resolves exactly once: with the handler's result,
    /// with its error, or with [`BridgeError::Timeout`] after the configured
    /// window. Sending itself never blocks on the far side.
    pub async fn send(&self, method: &str, params: Map<String, Value>) -> Result<Value> {
        let id = self.correlator.next_id();
        let rx = self.correlator.register(&id);

        let envelope = Envelope::with_params(id.clone(), method, params);
        let channel = envelope.family().to_string();

        let bytes = match EnvelopeCodec::encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.correlator.discard(&id);
                return Err(e);
            }
        };
        if let Err(e) = self.transport.send(&channel, bytes) {
            self.correlator.discard(&id);
            return Err(e);
        }

        rx.await.map_err(|_| BridgeError::TransportClosed)?
    }

    /// Send an ordered data update: `sequence_id` is stamped into params so
    /// the far side's sequence validator can flag stale deliveries.
    pub async fn send_update(
        &self,
        method: &str,
        mut params: Map<String, Value>,
        sequence_id: u64,
    ) -> Result<Value> {
        params.insert("sequenceId".into(), json!(sequence_id));
        self.send(method, params).await
    }

    /// Push a fire-and-forget notification to the far side.
    pub fn notify(&self, method: &str, params: Map<String, Value>) -> Result<()> {
        let envelope =
            Envelope::with_params(notification_id(&self.notify_counter), method, params);
        let channel = envelope.family().to_string();
        let bytes = EnvelopeCodec::encode(&envelope)?;
        self.transport.send(&channel, bytes)
    }

    /// Coalesce a high-frequency update: at most one notification per
    /// debounce interval per method, last-write-wins.
    pub fn push_coalesced(&self, method: &str, payload: Value) {
        let transport = Arc::clone(&self.transport);
        let counter = Arc::clone(&self.notify_counter);
        let method_name = method.to_string();

        self.scheduler.schedule(method, payload, move |payload| {
            if let Err(e) = send_notification(&transport, &counter, &method_name, payload) {
                tracing::warn!(method = %method_name, error = %e, "coalesced flush failed");
            }
        });
    }

    /// Apply a latency-sensitive update immediately, superseding any pending
    /// coalesced update for the same method.
    pub fn push_immediate(&self, method: &str, payload: Value) -> Result<()> {
        let transport = Arc::clone(&self.transport);
        let counter = Arc::clone(&self.notify_counter);
        let method_name = method.to_string();

        let mut outcome = Ok(());
        self.scheduler.schedule_immediate(method, payload, |payload| {
            outcome = send_notification(&transport, &counter, &method_name, payload);
        });
        outcome
    }

    /// Feed bytes received from the embedding into the bridge.
    ///
    /// Responses resolve their pending request (or are logged and dropped on
    /// the unknown-id path). Requests are sequence-checked (advisory) and
    /// dispatched on a spawned task; the matching response envelope is sent
    /// back over the transport when the handler finishes.
    ///
    /// # Errors
    ///
    /// [`BridgeError::MalformedEnvelope`] when the bytes cannot be decoded;
    /// nothing is dispatched in that case.
    pub fn handle_incoming(self: &Arc<Self>, payload: &[u8]) -> Result<()> {
        match EnvelopeCodec::decode(payload)? {
            WireMessage::Response(response) => {
                self.correlator.resolve_response(response);
                Ok(())
            }
            WireMessage::Request(envelope) => {
                if let Some(sequence_id) = envelope.sequence_id() {
                    // Advisory only: a stale id is flagged by the validator
                    // but the payload is still dispatched.
                    let _ = self.sequences.accept(envelope.family(), sequence_id);
                }

                let bridge = Arc::clone(self);
                tokio::spawn(async move {
                    let _permit = match bridge.permits.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };

                    let channel = envelope.family().to_string();
                    let ctx = bridge.handler_context(&channel, &envelope.id);
                    let response = bridge.router.dispatch(envelope, ctx).await;

                    match EnvelopeCodec::encode(&response) {
                        Ok(bytes) => {
                            if let Err(e) = bridge.transport.send(&channel, bytes) {
                                tracing::error!(id = %response.id, error = %e, "response send failed");
                            }
                        }
                        Err(e) => {
                            tracing::error!(id = %response.id, error = %e, "response encode failed");
                        }
                    }
                });
                Ok(())
            }
        }
    }

    /// Pump an inbound receiver (e.g. a loopback endpoint) into the bridge.
    pub fn spawn_inbound(self: &Arc<Self>, mut rx: InboundReceiver) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = bridge.handle_incoming(&message.payload) {
                    tracing::warn!(
                        channel = %message.channel,
                        error = %e,
                        "dropping malformed inbound message"
                    );
                }
            }
        })
    }

    /// Reject all pending caller-side requests. Returns how many.
    pub fn cancel_pending_requests(&self) -> usize {
        self.correlator.cancel_all("cancelled by request")
    }

    /// Cancel pending requests and pending coalesced flushes.
    ///
    /// Returns the number of pending requests rejected.
    pub fn shutdown(&self) -> usize {
        self.scheduler.clear();
        self.correlator.cancel_all("bridge shutdown")
    }

    /// Extended statistics: operations, cache, breaker, pending count.
    pub fn statistics(&self) -> Value {
        statistics_snapshot(&self.monitor, &self.cache, &self.breaker, &self.correlator)
    }

    /// A gate over this bridge's cache and breaker, for handler use.
    pub fn query_gate(&self) -> QueryGate {
        QueryGate::new(
            self.cache.clone(),
            self.breaker.clone(),
            self.config.cache_ttl,
        )
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// The performance monitor.
    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// The query cache.
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// The circuit breaker guarding the optimized query path.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The per-channel sequence validator.
    pub fn sequences(&self) -> &SequenceValidator {
        &self.sequences
    }

    /// The late-bound collaborator registry.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// The active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn handler_context(&self, family: &str, request_id: &str) -> HandlerContext {
        HandlerContext::new(
            family,
            request_id,
            Arc::clone(&self.transport),
            self.collaborators.clone(),
            self.query_gate(),
            Arc::clone(&self.notify_counter),
        )
    }
}

fn send_notification(
    transport: &Arc<dyn Transport>,
    counter: &AtomicU64,
    method: &str,
    payload: Value,
) -> Result<()> {
    let params = match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    };
    let envelope = Envelope::with_params(notification_id(counter), method, params);
    let bytes = EnvelopeCodec::encode(&envelope)?;
    transport.send(family_of(method), bytes)
}

fn statistics_snapshot(
    monitor: &PerformanceMonitor,
    cache: &QueryCache,
    breaker: &CircuitBreaker,
    correlator: &RequestCorrelator,
) -> Value {
    json!({
        "operations": serde_json::to_value(monitor.snapshot()).unwrap_or(Value::Null),
        "cache": serde_json::to_value(cache.stats()).unwrap_or(Value::Null),
        "breaker": {
            "state": breaker.state().as_str(),
            "failureCount": breaker.failure_count(),
        },
        "pendingRequests": correlator.pending_count(),
    })
}

/// Fluent builder for [`Bridge`].
pub struct BridgeBuilder {
    config: BridgeConfig,
    handlers: Vec<(String, Arc<dyn BridgeHandler>)>,
    transport: Arc<dyn Transport>,
    collaborators: Collaborators,
}

impl BridgeBuilder {
    /// Create a builder over the given transport.
    pub fn new(transport: impl Transport) -> Self {
        Self {
            config: BridgeConfig::default(),
            handlers: Vec::new(),
            transport: Arc::new(transport),
            collaborators: Collaborators::new(),
        }
    }

    /// Replace the default configuration.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a handler family.
    pub fn handler(mut self, family: &str, handler: impl BridgeHandler) -> Self {
        self.handlers.push((family.to_string(), Arc::new(handler)));
        self
    }

    /// Register an async closure as a handler family.
    pub fn handler_fn<F, Fut>(self, family: &str, f: F) -> Self
    where
        F: Fn(String, Map<String, Value>, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler(family, FnHandler::new(f))
    }

    /// Bind a collaborator for handlers to resolve at dispatch time.
    pub fn collaborator<T: Send + Sync + 'static>(self, name: &str, value: Arc<T>) -> Self {
        if let Err(e) = self.collaborators.bind(name, value) {
            tracing::warn!(name, error = %e, "collaborator binding ignored");
        }
        self
    }

    /// Wire everything up.
    pub fn build(self) -> Arc<Bridge> {
        let monitor = PerformanceMonitor::new();
        let cache = QueryCache::new(self.config.cache_capacity);
        let breaker = CircuitBreaker::new(
            self.config.breaker_threshold,
            self.config.breaker_window,
            self.config.breaker_cooldown,
        );
        let correlator = RequestCorrelator::new(self.config.request_timeout);
        let scheduler = UpdateScheduler::new(
            self.config.debounce_interval,
            self.config.coalesce_hard_cap,
        );

        let mut router = MessageRouter::new(monitor.clone());
        for (family, handler) in self.handlers {
            router.register_arc(&family, handler);
        }

        {
            let monitor = monitor.clone();
            let cache = cache.clone();
            let breaker = breaker.clone();
            let correlator = correlator.clone();
            let cancel_correlator = correlator.clone();
            router.set_admin(AdminHooks {
                statistics: Arc::new(move || {
                    statistics_snapshot(&monitor, &cache, &breaker, &correlator)
                }),
                cancel_pending: Arc::new(move || {
                    cancel_correlator.cancel_all("cancelled by request")
                }),
            });
        }

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_handlers));

        Arc::new(Bridge {
            router,
            correlator,
            sequences: SequenceValidator::new(),
            scheduler,
            cache,
            breaker,
            monitor,
            transport: self.transport,
            collaborators: self.collaborators,
            permits,
            notify_counter: Arc::new(AtomicU64::new(0)),
            config: self.config,
        })
    }
}
