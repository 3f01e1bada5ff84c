//! Cached, breaker-guarded execution for read-only queries.
//!
//! [`QueryGate`] is the optional path between the router and a storage-backed
//! handler: first-page reads consult the query cache, and the actual
//! execution runs through the circuit breaker so a failing storage layer
//! degrades to short-circuited errors instead of piling up timeouts. Writes
//! and non-first-page reads bypass the cache by construction (`offset != 0`
//! is never cached; writes simply do not go through the gate).

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use crate::breaker::CircuitBreaker;
use crate::cache::{QueryCache, QueryKey};
use crate::error::{BridgeError, Result};

/// Upper bound on a single page of results.
const MAX_PAGE_SIZE: u64 = 10_000;

/// Combines the query cache and circuit breaker around a query producer.
///
/// Cloning shares both underlying structures.
#[derive(Debug, Clone)]
pub struct QueryGate {
    cache: QueryCache,
    breaker: CircuitBreaker,
    ttl: Duration,
}

impl QueryGate {
    /// Create a gate over the given cache and breaker; cached results live
    /// for `ttl`.
    pub fn new(cache: QueryCache, breaker: CircuitBreaker, ttl: Duration) -> Self {
        Self {
            cache,
            breaker,
            ttl,
        }
    }

    /// Execute a read-only query through the cache and breaker.
    ///
    /// `run` produces the result when the cache has no live entry. The
    /// returned object carries a `cached` flag so callers can distinguish a
    /// cache hit. Only `offset == 0` results are cached.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Validation`] for out-of-range pagination,
    /// [`BridgeError::CircuitOpen`] when the breaker short-circuits, and
    /// whatever error `run` itself produces.
    pub async fn execute<F, Fut>(
        &self,
        sql: &str,
        params: &[Value],
        limit: u64,
        offset: u64,
        run: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(BridgeError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let cacheable = offset == 0;
        let key = QueryKey::new(sql, params, limit, offset);

        if cacheable {
            if let Some(value) = self.cache.get(&key) {
                return Ok(with_cached_flag(value, true));
            }
        }

        let permit = self.breaker.preflight()?;

        match run().await {
            Ok(value) => {
                permit.succeed();
                if cacheable {
                    self.cache.put(key, value.clone(), self.ttl);
                }
                Ok(with_cached_flag(value, false))
            }
            Err(e) => {
                permit.fail();
                Err(e)
            }
        }
    }

    /// Drop all cached results (e.g. after a write invalidates them).
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    /// The underlying cache.
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// The underlying breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

/// Stamp a `cached` flag onto object results; non-objects pass through.
fn with_cached_flag(mut value: Value, cached: bool) -> Value {
    if let Value::Object(ref mut map) = value {
        map.insert("cached".into(), Value::Bool(cached));
    }
    value
}
