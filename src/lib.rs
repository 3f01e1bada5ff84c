//! Request/response bridge between a native visualization host and its
//! embedded web-rendered UI.
//!
//! The two sides share no memory and no event loop; everything crosses as
//! serialized envelopes over named channels. This crate provides the full
//! plumbing for that boundary:
//!
//! - **Envelope codec** — JSON request/response framing with field-presence
//!   discrimination ([`protocol`])
//! - **Request correlation** — outbound calls resolve exactly once (result,
//!   error, or timeout), responses match by id in any order ([`correlator`])
//! - **Sequence validation** — advisory per-channel ordering for data
//!   updates ([`protocol::SequenceValidator`])
//! - **Debounce/coalesce scheduling** — bursts of render and viewport
//!   updates collapse to at most one flush per interval ([`scheduler`])
//! - **Query cache + circuit breaker** — TTL-bounded result reuse and
//!   fail-fast when storage degrades ([`cache`], [`breaker`], [`query`])
//! - **Routing and handlers** — family-addressed async handlers with
//!   reserved admin methods (`ping`, `getStatistics`,
//!   `cancelPendingRequests`) ([`handler`])
//! - **Performance monitoring** — per-operation latency, success rate, and
//!   payload volume ([`monitor`])
//!
//! # Quick start
//!
//! ```ignore
//! use isometry_bridge::{Bridge, BridgeConfig};
//! use serde_json::json;
//!
//! let bridge = Bridge::builder(transport)
//!     .config(BridgeConfig::default())
//!     .collaborator("database", database)
//!     .handler_fn("filters", |method, params, ctx| async move {
//!         let store = ctx.collaborator::<NodeStore>("database")?;
//!         // run the query through the cache/breaker gate
//!         Ok(json!({"rows": []}))
//!     })
//!     .build();
//!
//! bridge.spawn_inbound(inbound_rx);
//!
//! let result = bridge.send("filters.executeFilter", params).await?;
//! ```

pub mod breaker;
pub mod cache;
pub mod config;
pub mod correlator;
pub mod error;
pub mod handler;
pub mod monitor;
pub mod protocol;
pub mod query;
pub mod scheduler;
pub mod transport;

mod bridge;

pub use bridge::{Bridge, BridgeBuilder};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use handler::{BridgeHandler, FnHandler, HandlerContext, HandlerResult};
