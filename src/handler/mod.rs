//! Handler contract and routing.
//!
//! A handler is anything addressable by family name that accepts a
//! `(method, params)` pair and asynchronously produces a result or an error.
//! The router resolves the family from the method's naming convention
//! (`family.method`), dispatches, and wraps every outcome — including its
//! own routing misses — in a response envelope.

pub(crate) mod context;
mod registry;

pub use context::{Collaborators, HandlerContext};
pub use registry::{AdminHooks, BoxFuture, BridgeHandler, FnHandler, HandlerResult, MessageRouter};
