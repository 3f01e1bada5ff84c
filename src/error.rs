//! Error types for the bridge.

use thiserror::Error;

/// Main error type for all bridge operations.
///
/// Every variant maps to one entry in the protocol's error taxonomy. All of
/// them are recoverable: a failing handler or a tripped circuit degrades that
/// operation only, never the process.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Envelope bytes could not be parsed, or a required field is missing
    /// or mistyped. Reported immediately; no handler is invoked.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// No handler family is registered under the requested name.
    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    /// The handler family exists but does not serve the requested method.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Handler-specific input rejected before execution (bad pagination
    /// bounds, disallowed method name, unsafe parameters).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Downstream failure during handler execution. The message is surfaced
    /// verbatim to the caller.
    #[error("{0}")]
    HandlerExecution(String),

    /// No response arrived within the request timeout window.
    #[error("Request timed out")]
    Timeout,

    /// The circuit breaker is open; the call was short-circuited without
    /// attempting the downstream operation.
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// A late-bound collaborator was used before being bound at startup.
    #[error("Collaborator not initialized: {0}")]
    NotInitialized(String),

    /// Pending request rejected by an explicit cancellation.
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// The transport (or its inbound counterpart) is gone.
    #[error("Transport closed")]
    TransportClosed,

    /// JSON serialization error while encoding an envelope.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
