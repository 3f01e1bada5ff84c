//! Envelope types and the JSON envelope codec.
//!
//! The embedding boundary is a script-evaluation call in one direction and a
//! named-channel message post in the other, so the wire format is JSON text.
//! Requests and responses share one byte stream per channel; the codec
//! discriminates by field presence (`method` means request, `success` means
//! response). Field order on the wire is irrelevant — only presence and types
//! matter.
//!
//! # Example
//!
//! ```
//! use isometry_bridge::protocol::{Envelope, EnvelopeCodec, WireMessage};
//!
//! let env = Envelope::new("1-1700000000000", "filters.executeFilter");
//! let bytes = EnvelopeCodec::encode(&env).unwrap();
//!
//! match EnvelopeCodec::decode(&bytes).unwrap() {
//!     WireMessage::Request(decoded) => assert_eq!(decoded.id, env.id),
//!     WireMessage::Response(_) => unreachable!(),
//! }
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};

/// A request message crossing the bridge.
///
/// `id` is caller-generated and globally unique within a channel's lifetime.
/// Immutable once sent. Ordered-update channels carry a `sequenceId` inside
/// `params`; [`Envelope::sequence_id`] lifts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Caller-generated correlation id.
    pub id: String,
    /// Target operation, `family.method` by convention.
    pub method: String,
    /// Operation parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope with empty params.
    pub fn new(id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: Map::new(),
        }
    }

    /// Create an envelope with the given params.
    pub fn with_params(
        id: impl Into<String>,
        method: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Handler family this envelope targets: the segment before the first
    /// `.`, or the whole method name when there is none.
    pub fn family(&self) -> &str {
        family_of(&self.method)
    }

    /// Sequence id for ordered-update channels, if present in params.
    pub fn sequence_id(&self) -> Option<u64> {
        self.params.get("sequenceId").and_then(Value::as_u64)
    }
}

/// Split a method name into its handler family.
pub(crate) fn family_of(method: &str) -> &str {
    method.split('.').next().unwrap_or(method)
}

/// Bare operation name: the part after the family prefix.
pub(crate) fn operation_of(method: &str) -> &str {
    match method.split_once('.') {
        Some((_, rest)) => rest,
        None => method,
    }
}

/// A response message crossing the bridge.
///
/// Exactly one of `result`/`error` is present when `success` is true/false
/// respectively. `duration` is elapsed wall-clock handler time in
/// milliseconds, included regardless of outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Correlation id copied from the originating request.
    pub id: String,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Elapsed wall-clock time in milliseconds.
    #[serde(default)]
    pub duration: f64,
}

impl ResponseEnvelope {
    /// Build a success response.
    pub fn ok(id: impl Into<String>, result: Value, duration_ms: f64) -> Self {
        Self {
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
            duration: duration_ms,
        }
    }

    /// Build a failure response.
    pub fn fail(id: impl Into<String>, error: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            duration: duration_ms,
        }
    }
}

/// A decoded wire message: either direction's half of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// An inbound request to dispatch.
    Request(Envelope),
    /// An inbound response to correlate.
    Response(ResponseEnvelope),
}

/// JSON envelope codec.
///
/// `encode` never inspects the value; `decode` enforces the presence and
/// types of required fields (`id` + `method` for requests, `id` + `success`
/// for responses) and reports everything else as a malformed envelope. No
/// side effects.
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    /// Decode JSON bytes into a request or response envelope.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MalformedEnvelope`] if the bytes are not a JSON
    /// object, if the object is neither a request nor a response, or if any
    /// required field is missing or mistyped.
    pub fn decode(bytes: &[u8]) -> Result<WireMessage> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))?;

        let obj = value
            .as_object()
            .ok_or_else(|| BridgeError::MalformedEnvelope("not a JSON object".into()))?;

        if !matches!(obj.get("id"), Some(Value::String(_))) {
            return Err(BridgeError::MalformedEnvelope(
                "missing or mistyped field: id".into(),
            ));
        }

        if obj.contains_key("method") {
            let env: Envelope = serde_json::from_value(value)
                .map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))?;
            Ok(WireMessage::Request(env))
        } else if obj.contains_key("success") {
            let resp: ResponseEnvelope = serde_json::from_value(value)
                .map_err(|e| BridgeError::MalformedEnvelope(e.to_string()))?;
            Ok(WireMessage::Response(resp))
        } else {
            Err(BridgeError::MalformedEnvelope(
                "neither request (method) nor response (success)".into(),
            ))
        }
    }
}
