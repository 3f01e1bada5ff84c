//! Transport abstraction.
//!
//! The bridge never talks to an embedding technology directly: the host side
//! delivers outbound bytes through a script-evaluation call, the embedded
//! side through a named-channel message post, and both reduce to the same
//! capability — a one-directional, fire-and-forget `send(channel, bytes)`.
//! Inbound bytes enter through [`Bridge::handle_incoming`]
//! (crate::Bridge::handle_incoming), which the embedding invokes from its
//! message callback.
//!
//! [`loopback`] provides an in-memory pair for tests and embedding-free
//! development.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};

/// One-directional, fire-and-forget message-send capability.
///
/// Implementations must not block: delivery is asynchronous by nature and
/// the caller never waits for the far side.
pub trait Transport: Send + Sync + 'static {
    /// Send a payload on a named channel.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TransportClosed`] when the far side is gone.
    fn send(&self, channel: &str, payload: Bytes) -> Result<()>;
}

/// A message delivered by the far side.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Channel the sender posted on.
    pub channel: String,
    /// Raw envelope bytes.
    pub payload: Bytes,
}

/// Receiver half of an in-memory transport endpoint.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// In-memory transport endpoint: sends land in the peer's inbound queue.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    peer: mpsc::UnboundedSender<InboundMessage>,
}

impl Transport for LoopbackTransport {
    fn send(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.peer
            .send(InboundMessage {
                channel: channel.to_string(),
                payload,
            })
            .map_err(|_| BridgeError::TransportClosed)
    }
}

/// Create a connected pair of in-memory endpoints.
///
/// Each side gets a [`LoopbackTransport`] whose sends arrive on the *other*
/// side's [`InboundReceiver`].
pub fn loopback() -> (
    (LoopbackTransport, InboundReceiver),
    (LoopbackTransport, InboundReceiver),
) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    (
        (LoopbackTransport { peer: b_tx }, a_rx),
        (LoopbackTransport { peer: a_tx }, b_rx),
    )
}
