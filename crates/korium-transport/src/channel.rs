//! The transport contract between the DHT and the network.
//!
//! The DHT treats its transport as a request/response channel that may
//! fail, time out, or succeed. [`RpcTransport`] is the client half: one
//! serialized message out, one terminal event back. [`InboundHandler`] is
//! the server half: the transport delivers each received message and sends
//! back whatever the handler returns on the same stream.
//!
//! Both traits are object-safe so nodes and tests can swap the QUIC
//! implementation for an in-memory one.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// The default time allowed for a request to produce its terminal event.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Client half of the transport: one-shot request/response and
/// fire-and-forget notification.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send `payload` to `to` and await a single response.
    ///
    /// Exactly one terminal event occurs: the response bytes, a transport
    /// error, or a timeout.
    async fn request(&self, to: SocketAddr, payload: Vec<u8>, timeout: Duration)
        -> Result<Vec<u8>>;

    /// Send `payload` to `to` without awaiting any response.
    async fn notify(&self, to: SocketAddr, payload: Vec<u8>) -> Result<()>;
}

/// Server half of the transport: invoked once per received message.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle one inbound message.
    ///
    /// Returning `Some(bytes)` sends those bytes back on the same stream;
    /// `None` closes the stream without a response (notifications).
    async fn handle(&self, payload: Vec<u8>, remote: SocketAddr) -> Option<Vec<u8>>;
}
