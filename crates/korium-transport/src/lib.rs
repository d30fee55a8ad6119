//! # korium-transport
//!
//! Network transport for the Korium DHT.
//!
//! This crate provides:
//!
//! - **Wire protocol** message envelope (CBOR-serialized) via [`wire`]
//! - **Message types** for every protocol verb via [`messages`]
//! - **CBOR serialization** helpers via [`cbor`]
//! - **Transport contract** traits ([`RpcTransport`], [`InboundHandler`])
//!   via [`channel`]
//! - **QUIC/TLS 1.3** request/response plumbing via [`quic`]
//!
//! ## Architecture
//!
//! ```text
//! Rpcs / Service
//!     |
//!     v
//! WireMessage (wire.rs)      -- CBOR envelope with version, type, payload
//!     |
//!     v
//! RpcTransport (channel.rs)  -- one-shot request/response contract
//!     |
//!     v
//! QuicTransport (quic.rs)    -- QUIC/TLS 1.3 bidirectional streams
//!     |
//!     v
//! UDP socket
//! ```

pub mod cbor;
pub mod channel;
pub mod messages;
pub mod quic;
pub mod wire;

pub use channel::{InboundHandler, RpcTransport};

/// Terminal condition of a transport operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportCode {
    /// The operation completed and produced a response.
    Success,
    /// A generic transport failure (stream reset, serialization, I/O).
    Error,
    /// No terminal event arrived within the allowed time.
    Timeout,
    /// The destination endpoint could not be parsed or routed.
    InvalidAddress,
    /// The connection attempt was refused or failed to complete.
    ConnectError,
    /// A socket or TLS option could not be applied.
    SetOptionFailure,
    /// No local socket is available (endpoint closed or never opened).
    NoSocket,
}

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// CBOR serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Protocol violation (version mismatch, oversized payload, etc.).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer did not answer within the allowed time.
    #[error("request timed out")]
    Timeout,

    /// The destination address was invalid or unroutable.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The connection could not be established.
    #[error("connect error: {0}")]
    Connect(String),

    /// TLS or transport option configuration failed.
    #[error("transport option failure: {0}")]
    SetOption(String),

    /// The local endpoint is closed or was never opened.
    #[error("no local socket")]
    NoSocket,

    /// I/O error (socket, stream read/write).
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Map this error onto the terminal condition codes the DHT consumes.
    pub fn code(&self) -> TransportCode {
        match self {
            TransportError::Timeout => TransportCode::Timeout,
            TransportError::InvalidAddress(_) => TransportCode::InvalidAddress,
            TransportError::Connect(_) => TransportCode::ConnectError,
            TransportError::SetOption(_) => TransportCode::SetOptionFailure,
            TransportError::NoSocket => TransportCode::NoSocket,
            TransportError::Serialization(_)
            | TransportError::Deserialization(_)
            | TransportError::ProtocolViolation(_)
            | TransportError::Io(_) => TransportCode::Error,
        }
    }
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
