//! Wire-protocol message envelope for the Korium DHT.
//!
//! Every message exchanged between Korium nodes is wrapped in a
//! [`WireMessage`] envelope, CBOR-serialized for transmission.
//!
//! ## Wire format
//!
//! ```text
//! WireMessage {
//!     version:   u8,       // Protocol version (1)
//!     msg_type:  u16,      // Message type from the registry
//!     msg_id:    [u8; 16], // Random unique message ID
//!     timestamp: u64,      // Unix timestamp (seconds)
//!     payload:   Vec<u8>,  // CBOR-encoded payload
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::cbor;
use crate::messages::TypedMessage;
use crate::TransportError;

/// Current Korium protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum payload size, bounding allocation on decode.
pub const MAX_PAYLOAD_SIZE: usize = 262_144;

/// Protocol message envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireMessage {
    /// Protocol version. Must be [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Message type code from the message type registry.
    pub msg_type: u16,
    /// Random 128-bit unique message identifier.
    pub msg_id: [u8; 16],
    /// Unix timestamp in seconds when the message was created.
    pub timestamp: u64,
    /// CBOR-encoded payload bytes.
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Create a new `WireMessage` from a typed message payload.
    ///
    /// Generates a random `msg_id` and captures the current Unix timestamp.
    pub fn from_typed(msg: &TypedMessage) -> Result<Self, TransportError> {
        let payload = cbor::to_vec(msg)?;
        let mut msg_id = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut msg_id);

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| TransportError::Io(format!("system time error: {e}")))?
            .as_secs();

        Ok(Self {
            version: PROTOCOL_VERSION,
            msg_type: msg.msg_type(),
            msg_id,
            timestamp,
            payload,
        })
    }

    /// Decode the payload as a [`TypedMessage`].
    pub fn decode_payload(&self) -> Result<TypedMessage, TransportError> {
        let msg: TypedMessage = cbor::from_slice(&self.payload)?;
        if msg.msg_type() != self.msg_type {
            return Err(TransportError::ProtocolViolation(format!(
                "payload type {:#06x} does not match envelope type {:#06x}",
                msg.msg_type(),
                self.msg_type
            )));
        }
        Ok(msg)
    }

    /// Serialize this message to CBOR bytes for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        cbor::to_vec(self)
    }

    /// Deserialize and validate a message received from the wire.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TransportError> {
        let msg: Self = cbor::from_slice(data)?;
        msg.validate()?;
        Ok(msg)
    }

    /// Validate the envelope: version must match and the payload must fit.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.version != PROTOCOL_VERSION {
            return Err(TransportError::ProtocolViolation(format!(
                "unsupported protocol version {}, expected {PROTOCOL_VERSION}",
                self.version
            )));
        }
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::ProtocolViolation(format!(
                "payload too large: {} bytes, max {MAX_PAYLOAD_SIZE}",
                self.payload.len()
            )));
        }
        Ok(())
    }
}

/// Encode a typed message straight to envelope bytes.
pub fn encode(msg: &TypedMessage) -> Result<Vec<u8>, TransportError> {
    WireMessage::from_typed(msg)?.to_bytes()
}

/// Decode envelope bytes straight to a typed message.
pub fn decode(data: &[u8]) -> Result<TypedMessage, TransportError> {
    WireMessage::from_bytes(data)?.decode_payload()
}
