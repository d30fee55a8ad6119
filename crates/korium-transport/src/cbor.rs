//! CBOR serialization helpers for the Korium wire protocol.
//!
//! Wraps [`ciborium`] for encoding and decoding protocol payloads to and
//! from CBOR (RFC 8949). Every message payload is CBOR-encoded before being
//! placed into the [`WireMessage`](crate::wire::WireMessage) envelope.

use serde::{de::DeserializeOwned, Serialize};

use crate::TransportError;

/// Serialize a value to CBOR bytes.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| TransportError::Serialization(format!("CBOR serialization failed: {e}")))?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
pub fn from_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, TransportError> {
    ciborium::from_reader(data)
        .map_err(|e| TransportError::Deserialization(format!("CBOR deserialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::PingRequest;
    use korium_types::Contact;

    #[test]
    fn test_roundtrip_ping() {
        let ping = PingRequest {
            ping: "ping".to_string(),
            sender: Contact::client(),
        };
        let bytes = to_vec(&ping).expect("serialize");
        let restored: PingRequest = from_slice(&bytes).expect("deserialize");
        assert_eq!(ping.ping, restored.ping);
        assert_eq!(ping.sender, restored.sender);
    }

    #[test]
    fn test_invalid_data_returns_error() {
        let bad_data = &[0xFF, 0xFF, 0xFF];
        let result: Result<PingRequest, _> = from_slice(bad_data);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_data_returns_error() {
        let result: Result<PingRequest, _> = from_slice(&[]);
        assert!(result.is_err());
    }
}
