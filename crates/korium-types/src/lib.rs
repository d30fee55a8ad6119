//! # korium-types
//!
//! Shared domain types for the Korium DHT: the 512-bit node identifier with
//! its XOR distance metric, and the peer contact descriptor.

pub mod contact;
pub mod node_id;

pub use contact::Contact;
pub use node_id::NodeId;

/// The size of DHT keys and node ids in bytes.
pub const KEY_SIZE_BYTES: usize = 64;

/// The size of DHT keys and node ids in bits.
pub const KEY_SIZE_BITS: usize = 8 * KEY_SIZE_BYTES;

/// Error types for id and contact handling.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// A raw id had the wrong byte length.
    #[error("invalid id length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// An encoded id string could not be decoded.
    #[error("invalid {encoding} encoding: {reason}")]
    InvalidEncoding { encoding: &'static str, reason: String },

    /// A power-of-two constructor was given an exponent outside the key space.
    #[error("power {power} out of range for a {KEY_SIZE_BITS}-bit id")]
    PowerOutOfRange { power: u16 },

    /// A ranged random id was requested with lower bound above upper bound.
    #[error("invalid id range: lower bound exceeds upper bound")]
    InvalidRange,
}

/// Convenience result type for id and contact operations.
pub type Result<T> = std::result::Result<T, TypesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_size() {
        assert_eq!(KEY_SIZE_BYTES, 64);
        assert_eq!(KEY_SIZE_BITS, 512);
    }

    #[test]
    fn test_error_display() {
        let err = TypesError::InvalidLength {
            expected: 64,
            actual: 20,
        };
        assert!(err.to_string().contains("64"));
        assert!(err.to_string().contains("20"));
    }
}
