//! # korium-crypto
//!
//! Cryptographic primitives for the Korium DHT.
//!
//! ## Modules
//!
//! - [`blake3`] — Content hashing and key-sized digests
//! - [`ed25519`] — Ed25519 signing and verification (RFC 8032)
//! - [`securifier`] — The sign/validate contract used by the RPC layer

pub mod blake3;
pub mod ed25519;
pub mod securifier;

pub use securifier::{Ed25519Securifier, Securifier};

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
