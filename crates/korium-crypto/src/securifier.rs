//! The sign/validate contract used by the DHT's RPC layer.
//!
//! Store, delete, and update requests carry a signature block naming the
//! signer and its public key. A [`Securifier`] signs outgoing payloads with
//! the local identity and validates inbound signature blocks against the
//! key material the sender declared. Both halves are pure; no network I/O
//! happens here.

use crate::ed25519::{KeyPair, Signature, VerifyingKey};

/// Signs outgoing payloads and validates inbound signature blocks.
pub trait Securifier: Send + Sync {
    /// The id under which this signer publishes values.
    fn signer_id(&self) -> Vec<u8>;

    /// The public half of the signing identity.
    fn public_key(&self) -> Vec<u8>;

    /// Sign a payload with the local identity.
    fn sign(&self, payload: &[u8]) -> Vec<u8>;

    /// Validate `signature` over `payload` against a sender-declared
    /// `public_key` and `signer_id`.
    fn validate(
        &self,
        payload: &[u8],
        signature: &[u8],
        public_key: &[u8],
        signer_id: &[u8],
    ) -> bool;
}

/// The standard [`Securifier`]: Ed25519 signatures with the signer id
/// derived as `BLAKE3(public_key)`.
pub struct Ed25519Securifier {
    keypair: KeyPair,
}

impl Ed25519Securifier {
    /// Wrap an identity keypair.
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self::new(KeyPair::generate())
    }

    /// The signer id for a given public key.
    pub fn signer_id_for(public_key: &[u8]) -> Vec<u8> {
        crate::blake3::hash(public_key).to_vec()
    }

    /// Borrow the wrapped keypair.
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }
}

impl Securifier for Ed25519Securifier {
    fn signer_id(&self) -> Vec<u8> {
        Self::signer_id_for(self.keypair.verifying_key.as_bytes())
    }

    fn public_key(&self) -> Vec<u8> {
        self.keypair.verifying_key.to_bytes().to_vec()
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.keypair.signing_key.sign(payload).to_bytes().to_vec()
    }

    fn validate(
        &self,
        payload: &[u8],
        signature: &[u8],
        public_key: &[u8],
        signer_id: &[u8],
    ) -> bool {
        // The declared signer id must match the declared key.
        if Self::signer_id_for(public_key) != signer_id {
            return false;
        }
        let Ok(key) = VerifyingKey::from_slice(public_key) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(payload, &sig).is_ok()
    }
}
