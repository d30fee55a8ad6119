//! BLAKE3 hashing for the Korium DHT.
//!
//! Two digest widths are used:
//!
//! - [`hash`] — 32-byte digests for signer ids and value fingerprints
//! - [`hash_to_key`] — 64-byte digests (XOF output) sized to the DHT key
//!   space, for content-addressed keys and node id derivation

/// The byte width of a DHT key digest.
pub const KEY_DIGEST_LEN: usize = 64;

/// Compute the BLAKE3 hash of the input data.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *::blake3::hash(data).as_bytes()
}

/// Compute a variable-length BLAKE3 hash.
pub fn hash_xof(data: &[u8], output: &mut [u8]) {
    let mut hasher = ::blake3::Hasher::new();
    hasher.update(data);
    let mut reader = hasher.finalize_xof();
    reader.fill(output);
}

/// Compute a key-space-sized digest of the input data.
///
/// Used to derive DHT keys from content and node ids from public keys.
pub fn hash_to_key(data: &[u8]) -> [u8; KEY_DIGEST_LEN] {
    let mut out = [0u8; KEY_DIGEST_LEN];
    hash_xof(data, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"korium"), hash(b"korium"));
        assert_ne!(hash(b"korium"), hash(b"muirok"));
    }

    #[test]
    fn test_hash_to_key_prefix_matches_hash() {
        // BLAKE3's XOF output begins with the standard 32-byte digest.
        let short = hash(b"some content");
        let long = hash_to_key(b"some content");
        assert_eq!(&long[..32], &short[..]);
    }

    #[test]
    fn test_hash_to_key_full_width() {
        let key = hash_to_key(b"value");
        assert_eq!(key.len(), KEY_DIGEST_LEN);
        assert!(key.iter().any(|b| *b != 0));
    }

    #[test]
    fn test_hash_xof_arbitrary_length() {
        let mut out = [0u8; 17];
        hash_xof(b"data", &mut out);
        let mut out2 = [0u8; 17];
        hash_xof(b"data", &mut out2);
        assert_eq!(out, out2);
    }
}
