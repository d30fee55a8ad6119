//! The 512-bit Korium node identifier and its XOR distance metric.
//!
//! A [`NodeId`] names both a node and a storage key; the two share one id
//! space. Ids are interpreted as big-endian unsigned integers, so the
//! derived lexicographic ordering on the byte array is the numeric
//! ordering. Distance between two ids is bitwise XOR, and "closer" means
//! numerically smaller distance.
//!
//! Ids admit three textual encodings for I/O: hex, base32, and base64.
//! The all-zero id is legal and reserved for uninitialized state.

use std::fmt;
use std::ops::BitXor;

use rand::Rng;

use crate::{Result, TypesError, KEY_SIZE_BITS, KEY_SIZE_BYTES};

/// A 512-bit identifier in the Korium key space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; KEY_SIZE_BYTES]);

impl NodeId {
    /// The all-zero id, reserved for uninitialized state.
    pub const fn zero() -> Self {
        Self([0u8; KEY_SIZE_BYTES])
    }

    /// The maximum id, `2^512 - 1`.
    pub const fn max() -> Self {
        Self([0xFFu8; KEY_SIZE_BYTES])
    }

    /// Create an id from a raw byte array.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE_BYTES]) -> Self {
        Self(bytes)
    }

    /// Create an id from a raw byte slice, checking the length.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; KEY_SIZE_BYTES] =
            bytes
                .try_into()
                .map_err(|_| TypesError::InvalidLength {
                    expected: KEY_SIZE_BYTES,
                    actual: bytes.len(),
                })?;
        Ok(Self(raw))
    }

    /// Sample an id uniformly from the whole key space.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut raw = [0u8; KEY_SIZE_BYTES];
        rng.fill_bytes(&mut raw);
        Self(raw)
    }

    /// Create the id `2^power`.
    ///
    /// Fails when `power >= 512`.
    pub fn from_power(power: u16) -> Result<Self> {
        if usize::from(power) >= KEY_SIZE_BITS {
            return Err(TypesError::PowerOutOfRange { power });
        }
        let mut raw = [0u8; KEY_SIZE_BYTES];
        let byte = KEY_SIZE_BYTES - 1 - usize::from(power) / 8;
        raw[byte] = 1 << (power % 8);
        Ok(Self(raw))
    }

    /// Sample an id uniformly from the inclusive range `[low, high]`.
    ///
    /// `[a, a]` returns `a`. Fails when `low > high`.
    pub fn random_in_range<R: Rng + ?Sized>(low: &Self, high: &Self, rng: &mut R) -> Result<Self> {
        if low > high {
            return Err(TypesError::InvalidRange);
        }
        if low == high {
            return Ok(*low);
        }
        let span = sub(&high.0, &low.0);
        let bits = bit_length(&span);
        // Rejection sampling over the masked span keeps the draw uniform;
        // with the top partial byte masked, the expected retry count is < 2.
        loop {
            let mut candidate = [0u8; KEY_SIZE_BYTES];
            rng.fill_bytes(&mut candidate);
            mask_to_bits(&mut candidate, bits);
            if le(&candidate, &span) {
                return Ok(Self(add(&low.0, &candidate)));
            }
        }
    }

    /// Return true iff `a` is closer to `target` than `b` in XOR distance.
    pub fn closer_to_target(a: &Self, b: &Self, target: &Self) -> bool {
        (*a ^ *target) < (*b ^ *target)
    }

    /// Midpoint `floor((low + high) / 2)` of an id range.
    ///
    /// Used for bucket splitting: `[min, max]` becomes `[min, mid]` and
    /// `[mid + 1, max]`.
    pub fn midpoint(low: &Self, high: &Self) -> Self {
        let (sum, carry) = add_with_carry(&low.0, &high.0);
        Self(half(&sum, carry))
    }

    /// The next id, `self + 1`, wrapping at the top of the key space.
    pub fn successor(&self) -> Self {
        let one = {
            let mut raw = [0u8; KEY_SIZE_BYTES];
            raw[KEY_SIZE_BYTES - 1] = 1;
            raw
        };
        Self(add(&self.0, &one))
    }

    /// The raw big-endian bytes of this id.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_BYTES] {
        &self.0
    }

    /// The raw bytes as an owned vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// True iff this is the all-zero id.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decode from a hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| TypesError::InvalidEncoding {
            encoding: "hex",
            reason: e.to_string(),
        })?;
        Self::try_from_slice(&bytes)
    }

    /// Encode as RFC 4648 base32.
    pub fn to_base32(&self) -> String {
        data_encoding::BASE32.encode(&self.0)
    }

    /// Decode from an RFC 4648 base32 string.
    pub fn from_base32(s: &str) -> Result<Self> {
        let bytes =
            data_encoding::BASE32
                .decode(s.as_bytes())
                .map_err(|e| TypesError::InvalidEncoding {
                    encoding: "base32",
                    reason: e.to_string(),
                })?;
        Self::try_from_slice(&bytes)
    }

    /// Encode as standard base64.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    /// Decode from a standard base64 string.
    pub fn from_base64(s: &str) -> Result<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| TypesError::InvalidEncoding {
                encoding: "base64",
                reason: e.to_string(),
            })?;
        Self::try_from_slice(&bytes)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::zero()
    }
}

impl BitXor for NodeId {
    type Output = NodeId;

    fn bitxor(self, rhs: Self) -> Self::Output {
        let mut raw = [0u8; KEY_SIZE_BYTES];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = self.0[i] ^ rhs.0[i];
        }
        Self(raw)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", hex::encode(&self.0[..6]))
    }
}

// Serde support: an id travels as a raw 64-byte string (CBOR byte string).
// Fixed arrays above 32 bytes do not get derived serde impls, so these are
// written out by hand.
impl serde::Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct IdVisitor;

        impl<'de> serde::de::Visitor<'de> for IdVisitor {
            type Value = NodeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{KEY_SIZE_BYTES} raw id bytes")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> std::result::Result<NodeId, E>
            where
                E: serde::de::Error,
            {
                NodeId::try_from_slice(v).map_err(E::custom)
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<NodeId, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut raw = [0u8; KEY_SIZE_BYTES];
                for (i, byte) in raw.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(NodeId(raw))
            }
        }

        deserializer.deserialize_bytes(IdVisitor)
    }
}

// ---------------------------------------------------------------------------
// Big-endian fixed-width arithmetic helpers
// ---------------------------------------------------------------------------

/// `a + b`, discarding any carry out of the top byte.
fn add(a: &[u8; KEY_SIZE_BYTES], b: &[u8; KEY_SIZE_BYTES]) -> [u8; KEY_SIZE_BYTES] {
    add_with_carry(a, b).0
}

/// `a + b`, returning the sum and the carry out of the top byte.
fn add_with_carry(
    a: &[u8; KEY_SIZE_BYTES],
    b: &[u8; KEY_SIZE_BYTES],
) -> ([u8; KEY_SIZE_BYTES], bool) {
    let mut out = [0u8; KEY_SIZE_BYTES];
    let mut carry = 0u16;
    for i in (0..KEY_SIZE_BYTES).rev() {
        let sum = u16::from(a[i]) + u16::from(b[i]) + carry;
        out[i] = (sum & 0xFF) as u8;
        carry = sum >> 8;
    }
    (out, carry != 0)
}

/// `a - b`, assuming `a >= b`.
fn sub(a: &[u8; KEY_SIZE_BYTES], b: &[u8; KEY_SIZE_BYTES]) -> [u8; KEY_SIZE_BYTES] {
    let mut out = [0u8; KEY_SIZE_BYTES];
    let mut borrow = 0i16;
    for i in (0..KEY_SIZE_BYTES).rev() {
        let mut diff = i16::from(a[i]) - i16::from(b[i]) - borrow;
        if diff < 0 {
            diff += 256;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[i] = diff as u8;
    }
    out
}

/// `value / 2`, with `carry_in` supplying bit 512 of the dividend.
fn half(value: &[u8; KEY_SIZE_BYTES], carry_in: bool) -> [u8; KEY_SIZE_BYTES] {
    let mut out = [0u8; KEY_SIZE_BYTES];
    let mut carry = u8::from(carry_in);
    for i in 0..KEY_SIZE_BYTES {
        out[i] = (value[i] >> 1) | (carry << 7);
        carry = value[i] & 1;
    }
    out
}

/// Number of significant bits in `value`.
fn bit_length(value: &[u8; KEY_SIZE_BYTES]) -> usize {
    for (i, byte) in value.iter().enumerate() {
        if *byte != 0 {
            return (KEY_SIZE_BYTES - i) * 8 - byte.leading_zeros() as usize;
        }
    }
    0
}

/// Zero all bits of `value` above the lowest `bits`.
fn mask_to_bits(value: &mut [u8; KEY_SIZE_BYTES], bits: usize) {
    let full_bytes = bits / 8;
    let partial = bits % 8;
    let keep_from = KEY_SIZE_BYTES - full_bytes;
    let zero_until = if partial > 0 { keep_from - 1 } else { keep_from };
    for byte in value.iter_mut().take(zero_until) {
        *byte = 0;
    }
    if partial > 0 {
        let mask = (1u8 << partial) - 1;
        value[keep_from - 1] &= mask;
    }
}

/// Lexicographic (numeric) `a <= b`.
fn le(a: &[u8; KEY_SIZE_BYTES], b: &[u8; KEY_SIZE_BYTES]) -> bool {
    a <= b
}
