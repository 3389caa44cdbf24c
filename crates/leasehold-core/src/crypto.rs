//! Hashing and capability-token primitives for leasehold.
//!
//! Provides two things:
//!   1. BLAKE3 hashing — fab content hashes, message ids, token digests
//!   2. Lease tokens — 256 random bits, hex-encoded, opaque to every caller
//!
//! The server never stores a token in plaintext. It keeps only the BLAKE3
//! digest, and logs only the first 8 bytes of that digest.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Incremental BLAKE3 hasher for ids derived from several fields.
///
/// # Example
/// ```
/// use leasehold_core::crypto::Hasher;
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// let digest = h.finalize();
/// assert_eq!(digest, leasehold_core::crypto::hash(b"hello world"));
/// ```
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        *self.0.finalize().as_bytes()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hex BLAKE3 hash of a fab's content. This is the fab's `hash_str`.
pub fn fab_hash(content: &[u8]) -> String {
    hex::encode(hash(content))
}

/// Message id: `hex(blake3(run_id_le || created_at_le || content_bytes))`.
pub fn message_id(run_id: u64, created_at: u64, content: &[u8]) -> String {
    let mut h = Hasher::new();
    h.update(&run_id.to_le_bytes());
    h.update(&created_at.to_le_bytes());
    h.update(content);
    hex::encode(h.finalize())
}

// ── Tokens ────────────────────────────────────────────────────────────────────

/// BLAKE3 digest of a token string. The lease table is keyed on this.
pub type TokenDigest = [u8; 32];

/// Number of random bytes behind every token.
const TOKEN_BYTES: usize = 32;

/// Opaque lease capability handed to a worker.
///
/// Nothing about the run, the deadline or the server state can be read out
/// of it; the server resolves it through its digest. `Debug` prints only the
/// fingerprint so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Generate a fresh token from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut secret = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut secret);
        Self(hex::encode(secret))
    }

    /// Wrap a token string received from the wire.
    pub fn from_wire(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest used to look the token up server-side.
    pub fn digest(&self) -> TokenDigest {
        hash(self.0.as_bytes())
    }

    /// Short, log-safe identifier for the lease behind this token.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.digest())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.fingerprint())
    }
}

/// First 8 bytes of a token digest, hex-encoded.
pub fn fingerprint(digest: &TokenDigest) -> String {
    hex::encode(&digest[..8])
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_known_vector() {
        // BLAKE3 official test vector for the empty input
        let expected = [
            0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc,
            0xc9, 0x49, 0x9b, 0xcb, 0x25, 0xc9, 0xad, 0xc1, 0x12, 0xb7, 0xcc, 0x9a, 0x93, 0xca,
            0xe4, 0x1f, 0x32, 0x62,
        ];
        assert_eq!(hash(b""), expected);
    }

    #[test]
    fn incremental_hasher_matches_oneshot() {
        let mut h = Hasher::new();
        h.update(b"hello ");
        h.update(b"world");
        assert_eq!(h.finalize(), hash(b"hello world"));
    }

    #[test]
    fn message_id_depends_on_every_field() {
        let base = message_id(1, 100, b"{}");
        assert_eq!(base, message_id(1, 100, b"{}"));
        assert_ne!(base, message_id(2, 100, b"{}"));
        assert_ne!(base, message_id(1, 101, b"{}"));
        assert_ne!(base, message_id(1, 100, b"[]"));
    }

    #[test]
    fn generated_tokens_are_distinct_and_hex() {
        let a = Token::generate();
        let b = Token::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), TOKEN_BYTES * 2);
        assert!(hex::decode(a.as_str()).is_ok());
    }

    #[test]
    fn digest_is_stable_for_wire_roundtrip() {
        let token = Token::generate();
        let echoed = Token::from_wire(token.as_str().to_string());
        assert_eq!(token.digest(), echoed.digest());
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let token = Token::generate();
        let printed = format!("{:?}", token);
        assert!(!printed.contains(token.as_str()));
        assert!(printed.contains(&token.fingerprint()));
    }

    #[test]
    fn token_serializes_as_plain_string() {
        let token = Token::from_wire("abc");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"abc\"");
    }
}
