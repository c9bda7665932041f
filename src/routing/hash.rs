//! Routing key hashing
//!
//! A [`HashCodeProvider`] turns a routing key into a [`KeyHash`]. Providers
//! must be deterministic for equal inputs within a process; they do not have
//! to be stable across processes.

use crate::core::types::{KeyHash, RoutingKey};

/// Hashes routing keys for node selection
pub trait HashCodeProvider: Send + Sync + 'static {
    /// Hash a text key
    fn hash_str(&self, key: &str) -> KeyHash;

    /// Hash a 32-bit integer key
    fn hash_i32(&self, key: i32) -> KeyHash;

    /// Hash a 64-bit integer key
    fn hash_i64(&self, key: i64) -> KeyHash;

    /// Hash a byte key
    fn hash_bytes(&self, key: &[u8]) -> KeyHash;

    /// Dispatch on the key kind
    fn hash_key(&self, key: RoutingKey<'_>) -> KeyHash {
        match key {
            RoutingKey::Text(s) => self.hash_str(s),
            RoutingKey::Int(v) => self.hash_i32(v),
            RoutingKey::Long(v) => self.hash_i64(v),
            RoutingKey::Bytes(b) => self.hash_bytes(b),
        }
    }
}

// Fixed seeds keep hashes identical across service instances in one build.
const AHASH_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Default provider backed by `ahash` with fixed seeds
#[derive(Clone)]
pub struct AHashCodeProvider {
    state: ahash::RandomState,
}

impl AHashCodeProvider {
    /// Provider with the built-in seeds
    pub fn new() -> Self {
        Self::with_seeds(AHASH_SEEDS)
    }

    /// Provider with caller-chosen seeds
    pub fn with_seeds(seeds: [u64; 4]) -> Self {
        Self {
            state: ahash::RandomState::with_seeds(seeds[0], seeds[1], seeds[2], seeds[3]),
        }
    }
}

impl Default for AHashCodeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AHashCodeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AHashCodeProvider")
    }
}

impl HashCodeProvider for AHashCodeProvider {
    #[inline]
    fn hash_str(&self, key: &str) -> KeyHash {
        self.state.hash_one(key) as KeyHash
    }

    #[inline]
    fn hash_i32(&self, key: i32) -> KeyHash {
        self.state.hash_one(key) as KeyHash
    }

    #[inline]
    fn hash_i64(&self, key: i64) -> KeyHash {
        self.state.hash_one(key) as KeyHash
    }

    #[inline]
    fn hash_bytes(&self, key: &[u8]) -> KeyHash {
        self.state.hash_one(key) as KeyHash
    }
}

/// Cryptographic-strength provider: the first 8 bytes of a BLAKE3 digest.
///
/// Slower than [`AHashCodeProvider`] but stable across builds and
/// platforms, and text keys hash like their UTF-8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3HashCodeProvider;

impl Blake3HashCodeProvider {
    fn digest(bytes: &[u8]) -> KeyHash {
        let hash = blake3::hash(bytes);
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        i64::from_le_bytes(head)
    }
}

impl HashCodeProvider for Blake3HashCodeProvider {
    fn hash_str(&self, key: &str) -> KeyHash {
        Self::digest(key.as_bytes())
    }

    fn hash_i32(&self, key: i32) -> KeyHash {
        Self::digest(&key.to_le_bytes())
    }

    fn hash_i64(&self, key: i64) -> KeyHash {
        Self::digest(&key.to_le_bytes())
    }

    fn hash_bytes(&self, key: &[u8]) -> KeyHash {
        Self::digest(key)
    }
}
