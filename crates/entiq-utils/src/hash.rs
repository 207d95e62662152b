//! Framed xxh3 hash stream used for structural identities.
//!
//! Every write is framed (tag byte, fixed-width integers, length-prefixed
//! strings) so two different write sequences cannot produce the same byte
//! stream by concatenation.
#![expect(clippy::cast_possible_truncation)]

use xxhash_rust::xxh3::Xxh3;

/// Tag byte written between a base identity and its decoration.
pub const DELIMITER_TAG: u8 = 0xFF;

///
/// StableHasher
///
/// Deterministic 64-bit hash stream. Output is stable across processes and
/// platforms, unlike `std::collections::hash_map::DefaultHasher`.
///

pub struct StableHasher {
    inner: Xxh3,
}

impl StableHasher {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Xxh3::new() }
    }

    pub fn write_tag(&mut self, tag: u8) {
        self.inner.update(&[tag]);
    }

    /// Encode one u32 in network byte order.
    pub fn write_u32(&mut self, value: u32) {
        self.inner.update(&value.to_be_bytes());
    }

    /// Encode one u64 in network byte order.
    pub fn write_u64(&mut self, value: u64) {
        self.inner.update(&value.to_be_bytes());
    }

    /// Encode one string with a length prefix.
    pub fn write_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.inner.update(value.as_bytes());
    }

    pub fn write_delimiter(&mut self) {
        self.write_tag(DELIMITER_TAG);
    }

    #[must_use]
    pub fn finish(&self) -> u64 {
        self.inner.digest()
    }
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash any `std::hash::Hash` value through xxh3.
///
/// Used for routing only; the byte stream depends on the `Hash` impl.
#[must_use]
pub fn route_hash<T: std::hash::Hash + ?Sized>(value: &T) -> u64 {
    use std::hash::Hasher;

    let mut hasher = Xxh3::new();
    value.hash(&mut hasher);
    hasher.finish()
}

///
/// TESTS
///
