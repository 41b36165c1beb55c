//! Structural content hashing for duplicate detection.
//!
//! This module provides the 128-bit [`ContentHash`] and the [`ContentHasher`]
//! builder used to fingerprint an object's field values. Two objects at different
//! addresses hash equally exactly when their in-scope bytes match: primitive field
//! bytes, inline value-type fields, array elements up to the scan cap, and the
//! *type identity* of referenced objects. Addresses never enter the hash, which is
//! what makes the fingerprint structural.
//!
//! The digest is MD5: not cryptographically current, but fast, stable across runs
//! and platforms, and 128 bits is comfortably collision-free at heap scale
//! (hundreds of thousands of objects).
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use heapscope::heap::hash::ContentHasher;
//!
//! let mut hasher = ContentHasher::new();
//! hasher.mix_u32(type_index);
//! hasher.mix_bytes(&field_bytes);
//! let hash = hasher.finalize();
//! ```

use std::fmt;

use md5::{Digest, Md5};

/// A 128-bit structural fingerprint of an object's field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// The raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Incremental builder for [`ContentHash`] values.
///
/// Components are mixed in walk order, so the hash is order-sensitive: the same
/// field values visited in a different order produce a different digest. Walks
/// must therefore be deterministic, which the field enumeration guarantees
/// (declaration order, base types first).
pub struct ContentHasher {
    digest: Md5,
}

impl ContentHasher {
    /// Create a fresh hasher.
    #[must_use]
    pub fn new() -> Self {
        ContentHasher { digest: Md5::new() }
    }

    /// Mix raw bytes into the digest.
    pub fn mix_bytes(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }

    /// Mix a 32-bit value into the digest.
    pub fn mix_u32(&mut self, value: u32) {
        self.digest.update(value.to_le_bytes());
    }

    /// Mix a 64-bit value into the digest.
    pub fn mix_u64(&mut self, value: u64) {
        self.digest.update(value.to_le_bytes());
    }

    /// Finalize and return the digest.
    #[must_use]
    pub fn finalize(self) -> ContentHash {
        ContentHash(self.digest.finalize().into())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_deterministic() {
        let mut first = ContentHasher::new();
        first.mix_u32(42);
        first.mix_bytes(b"payload");

        let mut second = ContentHasher::new();
        second.mix_u32(42);
        second.mix_bytes(b"payload");

        assert_eq!(first.finalize(), second.finalize());
    }

    #[test]
    fn hash_order_sensitive() {
        let mut first = ContentHasher::new();
        first.mix_bytes(b"first");
        first.mix_bytes(b"second");

        let mut second = ContentHasher::new();
        second.mix_bytes(b"second");
        second.mix_bytes(b"first");

        assert_ne!(first.finalize(), second.finalize());
    }

    #[test]
    fn hash_single_byte_difference() {
        let mut first = ContentHasher::new();
        first.mix_bytes(&[1, 2, 3, 4]);

        let mut second = ContentHasher::new();
        second.mix_bytes(&[1, 2, 3, 5]);

        assert_ne!(first.finalize(), second.finalize());
    }

    #[test]
    fn display_is_hex() {
        let hash = ContentHasher::new().finalize();
        let rendered = format!("{hash}");
        assert_eq!(rendered.len(), 32);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
