// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use sha2::{Digest as _, Sha256};

/// A finished SHA-256 digest: 32 bytes, rendered as 64 lowercase hex chars.
///
/// Digests key the content-addressable store and, in hex form, the secondary
/// storage.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueDigest(pub [u8; 32]);

impl UniqueDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for UniqueDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for UniqueDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueDigest({})", self.to_hex())
    }
}

// Type tags prefixed to every hashed value so that values with identical
// bitwise representations but different types cannot collide. All producers
// must agree on these.
pub(crate) const TAG_NIL: u8 = 0x00;
pub(crate) const TAG_BOOL: u8 = 0x01;
pub(crate) const TAG_INT: u8 = 0x02;
pub(crate) const TAG_FLOAT: u8 = 0x03;
pub(crate) const TAG_STRING: u8 = 0x04;
pub(crate) const TAG_BLOB: u8 = 0x05;
pub(crate) const TAG_LIST: u8 = 0x06;
pub(crate) const TAG_MAP: u8 = 0x07;
pub(crate) const TAG_ID_TUPLE: u8 = 0x08;

// Provenance bytes following TAG_BLOB.
pub(crate) const BLOB_INLINE: u8 = 0x00;
pub(crate) const BLOB_AS_FILE: u8 = 0x01;

/// Produces cryptographic-strength hashes that key the cache tiers.
///
/// Collisions between values that happen to share a bitwise representation
/// are prevented by tagging each value with its type before hashing, and by
/// folding the element count into aggregate hashes.
#[derive(Default)]
pub struct UniqueHasher {
    impl_: Sha256,
}

impl UniqueHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        self.impl_.update(bytes);
    }

    pub fn encode_type_tag(&mut self, tag: u8) {
        self.impl_.update([tag]);
    }

    /// Folds a previously finished digest into this hash.
    pub fn combine(&mut self, digest: &UniqueDigest) {
        self.impl_.update(digest.as_bytes());
    }

    pub fn finish(self) -> UniqueDigest {
        let out = self.impl_.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out);
        UniqueDigest(bytes)
    }

    /// Finishes the hash and returns the 64-char lowercase hex string.
    pub fn finish_hex(self) -> String {
        self.finish().to_hex()
    }
}

/// Types whose value can be fed into a [`UniqueHasher`].
pub trait UpdateUniqueHash {
    fn update_unique_hash(&self, hasher: &mut UniqueHasher);
}

impl UpdateUniqueHash for bool {
    fn update_unique_hash(&self, hasher: &mut UniqueHasher) {
        hasher.encode_type_tag(TAG_BOOL);
        hasher.encode_bytes(&[u8::from(*self)]);
    }
}

impl UpdateUniqueHash for i64 {
    fn update_unique_hash(&self, hasher: &mut UniqueHasher) {
        hasher.encode_type_tag(TAG_INT);
        hasher.encode_bytes(&self.to_le_bytes());
    }
}

impl UpdateUniqueHash for f64 {
    fn update_unique_hash(&self, hasher: &mut UniqueHasher) {
        hasher.encode_type_tag(TAG_FLOAT);
        hasher.encode_bytes(&self.to_bits().to_le_bytes());
    }
}

impl UpdateUniqueHash for str {
    fn update_unique_hash(&self, hasher: &mut UniqueHasher) {
        hasher.encode_type_tag(TAG_STRING);
        hasher.encode_bytes(self.as_bytes());
    }
}

impl UpdateUniqueHash for String {
    fn update_unique_hash(&self, hasher: &mut UniqueHasher) {
        self.as_str().update_unique_hash(hasher);
    }
}

/// Hashes any value into its hex digest in one go.
pub fn get_unique_string_for<T: UpdateUniqueHash + ?Sized>(value: &T) -> String {
    let mut hasher = UniqueHasher::new();
    value.update_unique_hash(&mut hasher);
    hasher.finish_hex()
}
