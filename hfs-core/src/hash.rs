//! The content hash type used throughout the filesystem (BLAKE3, 32 bytes).
//!
//! Implementation shape borrowed from Iroh's `Hash` (MIT OR Apache-2.0),
//! https://github.com/n0-computer/iroh-blobs/blob/main/src/hash.rs

use std::{borrow::Borrow, fmt};

/// A 32-byte BLAKE3 digest identifying an immutable blob.
#[derive(Clone, Copy, Hash, PartialEq, Eq)]
pub struct Hash(blake3::Hash);

impl Hash {
    /// The hash of the empty byte string.
    pub const EMPTY: Hash = Hash::from_bytes([
        175, 19, 73, 185, 245, 249, 161, 166, 160, 64, 77, 234, 54, 220, 201, 73, 155, 203, 37,
        201, 173, 193, 18, 183, 204, 154, 147, 202, 228, 31, 50, 98,
    ]);

    /// Hashes `buf` with BLAKE3.
    pub fn new(buf: impl AsRef<[u8]>) -> Self {
        Hash(blake3::hash(buf.as_ref()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(blake3::Hash::from_bytes(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    /// A base64url encoding of the hash, used as the HAMT node cache key.
    pub fn to_base64url(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.as_bytes())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Borrow<[u8; 32]> for Hash {
    fn borrow(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl From<[u8; 32]> for Hash {
    fn from(value: [u8; 32]) -> Self {
        Hash(blake3::Hash::from(value))
    }
}

impl From<Hash> for [u8; 32] {
    fn from(value: Hash) -> Self {
        *value.as_bytes()
    }
}

impl From<&[u8; 32]> for Hash {
    fn from(value: &[u8; 32]) -> Self {
        Hash(blake3::Hash::from(*value))
    }
}

impl From<blake3::Hash> for Hash {
    fn from(value: blake3::Hash) -> Self {
        Hash(value)
    }
}

impl PartialOrd for Hash {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hash {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

/// The 1-byte multihash-style tag prepended to a [`Hash`] only when it
/// crosses the on-disk serialization boundary. In-memory APIs always
/// operate on the bare 32-byte hash.
pub const BLAKE3_MULTIHASH_TAG: u8 = 0x1e;

/// A blob reference: its digest, size, and (on-disk only) algorithm tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlobRef {
    pub hash: Hash,
    pub size: u64,
}

impl BlobRef {
    pub fn new(hash: Hash, size: u64) -> Self {
        Self { hash, size }
    }

    /// Serializes as `tag || hash` (33 bytes), the on-disk form.
    pub fn tagged_hash_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = BLAKE3_MULTIHASH_TAG;
        out[1..].copy_from_slice(self.hash.as_bytes());
        out
    }
}
