//! The registry collaborator: a small, mutable, signed key-value store
//! mapping a 32-byte public key to a revisioned payload, trimmed to the
//! bare revision-conflict contract the directory transaction needs.

use async_trait::async_trait;
use std::fmt::Debug;

pub type PublicKey = [u8; 32];

/// A signed registry entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
    pub pk: PublicKey,
    /// Hash of the blob this entry currently points to (`DirV1` bytes).
    pub data: [u8; 32],
    pub revision: u64,
    pub signature: [u8; 64],
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    /// The registry already has an entry at or above the attempted revision.
    #[error("registry conflict: current revision is {current_revision}")]
    Conflict { current_revision: u64 },
    #[error("signature verification failed for key {0:x?}")]
    InvalidSignature(PublicKey),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// The exact bytes a registry entry's signature is computed over:
/// `pk || data || revision_be`. Both real registry implementations and
/// the in-memory test double in [`crate::testutil`] must agree on this
/// payload.
pub fn canonical_signing_payload(pk: &PublicKey, data: &[u8; 32], revision: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 32 + 8);
    buf.extend_from_slice(pk);
    buf.extend_from_slice(data);
    buf.extend_from_slice(&revision.to_be_bytes());
    buf
}

/// Interface for the external signed registry.
///
/// Implementations must reject a publish whose revision is less than or
/// equal to the current revision for the same `pk`, and must verify the
/// signature against `pk` before accepting a write.
#[async_trait]
pub trait Registry: Debug + Send + Sync + 'static {
    async fn registry_get(&self, pk: PublicKey) -> RegistryResult<Option<RegistryEntry>>;

    async fn registry_set(&self, entry: RegistryEntry) -> RegistryResult<()>;
}
