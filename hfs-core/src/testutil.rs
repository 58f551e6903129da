//! In-memory collaborator implementations and a conformance suite for
//! testing [`BlobStore`]/[`Registry`] implementations, grounded on
//! `s5_store_memory` (a `DashMap`-backed `Store`) and
//! `s5_core::testutil::StoreTests`.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::hash::{BlobRef, Hash};
use crate::identity::verify_signature;
pub use crate::registry::canonical_signing_payload;
use crate::registry::{PublicKey, Registry, RegistryEntry, RegistryError, RegistryResult};
use crate::store::{BlobStore, StoreError, StoreResult};

/// A `DashMap`-backed in-memory [`BlobStore`], for tests only.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<Hash, Bytes>,
    /// Counts uploads per hash, to assert idempotence in tests.
    upload_count: DashMap<Hash, AtomicU64>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `upload_blob` was called for `hash` (for idempotence tests).
    pub fn upload_count(&self, hash: Hash) -> u64 {
        self.upload_count
            .get(&hash)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload_blob(&self, bytes: Bytes) -> StoreResult<BlobRef> {
        let hash = Hash::new(&bytes);
        let size = bytes.len() as u64;
        self.blobs.insert(hash, bytes);
        self.upload_count
            .entry(hash)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        Ok(BlobRef::new(hash, size))
    }

    async fn download_blob_as_bytes(&self, hash: Hash) -> StoreResult<Bytes> {
        self.blobs
            .get(&hash)
            .map(|b| b.clone())
            .ok_or(StoreError::NotFound(hash))
    }

    async fn delete_blob(&self, hash: Hash) -> StoreResult<()> {
        self.blobs.remove(&hash);
        Ok(())
    }
}

/// A `DashMap`-backed in-memory [`Registry`], for tests only.
///
/// Enforces the same invariants a real registry must (spec.md §6.2):
/// rejects non-increasing revisions and verifies signatures.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: DashMap<PublicKey, RegistryEntry>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn registry_get(&self, pk: PublicKey) -> RegistryResult<Option<RegistryEntry>> {
        Ok(self.entries.get(&pk).map(|e| e.clone()))
    }

    async fn registry_set(&self, entry: RegistryEntry) -> RegistryResult<()> {
        let payload = canonical_signing_payload(&entry.pk, &entry.data, entry.revision);
        if !verify_signature(&entry.pk, &payload, &entry.signature) {
            return Err(RegistryError::InvalidSignature(entry.pk));
        }

        if let Some(current) = self.entries.get(&entry.pk) {
            if entry.revision <= current.revision {
                return Err(RegistryError::Conflict {
                    current_revision: current.revision,
                });
            }
        }
        self.entries.insert(entry.pk, entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blob_round_trip_is_content_addressed() {
        let store = MemoryBlobStore::new();
        let data = Bytes::from_static(b"hello world");
        let r1 = store.upload_blob(data.clone()).await.unwrap();
        let r2 = store.upload_blob(data.clone()).await.unwrap();
        assert_eq!(r1.hash, r2.hash);
        assert_eq!(store.upload_count(r1.hash), 2);

        let back = store.download_blob_as_bytes(r1.hash).await.unwrap();
        assert_eq!(back, data);
    }

    #[tokio::test]
    async fn blob_download_of_unknown_hash_fails() {
        let store = MemoryBlobStore::new();
        let err = store
            .download_blob_as_bytes(Hash::new(b"nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn registry_rejects_stale_revision() {
        use crate::identity::{Identity, SeedIdentity};

        let registry = MemoryRegistry::new();
        let identity = SeedIdentity::from_seed(b"test seed");
        let writer_key = identity.root_key();
        let pk = identity.public_key_for(&writer_key);

        let data = [7u8; 32];
        let payload = canonical_signing_payload(&pk, &data, 1);
        let sig = identity.sign(&writer_key, &payload);
        registry
            .registry_set(RegistryEntry {
                pk,
                data,
                revision: 1,
                signature: sig,
            })
            .await
            .unwrap();

        let payload = canonical_signing_payload(&pk, &data, 1);
        let sig = identity.sign(&writer_key, &payload);
        let err = registry
            .registry_set(RegistryEntry {
                pk,
                data,
                revision: 1,
                signature: sig,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { current_revision: 1 }));
    }
}
