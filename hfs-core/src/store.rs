//! The blob store collaborator (spec.md §6.1).
//!
//! Deliberately minimal: upload and download by hash. Everything about
//! *how* bytes get from a caller to durable storage — chunked uploads,
//! P2P transport, local-disk layout — is external to the filesystem
//! core and lives behind this trait, the way `s5_core::store::Store`
//! keeps transport out of `s5_fs`.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

use crate::hash::{BlobRef, Hash};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("blob {0} not found")]
    NotFound(Hash),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Content-addressed immutable blob storage.
///
/// Implementations must be content-addressed:
/// `download_blob_as_bytes(upload_blob(b).hash) == b`, and uploads must
/// be idempotent.
#[async_trait]
pub trait BlobStore: Debug + Send + Sync + 'static {
    async fn upload_blob(&self, bytes: Bytes) -> StoreResult<BlobRef>;

    async fn download_blob_as_bytes(&self, hash: Hash) -> StoreResult<Bytes>;

    /// Best-effort deletion; the core never relies on this for correctness
    /// (garbage collection of orphaned blobs is out of scope, spec.md §1).
    async fn delete_blob(&self, _hash: Hash) -> StoreResult<()> {
        Ok(())
    }
}
