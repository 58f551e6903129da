//! The directory transaction: load the current `DirV1` for a writer
//! key, apply a mutation, publish, retrying on registry conflict.
//!
//! Deliberately stateless and retryable rather than a persistent
//! per-directory actor with a mailbox and autosave timer — each
//! mutation is a one-shot unit of work that suspends only at I/O and
//! backoff, not a long-lived process, so there's nothing for a mailbox
//! to buffer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use hfs_core::hash::Hash;
use hfs_core::identity::Identity;
use hfs_core::registry::{canonical_signing_payload, PublicKey, Registry, RegistryEntry, RegistryError};
use hfs_core::store::BlobStore;

use crate::dir::DirV1;
use crate::error::{FsError, FsResult};

/// Bounded retry budget for a single transaction (spec.md §4.6 step 7: "default 5").
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Base backoff between attempts; grows linearly with the attempt number.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(20);

/// The result of a successful transaction: the new directory value,
/// the blob hash it was published under, and the registry revision.
pub struct Published {
    pub dir: DirV1,
    pub hash: Hash,
    pub revision: u64,
}

/// Reads the current directory published under `pk` (spec.md §4.6
/// steps 2-3). A missing registry entry is treated as a blank
/// directory at revision 0, per spec.
pub async fn load_current(
    blob_store: &Arc<dyn BlobStore>,
    registry: &Arc<dyn Registry>,
    pk: PublicKey,
) -> FsResult<(DirV1, u64)> {
    match registry.registry_get(pk).await.map_err(FsError::from)? {
        Some(entry) => {
            let bytes = blob_store
                .download_blob_as_bytes(Hash::from_bytes(entry.data))
                .await
                .map_err(FsError::from)?;
            Ok((DirV1::decode_canonical(&bytes)?, entry.revision))
        }
        None => Ok((DirV1::new(), 0)),
    }
}

/// Runs the load → mutate → publish → retry loop for the directory
/// addressed by `writer_key` (spec.md §4.6).
///
/// `mutate` is applied to the freshly loaded directory on every
/// attempt — including retries, so it must be safe to re-apply against
/// whatever state a concurrent writer left behind (spec.md §4.6 step 7:
/// "the retry will observe the new state and re-apply the mutation").
pub async fn run<F, Fut>(
    blob_store: &Arc<dyn BlobStore>,
    registry: &Arc<dyn Registry>,
    identity: &Arc<dyn Identity>,
    writer_key: [u8; 32],
    mutate: F,
) -> FsResult<Published>
where
    F: Fn(DirV1) -> Fut,
    Fut: Future<Output = FsResult<DirV1>>,
{
    run_with_budget(
        blob_store,
        registry,
        identity,
        writer_key,
        mutate,
        DEFAULT_MAX_ATTEMPTS,
        DEFAULT_BACKOFF,
    )
    .await
}

pub async fn run_with_budget<F, Fut>(
    blob_store: &Arc<dyn BlobStore>,
    registry: &Arc<dyn Registry>,
    identity: &Arc<dyn Identity>,
    writer_key: [u8; 32],
    mutate: F,
    max_attempts: u32,
    backoff: Duration,
) -> FsResult<Published>
where
    F: Fn(DirV1) -> Fut,
    Fut: Future<Output = FsResult<DirV1>>,
{
    let pk = identity.public_key_for(&writer_key);

    for attempt in 0..max_attempts {
        // Steps 2-3.
        let (current_dir, current_revision) = load_current(blob_store, registry, pk).await?;

        // Step 4: apply the mutation.
        let mutated = mutate(current_dir).await?;

        // Step 5: encode and upload.
        let encoded = mutated.encode_canonical()?;
        let blob_ref = blob_store
            .upload_blob(Bytes::from(encoded))
            .await
            .map_err(FsError::from)?;

        // Step 6: build and publish the new registry entry.
        let revision = current_revision + 1;
        let data = *blob_ref.hash.as_bytes();
        let payload = canonical_signing_payload(&pk, &data, revision);
        let signature = identity.sign(&writer_key, &payload);
        let entry = RegistryEntry {
            pk,
            data,
            revision,
            signature,
        };

        match registry.registry_set(entry).await {
            Ok(()) => {
                return Ok(Published {
                    dir: mutated,
                    hash: blob_ref.hash,
                    revision,
                });
            }
            Err(RegistryError::Conflict { .. }) => {
                tracing::debug!(attempt, revision, "registry conflict, retrying transaction");
                if attempt + 1 < max_attempts {
                    tokio::time::sleep(backoff * (attempt + 1)).await;
                }
                continue;
            }
            Err(other) => return Err(FsError::from(other)),
        }
    }

    Err(FsError::ConflictRetryExhausted {
        attempts: max_attempts,
    })
}
