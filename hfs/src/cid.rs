//! The advanced CID surface: content-hash-addressed access alongside
//! the path-addressed facade, plus the opportunistic `.cid/` reverse
//! index.

use bytes::Bytes;

use hfs_core::hash::Hash;
use hfs_core::registry::Registry;
use hfs_core::store::{BlobStore, StoreError};

use crate::directory_ops;
use crate::error::{FsError, FsResult};
use crate::facade::{Filesystem, Metadata, PutOptions, Value};
use crate::keychain::KeyChain;
use crate::transaction;

/// The reserved virtual prefix `putByCID`-only blobs are recorded
/// under when they have no user-visible path.
pub const CID_VIRTUAL_PREFIX: &str = ".cid/";

impl Filesystem {
    /// The blob hash of a file's stored bytes (the envelope, if
    /// encrypted), or of a directory's current serialized `DirV1`.
    pub async fn path_to_cid(&self, path: &str) -> FsResult<Option<Hash>> {
        let segments = crate::facade::parse_path(path);
        if segments.is_empty() {
            let keychain = KeyChain::derive(self.identity().as_ref(), &[]);
            let pk = self.identity().public_key_for(&keychain.leaf());
            return Ok(self
                .registry()
                .registry_get(pk)
                .await
                .map_err(FsError::from)?
                .map(|entry| Hash::from_bytes(entry.data)));
        }

        let (parent, name) = segments.split_at(segments.len() - 1);
        let name = &name[0];
        let parent_strs: Vec<&str> = parent.iter().map(String::as_str).collect();
        let keychain = KeyChain::derive(self.identity().as_ref(), &parent_strs);
        let parent_pk = self.identity().public_key_for(&keychain.leaf());
        let (dir, _revision) = transaction::load_current(self.blob_store(), self.registry(), parent_pk).await?;

        if let Some(file_ref) = directory_ops::lookup_file(&dir, self.blob_store(), name).await? {
            return Ok(Some(Hash::from_bytes(file_ref.hash)));
        }
        if directory_ops::lookup_dir(&dir, self.blob_store(), name).await?.is_some() {
            let mut full = parent_strs;
            full.push(name);
            let child_keychain = KeyChain::derive(self.identity().as_ref(), &full);
            let child_pk = self.identity().public_key_for(&child_keychain.leaf());
            return Ok(self
                .registry()
                .registry_get(child_pk)
                .await
                .map_err(FsError::from)?
                .map(|entry| Hash::from_bytes(entry.data)));
        }
        Ok(None)
    }

    /// The process-local reverse index, best-effort only.
    pub fn cid_to_path(&self, hash: Hash) -> Option<String> {
        self.cid_index().get(&hash).map(|entry| entry.value().clone())
    }

    /// Stores bytes unbound to any path. Recorded under the `.cid/` virtual prefix only if no
    /// user-visible path already claims the hash.
    pub async fn put_by_cid(&self, data: Bytes) -> FsResult<Hash> {
        let blob_ref = self.blob_store().upload_blob(data).await.map_err(FsError::from)?;
        self.cid_index()
            .entry(blob_ref.hash)
            .or_insert_with(|| format!("{CID_VIRTUAL_PREFIX}{}", blob_ref.hash.to_base64url()));
        Ok(blob_ref.hash)
    }

    /// Fails with `not_found`
    /// rather than `blob_unavailable`: an unknown CID handed in
    /// directly is a caller error, not a collaborator inconsistency.
    pub async fn get_by_cid(&self, hash: Hash) -> FsResult<Bytes> {
        self.blob_store().download_blob_as_bytes(hash).await.map_err(|e| match e {
            StoreError::NotFound(_) => FsError::NotFound,
            other => FsError::from(other),
        })
    }

    /// `put`, then resolves and returns the resulting CID alongside the path.
    pub async fn put_with_cid(
        &self,
        path: &str,
        data: Value,
        options: Option<PutOptions>,
    ) -> FsResult<(String, Hash)> {
        self.put(path, data, options).await?;
        let cid = self
            .path_to_cid(path)
            .await?
            .expect("path_to_cid must resolve immediately after a successful put");
        Ok((path.to_string(), cid))
    }

    /// `getMetadata`, then resolves and returns the CID alongside the metadata.
    pub async fn get_metadata_with_cid(&self, path: &str) -> FsResult<Option<(Metadata, Hash)>> {
        let Some(metadata) = self.get_metadata(path).await? else {
            return Ok(None);
        };
        let cid = self
            .path_to_cid(path)
            .await?
            .expect("path_to_cid must resolve for a path get_metadata just resolved");
        Ok(Some((metadata, cid)))
    }
}
