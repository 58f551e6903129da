//! `Filesystem`: the path-routing facade tying together the key
//! chain, directory transaction, and directory operations into the
//! six public filesystem operations.
//!
//! An `open`-style constructor plus thin per-path methods, with no
//! actor-handle indirection: [`crate::transaction::run`] already gives
//! each call its own retryable, self-contained unit of work (see
//! `transaction.rs`'s doc comment).

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use hfs_core::hash::Hash;
use hfs_core::identity::Identity;
use hfs_core::registry::Registry;
use hfs_core::store::BlobStore;

use crate::cursor::Cursor;
use crate::dir::{DirRef, DirV1, FileRef};
use crate::directory_ops::{self, Entry};
use crate::encryption;
use crate::error::{FsError, FsResult};
use crate::hamt::HamtConfig;
use crate::keychain::KeyChain;
use crate::transaction;

/// Splits `path` into `/`-separated, non-empty segments. Purely
/// lexical: no percent-decoding, no `.`/`..` handling,
/// leading/trailing/duplicate slashes collapse away.
pub fn parse_path(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn as_str_slice(segments: &[String]) -> Vec<&str> {
    segments.iter().map(String::as_str).collect()
}

/// A value passed to [`Filesystem::put`] or returned from
/// [`Filesystem::get`]. `Structured` carries bytes the caller already
/// encoded with the codec; the facade tags it with
/// `mediaType: application/cbor` and stores it, it does not own a
/// dynamic value type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Bytes(Bytes),
    Structured(Vec<u8>),
}

impl Value {
    fn into_bytes_and_default_media_type(self) -> (Bytes, Option<String>) {
        match self {
            Value::Bytes(b) => (b, None),
            Value::Structured(cbor) => (Bytes::from(cbor), Some("application/cbor".to_string())),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EncryptionRequest {
    pub key: Option<[u8; 32]>,
    pub chunk_size: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    /// Overrides the media type the facade would otherwise infer.
    pub media_type: Option<String>,
    pub encryption: Option<EncryptionRequest>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    File,
    Directory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub kind: Kind,
    pub size: Option<u64>,
    pub media_type: Option<String>,
    pub ts_seconds: Option<u32>,
    pub ts_nanos: Option<u32>,
}

/// One item yielded by [`Filesystem::list`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub kind: Kind,
    pub size: Option<u64>,
}

impl From<directory_ops::ListItem> for ListEntry {
    fn from(item: directory_ops::ListItem) -> Self {
        match item.entry {
            Entry::File(f) => ListEntry {
                name: item.name,
                kind: Kind::File,
                size: Some(f.size),
            },
            Entry::Dir(_) => ListEntry {
                name: item.name,
                kind: Kind::Directory,
                size: None,
            },
        }
    }
}

/// The directory transaction's retry budget (spec.md §4.6 step 7),
/// assembled at [`Filesystem::new`] time the way
/// `s5_store_local::LocalStoreConfig` assembles its own plain
/// config-with-defaults struct.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: std::time::Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: transaction::DEFAULT_MAX_ATTEMPTS,
            backoff: transaction::DEFAULT_BACKOFF,
        }
    }
}

/// The user-owned, content-addressed hierarchical filesystem. One
/// `Filesystem` wraps one identity and its three collaborators; every
/// operation derives the writer keys it needs from [`KeyChain`]
/// rather than holding any directory open.
#[derive(Clone)]
pub struct Filesystem {
    identity: Arc<dyn Identity>,
    blob_store: Arc<dyn BlobStore>,
    registry: Arc<dyn Registry>,
    hamt_config: HamtConfig,
    retry: RetryConfig,
    /// The opportunistic `.cid/` reverse index: process-wide mutable
    /// state, last-writer-wins on conflicting inserts.
    cid_index: Arc<DashMap<Hash, String>>,
}

impl Filesystem {
    pub fn new(identity: Arc<dyn Identity>, blob_store: Arc<dyn BlobStore>, registry: Arc<dyn Registry>) -> Self {
        Self {
            identity,
            blob_store,
            registry,
            hamt_config: HamtConfig::default(),
            retry: RetryConfig::default(),
            cid_index: Arc::new(DashMap::new()),
        }
    }

    pub fn with_hamt_config(mut self, config: HamtConfig) -> Self {
        self.hamt_config = config;
        self
    }

    pub fn with_retry_budget(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn run_transaction<F, Fut>(&self, writer_key: [u8; 32], mutate: F) -> FsResult<transaction::Published>
    where
        F: Fn(DirV1) -> Fut,
        Fut: std::future::Future<Output = FsResult<DirV1>>,
    {
        transaction::run_with_budget(
            &self.blob_store,
            &self.registry,
            &self.identity,
            writer_key,
            mutate,
            self.retry.max_attempts,
            self.retry.backoff,
        )
        .await
    }

    fn split_parent_and_name(segments: &[String]) -> FsResult<(&[String], &str)> {
        match segments.split_last() {
            Some((name, parent)) => Ok((parent, name.as_str())),
            None => Err(FsError::InvalidPath(String::new())),
        }
    }

    /// Ensures every directory named by `segments` exists as a child
    /// entry of its predecessor, creating the missing suffix in order
    /// Each intermediate directory is its own transaction. Re-checks
    /// existence fresh on every call — callers
    /// across a race may both create the same entry, which collapses
    /// harmlessly since the inline/HAMT map upsert is itself
    /// idempotent at the storage layer.
    async fn ensure_ancestor_chain(&self, keychain: &KeyChain, segments: &[&str]) -> FsResult<()> {
        for (i, name) in segments.iter().enumerate() {
            let parent_key = keychain.at_depth(i);
            let parent_pk = self.identity.public_key_for(&parent_key);
            let (parent_dir, _revision) =
                transaction::load_current(&self.blob_store, &self.registry, parent_pk).await?;
            if directory_ops::lookup_dir(&parent_dir, &self.blob_store, name).await?.is_some() {
                continue;
            }

            let child_pk = self.identity.public_key_for(&keychain.at_depth(i + 1));
            let blob_store = self.blob_store.clone();
            let hamt_config = self.hamt_config;
            let name_owned = name.to_string();
            self.run_transaction(parent_key, move |mut dir| {
                let blob_store = blob_store.clone();
                let name_owned = name_owned.clone();
                async move {
                    if directory_ops::lookup_dir(&dir, &blob_store, &name_owned).await?.is_none() {
                        let dir_ref = DirRef::registry(child_pk).with_timestamp_now();
                        directory_ops::upsert_dir(&mut dir, &blob_store, hamt_config, &name_owned, dir_ref).await?;
                    }
                    Ok(dir)
                }
            })
            .await?;
        }
        Ok(())
    }

    /// Stores `data` at `path`, creating any missing ancestor
    /// directories.
    pub async fn put(&self, path: &str, data: Value, options: Option<PutOptions>) -> FsResult<()> {
        let segments = parse_path(path);
        let (parent_segments, name) = Self::split_parent_and_name(&segments)?;
        let parent_strs = as_str_slice(parent_segments);
        let keychain = KeyChain::derive(self.identity.as_ref(), &parent_strs);
        self.ensure_ancestor_chain(&keychain, &parent_strs).await?;

        let options = options.unwrap_or_default();
        let (plaintext, inferred_media_type) = data.into_bytes_and_default_media_type();
        let media_type = options.media_type.or(inferred_media_type);
        let logical_size = plaintext.len() as u64;

        let (stored_bytes, enc_descriptor) = match &options.encryption {
            Some(request) => {
                let descriptor =
                    encryption::new_descriptor(request.key, request.chunk_size, logical_size);
                let envelope = encryption::encrypt_envelope(&descriptor, &plaintext)?;
                (envelope, Some(descriptor))
            }
            None => (plaintext, None),
        };

        let blob_ref = self
            .blob_store
            .upload_blob(stored_bytes)
            .await
            .map_err(FsError::from)?;
        self.cid_index.insert(blob_ref.hash, path.to_string());

        let parent_key = keychain.leaf();
        let blob_store = self.blob_store.clone();
        let hamt_config = self.hamt_config;
        let name_owned = name.to_string();
        let hash_bytes = *blob_ref.hash.as_bytes();
        // `FileRef.size` is the logical (plaintext) size (spec.md §3.1),
        // not the stored envelope's size when encryption is in play.
        let size = logical_size;

        self.run_transaction(parent_key, move |mut dir| {
            let blob_store = blob_store.clone();
            let name_owned = name_owned.clone();
            let media_type = media_type.clone();
            let enc_descriptor = enc_descriptor.clone();
            async move {
                let mut file_ref = match directory_ops::lookup_file(&dir, &blob_store, &name_owned).await? {
                    Some(existing) => existing.supersede(hash_bytes, size),
                    None => FileRef::new(hash_bytes, size).with_timestamp_now(),
                };
                file_ref.media_type = media_type;
                file_ref.enc = enc_descriptor;
                directory_ops::upsert_file(&mut dir, &blob_store, hamt_config, &name_owned, file_ref).await?;
                Ok(dir)
            }
        })
        .await?;

        Ok(())
    }

    /// Reads the value stored at `path`, or `None` if nothing is there.
    pub async fn get(&self, path: &str) -> FsResult<Option<Value>> {
        let segments = parse_path(path);
        let (parent_segments, name) = Self::split_parent_and_name(&segments)?;
        let parent_strs = as_str_slice(parent_segments);
        let keychain = KeyChain::derive(self.identity.as_ref(), &parent_strs);
        let parent_pk = self.identity.public_key_for(&keychain.leaf());
        let (dir, _revision) = transaction::load_current(&self.blob_store, &self.registry, parent_pk).await?;

        let Some(file_ref) = directory_ops::lookup_file(&dir, &self.blob_store, name).await? else {
            return Ok(None);
        };

        let raw = self
            .blob_store
            .download_blob_as_bytes(Hash::from_bytes(file_ref.hash))
            .await
            .map_err(FsError::from)?;
        let plaintext = match &file_ref.enc {
            Some(descriptor) => encryption::decrypt_envelope(descriptor, &raw)?,
            None => raw,
        };

        Ok(Some(if file_ref.media_type.as_deref() == Some("application/cbor") {
            Value::Structured(plaintext.to_vec())
        } else {
            Value::Bytes(plaintext)
        }))
    }

    /// Lists the directory at `path`, one page at a time rather than
    /// an async sequence, since the core has no stream/generator
    /// collaborator to drive one lazily; callers loop by re-passing the
    /// returned token.
    pub async fn list(
        &self,
        path: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> FsResult<(Vec<ListEntry>, Option<String>)> {
        let segments = parse_path(path);
        let segment_strs = as_str_slice(&segments);
        let keychain = KeyChain::derive(self.identity.as_ref(), &segment_strs);
        let pk = self.identity.public_key_for(&keychain.leaf());
        let (dir, _revision) = transaction::load_current(&self.blob_store, &self.registry, pk).await?;

        let cursor_val = match cursor {
            Some(token) => Some(
                Cursor::decode_token(token)
                    .ok_or_else(|| FsError::DecodeError("malformed list cursor".to_string()))?,
            ),
            None => None,
        };

        let (items, next) =
            directory_ops::iter_page(&dir, &self.blob_store, cursor_val.as_ref(), limit).await?;
        let entries = items.into_iter().map(ListEntry::from).collect();
        Ok((entries, next.map(|c| c.encode_token())))
    }

    /// Deletes the entry at `path`, reporting whether anything was
    /// removed. A no-op (no publish) if neither a file nor a directory
    /// entry exists under `name`.
    pub async fn delete(&self, path: &str) -> FsResult<bool> {
        let segments = parse_path(path);
        let (parent_segments, name) = Self::split_parent_and_name(&segments)?;
        let parent_strs = as_str_slice(parent_segments);
        let keychain = KeyChain::derive(self.identity.as_ref(), &parent_strs);
        let parent_key = keychain.leaf();
        let parent_pk = self.identity.public_key_for(&parent_key);

        let (parent_dir, _revision) =
            transaction::load_current(&self.blob_store, &self.registry, parent_pk).await?;
        let file_exists = directory_ops::lookup_file(&parent_dir, &self.blob_store, name).await?.is_some();
        let dir_exists = !file_exists
            && directory_ops::lookup_dir(&parent_dir, &self.blob_store, name).await?.is_some();
        if !file_exists && !dir_exists {
            return Ok(false);
        }

        let blob_store = self.blob_store.clone();
        let name_owned = name.to_string();
        let removed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let removed_handle = removed.clone();

        self.run_transaction(parent_key, move |mut dir| {
            let blob_store = blob_store.clone();
            let name_owned = name_owned.clone();
            let removed_handle = removed_handle.clone();
            async move {
                let file_removed = directory_ops::remove_file(&mut dir, &blob_store, &name_owned).await?;
                let dir_removed = if file_removed {
                    false
                } else {
                    directory_ops::remove_dir(&mut dir, &blob_store, &name_owned).await?
                };
                removed_handle.store(
                    file_removed || dir_removed,
                    std::sync::atomic::Ordering::Relaxed,
                );
                Ok(dir)
            }
        })
        .await?;

        Ok(removed.load(std::sync::atomic::Ordering::Relaxed))
    }

    /// Reads metadata for the entry at `path` without fetching its
    /// contents.
    pub async fn get_metadata(&self, path: &str) -> FsResult<Option<Metadata>> {
        let segments = parse_path(path);
        if segments.is_empty() {
            return Ok(Some(Metadata {
                kind: Kind::Directory,
                size: None,
                media_type: None,
                ts_seconds: None,
                ts_nanos: None,
            }));
        }

        let (parent_segments, name) = Self::split_parent_and_name(&segments)?;
        let parent_strs = as_str_slice(parent_segments);
        let keychain = KeyChain::derive(self.identity.as_ref(), &parent_strs);
        let pk = self.identity.public_key_for(&keychain.leaf());
        let (dir, _revision) = transaction::load_current(&self.blob_store, &self.registry, pk).await?;

        if let Some(file_ref) = directory_ops::lookup_file(&dir, &self.blob_store, name).await? {
            return Ok(Some(Metadata {
                kind: Kind::File,
                size: Some(file_ref.size),
                media_type: file_ref.media_type,
                ts_seconds: file_ref.ts_seconds,
                ts_nanos: file_ref.ts_nanos,
            }));
        }
        if let Some(dir_ref) = directory_ops::lookup_dir(&dir, &self.blob_store, name).await? {
            return Ok(Some(Metadata {
                kind: Kind::Directory,
                size: None,
                media_type: None,
                ts_seconds: dir_ref.ts_seconds,
                ts_nanos: dir_ref.ts_nanos,
            }));
        }
        Ok(None)
    }

    /// Creates a directory named `name` under `parentPath`. Idempotent:
    /// a no-op, with no publish and no revision bump, if `name` already
    /// exists under `parentPath`.
    pub async fn create_directory(&self, parent_path: &str, name: &str) -> FsResult<()> {
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidPath(name.to_string()));
        }
        let parent_segments = parse_path(parent_path);
        let parent_strs = as_str_slice(&parent_segments);
        self.ensure_ancestor_chain(
            &KeyChain::derive(self.identity.as_ref(), &parent_strs),
            &parent_strs,
        )
        .await?;

        let mut full_segments = parent_strs.clone();
        full_segments.push(name);
        let keychain = KeyChain::derive(self.identity.as_ref(), &full_segments);
        let parent_key = keychain.at_depth(parent_strs.len());
        let parent_pk = self.identity.public_key_for(&parent_key);

        let (parent_dir, _revision) =
            transaction::load_current(&self.blob_store, &self.registry, parent_pk).await?;
        if directory_ops::lookup_dir(&parent_dir, &self.blob_store, name).await?.is_some() {
            return Ok(());
        }

        let child_pk = self.identity.public_key_for(&keychain.leaf());
        let blob_store = self.blob_store.clone();
        let hamt_config = self.hamt_config;
        let name_owned = name.to_string();
        self.run_transaction(parent_key, move |mut dir| {
            let blob_store = blob_store.clone();
            let name_owned = name_owned.clone();
            async move {
                if directory_ops::lookup_dir(&dir, &blob_store, &name_owned).await?.is_none() {
                    let dir_ref = DirRef::registry(child_pk).with_timestamp_now();
                    directory_ops::upsert_dir(&mut dir, &blob_store, hamt_config, &name_owned, dir_ref).await?;
                }
                Ok(dir)
            }
        })
        .await?;

        Ok(())
    }

    pub(crate) fn identity(&self) -> &Arc<dyn Identity> {
        &self.identity
    }

    pub(crate) fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blob_store
    }

    pub(crate) fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub(crate) fn cid_index(&self) -> &Arc<DashMap<Hash, String>> {
        &self.cid_index
    }
}
