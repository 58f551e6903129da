//! Directory operations that dispatch between the inline `BTreeMap`s
//! and a lazily-constructed HAMT, switching at `max_inline_entries` and
//! never transitioning back, plus the bounded, cycle-safe walk over
//! `DirRef` links in [`walk_descendants`].

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;

use hfs_core::hash::Hash;
use hfs_core::registry::Registry;
use hfs_core::store::BlobStore;

use crate::bitmap::{prefixed_dir_key, prefixed_file_key};
use crate::cursor::Cursor;
use crate::dir::{DirLink, DirRef, DirV1, FileRef, ShardingDescriptor};
use crate::error::{FsError, FsResult};
use crate::hamt::{EntryValue, Hamt, HamtConfig};

#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    File(FileRef),
    Dir(DirRef),
}

/// One item yielded by a directory listing page.
#[derive(Clone, Debug, PartialEq)]
pub struct ListItem {
    pub name: String,
    pub entry: Entry,
}

pub async fn lookup_file(
    dir: &DirV1,
    blob_store: &Arc<dyn BlobStore>,
    name: &str,
) -> FsResult<Option<FileRef>> {
    match &dir.header.sharding {
        Some(sharding) => {
            let mut hamt = Hamt::load(blob_store.clone(), sharding.config, sharding.root).await?;
            match hamt.get(&prefixed_file_key(name)).await? {
                Some(EntryValue::File(f)) => Ok(Some(f)),
                _ => Ok(None),
            }
        }
        None => Ok(dir.files.get(name).cloned()),
    }
}

pub async fn lookup_dir(
    dir: &DirV1,
    blob_store: &Arc<dyn BlobStore>,
    name: &str,
) -> FsResult<Option<DirRef>> {
    match &dir.header.sharding {
        Some(sharding) => {
            let mut hamt = Hamt::load(blob_store.clone(), sharding.config, sharding.root).await?;
            match hamt.get(&prefixed_dir_key(name)).await? {
                Some(EntryValue::Dir(d)) => Ok(Some(d)),
                _ => Ok(None),
            }
        }
        None => Ok(dir.dirs.get(name).copied()),
    }
}

pub async fn upsert_file(
    dir: &mut DirV1,
    blob_store: &Arc<dyn BlobStore>,
    hamt_config: HamtConfig,
    name: &str,
    file_ref: FileRef,
) -> FsResult<()> {
    match dir.header.sharding {
        Some(sharding) => {
            let mut hamt = Hamt::load(blob_store.clone(), sharding.config, sharding.root).await?;
            hamt.insert(prefixed_file_key(name), EntryValue::File(file_ref))
                .await?;
            let root = hamt.commit().await?;
            dir.header.sharding = Some(ShardingDescriptor::new(sharding.config, root));
        }
        None => {
            dir.files.insert(name.to_string(), file_ref);
            maybe_transition_to_sharded(dir, blob_store, hamt_config).await?;
        }
    }
    Ok(())
}

pub async fn upsert_dir(
    dir: &mut DirV1,
    blob_store: &Arc<dyn BlobStore>,
    hamt_config: HamtConfig,
    name: &str,
    dir_ref: DirRef,
) -> FsResult<()> {
    match dir.header.sharding {
        Some(sharding) => {
            let mut hamt = Hamt::load(blob_store.clone(), sharding.config, sharding.root).await?;
            hamt.insert(prefixed_dir_key(name), EntryValue::Dir(dir_ref)).await?;
            let root = hamt.commit().await?;
            dir.header.sharding = Some(ShardingDescriptor::new(sharding.config, root));
        }
        None => {
            dir.dirs.insert(name.to_string(), dir_ref);
            maybe_transition_to_sharded(dir, blob_store, hamt_config).await?;
        }
    }
    Ok(())
}

/// Evaluated after the mutation; a directory with exactly
/// `max_inline_entries` stays inline, one more shards.
async fn maybe_transition_to_sharded(
    dir: &mut DirV1,
    blob_store: &Arc<dyn BlobStore>,
    config: HamtConfig,
) -> FsResult<()> {
    if dir.inline_entry_count() <= config.max_inline_entries as usize {
        return Ok(());
    }
    let files = std::mem::take(&mut dir.files);
    let dirs = std::mem::take(&mut dir.dirs);
    let mut entries = Vec::with_capacity(files.len() + dirs.len());
    entries.extend(files.into_iter().map(|(n, f)| (prefixed_file_key(&n), EntryValue::File(f))));
    entries.extend(dirs.into_iter().map(|(n, d)| (prefixed_dir_key(&n), EntryValue::Dir(d))));

    let mut hamt = Hamt::build_from_entries(blob_store.clone(), config, entries).await?;
    let root = hamt.commit().await?;
    dir.header.sharding = Some(ShardingDescriptor::new(config, root));
    Ok(())
}

/// Removes an entry by name, reporting whether it was present. Sharded
/// directories never transition back to inline on shrinkage.
pub async fn remove_file(dir: &mut DirV1, blob_store: &Arc<dyn BlobStore>, name: &str) -> FsResult<bool> {
    match dir.header.sharding {
        Some(sharding) => {
            let mut hamt = Hamt::load(blob_store.clone(), sharding.config, sharding.root).await?;
            let removed = hamt.delete(&prefixed_file_key(name)).await?;
            if removed {
                let root = hamt.commit().await?;
                dir.header.sharding = Some(ShardingDescriptor::new(sharding.config, root));
            }
            Ok(removed)
        }
        None => Ok(dir.files.remove(name).is_some()),
    }
}

pub async fn remove_dir(dir: &mut DirV1, blob_store: &Arc<dyn BlobStore>, name: &str) -> FsResult<bool> {
    match dir.header.sharding {
        Some(sharding) => {
            let mut hamt = Hamt::load(blob_store.clone(), sharding.config, sharding.root).await?;
            let removed = hamt.delete(&prefixed_dir_key(name)).await?;
            if removed {
                let root = hamt.commit().await?;
                dir.header.sharding = Some(ShardingDescriptor::new(sharding.config, root));
            }
            Ok(removed)
        }
        None => Ok(dir.dirs.remove(name).is_some()),
    }
}

/// Files then dirs for an inline directory (a deterministic, stable
/// order, though not necessarily insertion order); the HAMT's own
/// order, prefix stripped, for a sharded one.
pub async fn iter_page(
    dir: &DirV1,
    blob_store: &Arc<dyn BlobStore>,
    cursor: Option<&Cursor>,
    limit: usize,
) -> FsResult<(Vec<ListItem>, Option<Cursor>)> {
    match &dir.header.sharding {
        Some(sharding) => {
            let mut hamt = Hamt::load(blob_store.clone(), sharding.config, sharding.root).await?;
            let (page, next) = match cursor {
                Some(c) => hamt.entries_from(c, limit).await?,
                None => hamt.entries_page(limit).await?,
            };
            let items = page.into_iter().map(|(key, value)| strip_prefix(key, value)).collect();
            Ok((items, next))
        }
        None => {
            let mut all: Vec<(String, ListItem)> = Vec::with_capacity(dir.files.len() + dir.dirs.len());
            for (name, f) in &dir.files {
                all.push((
                    prefixed_file_key(name),
                    ListItem {
                        name: name.clone(),
                        entry: Entry::File(f.clone()),
                    },
                ));
            }
            for (name, d) in &dir.dirs {
                all.push((
                    prefixed_dir_key(name),
                    ListItem {
                        name: name.clone(),
                        entry: Entry::Dir(*d),
                    },
                ));
            }
            let start = match cursor {
                Some(c) => all
                    .iter()
                    .position(|(k, _)| *k == c.last_key)
                    .map(|i| i + 1)
                    .unwrap_or(0),
                None => 0,
            };
            let end = (start + limit).min(all.len());
            let page: Vec<ListItem> = all[start..end].iter().map(|(_, item)| item.clone()).collect();
            let next = if end < all.len() {
                Some(Cursor::new(vec![], all[end - 1].0.clone()))
            } else {
                None
            };
            Ok((page, next))
        }
    }
}

fn strip_prefix(prefixed_key: String, value: EntryValue) -> ListItem {
    let name = prefixed_key[2..].to_string();
    let entry = match value {
        EntryValue::File(f) => Entry::File(f),
        EntryValue::Dir(d) => Entry::Dir(d),
    };
    ListItem { name, entry }
}

/// Bound on `walk_descendants`'s recursion.
pub const MAX_WALK_DEPTH: usize = 64;
const WALK_PAGE_SIZE: usize = 256;

/// Dereferences a `DirRef`'s link directly: either fetches a pinned
/// blob for a `fixed_hash_blake3` link, or reads the current
/// registry-published value for a `mutable_registry_ed25519` one,
/// defaulting to a blank directory if nothing has been published yet.
///
/// The facade never needs this: every directory it opens is reached by
/// re-deriving the child's own writer key from
/// [`crate::keychain::KeyChain`], not by reading a parent's `DirRef`.
/// This exists for callers that only have a `DirRef` value in hand —
/// e.g. a recursive tree walk — and must resolve it directly.
pub async fn follow_dir_ref(
    dir_ref: &DirRef,
    blob_store: &Arc<dyn BlobStore>,
    registry: &Arc<dyn Registry>,
) -> FsResult<DirV1> {
    match dir_ref.link {
        DirLink::FixedHashBlake3(hash) => {
            let bytes = blob_store
                .download_blob_as_bytes(Hash::from_bytes(hash))
                .await
                .map_err(FsError::from)?;
            DirV1::decode_canonical(&bytes)
        }
        DirLink::MutableRegistryEd25519(pk) => match registry.registry_get(pk).await.map_err(FsError::from)? {
            Some(entry) => {
                let bytes = blob_store
                    .download_blob_as_bytes(Hash::from_bytes(entry.data))
                    .await
                    .map_err(FsError::from)?;
                DirV1::decode_canonical(&bytes)
            }
            None => Ok(DirV1::new()),
        },
    }
}

/// Recursively lists every file/directory name reachable from `dir` by
/// following `DirRef.link`: a visited-set keyed by the link's own
/// identifying bytes, plus a depth cap, turns an otherwise-infinite
/// walk into a typed [`FsError::CycleDetected`].
pub async fn walk_descendants(
    dir: &DirV1,
    blob_store: &Arc<dyn BlobStore>,
    registry: &Arc<dyn Registry>,
) -> FsResult<Vec<String>> {
    let mut visited = HashSet::new();
    let mut names = Vec::new();
    walk_rec(dir, blob_store, registry, &mut visited, &mut names, 0).await?;
    Ok(names)
}

fn walk_rec<'a>(
    dir: &'a DirV1,
    blob_store: &'a Arc<dyn BlobStore>,
    registry: &'a Arc<dyn Registry>,
    visited: &'a mut HashSet<[u8; 32]>,
    names: &'a mut Vec<String>,
    depth: usize,
) -> BoxFuture<'a, FsResult<()>> {
    Box::pin(async move {
        if depth > MAX_WALK_DEPTH {
            return Err(FsError::CycleDetected);
        }

        let mut cursor = None;
        loop {
            let (page, next) = iter_page(dir, blob_store, cursor.as_ref(), WALK_PAGE_SIZE).await?;
            for item in page {
                match item.entry {
                    Entry::File(_) => names.push(item.name),
                    Entry::Dir(dir_ref) => {
                        let visit_key = match dir_ref.link {
                            DirLink::FixedHashBlake3(h) => h,
                            DirLink::MutableRegistryEd25519(pk) => pk,
                        };
                        if !visited.insert(visit_key) {
                            return Err(FsError::CycleDetected);
                        }
                        names.push(item.name);
                        let child = follow_dir_ref(&dir_ref, blob_store, registry).await?;
                        walk_rec(&child, blob_store, registry, visited, names, depth + 1).await?;
                    }
                }
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hfs_core::identity::{Identity, SeedIdentity};
    use hfs_core::registry::canonical_signing_payload;
    use hfs_core::registry::RegistryEntry;
    use hfs_core::testutil::{MemoryBlobStore, MemoryRegistry};

    async fn publish_dir(
        registry: &Arc<dyn Registry>,
        identity: &SeedIdentity,
        writer_key: [u8; 32],
        dir_hash: [u8; 32],
        revision: u64,
    ) {
        let pk = identity.public_key_for(&writer_key);
        let payload = canonical_signing_payload(&pk, &dir_hash, revision);
        let signature = identity.sign(&writer_key, &payload);
        registry
            .registry_set(RegistryEntry {
                pk,
                data: dir_hash,
                revision,
                signature,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn walk_descendants_detects_a_directory_cycle() {
        let blob_store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let identity = SeedIdentity::from_seed(b"walk cycle test");

        let key_a = identity.derive_child_key(&identity.root_key(), "a");
        let key_b = identity.derive_child_key(&key_a, "b");
        let pk_a = identity.public_key_for(&key_a);
        let pk_b = identity.public_key_for(&key_b);

        // b points back to a, forming a cycle once root -> a -> b is followed.
        let mut dir_b = DirV1::new();
        dir_b.dirs.insert("back".to_string(), DirRef::registry(pk_a));
        let dir_b_bytes = dir_b.encode_canonical().unwrap();
        let dir_b_blob = blob_store
            .upload_blob(bytes::Bytes::from(dir_b_bytes))
            .await
            .unwrap();
        publish_dir(&registry, &identity, key_b, *dir_b_blob.hash.as_bytes(), 1).await;

        let mut dir_a = DirV1::new();
        dir_a.dirs.insert("b".to_string(), DirRef::registry(pk_b));
        let dir_a_bytes = dir_a.encode_canonical().unwrap();
        let dir_a_blob = blob_store
            .upload_blob(bytes::Bytes::from(dir_a_bytes))
            .await
            .unwrap();
        publish_dir(&registry, &identity, key_a, *dir_a_blob.hash.as_bytes(), 1).await;

        let mut dir_root = DirV1::new();
        dir_root.dirs.insert("a".to_string(), DirRef::registry(pk_a));

        let err = walk_descendants(&dir_root, &blob_store, &registry).await.unwrap_err();
        assert!(matches!(err, FsError::CycleDetected));
    }

    #[tokio::test]
    async fn walk_descendants_lists_a_non_cyclic_tree() {
        let blob_store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let identity = SeedIdentity::from_seed(b"walk acyclic test");

        let key_a = identity.derive_child_key(&identity.root_key(), "a");
        let pk_a = identity.public_key_for(&key_a);

        let mut dir_a = DirV1::new();
        dir_a.files.insert("leaf.txt".to_string(), FileRef::new([9u8; 32], 3));
        let dir_a_bytes = dir_a.encode_canonical().unwrap();
        let dir_a_blob = blob_store
            .upload_blob(bytes::Bytes::from(dir_a_bytes))
            .await
            .unwrap();
        publish_dir(&registry, &identity, key_a, *dir_a_blob.hash.as_bytes(), 1).await;

        let mut dir_root = DirV1::new();
        dir_root.dirs.insert("a".to_string(), DirRef::registry(pk_a));

        let names = walk_descendants(&dir_root, &blob_store, &registry).await.unwrap();
        assert_eq!(names, vec!["a".to_string(), "leaf.txt".to_string()]);
    }
}
