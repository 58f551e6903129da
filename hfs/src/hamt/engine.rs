//! `Hamt`: the async handle that drives get/insert/delete/iterate
//! against a blob store, with a bounded node cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use lru::LruCache;

use hfs_core::hash::Hash;
use hfs_core::store::BlobStore;

use crate::bitmap;
use crate::cursor::Cursor;
use crate::dir::HamtRootRef;
use crate::error::{FsError, FsResult};
use crate::hamt::node::{ChildRef, EntryValue, HamtEntry, HamtNode};
use crate::hamt::{HamtConfig, DEFAULT_NODE_CACHE_CAPACITY, MAX_SPLIT_RECURSION_DEPTH};

/// An in-memory HAMT handle rooted at one node, lazily fetching
/// children as traversal demands them and caching loaded nodes by
/// their base64url hash.
///
/// Each top-level `Filesystem` operation constructs its own `Hamt` —
/// there is no shared mutable cache across concurrent callers, so
/// every mutating method here takes `&mut self`.
pub struct Hamt {
    blob_store: Arc<dyn BlobStore>,
    config: HamtConfig,
    cache: LruCache<String, Arc<HamtNode>>,
    root: HamtNode,
}

impl Hamt {
    pub fn new_empty(blob_store: Arc<dyn BlobStore>, config: HamtConfig) -> Self {
        Self {
            blob_store,
            config,
            cache: LruCache::new(NonZeroUsize::new(DEFAULT_NODE_CACHE_CAPACITY).unwrap()),
            root: HamtNode::empty(0),
        }
    }

    pub async fn load(
        blob_store: Arc<dyn BlobStore>,
        config: HamtConfig,
        root_ref: HamtRootRef,
    ) -> FsResult<Self> {
        let mut hamt = Self::new_empty(blob_store, config);
        let root = hamt.fetch_node(Hash::from_bytes(root_ref.root_hash)).await?;
        hamt.root = root;
        Ok(hamt)
    }

    pub fn config(&self) -> &HamtConfig {
        &self.config
    }

    pub fn total_entries(&self) -> u64 {
        self.root.count
    }

    async fn fetch_node(&mut self, hash: Hash) -> FsResult<HamtNode> {
        let key = hash.to_base64url();
        if let Some(node) = self.cache.get(&key) {
            return Ok((**node).clone());
        }
        let bytes = self
            .blob_store
            .download_blob_as_bytes(hash)
            .await
            .map_err(FsError::from)?;
        let node = HamtNode::decode_canonical(&bytes)?;
        self.cache.put(key, Arc::new(node.clone()));
        Ok(node)
    }

    async fn persist_node(&mut self, node: &HamtNode) -> FsResult<Hash> {
        let bytes = node
            .encode_canonical()
            .map_err(|e| FsError::DecodeError(e.to_string()))?;
        let blob_ref = self
            .blob_store
            .upload_blob(Bytes::from(bytes))
            .await
            .map_err(FsError::from)?;
        self.cache
            .put(blob_ref.hash.to_base64url(), Arc::new(node.clone()));
        Ok(blob_ref.hash)
    }

    /// Looks up a prefixed key's value.
    pub async fn get(&mut self, prefixed_key: &str) -> FsResult<Option<EntryValue>> {
        let root = self.root.clone();
        self.get_rec(root, prefixed_key).await
    }

    fn get_rec<'a>(
        &'a mut self,
        node: HamtNode,
        key: &'a str,
    ) -> BoxFuture<'a, FsResult<Option<EntryValue>>> {
        Box::pin(async move {
            let hash = bitmap::hash_key(key, self.config.hash_function);
            let slot = bitmap::index(hash, node.depth);
            if !bitmap::has_bit(node.bitmap, slot) {
                return Ok(None);
            }
            let pos = bitmap::popcount(node.bitmap, slot);
            match &node.children[pos] {
                ChildRef::Leaf(entries) => {
                    Ok(entries.iter().find(|e| e.key == key).map(|e| e.value.clone()))
                }
                ChildRef::Node(hash_bytes) => {
                    let child = self.fetch_node(Hash::from_bytes(*hash_bytes)).await?;
                    self.get_rec(child, key).await
                }
            }
        })
    }

    /// Inserts or replaces a prefixed key's value, including the
    /// leaf-split policy on overflow.
    pub async fn insert(&mut self, key: String, value: EntryValue) -> FsResult<()> {
        let root = self.root.clone();
        let (new_root, _) = self.insert_rec(root, key, value).await?;
        self.root = new_root;
        Ok(())
    }

    fn insert_rec<'a>(
        &'a mut self,
        mut node: HamtNode,
        key: String,
        value: EntryValue,
    ) -> BoxFuture<'a, FsResult<(HamtNode, bool)>> {
        Box::pin(async move {
            let hash = bitmap::hash_key(&key, self.config.hash_function);
            let slot = bitmap::index(hash, node.depth);

            if !bitmap::has_bit(node.bitmap, slot) {
                let pos = bitmap::popcount(node.bitmap, slot);
                node.children
                    .insert(pos, ChildRef::Leaf(vec![HamtEntry { key, value }]));
                node.bitmap = bitmap::set_bit(node.bitmap, slot);
                node.count += 1;
                return Ok((node, true));
            }

            let pos = bitmap::popcount(node.bitmap, slot);
            match node.children[pos].clone() {
                ChildRef::Leaf(mut entries) => {
                    let inserted = if let Some(existing) = entries.iter_mut().find(|e| e.key == key) {
                        existing.value = value;
                        false
                    } else {
                        entries.push(HamtEntry { key, value });
                        true
                    };
                    let max_inline = self.config.max_inline_entries as usize;
                    node.children[pos] = if inserted && entries.len() > max_inline {
                        self.split_leaf(entries, node.depth + 1, 0).await?
                    } else {
                        ChildRef::Leaf(entries)
                    };
                    if inserted {
                        node.count += 1;
                    }
                    Ok((node, inserted))
                }
                ChildRef::Node(hash_bytes) => {
                    let child = self.fetch_node(Hash::from_bytes(hash_bytes)).await?;
                    let (new_child, inserted) = self.insert_rec(child, key, value).await?;
                    let new_hash = self.persist_node(&new_child).await?;
                    node.children[pos] = ChildRef::Node(*new_hash.as_bytes());
                    if inserted {
                        node.count += 1;
                    }
                    Ok((node, inserted))
                }
            }
        })
    }

    /// Rebuilds an overflowing leaf's entries into a fresh internal
    /// node, recursing when entries
    /// collide entirely into one slot, capped at
    /// [`MAX_SPLIT_RECURSION_DEPTH`].
    fn split_leaf<'a>(
        &'a mut self,
        entries: Vec<HamtEntry>,
        depth: u32,
        recursion_guard: u32,
    ) -> BoxFuture<'a, FsResult<ChildRef>> {
        Box::pin(async move {
            if recursion_guard >= MAX_SPLIT_RECURSION_DEPTH {
                tracing::warn!(
                    depth,
                    entries = entries.len(),
                    "hamt split recursion cap reached, keeping oversized leaf verbatim"
                );
                return Ok(ChildRef::Leaf(entries));
            }

            let max_inline = self.config.max_inline_entries as usize;
            let total = entries.len() as u64;
            let mut groups: std::collections::BTreeMap<u32, Vec<HamtEntry>> =
                std::collections::BTreeMap::new();
            for entry in entries {
                let hash = bitmap::hash_key(&entry.key, self.config.hash_function);
                let slot = bitmap::index(hash, depth);
                groups.entry(slot).or_default().push(entry);
            }

            let mut node = HamtNode::empty(depth);
            node.count = total;
            for (slot, group) in groups {
                node.bitmap = bitmap::set_bit(node.bitmap, slot);
                let child = if group.len() > max_inline {
                    self.split_leaf(group, depth + 1, recursion_guard + 1).await?
                } else {
                    ChildRef::Leaf(group)
                };
                node.children.push(child);
            }

            let hash = self.persist_node(&node).await?;
            Ok(ChildRef::Node(*hash.as_bytes()))
        })
    }

    /// Removes a prefixed key, reporting whether it was present. Never merges
    /// sibling leaves; a leaf emptied by this delete has its slot bit
    /// cleared and is removed from the parent's children array.
    pub async fn delete(&mut self, key: &str) -> FsResult<bool> {
        let root = self.root.clone();
        let (new_root, removed) = self.delete_rec(root, key).await?;
        self.root = new_root;
        Ok(removed)
    }

    fn delete_rec<'a>(
        &'a mut self,
        mut node: HamtNode,
        key: &'a str,
    ) -> BoxFuture<'a, FsResult<(HamtNode, bool)>> {
        Box::pin(async move {
            let hash = bitmap::hash_key(key, self.config.hash_function);
            let slot = bitmap::index(hash, node.depth);
            if !bitmap::has_bit(node.bitmap, slot) {
                return Ok((node, false));
            }
            let pos = bitmap::popcount(node.bitmap, slot);

            let (removed, collapse) = match node.children[pos].clone() {
                ChildRef::Leaf(mut entries) => {
                    let before = entries.len();
                    entries.retain(|e| e.key != key);
                    let removed = entries.len() != before;
                    if removed && entries.is_empty() {
                        (true, true)
                    } else {
                        node.children[pos] = ChildRef::Leaf(entries);
                        (removed, false)
                    }
                }
                ChildRef::Node(hash_bytes) => {
                    let child = self.fetch_node(Hash::from_bytes(hash_bytes)).await?;
                    let (new_child, removed) = self.delete_rec(child, key).await?;
                    if !removed {
                        (false, false)
                    } else if new_child.count == 0 {
                        (true, true)
                    } else {
                        let new_hash = self.persist_node(&new_child).await?;
                        node.children[pos] = ChildRef::Node(*new_hash.as_bytes());
                        (true, false)
                    }
                }
            };

            if removed {
                node.count -= 1;
                if collapse {
                    node.children.remove(pos);
                    node.bitmap = bitmap::clear_bit(node.bitmap, slot);
                }
            }
            Ok((node, removed))
        })
    }

    /// Deterministic depth-first traversal in children-array order.
    /// Materialized eagerly rather than as a true lazy async sequence —
    /// acceptable since a `Hamt` handle is already scoped to one
    /// top-level operation.
    pub async fn entries(&mut self) -> FsResult<Vec<(String, EntryValue)>> {
        let root = self.root.clone();
        self.entries_rec(root).await
    }

    fn entries_rec<'a>(&'a mut self, node: HamtNode) -> BoxFuture<'a, FsResult<Vec<(String, EntryValue)>>> {
        Box::pin(async move {
            let mut out = Vec::new();
            for child in node.children.clone() {
                match child {
                    ChildRef::Leaf(entries) => {
                        out.extend(entries.into_iter().map(|e| (e.key, e.value)));
                    }
                    ChildRef::Node(hash_bytes) => {
                        let child_node = self.fetch_node(Hash::from_bytes(hash_bytes)).await?;
                        out.extend(self.entries_rec(child_node).await?);
                    }
                }
            }
            Ok(out)
        })
    }

    /// Child-array indices from root to the leaf that would contain
    /// `key`.
    pub async fn path_for_key(&mut self, key: &str) -> FsResult<Vec<u32>> {
        let mut path = Vec::new();
        let mut node = self.root.clone();
        loop {
            let hash = bitmap::hash_key(key, self.config.hash_function);
            let slot = bitmap::index(hash, node.depth);
            if !bitmap::has_bit(node.bitmap, slot) {
                break;
            }
            let pos = bitmap::popcount(node.bitmap, slot);
            path.push(pos as u32);
            match node.children[pos].clone() {
                ChildRef::Leaf(_) => break,
                ChildRef::Node(hash_bytes) => {
                    node = self.fetch_node(Hash::from_bytes(hash_bytes)).await?;
                }
            }
        }
        Ok(path)
    }

    /// First page of iteration for a sharded directory.
    pub async fn entries_page(
        &mut self,
        limit: usize,
    ) -> FsResult<(Vec<(String, EntryValue)>, Option<Cursor>)> {
        let all = self.entries().await?;
        self.page_from(all, 0, limit).await
    }

    /// Resumes strictly after the entry the cursor names. Traversal order is the deterministic
    /// children-array/leaf order, not a global lexicographic order, so
    /// resumption is anchored on the cursor's exact key rather than a
    /// `>` comparison — the latter would skip or repeat entries
    /// whenever a leaf's insertion-order entries aren't already sorted.
    pub async fn entries_from(
        &mut self,
        cursor: &Cursor,
        limit: usize,
    ) -> FsResult<(Vec<(String, EntryValue)>, Option<Cursor>)> {
        let all = self.entries().await?;
        let start = all
            .iter()
            .position(|(k, _)| k == &cursor.last_key)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.page_from(all, start, limit).await
    }

    async fn page_from(
        &mut self,
        all: Vec<(String, EntryValue)>,
        start: usize,
        limit: usize,
    ) -> FsResult<(Vec<(String, EntryValue)>, Option<Cursor>)> {
        let end = (start + limit).min(all.len());
        let page: Vec<(String, EntryValue)> = all[start..end].to_vec();
        let next_cursor = if end < all.len() {
            let last_key = page.last().map(|(k, _)| k.clone()).unwrap_or_default();
            let path = self.path_for_key(&last_key).await?;
            Some(Cursor::new(path, last_key))
        } else {
            None
        };
        Ok((page, next_cursor))
    }

    /// Persists the root and returns the sharding descriptor's `root`
    /// field. `depth` is the number of HAMT levels (max node depth + 1),
    /// not the max node depth itself, so a single-node tree (root at
    /// `node.depth == 0`, no splits yet) still reports `depth == 1`
    /// rather than `0`.
    pub async fn commit(&mut self) -> FsResult<HamtRootRef> {
        let max_node_depth = self.max_depth().await?;
        let root = self.root.clone();
        let hash = self.persist_node(&root).await?;
        Ok(HamtRootRef {
            root_hash: *hash.as_bytes(),
            total_entries: self.root.count,
            depth: (max_node_depth + 1) as u8,
        })
    }

    async fn max_depth(&mut self) -> FsResult<u32> {
        let root = self.root.clone();
        self.max_depth_rec(root).await
    }

    fn max_depth_rec<'a>(&'a mut self, node: HamtNode) -> BoxFuture<'a, FsResult<u32>> {
        Box::pin(async move {
            let mut max = node.depth;
            for child in node.children.clone() {
                if let ChildRef::Node(hash_bytes) = child {
                    let child_node = self.fetch_node(Hash::from_bytes(hash_bytes)).await?;
                    max = max.max(self.max_depth_rec(child_node).await?);
                }
            }
            Ok(max)
        })
    }

    /// Builds a fresh HAMT from a directory's inline maps at the
    /// sharding transition.
    pub async fn build_from_entries(
        blob_store: Arc<dyn BlobStore>,
        config: HamtConfig,
        entries: Vec<(String, EntryValue)>,
    ) -> FsResult<Self> {
        let mut hamt = Self::new_empty(blob_store, config);
        for (key, value) in entries {
            hamt.insert(key, value).await?;
        }
        Ok(hamt)
    }
}
