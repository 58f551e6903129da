//! The HAMT engine: configuration, node format, and the async handle
//! that drives get/insert/delete/iterate against a blob store.
//!
//! Nodes are fetched lazily as traversal demands them and cached by
//! hash, the way an async trie over a remote-capable blob store has to
//! — unlike a synchronous in-memory HAMT, every descent is a
//! potential round trip.

mod engine;
mod node;

pub use engine::Hamt;
pub use node::{ChildRef, EntryValue, HamtEntry, HamtNode};

use minicbor::{Decode, Encode};

/// Persisted HAMT configuration, carried inside a directory's
/// `header.sharding.config`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
#[cbor(map)]
pub struct HamtConfig {
    #[n(0)]
    pub bits_per_level: u8,
    #[n(1)]
    pub max_inline_entries: u32,
    #[n(2)]
    pub hash_function: HashFunctionSelector,
}

impl Default for HamtConfig {
    fn default() -> Self {
        Self {
            bits_per_level: crate::bitmap::BITS_PER_LEVEL as u8,
            max_inline_entries: crate::dir::DEFAULT_MAX_INLINE_ENTRIES,
            hash_function: HashFunctionSelector::Fast,
        }
    }
}

/// The two hash function selectors a directory's sharding config can
/// name; real collaborators are expected to exercise `Fast` in
/// practice, with `Crypto` available where hash-flooding resistance
/// matters more than speed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum HashFunctionSelector {
    #[n(0)]
    Fast,
    #[n(1)]
    Crypto,
}

/// Hard cap on split recursion depth (12 levels, i.e. 60 bits
/// consumed at 5 bits/level), guarding against pathological hash
/// collisions.
pub const MAX_SPLIT_RECURSION_DEPTH: u32 = 12;

/// Bounded LRU size for a `Hamt` handle's node cache.
pub const DEFAULT_NODE_CACHE_CAPACITY: usize = 1024;
