//! The on-disk directory shape (`DirV1`) and its leaf reference types
//! (`DirRef`, `FileRef`) plus their canonical `minicbor` codec.

use std::collections::BTreeMap;

use minicbor::decode::{Decode, Decoder};
use minicbor::encode::{Encode, Encoder, Write};

use crate::error::{FsError, FsResult};
use crate::hamt::{HamtConfig, HashFunctionSelector};

/// The mandatory magic marker. Cannot be renamed or reinterpreted;
/// decoders reject anything else.
pub const DIR_MAGIC_STANDARD: &str = "S5.pro";
/// The static-web-app flavor magic, still rejected by anything that
/// only expects the standard form.
pub const DIR_MAGIC_STATIC_SITE: &str = "S5.pro/web";

/// Default threshold at which a directory transitions from inline maps
/// to a HAMT.
pub const DEFAULT_MAX_INLINE_ENTRIES: u32 = 1000;
/// Default per-chunk size for the encryption envelope.
pub const DEFAULT_CHUNK_SIZE: u32 = 262_144;

fn unix_timestamp() -> (u32, u32) {
    let now = chrono::Utc::now();
    (now.timestamp() as u32, now.timestamp_subsec_nanos())
}

/// A directory or file's link target, a closed two-variant sum encoded
/// as a 33-byte CBOR byte string, `tag || payload`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirLink {
    FixedHashBlake3([u8; 32]),
    MutableRegistryEd25519([u8; 32]),
}

impl DirLink {
    const SERIALIZED_SIZE: usize = 33;
    const TAG_BLAKE3: u8 = 0x1e;
    const TAG_REGISTRY_ED25519: u8 = 0xed;

    fn encode<Ctx, W: Write>(
        v: &DirLink,
        e: &mut Encoder<W>,
        _ctx: &mut Ctx,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        let mut bytes = [0u8; Self::SERIALIZED_SIZE];
        match v {
            DirLink::FixedHashBlake3(hash) => {
                bytes[0] = Self::TAG_BLAKE3;
                bytes[1..].copy_from_slice(hash);
            }
            DirLink::MutableRegistryEd25519(pk) => {
                bytes[0] = Self::TAG_REGISTRY_ED25519;
                bytes[1..].copy_from_slice(pk);
            }
        }
        e.bytes(&bytes)?.ok()
    }

    fn decode<'b, Ctx>(
        d: &mut Decoder<'b>,
        _ctx: &mut Ctx,
    ) -> Result<DirLink, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        if bytes.len() != Self::SERIALIZED_SIZE {
            return Err(minicbor::decode::Error::message(
                "dir link must be exactly 33 bytes",
            ));
        }
        let mut payload = [0u8; 32];
        payload.copy_from_slice(&bytes[1..]);
        match bytes[0] {
            Self::TAG_BLAKE3 => Ok(DirLink::FixedHashBlake3(payload)),
            Self::TAG_REGISTRY_ED25519 => Ok(DirLink::MutableRegistryEd25519(payload)),
            other => Err(minicbor::decode::Error::message(format!(
                "unknown dir link tag 0x{other:02x}"
            ))),
        }
    }
}

/// A directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
#[cbor(map)]
pub struct DirRef {
    #[n(0)]
    #[cbor(with = "DirLink")]
    pub link: DirLink,
    #[n(1)]
    pub ts_seconds: Option<u32>,
    #[n(2)]
    pub ts_nanos: Option<u32>,
}

impl DirRef {
    pub fn fixed_hash(hash: [u8; 32]) -> Self {
        Self {
            link: DirLink::FixedHashBlake3(hash),
            ts_seconds: None,
            ts_nanos: None,
        }
    }

    pub fn registry(pk: [u8; 32]) -> Self {
        Self {
            link: DirLink::MutableRegistryEd25519(pk),
            ts_seconds: None,
            ts_nanos: None,
        }
    }

    pub fn with_timestamp_now(mut self) -> Self {
        let (s, n) = unix_timestamp();
        self.ts_seconds = Some(s);
        self.ts_nanos = Some(n);
        self
    }
}

/// The only encryption algorithm known today: a closed sum with one
/// variant, leaving room for more to be added later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum EncryptionAlgorithm {
    #[n(0)]
    XChaCha20Poly1305,
}

/// Per-file encryption descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
#[cbor(map)]
pub struct EncryptionDescriptor {
    #[n(0)]
    pub algorithm: EncryptionAlgorithm,
    #[n(1)]
    pub chunk_size: u32,
    #[n(2)]
    #[cbor(with = "minicbor::bytes")]
    pub key: [u8; 32],
    #[n(3)]
    pub plaintext_size: u64,
    /// The 8-byte random salt XOR'd into every chunk's nonce (§4.5).
    #[n(4)]
    #[cbor(with = "minicbor::bytes")]
    pub nonce_salt: [u8; 8],
}

/// A file entry, plus a version chain: `prev`/`first_version`/
/// `version_count` track supersession across repeated `put`s to the
/// same name. None of this changes `delete`/`list` semantics — the
/// entry is still fully removed from its containing directory on
/// `delete`; the chain is only a metadata convenience exposed via
/// [`FileRef::history`].
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[cbor(map)]
pub struct FileRef {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub hash: [u8; 32],
    #[n(1)]
    pub size: u64,
    #[n(2)]
    pub media_type: Option<String>,
    #[n(3)]
    pub ts_seconds: Option<u32>,
    #[n(4)]
    pub ts_nanos: Option<u32>,
    #[n(5)]
    pub enc: Option<EncryptionDescriptor>,
    #[n(6)]
    #[cbor(with = "minicbor::bytes")]
    pub meta: Option<Vec<u8>>,
    #[n(7)]
    pub prev: Option<Box<FileRef>>,
    #[n(8)]
    pub first_version: Option<Box<FileRef>>,
    #[n(9)]
    pub version_count: Option<u32>,
    #[n(10)]
    #[cbor(default)]
    pub tombstone: bool,
}

impl FileRef {
    pub fn new(hash: [u8; 32], size: u64) -> Self {
        Self {
            hash,
            size,
            media_type: None,
            ts_seconds: None,
            ts_nanos: None,
            enc: None,
            meta: None,
            prev: None,
            first_version: None,
            version_count: None,
            tombstone: false,
        }
    }

    pub fn with_timestamp_now(mut self) -> Self {
        let (s, n) = unix_timestamp();
        self.ts_seconds = Some(s);
        self.ts_nanos = Some(n);
        self
    }

    /// Builds the replacement `FileRef` for a `put` onto an existing
    /// name, chaining `self` as the new value's `prev` and carrying
    /// `first_version`/`version_count` forward.
    pub fn supersede(self, new_hash: [u8; 32], new_size: u64) -> Self {
        let first_version = self.first_version.clone().or_else(|| Some(Box::new(self.clone())));
        let version_count = self.version_count.unwrap_or(1) + 1;
        let mut next = FileRef::new(new_hash, new_size).with_timestamp_now();
        next.first_version = first_version;
        next.version_count = Some(version_count);
        next.prev = Some(Box::new(self));
        next
    }

    /// Walks `prev` from newest to oldest, inclusive of `self`.
    pub fn history(&self) -> Vec<&FileRef> {
        let mut out = vec![self];
        let mut cur = self.prev.as_deref();
        while let Some(f) = cur {
            out.push(f);
            cur = f.prev.as_deref();
        }
        out
    }
}

/// The HAMT root pointer persisted in a directory's `header.sharding`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
#[cbor(map)]
pub struct HamtRootRef {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub root_hash: [u8; 32],
    #[n(1)]
    pub total_entries: u64,
    #[n(2)]
    pub depth: u8,
}

/// Closed discriminant for the sharding envelope's `type` field; only
/// `Hamt` exists today, leaving room for future shard kinds the way
/// the encryption descriptor leaves room for future algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum ShardingKind {
    #[n(0)]
    Hamt,
}

/// `DirV1.header.sharding`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
#[cbor(map)]
pub struct ShardingDescriptor {
    #[n(0)]
    pub kind: ShardingKind,
    #[n(1)]
    pub config: HamtConfig,
    #[n(2)]
    pub root: HamtRootRef,
}

impl ShardingDescriptor {
    pub fn new(config: HamtConfig, root: HamtRootRef) -> Self {
        Self {
            kind: ShardingKind::Hamt,
            config,
            root,
        }
    }
}

/// The one variant of `DirHeader` known today that is *not* itself
/// user-extensible (`try_files`/`error_pages` are the static-site
/// flavor's own reserved keys).
///
/// Unlike every other persisted shape in this module, `DirHeader` is
/// hand-encoded rather than derived: unknown map keys must round-trip
/// verbatim, which means capturing their raw encoded bytes rather than
/// decoding them into a known Rust type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirHeader {
    pub sharding: Option<ShardingDescriptor>,
    pub try_files: Option<Vec<String>>,
    pub error_pages: Option<BTreeMap<u16, String>>,
    /// Raw, still-encoded bytes for any map key this version of the
    /// header doesn't recognize, keyed by that integer key. Preserved
    /// verbatim on re-encode so forward compatibility holds even though
    /// the reader can't interpret them.
    pub extra: BTreeMap<u32, Vec<u8>>,
}

const HEADER_KEY_SHARDING: u32 = 1;
const HEADER_KEY_TRY_FILES: u32 = 2;
const HEADER_KEY_ERROR_PAGES: u32 = 3;

impl DirHeader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<Ctx> Encode<Ctx> for DirHeader {
    fn encode<W: Write>(
        &self,
        e: &mut Encoder<W>,
        ctx: &mut Ctx,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        let present = self.sharding.is_some() as u64
            + self.try_files.is_some() as u64
            + self.error_pages.is_some() as u64
            + self.extra.len() as u64;
        e.map(present)?;

        // Known keys first, in ascending numeric order, interleaved
        // with `extra` keys so the overall key order stays ascending.
        // `extra`'s keys are disjoint from the known ones by construction
        // (decode only ever routes unrecognized keys there), so emitting
        // known keys in their fixed order followed by `extra` in its
        // `BTreeMap` order matches ascending numeric order overall as
        // long as callers never hand-construct an `extra` entry reusing
        // a reserved key.
        if let Some(sharding) = &self.sharding {
            e.u32(HEADER_KEY_SHARDING)?;
            sharding.encode(e, ctx)?;
        }
        if let Some(try_files) = &self.try_files {
            e.u32(HEADER_KEY_TRY_FILES)?;
            try_files.encode(e, ctx)?;
        }
        if let Some(error_pages) = &self.error_pages {
            e.u32(HEADER_KEY_ERROR_PAGES)?;
            error_pages.encode(e, ctx)?;
        }
        for (key, raw) in &self.extra {
            e.u32(*key)?;
            e.writer_mut().write_all(raw).map_err(minicbor::encode::Error::write)?;
        }
        Ok(())
    }
}

impl<'b, Ctx> Decode<'b, Ctx> for DirHeader {
    fn decode(d: &mut Decoder<'b>, ctx: &mut Ctx) -> Result<Self, minicbor::decode::Error> {
        let mut header = DirHeader::default();
        let len = d.map()?;
        let mut remaining = len;
        loop {
            match remaining {
                Some(0) => break,
                Some(n) => remaining = Some(n - 1),
                None => {
                    if d.datatype()? == minicbor::data::Type::Break {
                        d.skip()?;
                        break;
                    }
                }
            }
            let key: u32 = d.decode_with(ctx)?;
            match key {
                HEADER_KEY_SHARDING => header.sharding = Some(d.decode_with(ctx)?),
                HEADER_KEY_TRY_FILES => header.try_files = Some(d.decode_with(ctx)?),
                HEADER_KEY_ERROR_PAGES => header.error_pages = Some(d.decode_with(ctx)?),
                other => {
                    let start = d.position();
                    d.skip()?;
                    let end = d.position();
                    header.extra.insert(other, d.input()[start..end].to_vec());
                }
            }
            if len.is_none() {
                continue;
            }
        }
        Ok(header)
    }
}

/// The directory entity. Encoded as a fixed 4-element array, with the
/// static-site magic variant layered on top of the standard shape.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[cbor(array)]
pub struct DirV1 {
    #[n(0)]
    pub magic: String,
    #[n(1)]
    pub header: DirHeader,
    #[n(2)]
    pub dirs: BTreeMap<String, DirRef>,
    #[n(3)]
    pub files: BTreeMap<String, FileRef>,
}

impl DirV1 {
    pub fn new() -> Self {
        Self {
            magic: DIR_MAGIC_STANDARD.to_string(),
            header: DirHeader::new(),
            dirs: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn new_static_site() -> Self {
        Self {
            magic: DIR_MAGIC_STATIC_SITE.to_string(),
            ..Self::new()
        }
    }

    pub fn is_sharded(&self) -> bool {
        self.header.sharding.is_some()
    }

    /// Combined inline entry count (ignored once sharded).
    pub fn inline_entry_count(&self) -> usize {
        self.dirs.len() + self.files.len()
    }

    fn validate_magic(&self) -> FsResult<()> {
        match self.magic.as_str() {
            DIR_MAGIC_STANDARD | DIR_MAGIC_STATIC_SITE => Ok(()),
            other => Err(FsError::UnsupportedVersion(other.to_string())),
        }
    }

    /// Canonical encoding: deterministic and byte-identical for equal
    /// logical values, since field order is fixed by `#[n(..)]` and
    /// both inline maps are `BTreeMap`s.
    pub fn encode_canonical(&self) -> FsResult<Vec<u8>> {
        self.validate_magic()?;
        let mut buf = Vec::new();
        minicbor::encode(self, &mut buf).map_err(|e| FsError::DecodeError(e.to_string()))?;
        Ok(buf)
    }

    pub fn decode_canonical(bytes: &[u8]) -> FsResult<Self> {
        let dir: DirV1 = minicbor::decode(bytes)?;
        dir.validate_magic()?;
        Ok(dir)
    }
}

impl Default for DirV1 {
    fn default() -> Self {
        Self::new()
    }
}
