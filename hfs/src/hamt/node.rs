//! The persisted HAMT node format: a closed, non-forward-compatible shape — unlike `DirHeader`, unknown keys or
//! variants here are a hard decode error.

use minicbor::{Decode, Encode};

use crate::dir::{DirRef, FileRef};

/// The value a HAMT leaf entry carries: either a file or a directory,
/// disambiguated by the `f:`/`d:` prefix on its key as well as by this
/// tag.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[cbor(array)]
pub enum EntryValue {
    #[n(0)]
    File(#[n(0)] FileRef),
    #[n(1)]
    Dir(#[n(0)] DirRef),
}

/// One `(prefixedKey, value)` pair inside a leaf.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[cbor(array)]
pub struct HamtEntry {
    #[n(0)]
    pub key: String,
    #[n(1)]
    pub value: EntryValue,
}

/// A HAMT node's child slot: either an inline leaf or a reference to
/// another serialized node. Closed, two-variant —
/// the codec rejects any other discriminant.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[cbor(array)]
pub enum ChildRef {
    #[n(0)]
    Leaf(#[n(0)] Vec<HamtEntry>),
    #[n(1)]
    Node(
        #[n(0)]
        #[cbor(with = "minicbor::bytes")]
        [u8; 32],
    ),
}

/// A HAMT node: `children.len() == bitmap.count_ones()`
/// is an invariant enforced by every mutator in [`super::engine::Hamt`],
/// never by the codec itself.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[cbor(array)]
pub struct HamtNode {
    #[n(0)]
    pub bitmap: u32,
    #[n(1)]
    pub children: Vec<ChildRef>,
    #[n(2)]
    pub count: u64,
    #[n(3)]
    pub depth: u32,
}

impl HamtNode {
    pub fn empty(depth: u32) -> Self {
        Self {
            bitmap: 0,
            children: Vec::new(),
            count: 0,
            depth,
        }
    }

    pub fn encode_canonical(&self) -> Result<Vec<u8>, minicbor::encode::Error<std::convert::Infallible>> {
        let mut buf = Vec::new();
        minicbor::encode(self, &mut buf)?;
        Ok(buf)
    }

    pub fn decode_canonical(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }
}
