//! The opaque resume token for paginated directory/HAMT iteration.

use minicbor::{Decode, Encode};

/// Carries enough state to resume a `list` after a specific item: the
/// child-array index path from the HAMT root to the leaf holding the
/// last-yielded entry, plus the key itself, which is what resumption
/// actually compares against — the path alone would be ambiguous
/// across calls originating from a different directory revision.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
#[cbor(array)]
pub struct Cursor {
    /// Child-array indices from root to leaf (empty for an inline,
    /// non-sharded directory, which doesn't have a HAMT path at all).
    #[n(0)]
    pub path: Vec<u32>,
    /// The prefixed key (`f:`/`d:` + name) of the last item yielded.
    #[n(1)]
    pub last_key: String,
}

impl Cursor {
    pub fn new(path: Vec<u32>, last_key: String) -> Self {
        Self { path, last_key }
    }

    /// Serializes to an opaque token callers can carry across calls;
    /// the encoding is a private implementation detail, not part of
    /// any persisted, versioned shape.
    pub fn encode_token(&self) -> String {
        use base64::Engine;
        let mut buf = Vec::new();
        minicbor::encode(self, &mut buf).expect("Cursor encoding is infallible");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
    }

    pub fn decode_token(token: &str) -> Option<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .ok()?;
        minicbor::decode(&bytes).ok()
    }
}
