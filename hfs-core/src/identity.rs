//! The identity collaborator: provides the root writer key and a
//! deterministic, collision-resistant child-key derivation. Seed
//! phrases, credential lifecycle, and key custody live above this
//! trait; derivation itself uses `blake3::derive_key` for
//! domain-separated key derivation.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use std::fmt::Debug;
use zeroize::Zeroize;

use crate::registry::PublicKey;

/// A 32-byte writer key: the secret that signs registry publishes for
/// one directory.
pub trait Identity: Debug + Send + Sync + 'static {
    /// The root writer key for this identity's filesystem.
    fn root_key(&self) -> [u8; 32];

    /// Derives a child directory's writer key from its parent's writer
    /// key and the child's name: `k_{i+1} = KDF(k_i, nameAt(i))`.
    fn derive_child_key(&self, parent: &[u8; 32], name: &str) -> [u8; 32];

    /// The Ed25519 public key published under a writer key's registry entries.
    fn public_key_for(&self, writer_key: &[u8; 32]) -> PublicKey {
        let signing_key = SigningKey::from_bytes(writer_key);
        signing_key.verifying_key().to_bytes()
    }

    /// Signs a registry publish payload with the given writer key.
    fn sign(&self, writer_key: &[u8; 32], message: &[u8]) -> [u8; 64] {
        let signing_key = SigningKey::from_bytes(writer_key);
        signing_key.sign(message).to_bytes()
    }
}

/// Verifies a registry entry's signature against its claimed public key.
/// Registry implementations (external collaborators) are expected to do
/// this themselves; exposed here so the in-memory test double in
/// [`crate::testutil`] can enforce the same invariant.
pub fn verify_signature(pk: &PublicKey, message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(pk) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    verifying_key.verify_strict(message, &signature).is_ok()
}

/// Domain-separation labels, one per derivation purpose.
const ROOT_KEY_DOMAIN: &str = "hfs/identity/root";
const CHILD_KEY_DOMAIN: &str = "hfs/identity/child";

/// A BLAKE3-domain-separated [`Identity`] derived from an opaque seed.
///
/// This is the reference implementation used by tests and by any
/// caller that does not need a more elaborate credential story (e.g.
/// seed phrases, hardware keys) — those can be layered on by
/// implementing [`Identity`] directly.
#[derive(Clone)]
pub struct SeedIdentity {
    root_key: [u8; 32],
}

impl Debug for SeedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedIdentity").finish_non_exhaustive()
    }
}

impl SeedIdentity {
    pub fn from_seed(seed: &[u8]) -> Self {
        Self {
            root_key: blake3::derive_key(ROOT_KEY_DOMAIN, seed),
        }
    }
}

impl Drop for SeedIdentity {
    /// Best-effort scrubbing of the root key on drop.
    fn drop(&mut self) {
        self.root_key.zeroize();
    }
}

impl Identity for SeedIdentity {
    fn root_key(&self) -> [u8; 32] {
        self.root_key
    }

    fn derive_child_key(&self, parent: &[u8; 32], name: &str) -> [u8; 32] {
        let mut material = Vec::with_capacity(32 + name.len());
        material.extend_from_slice(parent);
        material.extend_from_slice(name.as_bytes());
        blake3::derive_key(CHILD_KEY_DOMAIN, &material)
    }
}
