//! Writer-key derivation along a path:
//! `k0 = root; k_{i+1} = KDF(k_i, nameAt(i))`, built on domain-separated
//! `blake3::derive_key` chaining.

use hfs_core::identity::Identity;

/// The chain of writer keys from the root to a target path, one per
/// path segment plus the root itself at index 0.
#[derive(Clone)]
pub struct KeyChain {
    keys: Vec<[u8; 32]>,
}

impl KeyChain {
    /// Derives the full chain for `segments`, starting from `identity`'s root key.
    pub fn derive(identity: &dyn Identity, segments: &[&str]) -> Self {
        let mut keys = Vec::with_capacity(segments.len() + 1);
        let mut current = identity.root_key();
        keys.push(current);
        for segment in segments {
            current = identity.derive_child_key(&current, segment);
            keys.push(current);
        }
        Self { keys }
    }

    /// The writer key for the root directory.
    pub fn root(&self) -> [u8; 32] {
        self.keys[0]
    }

    /// The writer key for the directory at `segments[..=i]`, i.e. one
    /// past the root (`depth(0)` is the root itself).
    pub fn at_depth(&self, depth: usize) -> [u8; 32] {
        self.keys[depth]
    }

    /// The writer key for the full path (the deepest directory named
    /// by the segments passed to [`KeyChain::derive`]).
    pub fn leaf(&self) -> [u8; 32] {
        *self.keys.last().expect("KeyChain always has at least the root key")
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hfs_core::identity::SeedIdentity;

    #[test]
    fn derivation_is_deterministic_and_path_sensitive() {
        let identity = SeedIdentity::from_seed(b"keychain test seed");
        let a = KeyChain::derive(&identity, &["home", "docs"]);
        let b = KeyChain::derive(&identity, &["home", "docs"]);
        assert_eq!(a.leaf(), b.leaf());

        let c = KeyChain::derive(&identity, &["home", "pics"]);
        assert_ne!(a.leaf(), c.leaf());

        assert_eq!(a.root(), identity.root_key());
        assert_eq!(a.at_depth(1), KeyChain::derive(&identity, &["home"]).leaf());
    }
}
