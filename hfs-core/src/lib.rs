//! Shared types and collaborator traits for the `hfs` content-addressed
//! filesystem.
//!
//! This crate defines the boundary between the filesystem core (in the
//! `hfs` crate) and its three external collaborators: an immutable
//! content-addressed blob store, a small mutable signed registry, and
//! an identity/key-derivation provider. None of these are implemented
//! here beyond in-memory test doubles (see [`testutil`]) — production
//! implementations (P2P transport, on-disk storage, credential
//! management) are deliberately out of scope, the same split
//! `s5_core` draws around `s5_fs`.

pub mod hash;
pub mod identity;
pub mod registry;
pub mod store;
pub mod testutil;

pub use hash::{BlobRef, Hash};
pub use identity::Identity;
pub use registry::{canonical_signing_payload, PublicKey, Registry, RegistryEntry};
pub use store::BlobStore;
