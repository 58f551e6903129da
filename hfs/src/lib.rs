//! A user-owned, content-addressed hierarchical filesystem layered on
//! an immutable blob store and a small mutable signed registry.
//!
//! The crate is organized the way `s5_fs`/`fs5` split their own
//! directory logic: a pure on-disk codec ([`dir`]) at the bottom, a
//! bitmap-addressed HAMT ([`bitmap`], [`hamt`]) for directories that
//! outgrow their inline representation, per-file streaming encryption
//! ([`encryption`]), the optimistic directory transaction
//! ([`transaction`]) that ties codec and HAMT to the registry, and the
//! path-routing facade ([`facade`], [`cid`]) on top. [`hfs_core`]
//! defines the collaborator traits (blob store, registry, identity)
//! this crate is built against but does not implement.

pub mod bitmap;
pub mod cid;
pub mod cursor;
pub mod dir;
pub mod directory_ops;
pub mod encryption;
pub mod error;
pub mod facade;
pub mod hamt;
pub mod keychain;
pub mod transaction;

pub use cursor::Cursor;
pub use dir::{DirHeader, DirLink, DirRef, DirV1, FileRef};
pub use error::{FsError, FsResult};
pub use facade::{EncryptionRequest, Filesystem, Kind, ListEntry, Metadata, PutOptions, RetryConfig, Value};
pub use hamt::{Hamt, HamtConfig};
pub use keychain::KeyChain;
