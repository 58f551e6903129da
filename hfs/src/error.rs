//! The error taxonomy. Leaf/protocol failures are typed with
//! `thiserror`; collaborator failures that don't fit a specific kind
//! are wrapped in `anyhow::Error` with their cause chain preserved.

use hfs_core::hash::Hash;
use hfs_core::registry::RegistryError;
use hfs_core::store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: retry budget exhausted after {attempts} attempts")]
    ConflictRetryExhausted { attempts: u32 },

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("blob {0} unavailable")]
    BlobUnavailable(Hash),

    #[error("unsupported version/magic: {0}")]
    UnsupportedVersion(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("cycle detected while resolving directory links")]
    CycleDetected,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type FsResult<T> = Result<T, FsError>;

impl From<StoreError> for FsError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(hash) => FsError::BlobUnavailable(hash),
            StoreError::Other(e) => FsError::Backend(e),
        }
    }
}

impl From<RegistryError> for FsError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::Conflict { .. } => {
                // The transaction retry loop is the only place that should ever see
                // this variant directly, since it recovers locally.
                FsError::Backend(anyhow::anyhow!(value))
            }
            RegistryError::InvalidSignature(_) => FsError::Backend(anyhow::anyhow!(value)),
            RegistryError::Other(e) => FsError::Backend(e),
        }
    }
}

impl From<minicbor::decode::Error> for FsError {
    fn from(value: minicbor::decode::Error) -> Self {
        FsError::DecodeError(value.to_string())
    }
}
