//! Per-file streaming authenticated encryption: fixed-size chunked
//! XChaCha20-Poly1305, so large files get random-access-friendly
//! framing and a deterministic per-chunk nonce instead of one nonce
//! per blob.

use bytes::{Bytes, BytesMut};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;

use crate::dir::{EncryptionAlgorithm, EncryptionDescriptor, DEFAULT_CHUNK_SIZE};
use crate::error::{FsError, FsResult};

const TAG_LEN: usize = 16;
const NONCE_LEN: usize = 24;

/// Builds a fresh descriptor for a `put` with encryption requested,
/// generating a random per-file key and nonce salt unless the caller
/// supplied its own key.
pub fn new_descriptor(key: Option<[u8; 32]>, chunk_size: Option<u32>, plaintext_size: u64) -> EncryptionDescriptor {
    let key = key.unwrap_or_else(|| {
        let mut k = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut k);
        k
    });
    let mut nonce_salt = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut nonce_salt);
    EncryptionDescriptor {
        algorithm: EncryptionAlgorithm::XChaCha20Poly1305,
        chunk_size: chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
        key,
        plaintext_size,
        nonce_salt,
    }
}

/// Derives chunk `index`'s nonce: a 24-byte zero-prefixed little-endian
/// chunk index, XOR'd with the file's 8-byte random salt in its
/// trailing bytes.
fn chunk_nonce(nonce_salt: &[u8; 8], index: u64) -> XNonce {
    let mut nonce = [0u8; NONCE_LEN];
    let index_bytes = index.to_le_bytes();
    nonce[NONCE_LEN - 8..].copy_from_slice(&index_bytes);
    for (b, s) in nonce[NONCE_LEN - 8..].iter_mut().zip(nonce_salt.iter()) {
        *b ^= s;
    }
    *XNonce::from_slice(&nonce)
}

/// Encrypts `plaintext` into the envelope: `chunk_size`-sized chunks,
/// each sealed independently and stored as `ciphertext || 16-byte tag`
/// concatenated into one blob.
pub fn encrypt_envelope(descriptor: &EncryptionDescriptor, plaintext: &[u8]) -> FsResult<Bytes> {
    let EncryptionAlgorithm::XChaCha20Poly1305 = descriptor.algorithm;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&descriptor.key));
    let chunk_size = descriptor.chunk_size as usize;
    let chunk_count = plaintext.len().div_ceil(chunk_size.max(1)).max(1);

    let mut out = BytesMut::with_capacity(plaintext.len() + chunk_count * TAG_LEN);
    for (index, chunk) in plaintext.chunks(chunk_size.max(1)).enumerate() {
        let nonce = chunk_nonce(&descriptor.nonce_salt, index as u64);
        let sealed = cipher
            .encrypt(&nonce, chunk)
            .map_err(|e| FsError::EncryptionFailed(e.to_string()))?;
        out.extend_from_slice(&sealed);
    }
    // An empty plaintext still yields exactly one (empty) sealed chunk,
    // so `decrypt_envelope` below doesn't need a special empty-input case.
    if plaintext.is_empty() {
        let nonce = chunk_nonce(&descriptor.nonce_salt, 0);
        let sealed = cipher
            .encrypt(&nonce, &[][..])
            .map_err(|e| FsError::EncryptionFailed(e.to_string()))?;
        out.extend_from_slice(&sealed);
    }
    Ok(out.freeze())
}

/// Reverses [`encrypt_envelope`]: slices the blob into
/// `chunk_size + 16`-byte units, decrypts and concatenates. Any
/// authentication tag mismatch maps to [`FsError::DecryptionFailed`].
pub fn decrypt_envelope(descriptor: &EncryptionDescriptor, envelope: &[u8]) -> FsResult<Bytes> {
    let EncryptionAlgorithm::XChaCha20Poly1305 = descriptor.algorithm;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&descriptor.key));
    let sealed_chunk_len = descriptor.chunk_size as usize + TAG_LEN;

    let mut out = BytesMut::with_capacity(descriptor.plaintext_size as usize);
    for (index, sealed_chunk) in envelope.chunks(sealed_chunk_len.max(TAG_LEN)).enumerate() {
        let nonce = chunk_nonce(&descriptor.nonce_salt, index as u64);
        let plain = cipher
            .decrypt(&nonce, sealed_chunk)
            .map_err(|_| FsError::DecryptionFailed)?;
        out.extend_from_slice(&plain);
    }

    out.truncate(descriptor.plaintext_size as usize);
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_empty_and_multi_chunk_plaintext() {
        for len in [0usize, 10, 262_144, 262_144 + 1, 300_000] {
            let plain = vec![7u8; len];
            let descriptor = new_descriptor(None, Some(1024), len as u64);
            let envelope = encrypt_envelope(&descriptor, &plain).unwrap();
            let decrypted = decrypt_envelope(&descriptor, &envelope).unwrap();
            assert_eq!(decrypted.as_ref(), plain.as_slice(), "len={len}");
        }
    }

    #[test]
    fn tampering_with_ciphertext_fails_decryption() {
        let plain = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let descriptor = new_descriptor(None, Some(64), plain.len() as u64);
        let mut envelope = encrypt_envelope(&descriptor, &plain).unwrap().to_vec();
        envelope[0] ^= 0xff;
        let err = decrypt_envelope(&descriptor, &envelope).unwrap_err();
        assert!(matches!(err, FsError::DecryptionFailed));
    }
}
