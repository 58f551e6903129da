//! Bitmap addressing and key hashing for the HAMT.
//!
//! The fast selector reuses `xxhash-rust`'s xxh3, the same crate used
//! elsewhere in this tree for prefix hashing. The cryptographic
//! selector is built on `blake3::hash`.

pub const BITS_PER_LEVEL: u32 = 5;
pub const SLOTS_PER_NODE: u32 = 1 << BITS_PER_LEVEL; // 32

/// The slot index a hash selects at a given trie depth.
pub fn index(hash: u64, depth: u32) -> u32 {
    ((hash >> (depth * BITS_PER_LEVEL)) & (SLOTS_PER_NODE as u64 - 1)) as u32
}

pub fn has_bit(bitmap: u32, slot: u32) -> bool {
    bitmap & (1 << slot) != 0
}

pub fn set_bit(bitmap: u32, slot: u32) -> u32 {
    bitmap | (1 << slot)
}

pub fn clear_bit(bitmap: u32, slot: u32) -> u32 {
    bitmap & !(1 << slot)
}

/// Number of set bits strictly below `slot`; the child-array position
/// that slot maps to.
pub fn popcount(bitmap: u32, slot: u32) -> usize {
    if slot == 0 {
        0
    } else {
        (bitmap & ((1 << slot) - 1)).count_ones() as usize
    }
}

/// Selector 0: a well-known 64-bit non-cryptographic hash.
pub fn fast_hash(prefixed_key: &str) -> u64 {
    xxhash_rust::xxh3::xxh3_64(prefixed_key.as_bytes())
}

/// Selector 1: big-endian 64-bit prefix of the BLAKE3 digest.
pub fn crypto_hash(prefixed_key: &str) -> u64 {
    let digest = blake3::hash(prefixed_key.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(buf)
}

/// Hashes a prefixed key (`"f:"`/`"d:"` + name) using the configured
/// selector.
pub fn hash_key(prefixed_key: &str, selector: crate::hamt::HashFunctionSelector) -> u64 {
    use crate::hamt::HashFunctionSelector;
    match selector {
        HashFunctionSelector::Fast => fast_hash(prefixed_key),
        HashFunctionSelector::Crypto => crypto_hash(prefixed_key),
    }
}

/// Prefixes a name for HAMT storage, disambiguating files from
/// directories of the same visible name.
pub fn prefixed_file_key(name: &str) -> String {
    format!("f:{name}")
}

pub fn prefixed_dir_key(name: &str) -> String {
    format!("d:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn popcount_matches_child_array_position() {
        // bits 0, 2, 5 set
        let bitmap = 0b0010_0101u32;
        assert_eq!(popcount(bitmap, 0), 0);
        assert_eq!(popcount(bitmap, 2), 1);
        assert_eq!(popcount(bitmap, 5), 2);
        assert_eq!(popcount(bitmap, 6), 3);
    }

    #[test]
    fn set_then_clear_bit_is_identity() {
        let bitmap = 0u32;
        let with_bit = set_bit(bitmap, 17);
        assert!(has_bit(with_bit, 17));
        assert_eq!(clear_bit(with_bit, 17), bitmap);
    }

    #[test]
    fn index_consumes_five_bits_per_level() {
        let hash = 0b11111_00001u64;
        assert_eq!(index(hash, 0), 0b00001);
        assert_eq!(index(hash, 1), 0b11111);
    }
}
