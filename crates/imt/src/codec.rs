//! Canonical byte layouts and hashing
//!
//! Everything here must produce identical bytes whether it runs natively or inside
//! a circuit description, so the layouts are fixed: Keccak-256 (legacy padding),
//! big-endian integers, no domain separation between leaves and internal nodes.

use sha3::{Digest, Keccak256};

use crate::{FieldBytes, Hash32, ImtError, Leaf, Result};

/// Tree depths with a compiled-in empty-tree root.
pub const SUPPORTED_DEPTHS: [usize; 2] = [9, 10];

/// keccak(72 zero bytes): the hash of an unused slot.
pub const ZERO_LEAF_HASH: Hash32 = [
    60, 172, 49, 121, 8, 198, 153, 254, 135, 58, 127, 110, 228, 232, 205, 99, 251, 233, 145, 139,
    35, 21, 201, 123, 233, 21, 133, 89, 1, 104, 227, 1,
];

const EMPTY_ROOT_DEPTH_9: Hash32 = [
    157, 149, 45, 171, 75, 243, 215, 53, 86, 67, 124, 100, 47, 116, 51, 82, 48, 65, 157, 175, 29,
    159, 136, 187, 96, 150, 225, 168, 160, 39, 191, 65,
];

const EMPTY_ROOT_DEPTH_10: Hash32 = [
    133, 27, 23, 145, 79, 228, 224, 227, 7, 173, 86, 21, 96, 202, 212, 76, 109, 0, 10, 109, 158,
    64, 92, 46, 211, 186, 116, 105, 60, 22, 42, 118,
];

/// Keccak-256 over an arbitrary byte string.
pub fn keccak(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Parent of two sibling nodes: keccak(left || right).
pub fn node_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    keccak(&data)
}

pub fn leaf_hash(leaf: &Leaf) -> Hash32 {
    keccak(&leaf.to_bytes())
}

/// Root of a tree of `depth` whose slots are all unused.
pub fn empty_tree_root(depth: usize) -> Result<Hash32> {
    match depth {
        9 => Ok(EMPTY_ROOT_DEPTH_9),
        10 => Ok(EMPTY_ROOT_DEPTH_10),
        other => Err(ImtError::UnsupportedDepth(other)),
    }
}

/// Hash of an all-unused subtree per height, `0..=depth`.
pub fn default_hashes(depth: usize) -> Vec<Hash32> {
    let mut defaults = Vec::with_capacity(depth + 1);
    defaults.push(ZERO_LEAF_HASH);
    for h in 0..depth {
        let prev = defaults[h];
        defaults.push(node_hash(&prev, &prev));
    }
    defaults
}

/// Splits a hash into two 16-byte big-endian halves.
pub fn compress(h: &Hash32) -> (u128, u128) {
    let mut hi = [0u8; 16];
    let mut lo = [0u8; 16];
    hi.copy_from_slice(&h[..16]);
    lo.copy_from_slice(&h[16..]);
    (u128::from_be_bytes(hi), u128::from_be_bytes(lo))
}

pub fn decompress(parts: (u128, u128)) -> Hash32 {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&parts.0.to_be_bytes());
    out[16..].copy_from_slice(&parts.1.to_be_bytes());
    out
}

/// The two public field elements that stand for `h`.
pub fn compress_to_fields(h: &Hash32) -> [FieldBytes; 2] {
    let (hi, lo) = compress(h);
    [FieldBytes::from_u128(hi), FieldBytes::from_u128(lo)]
}

/// Inverse of [`compress_to_fields`]; `None` if either element exceeds 128 bits.
pub fn decompress_fields(fields: &[FieldBytes; 2]) -> Option<Hash32> {
    if fields.iter().any(|f| f.0[..16].iter().any(|b| *b != 0)) {
        return None;
    }
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&fields[0].0[16..]);
    out[16..].copy_from_slice(&fields[1].0[16..]);
    Some(out)
}

/// keccak over the concatenation of several hashes.
pub fn hash_concat<'a>(parts: impl IntoIterator<Item = &'a Hash32>) -> Hash32 {
    let mut hasher = Keccak256::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}
