//! Core types for the indexed Merkle tree

use std::fmt;

use ruint::aliases::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{ImtError, Result};

/// 32-byte hash
pub type Hash32 = [u8; 32];

/// Width of a serialized leaf index.
pub const LEAF_INDEX_BYTES: usize = 8;

/// Width of a serialized leaf: value, next value, next index.
pub const LEAF_BYTES: usize = 32 + 32 + LEAF_INDEX_BYTES;

/// Slot number in the tree. Serialized as 8 big-endian bytes; slot 0 is the sentinel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeafIndex(pub u64);

impl LeafIndex {
    pub const SENTINEL: LeafIndex = LeafIndex(0);

    pub fn to_be_bytes(self) -> [u8; LEAF_INDEX_BYTES] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; LEAF_INDEX_BYTES]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl From<u64> for LeafIndex {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl fmt::Display for LeafIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node of the sorted linked list embedded in the tree.
///
/// `next_value == 0` marks the current maximum. The reserved leaf at index 0 starts
/// as all zeros and acts as the sentinel minimum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    pub value: Hash32,
    pub next_value: Hash32,
    pub next_idx: LeafIndex,
}

impl Leaf {
    pub const ZERO: Leaf = Leaf {
        value: [0u8; 32],
        next_value: [0u8; 32],
        next_idx: LeafIndex(0),
    };

    /// `value || next_value || next_idx (BE)`
    pub fn to_bytes(&self) -> [u8; LEAF_BYTES] {
        let mut out = [0u8; LEAF_BYTES];
        out[..32].copy_from_slice(&self.value);
        out[32..64].copy_from_slice(&self.next_value);
        out[64..].copy_from_slice(&self.next_idx.to_be_bytes());
        out
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// Merkle inclusion proof, leaf to root.
///
/// `path_bits[l] == 1` means the running node is the left child at level `l`.
/// The bits are part of the witness and are not re-derived from the leaf index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub siblings: Vec<Hash32>,
    pub path_bits: Vec<u8>,
}

impl MerkleProof {
    /// All-zero proof of the given depth, used to describe circuit shape.
    pub fn placeholder(depth: usize) -> Self {
        Self {
            siblings: vec![[0u8; 32]; depth],
            path_bits: vec![0u8; depth],
        }
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    pub fn check_depth(&self, depth: usize) -> Result<()> {
        if self.siblings.len() != depth || self.path_bits.len() != depth {
            return Err(ImtError::ShapeMismatch(format!(
                "merkle proof has {} siblings and {} path bits, tree depth is {depth}",
                self.siblings.len(),
                self.path_bits.len()
            )));
        }
        Ok(())
    }
}

/// One insertion, as produced by the native tree and consumed by the insertion protocol.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertionWitness {
    pub low_leaf: Leaf,
    pub low_leaf_proof: MerkleProof,
    pub new_leaf: Leaf,
    pub new_leaf_index: LeafIndex,
    pub new_leaf_proof: MerkleProof,
}

impl InsertionWitness {
    pub fn placeholder(depth: usize) -> Self {
        Self {
            low_leaf: Leaf::ZERO,
            low_leaf_proof: MerkleProof::placeholder(depth),
            new_leaf: Leaf::ZERO,
            new_leaf_index: LeafIndex(0),
            new_leaf_proof: MerkleProof::placeholder(depth),
        }
    }

    pub fn check_depth(&self, depth: usize) -> Result<()> {
        self.low_leaf_proof.check_depth(depth)?;
        self.new_leaf_proof.check_depth(depth)
    }
}

/// Everything needed to verify one batch against the previous batch's end state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchWitness {
    /// Root before the batch, as stated by the caller (never the rollover-substituted root).
    pub old_root: Hash32,
    /// Root after the last insertion, as computed natively.
    pub new_root: Hash32,
    /// Low leaf of the previous batch's last insertion, and its proof against `old_root`.
    pub prev_low_leaf: Leaf,
    pub prev_low_leaf_proof: MerkleProof,
    pub insertions: Vec<InsertionWitness>,
}

impl BatchWitness {
    pub fn placeholder(depth: usize, batch_size: usize) -> Self {
        Self {
            old_root: [0u8; 32],
            new_root: [0u8; 32],
            prev_low_leaf: Leaf::ZERO,
            prev_low_leaf_proof: MerkleProof::placeholder(depth),
            insertions: (0..batch_size).map(|_| InsertionWitness::placeholder(depth)).collect(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.insertions.len()
    }

    pub fn check_shape(&self, depth: usize) -> Result<()> {
        if self.insertions.is_empty() {
            return Err(ImtError::ShapeMismatch("batch has no insertions".into()));
        }
        self.prev_low_leaf_proof.check_depth(depth)?;
        for w in &self.insertions {
            w.check_depth(depth)?;
        }
        Ok(())
    }
}

/// Prime-field element carried as 32 big-endian bytes.
///
/// Serialized as a decimal string, the format used for public inputs on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldBytes(pub [u8; 32]);

impl FieldBytes {
    pub const ZERO: FieldBytes = FieldBytes([0u8; 32]);

    pub fn from_u64(v: u64) -> Self {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&v.to_be_bytes());
        Self(out)
    }

    pub fn from_u128(v: u128) -> Self {
        let mut out = [0u8; 32];
        out[16..].copy_from_slice(&v.to_be_bytes());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_decimal(&self) -> String {
        U256::from_be_bytes(self.0).to_string()
    }

    pub fn from_decimal(s: &str) -> Result<Self> {
        let v = U256::from_str_radix(s.trim(), 10)
            .map_err(|e| ImtError::InvalidField(format!("{s:?}: {e}")))?;
        Ok(Self(v.to_be_bytes::<32>()))
    }
}

impl fmt::Display for FieldBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal())
    }
}

impl Serialize for FieldBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for FieldBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FieldBytes::from_decimal(&s).map_err(serde::de::Error::custom)
    }
}
