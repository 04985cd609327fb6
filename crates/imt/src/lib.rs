//! Indexed Merkle Tree accumulator
//!
//! A sorted linked list embedded in a fixed-depth Keccak Merkle tree. Absence of a
//! value is proven by its low leaf, and insertions are grouped into batches that must
//! continue exactly where the previous batch stopped.
//!
//! The insertion and continuity checks are written once against [`Api`] and run both
//! natively (witness construction in [`IndexedMerkleTree`]) and recorded as a circuit.

pub mod api;
pub mod codec;
pub mod continuity;
pub mod insertion;
mod nodestore;
mod tree;
mod types;

pub use api::{Api, Gate, Native, Recorder, Trace, Violation};
pub use nodestore::{InMemoryNodeStore, NodeId, NodeStore};
pub use tree::{root_from_leaves, IndexedMerkleTree, TreeSnapshot, TreeState};
pub use types::{
    BatchWitness, FieldBytes, Hash32, InsertionWitness, Leaf, LeafIndex, MerkleProof, LEAF_BYTES, LEAF_INDEX_BYTES,
};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImtError {
    #[error(transparent)]
    Constraint(#[from] Violation),

    #[error("no low leaf found: linked list is broken")]
    NoLowLeaf,

    #[error("no leaf points at the last inserted slot")]
    MissingAnchor,

    #[error("unsupported tree depth {0}")]
    UnsupportedDepth(usize),

    #[error("capacity exceeded: {batch_size} insertions from slot {next_free} in a tree of {capacity}")]
    CapacityExceeded { next_free: u64, batch_size: usize, capacity: u64 },

    #[error("leaf index {index} out of range for capacity {capacity}")]
    IndexOutOfRange { index: u64, capacity: u64 },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid field element: {0}")]
    InvalidField(String),

    #[error("corrupt tree: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, ImtError>;
