//! Leaf insertion protocol.
//!
//! `insert_leaf` proves that a value is absent (it sits strictly between a low leaf
//! and that leaf's successor), links it in after the low leaf, places it in an unused
//! slot, and returns the resulting root. It runs unchanged under [`Native`](crate::Native)
//! to self-check freshly built witnesses and under [`Recorder`](crate::Recorder) as the
//! circuit.

use crate::api::{Api, Violation};
use crate::codec::ZERO_LEAF_HASH;
use crate::{Hash32, InsertionWitness, Leaf, MerkleProof};

pub fn leaf_hash<A: Api>(api: &mut A, leaf: &Leaf) -> Hash32 {
    api.keccak(&leaf.to_bytes())
}

/// Folds a leaf hash up to the root. A path bit of 1 hashes `(node, sibling)`,
/// a path bit of 0 hashes `(sibling, node)`.
pub fn compute_root<A: Api>(api: &mut A, leaf_hash: Hash32, proof: &MerkleProof) -> Result<Hash32, Violation> {
    let mut current = leaf_hash;
    for (sibling, bit) in proof.siblings.iter().zip(&proof.path_bits) {
        api.assert(*bit <= 1, Violation::Inclusion)?;
        let node_is_left = *bit == 1;
        let left = api.select(node_is_left, &current, sibling);
        let right = api.select(node_is_left, sibling, &current);
        let mut pair = [0u8; 64];
        pair[..32].copy_from_slice(&left);
        pair[32..].copy_from_slice(&right);
        current = api.keccak(&pair);
    }
    Ok(current)
}

/// Asserts that `leaf_hash` sits under `root`, reporting `violation` otherwise.
pub fn verify_inclusion<A: Api>(
    api: &mut A,
    leaf_hash: Hash32,
    proof: &MerkleProof,
    root: &Hash32,
    violation: Violation,
) -> Result<(), Violation> {
    let computed = compute_root(api, leaf_hash, proof)?;
    let matches = api.is_equal(&computed, root);
    api.assert(matches, violation)
}

/// `low_leaf` is in the tree and `value` lies strictly between it and its successor.
pub fn verify_non_membership<A: Api>(
    api: &mut A,
    root: &Hash32,
    low_leaf: &Leaf,
    low_leaf_proof: &MerkleProof,
    value: &Hash32,
) -> Result<(), Violation> {
    let low_hash = leaf_hash(api, low_leaf);
    verify_inclusion(api, low_hash, low_leaf_proof, root, Violation::Inclusion)?;

    let above_low = api.is_greater(value, &low_leaf.value);
    api.assert(above_low, Violation::NonMembership)?;

    // successor bound applies unless the low leaf is the current maximum
    let low_is_max = api.is_zero(&low_leaf.next_value);
    let below_next = api.is_greater(&low_leaf.next_value, value);
    api.assert(low_is_max | below_next, Violation::NonMembership)
}

/// Verifies one insertion against `old_root` and returns the new root.
pub fn insert_leaf<A: Api>(api: &mut A, old_root: &Hash32, w: &InsertionWitness) -> Result<Hash32, Violation> {
    verify_non_membership(api, old_root, &w.low_leaf, &w.low_leaf_proof, &w.new_leaf.value)?;

    let updated_low = Leaf {
        value: w.low_leaf.value,
        next_value: w.new_leaf.value,
        next_idx: w.new_leaf_index,
    };
    let updated_low_hash = leaf_hash(api, &updated_low);
    let interim_root = compute_root(api, updated_low_hash, &w.low_leaf_proof)?;

    // the new slot must still be unused once the low leaf points at it
    verify_inclusion(api, ZERO_LEAF_HASH, &w.new_leaf_proof, &interim_root, Violation::Inclusion)?;

    let same_next_value = api.is_equal(&w.new_leaf.next_value, &w.low_leaf.next_value);
    api.assert(same_next_value, Violation::PointerInheritance)?;
    let same_next_idx = api.is_equal(&w.new_leaf.next_idx.to_be_bytes(), &w.low_leaf.next_idx.to_be_bytes());
    api.assert(same_next_idx, Violation::PointerInheritance)?;

    let new_hash = leaf_hash(api, &w.new_leaf);
    compute_root(api, new_hash, &w.new_leaf_proof)
}
