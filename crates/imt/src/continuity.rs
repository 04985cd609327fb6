//! Batch continuity protocol.
//!
//! A batch must pick up exactly where the previous one stopped: its first new slot
//! follows the slot of the previous batch's last insertion, consecutive insertions
//! use consecutive slots, and the anchor (low leaf of the previous batch's last
//! insertion) must be part of the stated old root.
//!
//! Once the tree has no room left for another batch of the same size, the anchor's
//! `next_idx` equals [`expected_next_idx_when_full`] and the batch is verified as if
//! it started from the empty tree, while the anchor is still checked against the
//! literal old root.

use crate::api::{Api, Violation};
use crate::codec::empty_tree_root;
use crate::insertion::{insert_leaf, leaf_hash, verify_inclusion};
use crate::{BatchWitness, Hash32, Leaf, LeafIndex, MerkleProof, Result};

/// Slot of the last insertion once a tree of `depth` is full for `batch_size`.
pub fn expected_next_idx_when_full(depth: usize, batch_size: usize) -> u64 {
    let capacity = 1u64 << depth;
    let batch = batch_size as u64;
    let rem = capacity.checked_rem(batch).unwrap_or(0);
    capacity - if rem == 0 { batch.min(capacity) } else { rem }
}

/// `old_root`, or the empty-tree root when the anchor marks a full tree.
pub fn revised_old_root<A: Api>(
    api: &mut A,
    depth: usize,
    batch_size: usize,
    prev_low_leaf: &Leaf,
    old_root: &Hash32,
) -> Result<Hash32> {
    let empty_root = empty_tree_root(depth)?;
    let full_at = LeafIndex(expected_next_idx_when_full(depth, batch_size)).to_be_bytes();
    let is_full = api.is_equal(&full_at, &prev_low_leaf.next_idx.to_be_bytes());
    Ok(api.select(is_full, &empty_root, old_root))
}

/// Slot of the previous batch's last insertion; 0 for a fresh tree.
pub fn prev_batch_last_idx<A: Api>(
    api: &mut A,
    prev_low_leaf: &Leaf,
    revised_root: &Hash32,
    empty_root: &Hash32,
) -> LeafIndex {
    let fresh = api.is_equal(revised_root, empty_root);
    let idx = api.select(fresh, &[0u8; 8], &prev_low_leaf.next_idx.to_be_bytes());
    LeafIndex::from_be_bytes(idx)
}

/// `cur == prev + 1`
pub fn constrain_index_continuity<A: Api>(api: &mut A, prev: LeafIndex, cur: LeafIndex) -> std::result::Result<(), Violation> {
    let expected = prev.next().to_be_bytes();
    let consecutive = api.is_equal(&expected, &cur.to_be_bytes());
    api.assert(consecutive, Violation::Continuity)
}

/// The anchor must be a leaf of the caller-stated old root.
pub fn verify_anchor<A: Api>(
    api: &mut A,
    prev_low_leaf: &Leaf,
    prev_low_leaf_proof: &MerkleProof,
    old_root: &Hash32,
) -> std::result::Result<(), Violation> {
    let anchor_hash = leaf_hash(api, prev_low_leaf);
    verify_inclusion(api, anchor_hash, prev_low_leaf_proof, old_root, Violation::Continuity)
}

/// Verifies every insertion of `batch` in order and returns the final root.
pub fn verify_batch<A: Api>(api: &mut A, depth: usize, batch: &BatchWitness) -> Result<Hash32> {
    batch.check_shape(depth)?;
    let empty_root = empty_tree_root(depth)?;

    let start_root = revised_old_root(api, depth, batch.batch_size(), &batch.prev_low_leaf, &batch.old_root)?;
    let mut prev_idx = prev_batch_last_idx(api, &batch.prev_low_leaf, &start_root, &empty_root);
    verify_anchor(api, &batch.prev_low_leaf, &batch.prev_low_leaf_proof, &batch.old_root)?;

    let mut root = start_root;
    for w in &batch.insertions {
        constrain_index_continuity(api, prev_idx, w.new_leaf_index)?;
        prev_idx = w.new_leaf_index;
        root = insert_leaf(api, &root, w)?;
    }
    Ok(root)
}
