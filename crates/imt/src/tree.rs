use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::Native;
use crate::codec::{self, empty_tree_root};
use crate::continuity::{expected_next_idx_when_full, verify_batch};
use crate::insertion::{compute_root, insert_leaf};
use crate::nodestore::{InMemoryNodeStore, NodeId, NodeStore};
use crate::{BatchWitness, Hash32, ImtError, InsertionWitness, Leaf, LeafIndex, MerkleProof, Result};

/// Where the tree stands relative to a batch size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeState {
    /// Only the sentinel is populated.
    Empty,
    Populated,
    /// The last batch ended on the rollover slot; the next batch restarts from empty.
    Full,
}

/// Populated prefix of a tree, enough to rebuild it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub depth: usize,
    pub next_free: u64,
    pub leaves: Vec<Leaf>,
}

/// Sorted linked list laid over a fixed-depth Merkle tree.
///
/// Leaves live in a flat array; non-default internal nodes live in a [`NodeStore`]
/// and are rebuilt bottom-up along the path of every changed leaf. Mutation goes
/// through [`insert_one`](Self::insert_one) and [`insert_batch`](Self::insert_batch),
/// which work on a copy and only commit once the produced witnesses verify.
#[derive(Clone, Debug)]
pub struct IndexedMerkleTree<N: NodeStore = InMemoryNodeStore> {
    depth: usize,
    leaves: Vec<Leaf>,
    next_free: u64,
    root: Hash32,
    default_hashes: Vec<Hash32>,
    store: N,
}

impl IndexedMerkleTree<InMemoryNodeStore> {
    pub fn new(depth: usize) -> Result<Self> {
        Self::with_store(depth, InMemoryNodeStore::new())
    }

    pub fn from_snapshot(snapshot: &TreeSnapshot) -> Result<Self> {
        Self::restore(snapshot, InMemoryNodeStore::new())
    }
}

impl<N: NodeStore + Clone> IndexedMerkleTree<N> {
    /// Empty tree of `depth` backed by `store`. Any existing content of the store is dropped.
    pub fn with_store(depth: usize, mut store: N) -> Result<Self> {
        let root = empty_tree_root(depth)?;
        store.clear();
        Ok(Self {
            depth,
            leaves: vec![Leaf::ZERO; 1usize << depth],
            next_free: 1,
            root,
            default_hashes: codec::default_hashes(depth),
            store,
        })
    }

    /// Rebuilds a tree from its populated prefix and revalidates it.
    pub fn restore(snapshot: &TreeSnapshot, store: N) -> Result<Self> {
        let mut tree = Self::with_store(snapshot.depth, store)?;
        if snapshot.next_free == 0 || snapshot.next_free > tree.capacity() {
            return Err(ImtError::Corrupt(format!(
                "snapshot next_free {} outside 1..={}",
                snapshot.next_free,
                tree.capacity()
            )));
        }
        if snapshot.leaves.len() as u64 != snapshot.next_free {
            return Err(ImtError::Corrupt(format!(
                "snapshot holds {} leaves, next_free is {}",
                snapshot.leaves.len(),
                snapshot.next_free
            )));
        }
        for (idx, leaf) in snapshot.leaves.iter().enumerate() {
            tree.set_leaf(idx as u64, *leaf);
        }
        tree.next_free = snapshot.next_free;
        tree.check_invariants()?;
        debug!(depth = tree.depth, next_free = tree.next_free, root = %hex::encode(tree.root), "imt: restored");
        Ok(tree)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn root(&self) -> Hash32 {
        self.root
    }

    /// First unused slot.
    pub fn next_free(&self) -> u64 {
        self.next_free
    }

    pub fn leaf(&self, idx: u64) -> Option<&Leaf> {
        self.leaves.get(idx as usize)
    }

    /// Populated leaves, sentinel included.
    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves[..self.next_free as usize]
    }

    pub fn store(&self) -> &N {
        &self.store
    }

    pub fn state(&self, batch_size: usize) -> TreeState {
        if self.next_free <= 1 {
            TreeState::Empty
        } else if self.next_free - 1 == expected_next_idx_when_full(self.depth, batch_size) {
            TreeState::Full
        } else {
            TreeState::Populated
        }
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            depth: self.depth,
            next_free: self.next_free,
            leaves: self.leaves().to_vec(),
        }
    }

    pub fn prove(&self, idx: u64) -> Result<MerkleProof> {
        self.check_index(idx)?;
        let mut proof = MerkleProof { siblings: Vec::with_capacity(self.depth), path_bits: Vec::with_capacity(self.depth) };
        let mut id = NodeId { height: 0, index: idx };
        for _ in 0..self.depth {
            proof.siblings.push(self.get_node_or_default(&id.sibling()));
            proof.path_bits.push(1 - (id.index & 1) as u8);
            id = id.parent();
        }
        Ok(proof)
    }

    /// Checks `leaf` against `root` with the same recombination the circuit uses.
    pub fn verify_proof(leaf: &Leaf, proof: &MerkleProof, root: &Hash32) -> bool {
        compute_root(&mut Native, codec::leaf_hash(leaf), proof)
            .map(|computed| computed == *root)
            .unwrap_or(false)
    }

    /// Index of the populated leaf `L` with `L.value < value` and
    /// (`L.next_value == 0` or `value <= L.next_value`).
    ///
    /// A `value` already in the list yields its predecessor; the insertion
    /// check then rejects it.
    pub fn find_low(&self, value: &Hash32) -> Result<LeafIndex> {
        let mut idx = 0u64;
        for _ in 0..self.next_free {
            let leaf = &self.leaves[idx as usize];
            if leaf.next_value == [0u8; 32] || leaf.next_value >= *value {
                return Ok(LeafIndex(idx));
            }
            let next = leaf.next_idx.0;
            if next == 0 || next >= self.next_free {
                return Err(ImtError::NoLowLeaf);
            }
            idx = next;
        }
        Err(ImtError::NoLowLeaf)
    }

    /// Inserts one value and returns its witness. The tree is unchanged on error.
    pub fn insert_one(&mut self, value: Hash32) -> Result<InsertionWitness> {
        let mut next = self.clone();
        let witness = next.apply_insert(value)?;
        *self = next;
        Ok(witness)
    }

    /// Inserts `values` in order and returns the batch witness, verified against the
    /// continuity protocol before the tree is updated. The tree is unchanged on error.
    pub fn insert_batch(&mut self, values: &[Hash32]) -> Result<BatchWitness> {
        if values.is_empty() {
            return Err(ImtError::ShapeMismatch("batch has no insertions".into()));
        }
        let mut next = self.clone();
        let batch = next.apply_batch(values)?;

        let verified = verify_batch(&mut Native, self.depth, &batch)?;
        if verified != next.root {
            return Err(ImtError::Corrupt(format!(
                "batch verified to {} but tree root is {}",
                hex::encode(verified),
                hex::encode(next.root)
            )));
        }
        *self = next;
        debug!(
            batch = values.len(),
            next_free = self.next_free,
            root = %hex::encode(self.root),
            "imt: batch committed"
        );
        Ok(batch)
    }

    /// Re-derives every invariant from the leaf array: the zero sentinel, list order,
    /// reachability, unused slots left zero and the stored root.
    pub fn check_invariants(&self) -> Result<()> {
        if self.leaves[0].value != [0u8; 32] {
            return Err(ImtError::Corrupt("leaf 0 is not the zero sentinel".into()));
        }
        let populated = self.next_free as usize;
        let mut seen = vec![false; populated];
        seen[0] = true;

        let mut idx = 0usize;
        let mut steps = 1usize;
        loop {
            let leaf = &self.leaves[idx];
            if leaf.next_value == [0u8; 32] {
                if leaf.next_idx.0 != 0 {
                    return Err(ImtError::Corrupt(format!("leaf {idx} ends the list but points at {}", leaf.next_idx)));
                }
                break;
            }
            let next = leaf.next_idx.0 as usize;
            if next == 0 || next >= populated || seen[next] {
                return Err(ImtError::Corrupt(format!("leaf {idx} points at invalid slot {next}")));
            }
            let successor = &self.leaves[next];
            if successor.value != leaf.next_value || leaf.value >= leaf.next_value {
                return Err(ImtError::Corrupt(format!("leaf {idx} breaks the sorted order")));
            }
            seen[next] = true;
            steps += 1;
            idx = next;
        }
        if steps != populated {
            return Err(ImtError::Corrupt(format!("{steps} of {populated} populated leaves reachable")));
        }
        if self.leaves[populated..].iter().any(|l| !l.is_zero()) {
            return Err(ImtError::Corrupt("unused slot holds data".into()));
        }
        let recomputed = root_from_leaves(&self.leaves);
        if recomputed != self.root {
            return Err(ImtError::Corrupt("stored root does not match leaves".into()));
        }
        Ok(())
    }

    fn apply_insert(&mut self, value: Hash32) -> Result<InsertionWitness> {
        let new_index = self.next_free;
        if new_index >= self.capacity() {
            return Err(ImtError::CapacityExceeded {
                next_free: self.next_free,
                batch_size: 1,
                capacity: self.capacity(),
            });
        }
        let old_root = self.root;
        let low_idx = self.find_low(&value)?.0;
        let low_leaf = self.leaves[low_idx as usize];
        let low_leaf_proof = self.prove(low_idx)?;

        let new_leaf = Leaf {
            value,
            next_value: low_leaf.next_value,
            next_idx: low_leaf.next_idx,
        };
        let updated_low = Leaf {
            value: low_leaf.value,
            next_value: value,
            next_idx: LeafIndex(new_index),
        };
        self.set_leaf(low_idx, updated_low);
        // taken before the new leaf exists, so its slot still hashes to the zero leaf
        let new_leaf_proof = self.prove(new_index)?;
        self.set_leaf(new_index, new_leaf);
        self.next_free += 1;

        let witness = InsertionWitness {
            low_leaf,
            low_leaf_proof,
            new_leaf,
            new_leaf_index: LeafIndex(new_index),
            new_leaf_proof,
        };
        let checked = insert_leaf(&mut Native, &old_root, &witness)?;
        if checked != self.root {
            return Err(ImtError::Corrupt(format!("insertion at slot {new_index} diverged from tree root")));
        }
        debug!(index = new_index, low = low_idx, root = %hex::encode(self.root), "imt: inserted");
        Ok(witness)
    }

    fn apply_batch(&mut self, values: &[Hash32]) -> Result<BatchWitness> {
        let batch_size = values.len();
        let anchor_idx = self.anchor_index()?;
        let prev_low_leaf = self.leaves[anchor_idx as usize];
        let prev_low_leaf_proof = self.prove(anchor_idx)?;
        let old_root = self.root;

        if self.next_free > 1 && prev_low_leaf.next_idx.0 == expected_next_idx_when_full(self.depth, batch_size) {
            debug!(depth = self.depth, batch = batch_size, "imt: tree full, restarting from empty");
            self.reset();
        } else if self.next_free + batch_size as u64 > self.capacity() {
            return Err(ImtError::CapacityExceeded {
                next_free: self.next_free,
                batch_size,
                capacity: self.capacity(),
            });
        }

        let insertions = values
            .iter()
            .map(|v| self.apply_insert(*v))
            .collect::<Result<Vec<_>>>()?;

        Ok(BatchWitness {
            old_root,
            new_root: self.root,
            prev_low_leaf,
            prev_low_leaf_proof,
            insertions,
        })
    }

    /// Low leaf of the previous batch's last insertion, or the sentinel in an empty tree.
    fn anchor_index(&self) -> Result<u64> {
        if self.next_free <= 1 {
            return Ok(0);
        }
        let last = self.next_free - 1;
        self.leaves[..self.next_free as usize]
            .iter()
            .position(|l| l.next_idx.0 == last)
            .map(|p| p as u64)
            .ok_or(ImtError::MissingAnchor)
    }

    fn reset(&mut self) {
        self.leaves.iter_mut().for_each(|l| *l = Leaf::ZERO);
        self.store.clear();
        self.next_free = 1;
        self.root = self.default_hashes[self.depth];
    }

    fn check_index(&self, idx: u64) -> Result<()> {
        if idx >= self.capacity() {
            return Err(ImtError::IndexOutOfRange { index: idx, capacity: self.capacity() });
        }
        Ok(())
    }

    fn set_leaf(&mut self, idx: u64, leaf: Leaf) {
        self.leaves[idx as usize] = leaf;

        let mut id = NodeId { height: 0, index: idx };
        let mut current = codec::leaf_hash(&leaf);
        self.put_node(id, current);

        for _ in 0..self.depth {
            let sibling = self.get_node_or_default(&id.sibling());
            current = if id.index & 1 == 1 {
                codec::node_hash(&sibling, &current)
            } else {
                codec::node_hash(&current, &sibling)
            };
            id = id.parent();
            self.put_node(id, current);
        }
        self.root = current;
    }

    fn put_node(&mut self, id: NodeId, hash: Hash32) {
        if hash == self.default_hashes[id.height as usize] {
            self.store.remove(&id);
        } else {
            self.store.insert(id, hash);
        }
    }

    fn get_node_or_default(&self, id: &NodeId) -> Hash32 {
        self.store.get(id).unwrap_or(self.default_hashes[id.height as usize])
    }
}

/// Root over a full leaf array, computed level by level without a node store.
pub fn root_from_leaves(leaves: &[Leaf]) -> Hash32 {
    let mut level: Vec<Hash32> = leaves.iter().map(codec::leaf_hash).collect();
    while level.len() > 1 {
        level = level.chunks(2).map(|pair| codec::node_hash(&pair[0], &pair[1])).collect();
    }
    level.first().copied().unwrap_or(codec::ZERO_LEAF_HASH)
}
