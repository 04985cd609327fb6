use imt::codec::{empty_tree_root, leaf_hash};
use imt::continuity::verify_batch;
use imt::{
    root_from_leaves, Hash32, ImtError, IndexedMerkleTree, Leaf, LeafIndex, Native, Recorder, TreeSnapshot, TreeState,
    Violation,
};
use rand::seq::SliceRandom;
use rand::Rng;

fn value(n: u64) -> Hash32 {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&n.to_be_bytes());
    out
}

fn full_leaves(tree: &IndexedMerkleTree) -> Vec<Leaf> {
    let mut leaves = tree.leaves().to_vec();
    leaves.resize(tree.capacity() as usize, Leaf::ZERO);
    leaves
}

#[test]
fn test_concrete_scenario() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let r0 = tree.root();
    assert_eq!(r0, empty_tree_root(9).unwrap());

    let batch = tree.insert_batch(&[value(5555), value(7777)]).unwrap();
    assert_eq!(batch.old_root, r0);
    assert_eq!(batch.new_root, tree.root());

    let first = &batch.insertions[0];
    assert_eq!(first.low_leaf, Leaf::ZERO);
    assert_eq!(first.new_leaf_index, LeafIndex(1));
    assert_eq!(first.new_leaf, Leaf { value: value(5555), next_value: [0u8; 32], next_idx: LeafIndex(0) });

    let second = &batch.insertions[1];
    assert_eq!(second.low_leaf, Leaf { value: value(5555), next_value: [0u8; 32], next_idx: LeafIndex(0) });
    assert_eq!(second.new_leaf_index, LeafIndex(2));

    assert_eq!(tree.leaf(0), Some(&Leaf { value: [0u8; 32], next_value: value(5555), next_idx: LeafIndex(1) }));
    assert_eq!(tree.leaf(1), Some(&Leaf { value: value(5555), next_value: value(7777), next_idx: LeafIndex(2) }));
    assert_eq!(tree.leaf(2), Some(&Leaf { value: value(7777), next_value: [0u8; 32], next_idx: LeafIndex(0) }));

    assert_eq!(root_from_leaves(&full_leaves(&tree)), tree.root());
    assert_eq!(
        hex::encode(tree.root()),
        "8d6fc4b1132df309f8a7a021c3541be569d486b42af93b9bf732e3d062e8ef6b"
    );
}

#[test]
fn test_intermediate_root_after_first_insertion() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    tree.insert_one(value(5555)).unwrap();
    let expected: Hash32 = [
        226, 36, 215, 90, 23, 236, 252, 84, 181, 111, 206, 137, 205, 169, 24, 242, 76, 52, 59, 236, 19, 8, 169, 165,
        149, 77, 111, 102, 115, 192, 171, 218,
    ];
    assert_eq!(tree.root(), expected);
}

#[test]
fn test_leaf_hash_reference_vector() {
    let leaf = Leaf { value: value(10), next_value: value(11), next_idx: LeafIndex(22) };
    assert_eq!(
        hex::encode(leaf_hash(&leaf)),
        "9e7eae6a4b1390a212858dd3e9e0c5568623020cd73d2acc0bc40cc19098dede"
    );
}

#[test]
fn test_random_order_keeps_list_sorted() {
    let mut rng = rand::thread_rng();
    let mut values: Vec<Hash32> = (0..120).map(|_| rng.gen::<[u8; 32]>()).filter(|v| *v != [0u8; 32]).collect();
    values.sort();
    values.dedup();
    values.shuffle(&mut rng);

    let mut tree = IndexedMerkleTree::new(10).unwrap();
    for chunk in values.chunks(4) {
        let batch = tree.insert_batch(chunk).unwrap();
        for w in &batch.insertions {
            assert!(IndexedMerkleTree::<imt::InMemoryNodeStore>::verify_proof(
                &tree.leaves()[w.new_leaf_index.0 as usize],
                &tree.prove(w.new_leaf_index.0).unwrap(),
                &tree.root()
            ));
        }
    }
    tree.check_invariants().unwrap();
    assert_eq!(root_from_leaves(&full_leaves(&tree)), tree.root());

    // walking the list from the sentinel yields every value in ascending order
    let mut walked = Vec::new();
    let mut leaf = tree.leaf(0).copied().unwrap();
    while leaf.next_value != [0u8; 32] {
        walked.push(leaf.next_value);
        leaf = tree.leaf(leaf.next_idx.0).copied().unwrap();
    }
    values.sort();
    assert_eq!(walked, values);
}

#[test]
fn test_duplicate_value_rejected() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    tree.insert_batch(&[value(5555), value(7777)]).unwrap();
    let root = tree.root();

    let err = tree.insert_batch(&[value(6000), value(7777)]).unwrap_err();
    assert_eq!(err, ImtError::Constraint(Violation::NonMembership));
    // no partial commit
    assert_eq!(tree.root(), root);
    assert_eq!(tree.next_free(), 3);
}

#[test]
fn test_zero_value_rejected() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    assert_eq!(tree.insert_one([0u8; 32]).unwrap_err(), ImtError::Constraint(Violation::NonMembership));
}

#[test]
fn test_empty_batch_rejected() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    assert!(matches!(tree.insert_batch(&[]), Err(ImtError::ShapeMismatch(_))));
}

#[test]
fn test_consecutive_batches_chain() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let b1 = tree.insert_batch(&[value(1), value(2)]).unwrap();
    let b2 = tree.insert_batch(&[value(3), value(4)]).unwrap();
    assert_eq!(b2.old_root, b1.new_root);

    // anchor of batch 2 is the low leaf of slot 2 after batch 1
    assert_eq!(b2.prev_low_leaf.next_idx, LeafIndex(2));
    assert_eq!(b2.insertions[0].new_leaf_index, LeafIndex(3));

    let mut rec = Recorder::new();
    assert_eq!(verify_batch(&mut rec, 9, &b2).unwrap(), b2.new_root);
    assert_eq!(rec.finish().1, None);
}

#[test]
fn test_stale_anchor_is_continuity_violation() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    tree.insert_batch(&[value(1)]).unwrap();
    let b2 = tree.insert_batch(&[value(2)]).unwrap();
    let mut b3 = tree.insert_batch(&[value(3)]).unwrap();

    // every insertion in b3 is individually valid; only the anchor is stale
    b3.prev_low_leaf = b2.prev_low_leaf;
    b3.prev_low_leaf_proof = b2.prev_low_leaf_proof.clone();
    assert_eq!(
        verify_batch(&mut Native, 9, &b3).unwrap_err(),
        ImtError::Constraint(Violation::Continuity)
    );

    let mut rec = Recorder::new();
    verify_batch(&mut rec, 9, &b3).unwrap();
    assert_eq!(rec.finish().1, Some(Violation::Continuity));
}

#[test]
fn test_index_gap_is_continuity_violation() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    tree.insert_batch(&[value(1), value(2)]).unwrap();
    let mut b2 = tree.insert_batch(&[value(3), value(4)]).unwrap();
    b2.insertions.swap(0, 1);
    assert_eq!(
        verify_batch(&mut Native, 9, &b2).unwrap_err(),
        ImtError::Constraint(Violation::Continuity)
    );
}

#[test]
fn test_rollover_restarts_from_empty() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let mut n = 1u64;
    // 63 batches of 8 fill slots 1..=504, the rollover slot for batch size 8
    for _ in 0..63 {
        let chunk: Vec<Hash32> = (n..n + 8).map(value).collect();
        tree.insert_batch(&chunk).unwrap();
        n += 8;
    }
    assert_eq!(tree.next_free(), 505);
    assert_eq!(tree.state(8), TreeState::Full);
    let full_root = tree.root();

    // values may repeat: the accumulator starts over
    let again: Vec<Hash32> = (1..9).map(value).collect();
    let batch = tree.insert_batch(&again).unwrap();
    assert_eq!(batch.old_root, full_root);
    assert_eq!(batch.prev_low_leaf.next_idx, LeafIndex(504));
    assert_eq!(batch.insertions[0].new_leaf_index, LeafIndex(1));
    assert_eq!(tree.next_free(), 9);
    assert_eq!(tree.state(8), TreeState::Populated);

    let mut fresh = IndexedMerkleTree::new(9).unwrap();
    fresh.insert_batch(&again).unwrap();
    assert_eq!(tree.root(), fresh.root());
    assert_eq!(verify_batch(&mut Native, 9, &batch).unwrap(), fresh.root());
}

#[test]
fn test_capacity_exceeded() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let mut n = 1u64;
    for _ in 0..63 {
        let chunk: Vec<Hash32> = (n..n + 8).map(value).collect();
        tree.insert_batch(&chunk).unwrap();
        n += 8;
    }
    let root = tree.root();
    // not the rollover slot for batch size 10, and 505 + 10 > 512
    let chunk: Vec<Hash32> = (n..n + 10).map(value).collect();
    assert_eq!(
        tree.insert_batch(&chunk).unwrap_err(),
        ImtError::CapacityExceeded { next_free: 505, batch_size: 10, capacity: 512 }
    );
    assert_eq!(tree.root(), root);
}

#[test]
fn test_snapshot_round_trip() {
    let mut tree = IndexedMerkleTree::new(10).unwrap();
    tree.insert_batch(&[value(40), value(10), value(30)]).unwrap();

    let bytes = bincode::serialize(&tree.snapshot()).unwrap();
    let snapshot: TreeSnapshot = bincode::deserialize(&bytes).unwrap();
    let mut restored = IndexedMerkleTree::from_snapshot(&snapshot).unwrap();
    assert_eq!(restored.root(), tree.root());

    let a = tree.insert_batch(&[value(20), value(50)]).unwrap();
    let b = restored.insert_batch(&[value(20), value(50)]).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_corrupt_snapshot_rejected() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    tree.insert_batch(&[value(10), value(20), value(30)]).unwrap();

    let mut snapshot = tree.snapshot();
    snapshot.leaves.swap(1, 2);
    assert!(matches!(IndexedMerkleTree::from_snapshot(&snapshot), Err(ImtError::Corrupt(_))));

    let mut snapshot = tree.snapshot();
    snapshot.next_free = 7;
    assert!(matches!(IndexedMerkleTree::from_snapshot(&snapshot), Err(ImtError::Corrupt(_))));

    // still sorted and fully linked, but the list no longer starts at zero
    let mut snapshot = tree.snapshot();
    snapshot.leaves[0].value = value(5);
    assert!(matches!(IndexedMerkleTree::from_snapshot(&snapshot), Err(ImtError::Corrupt(_))));
}

#[test]
fn test_batch_trace_depends_only_on_shape() {
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let fresh = tree.insert_batch(&[value(5), value(6), value(7)]).unwrap();
    let later = tree.insert_batch(&[value(1), value(9), value(8)]).unwrap();
    let placeholder = imt::BatchWitness::placeholder(9, 3);

    let trace_of = |w: &imt::BatchWitness| {
        let mut rec = Recorder::new();
        verify_batch(&mut rec, 9, w).unwrap();
        rec.finish()
    };
    let (t1, v1) = trace_of(&fresh);
    let (t2, v2) = trace_of(&later);
    let (t3, v3) = trace_of(&placeholder);
    assert_eq!((v1, v2), (None, None));
    assert!(v3.is_some());
    assert_eq!(t1.digest(), t2.digest());
    assert_eq!(t1, t3);
}
