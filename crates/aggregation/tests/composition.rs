use aggregation::{
    aggregate_public_inputs, combined_vk_hash, imt_public_inputs, leaf_value, pis_identity, protocol_vk_identity,
    reduction_vk_identity, AggregationError, AggregatorCircuit, Circuit, ConstraintSystem, DevBackend, ImtCircuit,
    Proof, ProvingBackend, ProvingKey, ReductionCircuit, ReductionResult, VerifyingKey,
};
use imt::codec::{compress_to_fields, keccak};
use imt::{FieldBytes, Hash32, IndexedMerkleTree, Native, Violation};

struct Keys {
    cs: ConstraintSystem,
    pk: ProvingKey,
    vk: VerifyingKey,
}

fn keys<C: Circuit>(backend: &DevBackend, placeholder: &C) -> Keys {
    let cs = backend.compile(placeholder).unwrap();
    let (pk, vk) = backend.setup(&cs).unwrap();
    Keys { cs, pk, vk }
}

struct Protocol {
    vk: VerifyingKey,
    proof: Proof,
    pis: Vec<FieldBytes>,
}

fn protocols(backend: &DevBackend, arities: &[usize]) -> Vec<Protocol> {
    arities
        .iter()
        .enumerate()
        .map(|(i, arity)| {
            let vk = backend.protocol_key(&format!("protocol-{i}"), *arity, 0);
            let pis: Vec<FieldBytes> = (0..*arity as u64).map(|j| FieldBytes::from_u64(100 * i as u64 + j)).collect();
            let proof = backend.protocol_proof(&vk, &pis).unwrap();
            Protocol { vk, proof, pis }
        })
        .collect()
}

struct Pipeline {
    backend: DevBackend,
    reduction: Keys,
    imt: Keys,
    agg: Keys,
}

impl Pipeline {
    fn new(depth: usize, batch: usize) -> Self {
        let backend = DevBackend::new();
        Self {
            reduction: keys(&backend, &ReductionCircuit::placeholder(0)),
            imt: keys(&backend, &ImtCircuit::placeholder(depth, batch)),
            agg: keys(&backend, &AggregatorCircuit::placeholder(batch)),
            backend,
        }
    }

    /// Proves every stage and returns the aggregator witness.
    fn run(&self, tree: &mut IndexedMerkleTree, protocols: &[Protocol]) -> AggregatorCircuit {
        let reduction_vk_hash = reduction_vk_identity(&self.reduction.vk).unwrap();
        let vk_hashes: Vec<Hash32> = protocols.iter().map(|p| protocol_vk_identity(&p.vk).unwrap()).collect();
        let pis_hashes: Vec<Hash32> = protocols.iter().map(|p| pis_identity(&p.pis).unwrap()).collect();
        let combined: Vec<Hash32> = vk_hashes.iter().map(|h| combined_vk_hash(h, &reduction_vk_hash)).collect();

        let reductions = protocols
            .iter()
            .map(|p| {
                let circuit = ReductionCircuit::new(p.vk.clone(), p.proof.clone(), p.pis.clone()).unwrap();
                let (proof, public) = self.backend.prove(&self.reduction.cs, &self.reduction.pk, &circuit).unwrap();
                ReductionResult { proof, public: [public[0], public[1]] }
            })
            .collect();

        let leaves: Vec<Hash32> = combined.iter().zip(&pis_hashes).map(|(c, p)| leaf_value(c, p)).collect();
        let batch = tree.insert_batch(&leaves).unwrap();
        let (old_root, new_root) = (batch.old_root, batch.new_root);
        let imt_circuit = ImtCircuit::from_batch(tree.depth(), combined, pis_hashes.clone(), batch).unwrap();
        let (imt_proof, imt_public) = self.backend.prove(&self.imt.cs, &self.imt.pk, &imt_circuit).unwrap();

        AggregatorCircuit::new(
            vk_hashes,
            pis_hashes,
            self.reduction.vk.clone(),
            reductions,
            self.imt.vk.clone(),
            imt_proof,
            [imt_public[0], imt_public[1]],
            old_root,
            new_root,
        )
        .unwrap()
    }
}

#[test]
fn test_end_to_end_aggregate_verifies() {
    let pipeline = Pipeline::new(9, 2);
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let agg = pipeline.run(&mut tree, &protocols(&pipeline.backend, &[1, 3]));

    let (proof, public) = pipeline.backend.prove(&pipeline.agg.cs, &pipeline.agg.pk, &agg).unwrap();
    assert_eq!(public.len(), 2);
    assert!(pipeline.backend.verify(&proof, &pipeline.agg.vk, &public).unwrap());
}

#[test]
fn test_aggregate_public_input_formula() {
    let pipeline = Pipeline::new(9, 2);
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let r0 = tree.root();
    let protos = protocols(&pipeline.backend, &[2, 5]);
    let agg = pipeline.run(&mut tree, &protos);

    let reduction_vk_hash = reduction_vk_identity(&pipeline.reduction.vk).unwrap();
    let c0 = combined_vk_hash(&protocol_vk_identity(&protos[0].vk).unwrap(), &reduction_vk_hash);
    let c1 = combined_vk_hash(&protocol_vk_identity(&protos[1].vk).unwrap(), &reduction_vk_hash);
    let p0 = pis_identity(&protos[0].pis).unwrap();
    let p1 = pis_identity(&protos[1].pis).unwrap();

    let mut data = Vec::new();
    for h in [&c0, &p0, &c1, &p1, &r0] {
        data.extend_from_slice(h);
    }
    data.extend_from_slice(&tree.root());
    assert_eq!(agg.imt_public, compress_to_fields(&keccak(&data)));
    assert_eq!(agg.imt_public, imt_public_inputs(&[c0, c1], &[p0, p1], &r0, &tree.root()).unwrap());

    data.extend_from_slice(&reduction_vk_identity(&pipeline.imt.vk).unwrap());
    assert_eq!(agg.public, compress_to_fields(&keccak(&data)));
    assert_eq!(
        agg.public,
        aggregate_public_inputs(
            &[c0, c1],
            &[p0, p1],
            &r0,
            &tree.root(),
            &reduction_vk_identity(&pipeline.imt.vk).unwrap()
        )
        .unwrap()
    );
}

#[test]
fn test_consecutive_batches_aggregate() {
    let pipeline = Pipeline::new(9, 2);
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let first = pipeline.run(&mut tree, &protocols(&pipeline.backend, &[1, 2]));

    let mut second_protocols = protocols(&pipeline.backend, &[4, 4]);
    second_protocols[0].pis[0] = FieldBytes::from_u64(999);
    second_protocols[0].proof =
        pipeline.backend.protocol_proof(&second_protocols[0].vk, &second_protocols[0].pis).unwrap();
    let second = pipeline.run(&mut tree, &second_protocols);

    assert_eq!(second.old_root, first.new_root);
    second.define(&mut Native, &pipeline.backend).unwrap();
}

#[test]
fn test_resubmitted_identity_rejected_by_tree() {
    let pipeline = Pipeline::new(9, 2);
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let protos = protocols(&pipeline.backend, &[1, 2]);
    pipeline.run(&mut tree, &protos);

    let reduction_vk_hash = reduction_vk_identity(&pipeline.reduction.vk).unwrap();
    let leaves: Vec<Hash32> = protos
        .iter()
        .map(|p| {
            let c = combined_vk_hash(&protocol_vk_identity(&p.vk).unwrap(), &reduction_vk_hash);
            leaf_value(&c, &pis_identity(&p.pis).unwrap())
        })
        .collect();
    assert_eq!(
        tree.insert_batch(&leaves).unwrap_err(),
        imt::ImtError::Constraint(Violation::NonMembership)
    );
}

#[test]
fn test_swapped_pis_hash_is_composition_mismatch() {
    let pipeline = Pipeline::new(9, 2);
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let mut agg = pipeline.run(&mut tree, &protocols(&pipeline.backend, &[1, 3]));
    agg.protocol_pis_hashes.swap(0, 1);
    assert_eq!(
        agg.define(&mut Native, &pipeline.backend),
        Err(AggregationError::Constraint(Violation::Composition))
    );
}

#[test]
fn test_stated_old_root_is_bound() {
    let pipeline = Pipeline::new(9, 2);
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let mut agg = pipeline.run(&mut tree, &protocols(&pipeline.backend, &[1, 3]));
    agg.old_root[0] ^= 1;
    assert_eq!(
        agg.define(&mut Native, &pipeline.backend),
        Err(AggregationError::Constraint(Violation::Composition))
    );
}

#[test]
fn test_foreign_imt_key_fails_pairing() {
    let pipeline = Pipeline::new(9, 2);
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let mut agg = pipeline.run(&mut tree, &protocols(&pipeline.backend, &[1, 3]));
    agg.imt_vk = pipeline.agg.vk.clone();
    assert_eq!(
        agg.define(&mut Native, &pipeline.backend),
        Err(AggregationError::Constraint(Violation::PairingVerification))
    );
}

#[test]
fn test_unequal_lengths_are_shape_mismatch() {
    let pipeline = Pipeline::new(9, 2);
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let agg = pipeline.run(&mut tree, &protocols(&pipeline.backend, &[1, 3]));

    let err = AggregatorCircuit::new(
        agg.protocol_vk_hashes.clone(),
        agg.protocol_pis_hashes[..1].to_vec(),
        agg.reduction_vk.clone(),
        agg.reductions.clone(),
        agg.imt_vk.clone(),
        agg.imt_proof.clone(),
        agg.imt_public,
        agg.old_root,
        agg.new_root,
    )
    .unwrap_err();
    assert!(matches!(err, AggregationError::ShapeMismatch(_)));

    let mut short = agg.clone();
    short.reductions.pop();
    assert!(matches!(short.define(&mut Native, &pipeline.backend), Err(AggregationError::ShapeMismatch(_))));
}

#[test]
fn test_tampered_witness_cannot_be_proved() {
    let pipeline = Pipeline::new(9, 2);
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let mut agg = pipeline.run(&mut tree, &protocols(&pipeline.backend, &[1, 3]));
    agg.new_root = [7u8; 32];
    assert_eq!(
        pipeline.backend.prove(&pipeline.agg.cs, &pipeline.agg.pk, &agg).unwrap_err(),
        AggregationError::Constraint(Violation::Composition)
    );
}

#[test]
fn test_wrong_batch_size_is_shape_drift() {
    let pipeline = Pipeline::new(9, 2);
    let mut tree = IndexedMerkleTree::new(9).unwrap();
    let protos = protocols(&pipeline.backend, &[1, 1, 1]);
    let reduction_vk_hash = reduction_vk_identity(&pipeline.reduction.vk).unwrap();
    let combined: Vec<Hash32> =
        protos.iter().map(|p| combined_vk_hash(&protocol_vk_identity(&p.vk).unwrap(), &reduction_vk_hash)).collect();
    let pis: Vec<Hash32> = protos.iter().map(|p| pis_identity(&p.pis).unwrap()).collect();
    let leaves: Vec<Hash32> = combined.iter().zip(&pis).map(|(c, p)| leaf_value(c, p)).collect();
    let batch = tree.insert_batch(&leaves).unwrap();
    let circuit = ImtCircuit::from_batch(9, combined, pis, batch).unwrap();
    assert!(matches!(
        pipeline.backend.prove(&pipeline.imt.cs, &pipeline.imt.pk, &circuit),
        Err(AggregationError::Backend(_))
    ));
}
