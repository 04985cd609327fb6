//! IMT batch circuit: one batch of accumulator insertions, bound to the proof
//! identities recorded by the inserted leaves.

use imt::codec::{compress_to_fields, hash_concat, keccak};
use imt::continuity::verify_batch;
use imt::{Api, BatchWitness, FieldBytes, Hash32, MerkleProof, Violation};

use crate::backend::{Circuit, PairingVerifier};
use crate::{AggregationError, Result};

fn check_lengths(combined_vk_hashes: &[Hash32], pis_hashes: &[Hash32]) -> Result<()> {
    if combined_vk_hashes.len() != pis_hashes.len() {
        return Err(AggregationError::ShapeMismatch(format!(
            "{} combined key hashes, {} public input hashes",
            combined_vk_hashes.len(),
            pis_hashes.len()
        )));
    }
    Ok(())
}

/// `Σ(combined_i || pis_i) || old_root || new_root`
pub(crate) fn transition_bytes(
    combined_vk_hashes: &[Hash32],
    pis_hashes: &[Hash32],
    old_root: &Hash32,
    new_root: &Hash32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity((combined_vk_hashes.len() * 2 + 2) * 32);
    for (c, p) in combined_vk_hashes.iter().zip(pis_hashes) {
        out.extend_from_slice(c);
        out.extend_from_slice(p);
    }
    out.extend_from_slice(old_root);
    out.extend_from_slice(new_root);
    out
}

/// Public inputs of the IMT circuit for a batch from `old_root` to `new_root`.
pub fn imt_public_inputs(
    combined_vk_hashes: &[Hash32],
    pis_hashes: &[Hash32],
    old_root: &Hash32,
    new_root: &Hash32,
) -> Result<[FieldBytes; 2]> {
    check_lengths(combined_vk_hashes, pis_hashes)?;
    let data = transition_bytes(combined_vk_hashes, pis_hashes, old_root, new_root);
    Ok(compress_to_fields(&keccak(&data)))
}

/// Leaf value recording one proof: `keccak(combined_vk_hash || pis_hash)`.
pub fn leaf_value(combined_vk_hash: &Hash32, pis_hash: &Hash32) -> Hash32 {
    hash_concat([combined_vk_hash, pis_hash])
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImtCircuit {
    pub depth: usize,
    pub combined_vk_hashes: Vec<Hash32>,
    pub pis_hashes: Vec<Hash32>,
    pub batch: BatchWitness,
    pub public: [FieldBytes; 2],
}

impl ImtCircuit {
    pub fn from_batch(
        depth: usize,
        combined_vk_hashes: Vec<Hash32>,
        pis_hashes: Vec<Hash32>,
        batch: BatchWitness,
    ) -> Result<Self> {
        check_lengths(&combined_vk_hashes, &pis_hashes)?;
        if combined_vk_hashes.len() != batch.batch_size() {
            return Err(AggregationError::ShapeMismatch(format!(
                "{} identities for a batch of {}",
                combined_vk_hashes.len(),
                batch.batch_size()
            )));
        }
        let public = imt_public_inputs(&combined_vk_hashes, &pis_hashes, &batch.old_root, &batch.new_root)?;
        Ok(Self { depth, combined_vk_hashes, pis_hashes, batch, public })
    }

    pub fn placeholder(depth: usize, batch_size: usize) -> Self {
        Self {
            depth,
            combined_vk_hashes: vec![[0u8; 32]; batch_size],
            pis_hashes: vec![[0u8; 32]; batch_size],
            batch: BatchWitness::placeholder(depth, batch_size),
            public: [FieldBytes::ZERO; 2],
        }
    }
}

impl Circuit for ImtCircuit {
    fn name(&self) -> &'static str {
        "imt"
    }

    fn define<A: Api>(&self, api: &mut A, _verifier: &dyn PairingVerifier) -> Result<()> {
        check_lengths(&self.combined_vk_hashes, &self.pis_hashes)?;
        if self.combined_vk_hashes.len() != self.batch.batch_size() {
            return Err(AggregationError::ShapeMismatch(format!(
                "{} identities for a batch of {}",
                self.combined_vk_hashes.len(),
                self.batch.batch_size()
            )));
        }

        let new_root = verify_batch(api, self.depth, &self.batch)?;

        for ((c, p), w) in self.combined_vk_hashes.iter().zip(&self.pis_hashes).zip(&self.batch.insertions) {
            let mut pair = [0u8; 64];
            pair[..32].copy_from_slice(c);
            pair[32..].copy_from_slice(p);
            let expected = api.keccak(&pair);
            let bound = api.is_equal(&expected, &w.new_leaf.value);
            api.assert(bound, Violation::Composition)?;
        }

        let data = transition_bytes(&self.combined_vk_hashes, &self.pis_hashes, &self.batch.old_root, &new_root);
        let [hi, lo] = compress_to_fields(&api.keccak(&data));
        let hi_ok = api.is_equal(hi.as_bytes(), self.public[0].as_bytes());
        let lo_ok = api.is_equal(lo.as_bytes(), self.public[1].as_bytes());
        api.assert(hi_ok & lo_ok, Violation::Composition)?;
        Ok(())
    }

    fn public_values(&self) -> Vec<FieldBytes> {
        self.public.to_vec()
    }

    fn secret_values(&self) -> Vec<FieldBytes> {
        let mut out = Vec::new();
        for (c, p) in self.combined_vk_hashes.iter().zip(&self.pis_hashes) {
            push_bytes(&mut out, c);
            push_bytes(&mut out, p);
        }
        push_bytes(&mut out, &self.batch.old_root);
        push_bytes(&mut out, &self.batch.prev_low_leaf.to_bytes());
        push_proof(&mut out, &self.batch.prev_low_leaf_proof);
        for w in &self.batch.insertions {
            push_bytes(&mut out, &w.low_leaf.to_bytes());
            push_bytes(&mut out, &w.new_leaf.to_bytes());
            push_bytes(&mut out, &w.new_leaf_index.to_be_bytes());
            push_proof(&mut out, &w.low_leaf_proof);
            push_proof(&mut out, &w.new_leaf_proof);
        }
        out
    }
}

/// One field element per byte.
fn push_bytes(out: &mut Vec<FieldBytes>, bytes: &[u8]) {
    out.extend(bytes.iter().map(|b| FieldBytes::from_u64(*b as u64)));
}

fn push_proof(out: &mut Vec<FieldBytes>, proof: &MerkleProof) {
    for sibling in &proof.siblings {
        push_bytes(out, sibling);
    }
    push_bytes(out, &proof.path_bits);
}
