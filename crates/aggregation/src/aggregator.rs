//! Aggregator composition.
//!
//! Verifies N reduction proofs and one IMT batch proof, and exposes
//! `compress(keccak(Σ(combined_i || pis_i) || old_root || new_root || imt_vk_hash))`
//! as its only public inputs, where `combined_i = keccak(protocol_vk_i || reduction_vk)`.

use imt::codec::{compress_to_fields, hash_concat, keccak};
use imt::{Api, FieldBytes, Hash32, Violation};

use crate::backend::{Circuit, PairingVerifier};
use crate::groth16::{Proof, VerifyingKey};
use crate::identity::{vk_identity_bytes, PaddingConfig};
use crate::imt_circuit::transition_bytes;
use crate::{AggregationError, Result};

/// Binds a protocol key to the reduction circuit that checked it.
pub fn combined_vk_hash(protocol_vk_hash: &Hash32, reduction_vk_hash: &Hash32) -> Hash32 {
    hash_concat([protocol_vk_hash, reduction_vk_hash])
}

pub fn aggregate_public_inputs(
    combined_vk_hashes: &[Hash32],
    pis_hashes: &[Hash32],
    old_root: &Hash32,
    new_root: &Hash32,
    imt_vk_hash: &Hash32,
) -> Result<[FieldBytes; 2]> {
    if combined_vk_hashes.len() != pis_hashes.len() {
        return Err(AggregationError::ShapeMismatch(format!(
            "{} combined key hashes, {} public input hashes",
            combined_vk_hashes.len(),
            pis_hashes.len()
        )));
    }
    let mut data = transition_bytes(combined_vk_hashes, pis_hashes, old_root, new_root);
    data.extend_from_slice(imt_vk_hash);
    Ok(compress_to_fields(&keccak(&data)))
}

/// One verified reduction: its proof and the compressed identity it exposes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReductionResult {
    pub proof: Proof,
    pub public: [FieldBytes; 2],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatorCircuit {
    pub protocol_vk_hashes: Vec<Hash32>,
    pub protocol_pis_hashes: Vec<Hash32>,
    pub reduction_vk: VerifyingKey,
    pub reductions: Vec<ReductionResult>,
    pub imt_vk: VerifyingKey,
    pub imt_proof: Proof,
    pub imt_public: [FieldBytes; 2],
    pub old_root: Hash32,
    pub new_root: Hash32,
    pub public: [FieldBytes; 2],
}

impl AggregatorCircuit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        protocol_vk_hashes: Vec<Hash32>,
        protocol_pis_hashes: Vec<Hash32>,
        reduction_vk: VerifyingKey,
        reductions: Vec<ReductionResult>,
        imt_vk: VerifyingKey,
        imt_proof: Proof,
        imt_public: [FieldBytes; 2],
        old_root: Hash32,
        new_root: Hash32,
    ) -> Result<Self> {
        let n = protocol_vk_hashes.len();
        if protocol_pis_hashes.len() != n || reductions.len() != n {
            return Err(AggregationError::ShapeMismatch(format!(
                "{} protocol keys, {} public input hashes, {} reduction proofs",
                n,
                protocol_pis_hashes.len(),
                reductions.len()
            )));
        }
        let reduction_vk_hash = keccak(&vk_identity_bytes(&reduction_vk, &PaddingConfig::unpadded(&reduction_vk))?);
        let combined: Vec<Hash32> =
            protocol_vk_hashes.iter().map(|h| combined_vk_hash(h, &reduction_vk_hash)).collect();
        let imt_vk_hash = keccak(&vk_identity_bytes(&imt_vk, &PaddingConfig::unpadded(&imt_vk))?);
        let public = aggregate_public_inputs(&combined, &protocol_pis_hashes, &old_root, &new_root, &imt_vk_hash)?;

        Ok(Self {
            protocol_vk_hashes,
            protocol_pis_hashes,
            reduction_vk,
            reductions,
            imt_vk,
            imt_proof,
            imt_public,
            old_root,
            new_root,
            public,
        })
    }

    /// Same-shape witness for `n` reductions, against keys with two public inputs.
    pub fn placeholder(n: usize) -> Self {
        let reduction = ReductionResult { proof: Proof::placeholder(0), public: [FieldBytes::ZERO; 2] };
        Self {
            protocol_vk_hashes: vec![[0u8; 32]; n],
            protocol_pis_hashes: vec![[0u8; 32]; n],
            reduction_vk: VerifyingKey::placeholder(2, 0),
            reductions: vec![reduction; n],
            imt_vk: VerifyingKey::placeholder(2, 0),
            imt_proof: Proof::placeholder(0),
            imt_public: [FieldBytes::ZERO; 2],
            old_root: [0u8; 32],
            new_root: [0u8; 32],
            public: [FieldBytes::ZERO; 2],
        }
    }
}

fn assert_compressed<A: Api>(api: &mut A, h: &Hash32, expected: &[FieldBytes; 2]) -> std::result::Result<(), Violation> {
    let [hi, lo] = compress_to_fields(h);
    let hi_ok = api.is_equal(hi.as_bytes(), expected[0].as_bytes());
    let lo_ok = api.is_equal(lo.as_bytes(), expected[1].as_bytes());
    api.assert(hi_ok & lo_ok, Violation::Composition)
}

fn concat(a: &Hash32, b: &Hash32) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(a);
    out[32..].copy_from_slice(b);
    out
}

impl Circuit for AggregatorCircuit {
    fn name(&self) -> &'static str {
        "agg"
    }

    fn define<A: Api>(&self, api: &mut A, verifier: &dyn PairingVerifier) -> Result<()> {
        let n = self.protocol_vk_hashes.len();
        if self.protocol_pis_hashes.len() != n || self.reductions.len() != n {
            return Err(AggregationError::ShapeMismatch(format!(
                "{} protocol keys, {} public input hashes, {} reduction proofs",
                n,
                self.protocol_pis_hashes.len(),
                self.reductions.len()
            )));
        }

        let reduction_cfg = PaddingConfig::unpadded(&self.reduction_vk);
        let reduction_vk_hash = api.keccak(&vk_identity_bytes(&self.reduction_vk, &reduction_cfg)?);

        let mut combined = Vec::with_capacity(n);
        for ((vk_hash, pis_hash), r) in self.protocol_vk_hashes.iter().zip(&self.protocol_pis_hashes).zip(&self.reductions) {
            let verified = verifier.verify_pairing(&self.reduction_vk, &r.proof, &r.public);
            api.assert_pairing(r.public.len(), verified)?;

            let identity = api.keccak(&concat(vk_hash, pis_hash));
            assert_compressed(api, &identity, &r.public)?;

            combined.push(api.keccak(&concat(vk_hash, &reduction_vk_hash)));
        }

        let verified = verifier.verify_pairing(&self.imt_vk, &self.imt_proof, &self.imt_public);
        api.assert_pairing(self.imt_public.len(), verified)?;

        let mut data = transition_bytes(&combined, &self.protocol_pis_hashes, &self.old_root, &self.new_root);
        let imt_commitment = api.keccak(&data);
        assert_compressed(api, &imt_commitment, &self.imt_public)?;

        let imt_cfg = PaddingConfig::unpadded(&self.imt_vk);
        let imt_vk_hash = api.keccak(&vk_identity_bytes(&self.imt_vk, &imt_cfg)?);
        data.extend_from_slice(&imt_vk_hash);
        let aggregate = api.keccak(&data);
        assert_compressed(api, &aggregate, &self.public)?;
        Ok(())
    }

    fn public_values(&self) -> Vec<FieldBytes> {
        self.public.to_vec()
    }

    fn secret_values(&self) -> Vec<FieldBytes> {
        let mut out = Vec::new();
        for (vk_hash, pis_hash) in self.protocol_vk_hashes.iter().zip(&self.protocol_pis_hashes) {
            out.extend(compress_to_fields(vk_hash));
            out.extend(compress_to_fields(pis_hash));
        }
        out.extend(self.reduction_vk.field_elements());
        for r in &self.reductions {
            out.extend(r.proof.field_elements());
            out.extend(r.public);
        }
        out.extend(self.imt_vk.field_elements());
        out.extend(self.imt_proof.field_elements());
        out.extend(self.imt_public);
        out.extend(compress_to_fields(&self.old_root));
        out.extend(compress_to_fields(&self.new_root));
        out
    }
}
