//! Reduction verifier gadget.
//!
//! Verifies one protocol proof at a fixed shape: the protocol key and public witness
//! are padded to [`MAX_PUB_INPUTS`], the padded proof is checked by the pairing
//! verifier, and the two public inputs must equal the compressed identity
//! `keccak(vk_identity || pis_identity)` of the unpadded originals.

use imt::codec::{compress_to_fields, keccak};
use imt::{Api, FieldBytes, Violation};

use crate::backend::{Circuit, PairingVerifier};
use crate::groth16::{Proof, VerifyingKey};
use crate::identity::{
    pad_public_witness, pad_verifying_key, pis_identity, pis_identity_bytes, protocol_vk_identity, vk_identity_bytes,
    PaddingConfig, PaddingPolicy, MAX_PUB_INPUTS,
};
use crate::{AggregationError, Result};

/// `compress(keccak(protocol_vk_identity(vk) || pis_identity(pis)))`
pub fn reduction_public_inputs(vk: &VerifyingKey, public_inputs: &[FieldBytes]) -> Result<[FieldBytes; 2]> {
    let mut data = protocol_vk_identity(vk)?.to_vec();
    data.extend_from_slice(&pis_identity(public_inputs)?);
    Ok(compress_to_fields(&keccak(&data)))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReductionCircuit {
    pub inner_vk: VerifyingKey,
    pub inner_proof: Proof,
    pub inner_public_inputs: Vec<FieldBytes>,
    pub padding: PaddingConfig,
    /// Compressed identity of the inner proof.
    pub identity: [FieldBytes; 2],
}

impl ReductionCircuit {
    pub fn new(inner_vk: VerifyingKey, inner_proof: Proof, inner_public_inputs: Vec<FieldBytes>) -> Result<Self> {
        if inner_public_inputs.len() != inner_vk.public_input_count() {
            return Err(AggregationError::ShapeMismatch(format!(
                "protocol key declares {} public inputs, witness has {}",
                inner_vk.public_input_count(),
                inner_public_inputs.len()
            )));
        }
        let identity = reduction_public_inputs(&inner_vk, &inner_public_inputs)?;
        Ok(Self {
            padding: PaddingConfig::protocol(&inner_vk),
            inner_vk,
            inner_proof,
            inner_public_inputs,
            identity,
        })
    }

    /// Same-shape witness for protocols with `commitments` commitment points.
    pub fn placeholder(commitments: usize) -> Self {
        let inner_vk = VerifyingKey::placeholder(0, commitments);
        Self {
            padding: PaddingConfig::protocol(&inner_vk),
            inner_vk,
            inner_proof: Proof::placeholder(commitments),
            inner_public_inputs: Vec::new(),
            identity: [FieldBytes::ZERO; 2],
        }
    }
}

impl Circuit for ReductionCircuit {
    fn name(&self) -> &'static str {
        "reduction"
    }

    fn define<A: Api>(&self, api: &mut A, verifier: &dyn PairingVerifier) -> Result<()> {
        let width = self.padding.padding_width;
        let vk = pad_verifying_key(&self.inner_vk, width)?;
        let public_inputs = pad_public_witness(&self.inner_public_inputs, width)?;

        let verified = verifier.verify_pairing(&vk, &self.inner_proof, &public_inputs);
        api.assert_pairing(width, verified)?;

        // slot i+1 holds a real point exactly when input i is declared
        let declared = (self.padding.declared_count as u64).to_be_bytes();
        for i in 0..width {
            let active = api.is_greater(&declared, &(i as u64).to_be_bytes());
            let empty = api.is_zero(&vk.k[i + 1].to_bytes());
            api.assert(active ^ empty, Violation::Identity)?;
        }

        let unpadded = PaddingConfig {
            declared_count: width,
            padding_width: width,
            policy: PaddingPolicy::Unpadded,
        };
        let mut identity_input = api.keccak(&vk_identity_bytes(&vk, &unpadded)?).to_vec();
        identity_input.extend_from_slice(&api.keccak(&pis_identity_bytes(&public_inputs)?));
        let identity = api.keccak(&identity_input);

        let [hi, lo] = compress_to_fields(&identity);
        let hi_ok = api.is_equal(hi.as_bytes(), self.identity[0].as_bytes());
        let lo_ok = api.is_equal(lo.as_bytes(), self.identity[1].as_bytes());
        api.assert(hi_ok & lo_ok, Violation::Identity)?;
        Ok(())
    }

    fn public_values(&self) -> Vec<FieldBytes> {
        self.identity.to_vec()
    }

    fn secret_values(&self) -> Vec<FieldBytes> {
        let mut out = vec![FieldBytes::from_u64(self.padding.declared_count as u64)];
        out.extend(self.inner_vk.field_elements());
        out.extend(self.inner_proof.field_elements());
        out.extend_from_slice(&self.inner_public_inputs);
        out
    }
}
