//! Proving backend contract and an insecure development backend.
//!
//! Circuits describe themselves through [`Circuit::define`], once, against any
//! [`Api`]. A backend compiles that description into a [`ConstraintSystem`], derives
//! keys from it, and proves or verifies against public inputs.

use imt::codec::keccak;
use imt::{Api, FieldBytes, Hash32, Recorder, Trace};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::groth16::{Fp2, G1Affine, G2Affine, Gt, Proof, VerifyingKey};
use crate::identity::{pis_identity, protocol_vk_identity};
use crate::{AggregationError, Result};

/// Checks a pairing-based proof outside the constrained computation.
pub trait PairingVerifier {
    fn verify_pairing(&self, vk: &VerifyingKey, proof: &Proof, public_inputs: &[FieldBytes]) -> bool;
}

/// A circuit together with its witness.
pub trait Circuit {
    fn name(&self) -> &'static str;

    /// Runs the circuit's constraints. Shape errors are returned; unsatisfied
    /// constraints go through `api.assert`.
    fn define<A: Api>(&self, api: &mut A, verifier: &dyn PairingVerifier) -> Result<()>;

    fn public_values(&self) -> Vec<FieldBytes>;

    fn secret_values(&self) -> Vec<FieldBytes>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintSystem {
    pub name: String,
    pub trace: Trace,
    pub public_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvingKey {
    pub circuit: String,
    pub shape_digest: Hash32,
    pub vk: VerifyingKey,
}

pub trait ProvingBackend: PairingVerifier + Send + Sync {
    fn compile<C: Circuit>(&self, circuit: &C) -> Result<ConstraintSystem>;

    fn setup(&self, cs: &ConstraintSystem) -> Result<(ProvingKey, VerifyingKey)>;

    fn prove<C: Circuit>(&self, cs: &ConstraintSystem, pk: &ProvingKey, circuit: &C) -> Result<(Proof, Vec<FieldBytes>)>;

    fn verify(&self, proof: &Proof, vk: &VerifyingKey, public_inputs: &[FieldBytes]) -> Result<bool>;
}

const SEAL_TAG: &[u8] = b"imt-aggregation/dev-groth16/v1";

/// Deterministic stand-in for a Groth16 prover. Proofs are keccak seals over the
/// key identity and public inputs; they carry no zero-knowledge or soundness.
#[derive(Clone, Copy, Debug, Default)]
pub struct DevBackend;

impl DevBackend {
    pub fn new() -> Self {
        Self
    }

    /// Verifying key for an external protocol with `public_count` inputs.
    pub fn protocol_key(&self, label: &str, public_count: usize, commitments: usize) -> VerifyingKey {
        let seed = keccak(label.as_bytes());
        let mut vk = derive_key(&seed, public_count + commitments);
        if commitments > 0 {
            vk.commitment_key = Some(crate::groth16::CommitmentKey {
                g: g2_from(&seed, 900),
                g_root_sigma_neg: g2_from(&seed, 901),
            });
            vk.public_and_commitment_committed = vec![Vec::new(); commitments];
        }
        vk
    }

    /// Proof of an external protocol statement.
    pub fn protocol_proof(&self, vk: &VerifyingKey, public_inputs: &[FieldBytes]) -> Result<Proof> {
        if public_inputs.len() != vk.public_input_count() {
            return Err(AggregationError::ShapeMismatch(format!(
                "key declares {} public inputs, got {}",
                vk.public_input_count(),
                public_inputs.len()
            )));
        }
        seal(vk, public_inputs)
    }
}

impl PairingVerifier for DevBackend {
    fn verify_pairing(&self, vk: &VerifyingKey, proof: &Proof, public_inputs: &[FieldBytes]) -> bool {
        matches!(seal(vk, public_inputs), Ok(expected) if expected == *proof)
    }
}

impl ProvingBackend for DevBackend {
    fn compile<C: Circuit>(&self, circuit: &C) -> Result<ConstraintSystem> {
        let mut rec = Recorder::new();
        circuit.define(&mut rec, self)?;
        let (trace, _) = rec.finish();
        debug!(circuit = circuit.name(), gates = trace.len(), "backend: compiled");
        Ok(ConstraintSystem {
            name: circuit.name().to_string(),
            trace,
            public_count: circuit.public_values().len(),
        })
    }

    fn setup(&self, cs: &ConstraintSystem) -> Result<(ProvingKey, VerifyingKey)> {
        let shape_digest = cs.trace.digest();
        let mut seed_input = cs.name.as_bytes().to_vec();
        seed_input.extend_from_slice(&shape_digest);
        let vk = derive_key(&keccak(&seed_input), cs.public_count);
        let pk = ProvingKey { circuit: cs.name.clone(), shape_digest, vk: vk.clone() };
        Ok((pk, vk))
    }

    fn prove<C: Circuit>(&self, cs: &ConstraintSystem, pk: &ProvingKey, circuit: &C) -> Result<(Proof, Vec<FieldBytes>)> {
        if pk.circuit != cs.name || pk.shape_digest != cs.trace.digest() {
            return Err(AggregationError::Backend(format!(
                "proving key for {} does not match constraint system {}",
                pk.circuit, cs.name
            )));
        }
        let mut rec = Recorder::new();
        circuit.define(&mut rec, self)?;
        let (trace, violation) = rec.finish();
        if trace != cs.trace {
            return Err(AggregationError::Backend(format!(
                "{} witness does not fit the compiled circuit ({} gates, expected {})",
                cs.name,
                trace.len(),
                cs.trace.len()
            )));
        }
        if let Some(v) = violation {
            return Err(AggregationError::Constraint(v));
        }
        let public = circuit.public_values();
        if public.len() != cs.public_count {
            return Err(AggregationError::ShapeMismatch(format!(
                "{} exposes {} public inputs, compiled with {}",
                cs.name,
                public.len(),
                cs.public_count
            )));
        }
        let proof = seal(&pk.vk, &public)?;
        debug!(circuit = %cs.name, "backend: proved");
        Ok((proof, public))
    }

    fn verify(&self, proof: &Proof, vk: &VerifyingKey, public_inputs: &[FieldBytes]) -> Result<bool> {
        Ok(self.verify_pairing(vk, proof, public_inputs))
    }
}

/// Proof bound to the padding-invariant identity of `vk` and `public_inputs`.
fn seal(vk: &VerifyingKey, public_inputs: &[FieldBytes]) -> Result<Proof> {
    let mut data = SEAL_TAG.to_vec();
    data.extend_from_slice(&protocol_vk_identity(vk)?);
    data.extend_from_slice(&pis_identity(public_inputs)?);
    let seed = keccak(&data);

    let commitments = vk.commitment_count() as u64;
    Ok(Proof {
        ar: g1_from(&seed, 0),
        bs: g2_from(&seed, 1),
        krs: g1_from(&seed, 2),
        commitments: (0..commitments).map(|i| g1_from(&seed, 10 + i)).collect(),
        commitment_pok: if commitments > 0 { g1_from(&seed, 3) } else { G1Affine::INFINITY },
    })
}

fn derive_key(seed: &Hash32, k_points: usize) -> VerifyingKey {
    let fp2 = |label: u64| Fp2 { a0: field_from(seed, label), a1: field_from(seed, label + 1) };
    let mut e = Gt::default();
    for (i, c) in [&mut e.c0, &mut e.c1].into_iter().enumerate() {
        let base = 100 + 6 * i as u64;
        c.b0 = fp2(base);
        c.b1 = fp2(base + 2);
        c.b2 = fp2(base + 4);
    }
    VerifyingKey {
        e,
        k: (0..=k_points as u64).map(|i| g1_from(seed, 200 + i)).collect(),
        gamma_neg: g2_from(seed, 300),
        delta_neg: g2_from(seed, 310),
        commitment_key: None,
        public_and_commitment_committed: Vec::new(),
    }
}

/// Non-zero element below 2^253, so it always fits the BN254 scalar field.
fn field_from(seed: &Hash32, label: u64) -> FieldBytes {
    let mut data = seed.to_vec();
    data.extend_from_slice(&label.to_be_bytes());
    let mut out = keccak(&data);
    out[0] &= 0x1f;
    out[31] |= 1;
    FieldBytes(out)
}

fn g1_from(seed: &Hash32, label: u64) -> G1Affine {
    G1Affine { x: field_from(seed, 2 * label), y: field_from(seed, 2 * label + 1) }
}

fn g2_from(seed: &Hash32, label: u64) -> G2Affine {
    G2Affine {
        x: Fp2 { a0: field_from(seed, 4 * label + 1000), a1: field_from(seed, 4 * label + 1001) },
        y: Fp2 { a0: field_from(seed, 4 * label + 1002), a1: field_from(seed, 4 * label + 1003) },
    }
}
