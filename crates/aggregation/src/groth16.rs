//! Groth16-shaped keys and proofs over BN254.
//!
//! Only the data model lives here. Coordinates are carried as [`FieldBytes`] and
//! serialize as decimal strings; every point is an affine coordinate pair, with
//! `(0, 0)` standing for the point at infinity.

use imt::FieldBytes;
use ruint::aliases::U256;
use serde::{Deserialize, Serialize};

use crate::{AggregationError, Result};

/// BN254 base field modulus.
pub const BASE_MODULUS: U256 = U256::from_limbs([
    0x3c20_8c16_d87c_fd47,
    0x9781_6a91_6871_ca8d,
    0xb850_45b6_8181_585d,
    0x3064_4e72_e131_a029,
]);

/// Element of the quadratic extension, `a0 + a1·u`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[FieldBytes; 2]", into = "[FieldBytes; 2]")]
pub struct Fp2 {
    pub a0: FieldBytes,
    pub a1: FieldBytes,
}

impl From<[FieldBytes; 2]> for Fp2 {
    fn from([a0, a1]: [FieldBytes; 2]) -> Self {
        Self { a0, a1 }
    }
}

impl From<Fp2> for [FieldBytes; 2] {
    fn from(v: Fp2) -> Self {
        [v.a0, v.a1]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[FieldBytes; 2]", into = "[FieldBytes; 2]")]
pub struct G1Affine {
    pub x: FieldBytes,
    pub y: FieldBytes,
}

impl G1Affine {
    pub const INFINITY: G1Affine = G1Affine { x: FieldBytes::ZERO, y: FieldBytes::ZERO };

    pub fn is_infinity(&self) -> bool {
        self.x.is_zero() && self.y.is_zero()
    }

    /// `X || Y`, 64 bytes.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.x.as_bytes());
        out[32..].copy_from_slice(self.y.as_bytes());
        out
    }
}

impl From<[FieldBytes; 2]> for G1Affine {
    fn from([x, y]: [FieldBytes; 2]) -> Self {
        Self { x, y }
    }
}

impl From<G1Affine> for [FieldBytes; 2] {
    fn from(p: G1Affine) -> Self {
        [p.x, p.y]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[Fp2; 2]", into = "[Fp2; 2]")]
pub struct G2Affine {
    pub x: Fp2,
    pub y: Fp2,
}

impl G2Affine {
    /// `X.a1 || X.a0 || Y.a1 || Y.a0`, 128 bytes.
    pub fn to_bytes(&self) -> [u8; 128] {
        let mut out = [0u8; 128];
        for (chunk, limb) in out.chunks_mut(32).zip([self.x.a1, self.x.a0, self.y.a1, self.y.a0]) {
            chunk.copy_from_slice(limb.as_bytes());
        }
        out
    }

    pub fn neg(&self) -> Self {
        Self { x: self.x, y: Fp2 { a0: neg_fp(self.y.a0), a1: neg_fp(self.y.a1) } }
    }
}

impl From<[Fp2; 2]> for G2Affine {
    fn from([x, y]: [Fp2; 2]) -> Self {
        Self { x, y }
    }
}

impl From<G2Affine> for [Fp2; 2] {
    fn from(p: G2Affine) -> Self {
        [p.x, p.y]
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fp6 {
    pub b0: Fp2,
    pub b1: Fp2,
    pub b2: Fp2,
}

/// Pairing target group element `c0 + c1·w`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gt {
    pub c0: Fp6,
    pub c1: Fp6,
}

impl Gt {
    /// 12 limbs, most significant coefficient first:
    /// `c1.b2.a1, c1.b2.a0, c1.b1.a1, ... c0.b0.a1, c0.b0.a0`.
    pub fn limbs(&self) -> [FieldBytes; 12] {
        let mut out = [FieldBytes::ZERO; 12];
        let mut i = 0;
        for fp6 in [self.c1, self.c0] {
            for fp2 in [fp6.b2, fp6.b1, fp6.b0] {
                out[i] = fp2.a1;
                out[i + 1] = fp2.a0;
                i += 2;
            }
        }
        out
    }
}

/// Pedersen commitment key attached to keys of circuits with committed witnesses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentKey {
    pub g: G2Affine,
    pub g_root_sigma_neg: G2Affine,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyingKey {
    /// e(α, β)
    pub e: Gt,
    /// One point per public input plus the constant term, then one per commitment.
    pub k: Vec<G1Affine>,
    pub gamma_neg: G2Affine,
    pub delta_neg: G2Affine,
    #[serde(default)]
    pub commitment_key: Option<CommitmentKey>,
    #[serde(default)]
    pub public_and_commitment_committed: Vec<Vec<usize>>,
}

impl VerifyingKey {
    /// Same-shape key with every element zero.
    pub fn placeholder(public_count: usize, commitments: usize) -> Self {
        Self {
            k: vec![G1Affine::INFINITY; public_count + 1 + commitments],
            commitment_key: (commitments > 0).then(CommitmentKey::default),
            public_and_commitment_committed: vec![Vec::new(); commitments],
            ..Self::default()
        }
    }

    pub fn commitment_count(&self) -> usize {
        self.public_and_commitment_committed.len()
    }

    /// Declared public inputs, excluding the constant term and commitment slots.
    pub fn public_input_count(&self) -> usize {
        self.k.len().saturating_sub(1 + self.commitment_count())
    }

    /// Every coordinate, in serialization order.
    pub fn field_elements(&self) -> Vec<FieldBytes> {
        let mut out = self.e.limbs().to_vec();
        for p in &self.k {
            out.extend([p.x, p.y]);
        }
        for g2 in [self.gamma_neg, self.delta_neg] {
            out.extend(g2_limbs(&g2));
        }
        let ck = self.commitment_key.unwrap_or_default();
        for g2 in [ck.g, ck.g_root_sigma_neg] {
            out.extend(g2_limbs(&g2));
        }
        out
    }
}

fn g2_limbs(p: &G2Affine) -> [FieldBytes; 4] {
    [p.x.a1, p.x.a0, p.y.a1, p.y.a0]
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub ar: G1Affine,
    pub bs: G2Affine,
    pub krs: G1Affine,
    #[serde(default)]
    pub commitments: Vec<G1Affine>,
    #[serde(default)]
    pub commitment_pok: G1Affine,
}

impl Proof {
    pub fn placeholder(commitments: usize) -> Self {
        Self {
            commitments: vec![G1Affine::INFINITY; commitments],
            ..Self::default()
        }
    }

    pub fn field_elements(&self) -> Vec<FieldBytes> {
        let mut out = vec![self.ar.x, self.ar.y];
        out.extend(g2_limbs(&self.bs));
        out.extend([self.krs.x, self.krs.y]);
        for c in &self.commitments {
            out.extend([c.x, c.y]);
        }
        out.extend([self.commitment_pok.x, self.commitment_pok.y]);
        out
    }
}

/// Verifying key as exported by snarkjs (`verification_key.json`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircomVerifyingKey {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub curve: String,
    #[serde(rename = "nPublic")]
    pub n_public: usize,
    pub vk_alpha_1: Vec<FieldBytes>,
    pub vk_beta_2: Vec<Vec<FieldBytes>>,
    pub vk_gamma_2: Vec<Vec<FieldBytes>>,
    pub vk_delta_2: Vec<Vec<FieldBytes>>,
    pub vk_alphabeta_12: Vec<Vec<Vec<FieldBytes>>>,
    #[serde(rename = "IC")]
    pub ic: Vec<Vec<FieldBytes>>,
}

/// Proof as exported by snarkjs (`proof.json`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircomProof {
    pub pi_a: Vec<FieldBytes>,
    pub pi_b: Vec<Vec<FieldBytes>>,
    pub pi_c: Vec<FieldBytes>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub curve: String,
}

impl CircomVerifyingKey {
    /// `IC` becomes `K`, `vk_alphabeta_12` becomes `E`, γ and δ are negated.
    /// snarkjs keys carry no commitment key.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey> {
        if self.ic.len() != self.n_public + 1 {
            return Err(AggregationError::Encoding(format!(
                "nPublic is {} but IC holds {} points",
                self.n_public,
                self.ic.len()
            )));
        }
        let k = self
            .ic
            .iter()
            .enumerate()
            .map(|(i, p)| g1_from_circom(p, &format!("IC[{i}]")))
            .collect::<Result<Vec<_>>>()?;
        Ok(VerifyingKey {
            e: gt_from_circom(&self.vk_alphabeta_12)?,
            k,
            gamma_neg: g2_from_circom(&self.vk_gamma_2, "vk_gamma_2")?.neg(),
            delta_neg: g2_from_circom(&self.vk_delta_2, "vk_delta_2")?.neg(),
            commitment_key: None,
            public_and_commitment_committed: Vec::new(),
        })
    }
}

impl CircomProof {
    pub fn to_proof(&self) -> Result<Proof> {
        Ok(Proof {
            ar: g1_from_circom(&self.pi_a, "pi_a")?,
            bs: g2_from_circom(&self.pi_b, "pi_b")?,
            krs: g1_from_circom(&self.pi_c, "pi_c")?,
            commitments: Vec::new(),
            commitment_pok: G1Affine::INFINITY,
        })
    }
}

fn neg_fp(v: FieldBytes) -> FieldBytes {
    if v.is_zero() {
        return v;
    }
    FieldBytes((BASE_MODULUS - U256::from_be_bytes(v.0)).to_be_bytes::<32>())
}

fn check_fp(v: &FieldBytes, what: &str) -> Result<()> {
    if U256::from_be_bytes(v.0) >= BASE_MODULUS {
        return Err(AggregationError::Encoding(format!("{what}: coordinate exceeds the base field")));
    }
    Ok(())
}

/// snarkjs points are projective `[x, y, z]` with `z = 1`, or `z = 0` at infinity.
fn g1_from_circom(coords: &[FieldBytes], what: &str) -> Result<G1Affine> {
    let (x, y) = match coords {
        [x, y] => (*x, *y),
        [_, _, z] if z.is_zero() => return Ok(G1Affine::INFINITY),
        [x, y, z] if *z == FieldBytes::from_u64(1) => (*x, *y),
        _ => {
            return Err(AggregationError::Encoding(format!(
                "{what}: expected an affine G1 point, got {} coordinates",
                coords.len()
            )))
        }
    };
    check_fp(&x, what)?;
    check_fp(&y, what)?;
    Ok(G1Affine { x, y })
}

fn fp2_from_circom(c: &[FieldBytes], what: &str) -> Result<Fp2> {
    match c {
        [a0, a1] => {
            check_fp(a0, what)?;
            check_fp(a1, what)?;
            Ok(Fp2 { a0: *a0, a1: *a1 })
        }
        _ => Err(AggregationError::Encoding(format!("{what}: expected 2 Fp limbs, got {}", c.len()))),
    }
}

fn g2_from_circom(coords: &[Vec<FieldBytes>], what: &str) -> Result<G2Affine> {
    let (x, y) = match coords {
        [x, y] => (x, y),
        [_, _, z] if z.iter().all(FieldBytes::is_zero) => return Ok(G2Affine::default()),
        [x, y, z] if z.as_slice() == [FieldBytes::from_u64(1), FieldBytes::ZERO] => (x, y),
        _ => {
            return Err(AggregationError::Encoding(format!(
                "{what}: expected an affine G2 point, got {} coordinates",
                coords.len()
            )))
        }
    };
    Ok(G2Affine { x: fp2_from_circom(x, what)?, y: fp2_from_circom(y, what)? })
}

/// `[[c0.b0, c0.b1, c0.b2], [c1.b0, c1.b1, c1.b2]]`, each an `[a0, a1]` pair.
fn gt_from_circom(v: &[Vec<Vec<FieldBytes>>]) -> Result<Gt> {
    let fp6 = |c: &[Vec<FieldBytes>], what: &str| -> Result<Fp6> {
        match c {
            [b0, b1, b2] => Ok(Fp6 {
                b0: fp2_from_circom(b0, what)?,
                b1: fp2_from_circom(b1, what)?,
                b2: fp2_from_circom(b2, what)?,
            }),
            _ => Err(AggregationError::Encoding(format!("{what}: expected 3 Fp2 elements, got {}", c.len()))),
        }
    };
    match v {
        [c0, c1] => Ok(Gt { c0: fp6(c0, "vk_alphabeta_12[0]")?, c1: fp6(c1, "vk_alphabeta_12[1]")? }),
        _ => Err(AggregationError::Encoding(format!("vk_alphabeta_12: expected 2 Fp6 elements, got {}", v.len()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_json_is_decimal_pairs() {
        let p = G1Affine { x: FieldBytes::from_u64(1), y: FieldBytes::from_u64(2) };
        assert_eq!(serde_json::to_string(&p).unwrap(), r#"["1","2"]"#);

        let q = G2Affine {
            x: Fp2 { a0: FieldBytes::from_u64(3), a1: FieldBytes::from_u64(4) },
            y: Fp2::default(),
        };
        assert_eq!(serde_json::to_string(&q).unwrap(), r#"[["3","4"],["0","0"]]"#);
    }

    #[test]
    fn test_proof_without_commitments_parses() {
        let json = r#"{"ar":["1","2"],"bs":[["1","2"],["3","4"]],"krs":["5","6"]}"#;
        let proof: Proof = serde_json::from_str(json).unwrap();
        assert!(proof.commitments.is_empty());
        assert!(proof.commitment_pok.is_infinity());
        assert_eq!(proof.krs.y, FieldBytes::from_u64(6));
    }

    #[test]
    fn test_gt_limb_order() {
        let mut e = Gt::default();
        e.c1.b2.a1 = FieldBytes::from_u64(1);
        e.c0.b0.a0 = FieldBytes::from_u64(12);
        let limbs = e.limbs();
        assert_eq!(limbs[0], FieldBytes::from_u64(1));
        assert_eq!(limbs[11], FieldBytes::from_u64(12));
    }

    #[test]
    fn test_public_input_count() {
        let vk = VerifyingKey::placeholder(3, 1);
        assert_eq!(vk.k.len(), 5);
        assert_eq!(vk.public_input_count(), 3);
        assert_eq!(vk.commitment_count(), 1);
        assert!(vk.commitment_key.is_some());
    }

    const VK_FIXTURE: &str = r#"{
        "protocol": "groth16",
        "curve": "bn128",
        "nPublic": 2,
        "vk_alpha_1": ["1", "2", "1"],
        "vk_beta_2": [["3", "4"], ["5", "6"], ["1", "0"]],
        "vk_gamma_2": [["7", "8"], ["9", "10"], ["1", "0"]],
        "vk_delta_2": [["11", "12"], ["0", "13"], ["1", "0"]],
        "vk_alphabeta_12": [
            [["101", "102"], ["103", "104"], ["105", "106"]],
            [["107", "108"], ["109", "110"], ["111", "112"]]
        ],
        "IC": [["21", "22", "1"], ["23", "24", "1"], ["0", "1", "0"]]
    }"#;

    const PROOF_FIXTURE: &str = r#"{
        "pi_a": ["31", "32", "1"],
        "pi_b": [["33", "34"], ["35", "36"], ["1", "0"]],
        "pi_c": ["37", "38", "1"],
        "protocol": "groth16",
        "curve": "bn128"
    }"#;

    fn below_modulus(n: u64) -> FieldBytes {
        FieldBytes((BASE_MODULUS - U256::from(n)).to_be_bytes::<32>())
    }

    #[test]
    fn test_modulus_constant() {
        assert_eq!(
            BASE_MODULUS.to_string(),
            "21888242871839275222246405745257275088696311157297823662689037894645226208583"
        );
    }

    #[test]
    fn test_snarkjs_key_converts() {
        let circom: CircomVerifyingKey = serde_json::from_str(VK_FIXTURE).unwrap();
        let vk = circom.to_verifying_key().unwrap();

        assert_eq!(vk.k.len(), 3);
        assert_eq!(vk.public_input_count(), 2);
        assert_eq!(vk.k[1], G1Affine { x: FieldBytes::from_u64(23), y: FieldBytes::from_u64(24) });
        assert!(vk.k[2].is_infinity());
        assert_eq!(vk.e.c0.b0.a0, FieldBytes::from_u64(101));
        assert_eq!(vk.e.c1.b2.a1, FieldBytes::from_u64(112));
        assert_eq!(vk.commitment_key, None);

        assert_eq!(vk.gamma_neg.x.a1, FieldBytes::from_u64(8));
        assert_eq!(vk.gamma_neg.y.a0, below_modulus(9));
        assert_eq!(vk.gamma_neg.y.a1, below_modulus(10));
        assert_eq!(vk.delta_neg.y.a0, FieldBytes::ZERO);
        assert_eq!(vk.delta_neg.neg().y.a1, FieldBytes::from_u64(13));

        let json = serde_json::to_string(&vk).unwrap();
        let back: VerifyingKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vk);
    }

    #[test]
    fn test_snarkjs_proof_converts() {
        let circom: CircomProof = serde_json::from_str(PROOF_FIXTURE).unwrap();
        let proof = circom.to_proof().unwrap();
        assert_eq!(proof.ar, G1Affine { x: FieldBytes::from_u64(31), y: FieldBytes::from_u64(32) });
        assert_eq!(proof.bs.x, Fp2 { a0: FieldBytes::from_u64(33), a1: FieldBytes::from_u64(34) });
        assert_eq!(proof.krs.y, FieldBytes::from_u64(38));
        assert!(proof.commitments.is_empty());
        assert!(proof.commitment_pok.is_infinity());
    }

    #[test]
    fn test_snarkjs_malformed_inputs_rejected() {
        let mut circom: CircomVerifyingKey = serde_json::from_str(VK_FIXTURE).unwrap();
        circom.n_public = 3;
        assert!(matches!(circom.to_verifying_key(), Err(AggregationError::Encoding(_))));

        let mut circom: CircomVerifyingKey = serde_json::from_str(VK_FIXTURE).unwrap();
        circom.vk_alphabeta_12.pop();
        assert!(matches!(circom.to_verifying_key(), Err(AggregationError::Encoding(_))));

        let mut proof: CircomProof = serde_json::from_str(PROOF_FIXTURE).unwrap();
        proof.pi_a[2] = FieldBytes::from_u64(7);
        assert!(matches!(proof.to_proof(), Err(AggregationError::Encoding(_))));

        let mut proof: CircomProof = serde_json::from_str(PROOF_FIXTURE).unwrap();
        proof.pi_c[0] = FieldBytes(BASE_MODULUS.to_be_bytes::<32>());
        assert!(matches!(proof.to_proof(), Err(AggregationError::Encoding(_))));
    }
}
