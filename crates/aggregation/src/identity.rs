//! Canonical identities of verifying keys and public-input vectors.
//!
//! A key's identity is the keccak of its group elements in a fixed order. Protocol
//! keys differ in arity, so their public K points are padded to [`MAX_PUB_INPUTS`]
//! first; any commitment K points stay at the end. Padding the key itself with
//! [`pad_verifying_key`] and hashing it unpadded yields the same bytes.

use imt::codec::keccak;
use imt::{FieldBytes, Hash32};

use crate::groth16::{G1Affine, VerifyingKey};
use crate::{AggregationError, Result};

/// Widest public-input vector a protocol proof may carry.
pub const MAX_PUB_INPUTS: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaddingPolicy {
    /// Hash K exactly as stored.
    Unpadded,
    /// Pad the public K points with infinity up to `padding_width + 1`.
    PadToWidth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaddingConfig {
    pub declared_count: usize,
    pub padding_width: usize,
    pub policy: PaddingPolicy,
}

impl PaddingConfig {
    pub fn unpadded(vk: &VerifyingKey) -> Self {
        let declared_count = vk.public_input_count();
        Self { declared_count, padding_width: declared_count, policy: PaddingPolicy::Unpadded }
    }

    pub fn protocol(vk: &VerifyingKey) -> Self {
        Self {
            declared_count: vk.public_input_count(),
            padding_width: MAX_PUB_INPUTS,
            policy: PaddingPolicy::PadToWidth,
        }
    }
}

fn k_points(vk: &VerifyingKey, cfg: &PaddingConfig) -> Result<Vec<G1Affine>> {
    let commitments = vk.commitment_count();
    let public = cfg.declared_count + 1;
    if vk.k.len() < public + commitments {
        return Err(AggregationError::ShapeMismatch(format!(
            "K has {} points, {} public inputs and {} commitments declared",
            vk.k.len(),
            cfg.declared_count,
            commitments
        )));
    }
    match cfg.policy {
        PaddingPolicy::Unpadded => Ok(vk.k.clone()),
        PaddingPolicy::PadToWidth => {
            if vk.k.len() != public + commitments || cfg.declared_count > cfg.padding_width {
                return Err(AggregationError::ShapeMismatch(format!(
                    "cannot pad K of {} points ({} declared) to width {}",
                    vk.k.len(),
                    cfg.declared_count,
                    cfg.padding_width
                )));
            }
            let mut k = vk.k[..public].to_vec();
            k.resize(cfg.padding_width + 1, G1Affine::INFINITY);
            k.extend_from_slice(&vk.k[public..]);
            Ok(k)
        }
    }
}

/// Serialized key: E limbs, K points, −γ, −δ, then the commitment key (zeros if absent).
pub fn vk_identity_bytes(vk: &VerifyingKey, cfg: &PaddingConfig) -> Result<Vec<u8>> {
    let k = k_points(vk, cfg)?;
    let mut out = Vec::with_capacity(12 * 32 + k.len() * 64 + 4 * 128);
    for limb in vk.e.limbs() {
        out.extend_from_slice(limb.as_bytes());
    }
    for p in &k {
        out.extend_from_slice(&p.to_bytes());
    }
    out.extend_from_slice(&vk.gamma_neg.to_bytes());
    out.extend_from_slice(&vk.delta_neg.to_bytes());
    match &vk.commitment_key {
        Some(ck) => {
            out.extend_from_slice(&ck.g.to_bytes());
            out.extend_from_slice(&ck.g_root_sigma_neg.to_bytes());
        }
        None => out.extend_from_slice(&[0u8; 256]),
    }
    Ok(out)
}

pub fn vk_identity(vk: &VerifyingKey, cfg: &PaddingConfig) -> Result<Hash32> {
    Ok(keccak(&vk_identity_bytes(vk, cfg)?))
}

/// Identity of a fixed-shape key (reduction, IMT, aggregator).
pub fn reduction_vk_identity(vk: &VerifyingKey) -> Result<Hash32> {
    vk_identity(vk, &PaddingConfig::unpadded(vk))
}

/// Identity of a protocol key, independent of its arity.
pub fn protocol_vk_identity(vk: &VerifyingKey) -> Result<Hash32> {
    vk_identity(vk, &PaddingConfig::protocol(vk))
}

/// Each element as 32 bytes, zero-filled up to [`MAX_PUB_INPUTS`] elements.
pub fn pis_identity_bytes(public_inputs: &[FieldBytes]) -> Result<Vec<u8>> {
    if public_inputs.len() > MAX_PUB_INPUTS {
        return Err(AggregationError::ShapeMismatch(format!(
            "{} public inputs exceed the maximum of {MAX_PUB_INPUTS}",
            public_inputs.len()
        )));
    }
    let mut out = vec![0u8; MAX_PUB_INPUTS * 32];
    for (chunk, f) in out.chunks_mut(32).zip(public_inputs) {
        chunk.copy_from_slice(f.as_bytes());
    }
    Ok(out)
}

pub fn pis_identity(public_inputs: &[FieldBytes]) -> Result<Hash32> {
    Ok(keccak(&pis_identity_bytes(public_inputs)?))
}

/// Key with its public K points padded to `width + 1` and commitment points moved last.
pub fn pad_verifying_key(vk: &VerifyingKey, width: usize) -> Result<VerifyingKey> {
    let cfg = PaddingConfig {
        declared_count: vk.public_input_count(),
        padding_width: width,
        policy: PaddingPolicy::PadToWidth,
    };
    Ok(VerifyingKey { k: k_points(vk, &cfg)?, ..vk.clone() })
}

pub fn pad_public_witness(public_inputs: &[FieldBytes], width: usize) -> Result<Vec<FieldBytes>> {
    if public_inputs.len() > width {
        return Err(AggregationError::ShapeMismatch(format!(
            "{} public inputs exceed padding width {width}",
            public_inputs.len()
        )));
    }
    let mut out = public_inputs.to_vec();
    out.resize(width, FieldBytes::ZERO);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groth16::CommitmentKey;

    fn point(n: u64) -> G1Affine {
        G1Affine { x: FieldBytes::from_u64(n), y: FieldBytes::from_u64(n + 1000) }
    }

    fn sample_vk(public: usize, commitments: usize) -> VerifyingKey {
        let mut vk = VerifyingKey::placeholder(public, commitments);
        for (i, p) in vk.k.iter_mut().enumerate() {
            *p = point(i as u64 + 1);
        }
        vk.e.c0.b0.a0 = FieldBytes::from_u64(7);
        vk.gamma_neg.x.a1 = FieldBytes::from_u64(8);
        vk.delta_neg.y.a0 = FieldBytes::from_u64(9);
        if let Some(ck) = vk.commitment_key.as_mut() {
            ck.g.x.a0 = FieldBytes::from_u64(10);
        }
        vk
    }

    #[test]
    fn test_identity_layout_length() {
        let vk = sample_vk(2, 0);
        let bytes = vk_identity_bytes(&vk, &PaddingConfig::unpadded(&vk)).unwrap();
        assert_eq!(bytes.len(), 12 * 32 + 3 * 64 + 2 * 128 + 256);

        let padded = vk_identity_bytes(&vk, &PaddingConfig::protocol(&vk)).unwrap();
        assert_eq!(padded.len(), 12 * 32 + (MAX_PUB_INPUTS + 1) * 64 + 2 * 128 + 256);
    }

    #[test]
    fn test_padding_equivalence() {
        for commitments in [0, 1] {
            let vk = sample_vk(3, commitments);
            let padded = pad_verifying_key(&vk, MAX_PUB_INPUTS).unwrap();
            assert_eq!(padded.k.len(), MAX_PUB_INPUTS + 1 + commitments);
            assert_eq!(
                reduction_vk_identity(&padded).unwrap(),
                protocol_vk_identity(&vk).unwrap()
            );
        }
    }

    #[test]
    fn test_commitment_point_moves_last() {
        let vk = sample_vk(2, 1);
        let padded = pad_verifying_key(&vk, MAX_PUB_INPUTS).unwrap();
        assert_eq!(padded.k[..3], vk.k[..3]);
        assert!(padded.k[3..=MAX_PUB_INPUTS].iter().all(|p| p.is_infinity()));
        assert_eq!(padded.k[MAX_PUB_INPUTS + 1], vk.k[3]);
    }

    #[test]
    fn test_identity_sensitivity() {
        let vk = sample_vk(2, 1);
        let base = protocol_vk_identity(&vk).unwrap();
        assert_eq!(protocol_vk_identity(&vk.clone()).unwrap(), base);

        let mut changed = vk.clone();
        changed.k[1].y.0[31] ^= 1;
        assert_ne!(protocol_vk_identity(&changed).unwrap(), base);

        let mut changed = vk.clone();
        changed.e.c1.b2.a1 = FieldBytes::from_u64(1);
        assert_ne!(protocol_vk_identity(&changed).unwrap(), base);

        let mut changed = vk.clone();
        changed.commitment_key = Some(CommitmentKey::default());
        assert_ne!(protocol_vk_identity(&changed).unwrap(), base);
    }

    #[test]
    fn test_short_k_is_shape_mismatch() {
        let mut vk = sample_vk(2, 1);
        vk.k.truncate(2);
        let cfg = PaddingConfig { declared_count: 2, padding_width: MAX_PUB_INPUTS, policy: PaddingPolicy::PadToWidth };
        assert!(matches!(vk_identity(&vk, &cfg), Err(AggregationError::ShapeMismatch(_))));
    }

    #[test]
    fn test_pis_identity_zero_pads() {
        let short = [FieldBytes::from_u64(5)];
        let long = [FieldBytes::from_u64(5), FieldBytes::ZERO, FieldBytes::ZERO];
        assert_eq!(pis_identity(&short).unwrap(), pis_identity(&long).unwrap());
        assert_eq!(pis_identity(&[]).unwrap(), keccak(&[0u8; MAX_PUB_INPUTS * 32]));

        let too_many = vec![FieldBytes::ZERO; MAX_PUB_INPUTS + 1];
        assert!(matches!(pis_identity(&too_many), Err(AggregationError::ShapeMismatch(_))));
    }
}
