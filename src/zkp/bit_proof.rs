//! Non-interactive proofs over Pedersen commitments
//!
//! `BitProof` is a Cramer–Damgård–Schoenmakers OR-composition of two
//! Schnorr proofs: "`C` is `r·H`" or "`C − G` is `r·H`". The prover answers
//! the true branch honestly and simulates the other; the verifier only
//! learns that one of them holds. The Fiat–Shamir challenge is split as
//! `e = e0 + e1` and binds the commitment and both nonces.
//!
//! `SumProof` is a plain Schnorr proof of knowledge of `R` with
//! `ΣC − G = R·H`, which pins the slot bits to a total of exactly one.

use super::encoding::{point_hex, scalar_hex};
use super::pedersen::{generator_g, generator_h, PedersenCommitment};
use super::ProofError;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

const BIT_DOMAIN: &[u8] = b"dplt.zkp.bit-proof.v1";
const SUM_DOMAIN: &[u8] = b"dplt.zkp.sum-proof.v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitProof {
    #[serde(with = "point_hex")]
    pub a0: RistrettoPoint,
    #[serde(with = "point_hex")]
    pub a1: RistrettoPoint,
    #[serde(with = "scalar_hex")]
    pub e0: Scalar,
    #[serde(with = "scalar_hex")]
    pub e1: Scalar,
    #[serde(with = "scalar_hex")]
    pub z0: Scalar,
    #[serde(with = "scalar_hex")]
    pub z1: Scalar,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumProof {
    #[serde(with = "point_hex")]
    pub a: RistrettoPoint,
    #[serde(with = "scalar_hex")]
    pub z: Scalar,
}

fn bit_challenge(commitment: &PedersenCommitment, a0: &RistrettoPoint, a1: &RistrettoPoint) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(BIT_DOMAIN);
    hasher.update(commitment.to_bytes());
    hasher.update(a0.compress().as_bytes());
    hasher.update(a1.compress().as_bytes());
    let wide: [u8; 64] = hasher.finalize().into();
    Scalar::from_bytes_mod_order_wide(&wide)
}

fn sum_challenge(commitments: &[PedersenCommitment], a: &RistrettoPoint) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(SUM_DOMAIN);
    hasher.update((commitments.len() as u64).to_le_bytes());
    for commitment in commitments {
        hasher.update(commitment.to_bytes());
    }
    hasher.update(a.compress().as_bytes());
    let wide: [u8; 64] = hasher.finalize().into();
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Proves that `commitment` opens to `bit` (0 or 1) under `blinding`,
/// without revealing `bit`.
pub fn prove_bit(
    commitment: &PedersenCommitment,
    bit: u64,
    blinding: &Scalar,
) -> Result<BitProof, ProofError> {
    prove_bit_with_rng(commitment, bit, blinding, &mut OsRng)
}

pub fn prove_bit_with_rng<R: RngCore + CryptoRng>(
    commitment: &PedersenCommitment,
    bit: u64,
    blinding: &Scalar,
    rng: &mut R,
) -> Result<BitProof, ProofError> {
    if bit > 1 {
        return Err(ProofError::InvalidBit(bit));
    }
    if !commitment.verify_opening(bit, blinding) {
        return Err(ProofError::OpeningMismatch);
    }

    let g = generator_g();
    let h = generator_h();
    let c = *commitment.point();
    // statement for branch j is Y_j = C - j·G = r·H
    let targets = [c, c - g];
    let real = bit as usize;
    let fake = 1 - real;

    let nonce = Scalar::random(rng);
    let e_fake = Scalar::random(rng);
    let z_fake = Scalar::random(rng);

    let mut a = [RistrettoPoint::default(); 2];
    a[real] = nonce * h;
    a[fake] = z_fake * h - e_fake * targets[fake];

    let e = bit_challenge(commitment, &a[0], &a[1]);
    let e_real = e - e_fake;
    let z_real = nonce + e_real * blinding;

    let mut es = [Scalar::ZERO; 2];
    let mut zs = [Scalar::ZERO; 2];
    es[real] = e_real;
    es[fake] = e_fake;
    zs[real] = z_real;
    zs[fake] = z_fake;

    Ok(BitProof {
        a0: a[0],
        a1: a[1],
        e0: es[0],
        e1: es[1],
        z0: zs[0],
        z1: zs[1],
    })
}

pub fn verify_bit(commitment: &PedersenCommitment, proof: &BitProof) -> bool {
    let g = generator_g();
    let h = generator_h();
    let c = *commitment.point();

    let e = bit_challenge(commitment, &proof.a0, &proof.a1);
    if proof.e0 + proof.e1 != e {
        return false;
    }

    proof.z0 * h == proof.a0 + proof.e0 * c && proof.z1 * h == proof.a1 + proof.e1 * (c - g)
}

impl BitProof {
    pub fn verify(&self, commitment: &PedersenCommitment) -> bool {
        verify_bit(commitment, self)
    }
}

impl SumProof {
    /// Proves the commitments add up to `1·G + blinding_sum·H`.
    pub fn prove<R: RngCore + CryptoRng>(
        commitments: &[PedersenCommitment],
        blinding_sum: &Scalar,
        rng: &mut R,
    ) -> SumProof {
        let h = generator_h();
        let nonce = Scalar::random(rng);
        let a = nonce * h;
        let e = sum_challenge(commitments, &a);
        SumProof {
            a,
            z: nonce + e * blinding_sum,
        }
    }

    pub fn verify(&self, commitments: &[PedersenCommitment]) -> bool {
        let total: PedersenCommitment = commitments.iter().sum();
        let target = total.point() - generator_g();
        let e = sum_challenge(commitments, &self.a);
        self.z * generator_h() == self.a + e * target
    }
}
