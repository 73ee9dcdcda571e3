use super::encoding::{self, point_hex};
use super::ProofError;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::iter::Sum;
use std::ops::Add;
use std::sync::LazyLock;

const GENERATOR_H_DOMAIN: &[u8] = b"dplt.zkp.pedersen.generator-h.v1";

// H = hash-to-group(domain || G), so nobody knows log_G(H).
static GENERATOR_H: LazyLock<RistrettoPoint> = LazyLock::new(|| {
    let mut hasher = Sha512::new();
    hasher.update(GENERATOR_H_DOMAIN);
    hasher.update(RISTRETTO_BASEPOINT_POINT.compress().as_bytes());
    let wide: [u8; 64] = hasher.finalize().into();
    RistrettoPoint::from_uniform_bytes(&wide)
});

pub fn generator_g() -> RistrettoPoint {
    RISTRETTO_BASEPOINT_POINT
}

pub fn generator_h() -> RistrettoPoint {
    *GENERATOR_H
}

/// `C = value·G + blinding·H`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PedersenCommitment(#[serde(with = "point_hex")] RistrettoPoint);

/// The private half of a commitment, kept by whoever created it.
#[derive(Clone, PartialEq, Eq)]
pub struct Opening {
    pub value: u64,
    pub blinding: Scalar,
}

impl std::fmt::Debug for Opening {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opening")
            .field("value", &self.value)
            .field("blinding", &"<redacted>")
            .finish()
    }
}

impl PedersenCommitment {
    pub fn commit(value: u64, blinding: &Scalar) -> Self {
        PedersenCommitment(Scalar::from(value) * generator_g() + blinding * generator_h())
    }

    /// Commits to a single bit with a fresh uniformly random blinding.
    pub fn commit_bit<R: RngCore + CryptoRng>(
        bit: u64,
        rng: &mut R,
    ) -> Result<(Self, Opening), ProofError> {
        if bit > 1 {
            return Err(ProofError::InvalidBit(bit));
        }
        let blinding = Scalar::random(rng);
        Ok((Self::commit(bit, &blinding), Opening { value: bit, blinding }))
    }

    pub fn identity() -> Self {
        PedersenCommitment(RistrettoPoint::identity())
    }

    pub fn point(&self) -> &RistrettoPoint {
        &self.0
    }

    pub fn verify_opening(&self, value: u64, blinding: &Scalar) -> bool {
        *self == Self::commit(value, blinding)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.compress().to_bytes()
    }

    pub fn to_hex(&self) -> String {
        encoding::point_to_hex(&self.0)
    }

    pub fn from_hex(raw: &str) -> Result<Self, ProofError> {
        encoding::point_from_hex(raw).map(PedersenCommitment)
    }
}

impl Add for PedersenCommitment {
    type Output = PedersenCommitment;

    fn add(self, other: PedersenCommitment) -> PedersenCommitment {
        PedersenCommitment(self.0 + other.0)
    }
}

impl Sum for PedersenCommitment {
    fn sum<I: Iterator<Item = PedersenCommitment>>(iter: I) -> Self {
        iter.fold(PedersenCommitment::identity(), Add::add)
    }
}

impl<'a> Sum<&'a PedersenCommitment> for PedersenCommitment {
    fn sum<I: Iterator<Item = &'a PedersenCommitment>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_generators_are_independent() {
        assert_ne!(generator_g(), generator_h());
        assert_ne!(generator_h(), RistrettoPoint::identity());
        assert_eq!(generator_h(), generator_h());
    }

    #[test]
    fn test_commit_bit_opens() {
        let (commitment, opening) = PedersenCommitment::commit_bit(1, &mut OsRng).unwrap();
        assert!(commitment.verify_opening(1, &opening.blinding));
        assert!(!commitment.verify_opening(0, &opening.blinding));
        assert!(PedersenCommitment::commit_bit(2, &mut OsRng).is_err());
    }

    #[test]
    fn test_blinding_hides_equal_values() {
        let (a, _) = PedersenCommitment::commit_bit(1, &mut OsRng).unwrap();
        let (b, _) = PedersenCommitment::commit_bit(1, &mut OsRng).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_homomorphic_sum() {
        let r1 = Scalar::random(&mut OsRng);
        let r2 = Scalar::random(&mut OsRng);
        let r3 = Scalar::random(&mut OsRng);
        let parts = [
            PedersenCommitment::commit(1, &r1),
            PedersenCommitment::commit(0, &r2),
            PedersenCommitment::commit(1, &r3),
        ];

        let total: PedersenCommitment = parts.iter().sum();
        assert!(total.verify_opening(2, &(r1 + r2 + r3)));
    }

    #[test]
    fn test_hex_encoding() {
        let commitment = PedersenCommitment::commit(1, &Scalar::from(9u64));
        let encoded = commitment.to_hex();
        assert_eq!(encoded.len(), 64);
        assert_eq!(PedersenCommitment::from_hex(&encoded).unwrap(), commitment);

        let json = serde_json::to_string(&commitment).unwrap();
        assert_eq!(json, format!("\"{}\"", encoded));
    }

    #[test]
    fn test_opening_debug_redacts_blinding() {
        let opening = Opening {
            value: 1,
            blinding: Scalar::from(5u64),
        };
        assert!(format!("{:?}", opening).contains("redacted"));
    }
}
