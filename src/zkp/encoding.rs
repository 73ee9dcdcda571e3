//! Hex wire format: 32-byte compressed ristretto points and canonical scalars

use super::ProofError;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;

pub const ELEMENT_LEN: usize = 32;

pub fn point_to_hex(point: &RistrettoPoint) -> String {
    hex::encode(point.compress().as_bytes())
}

pub fn point_from_hex(raw: &str) -> Result<RistrettoPoint, ProofError> {
    let bytes = fixed_bytes(raw)?;
    CompressedRistretto(bytes)
        .decompress()
        .ok_or_else(|| ProofError::Encoding("not a valid ristretto point".to_string()))
}

pub fn scalar_to_hex(scalar: &Scalar) -> String {
    hex::encode(scalar.as_bytes())
}

pub fn scalar_from_hex(raw: &str) -> Result<Scalar, ProofError> {
    let bytes = fixed_bytes(raw)?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes))
        .ok_or_else(|| ProofError::Encoding("scalar is not canonical".to_string()))
}

fn fixed_bytes(raw: &str) -> Result<[u8; ELEMENT_LEN], ProofError> {
    let decoded = hex::decode(raw).map_err(|e| ProofError::Encoding(e.to_string()))?;
    decoded.try_into().map_err(|v: Vec<u8>| {
        ProofError::Encoding(format!("expected {} bytes, got {}", ELEMENT_LEN, v.len()))
    })
}

/// `#[serde(with = "point_hex")]`
pub mod point_hex {
    use curve25519_dalek::ristretto::RistrettoPoint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(point: &RistrettoPoint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::point_to_hex(point))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RistrettoPoint, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::point_from_hex(&raw).map_err(D::Error::custom)
    }
}

/// `#[serde(with = "scalar_hex")]`
pub mod scalar_hex {
    use curve25519_dalek::scalar::Scalar;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::scalar_to_hex(scalar))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Scalar, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::scalar_from_hex(&raw).map_err(D::Error::custom)
    }
}
