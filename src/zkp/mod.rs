//! Privacy-preserving vote commitments
//!
//! Each ballot is a one-hot vector of Pedersen commitments over ristretto255,
//! one per candidate slot. Every slot carries a disjunctive proof that it
//! commits to 0 or 1 without saying which, and the ballot carries one more
//! proof that the slots add up to exactly one vote.
//!
//! ## Structure
//! - `encoding.rs` - fixed-width hex wire format for points and scalars
//! - `pedersen.rs` - generators and `PedersenCommitment`
//! - `bit_proof.rs` - `BitProof` (0-or-1) and `SumProof` (slots sum to 1)
//! - `vote.rs` - builder, verifier, homomorphic tally

pub mod bit_proof;
pub mod encoding;
pub mod pedersen;
pub mod vote;

pub use bit_proof::{prove_bit, verify_bit, BitProof, SumProof};
pub use pedersen::{generator_g, generator_h, Opening, PedersenCommitment};
pub use vote::{
    tally, verification_hash, verify_vote, SlotProof, TallyCommitment, VoteSecrets, ZkpVote,
    ZkpVoteBuilder, ZkpVoteVerifier,
};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProofError {
    #[error("committed value must be 0 or 1, got {0}")]
    InvalidBit(u64),
    #[error("commitment does not open to the supplied value and blinding")]
    OpeningMismatch,
    #[error("bit proof for slot {slot} failed verification")]
    BitProof { slot: usize },
    #[error("slot commitments do not add up to exactly one vote")]
    SumProof,
    #[error("vote has no candidate slots")]
    EmptyVote,
    #[error("{commitments} commitments but {proofs} proofs")]
    LengthMismatch { commitments: usize, proofs: usize },
    #[error("candidate index {index} out of range for {count} candidates")]
    CandidateOutOfRange { index: usize, count: usize },
    #[error("malformed encoding: {0}")]
    Encoding(String),
}
