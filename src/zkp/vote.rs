//! One-hot ballots, their verification, and homomorphic tallying

use super::bit_proof::{prove_bit_with_rng, verify_bit, BitProof, SumProof};
use super::pedersen::{PedersenCommitment, Opening};
use super::ProofError;
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotProof {
    pub commitment: PedersenCommitment,
    pub proof: BitProof,
}

/// Public part of a ballot: one `{commitment, proof}` pair per candidate
/// slot, in candidate order, plus the proof that exactly one slot is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkpVote {
    pub slots: Vec<SlotProof>,
    pub sum_proof: SumProof,
}

impl ZkpVote {
    pub fn candidate_count(&self) -> usize {
        self.slots.len()
    }

    pub fn commitments(&self) -> Vec<PedersenCommitment> {
        self.slots.iter().map(|slot| slot.commitment).collect()
    }

    pub fn proofs(&self) -> Vec<BitProof> {
        self.slots.iter().map(|slot| slot.proof.clone()).collect()
    }
}

/// What the voter keeps: their choice and every slot's blinding factor.
#[derive(Clone)]
pub struct VoteSecrets {
    pub candidate_index: usize,
    pub openings: Vec<Opening>,
}

impl VoteSecrets {
    pub fn blinding_for(&self, slot: usize) -> Option<Scalar> {
        self.openings.get(slot).map(|opening| opening.blinding)
    }
}

impl std::fmt::Debug for VoteSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteSecrets")
            .field("candidate_index", &"<redacted>")
            .field("slots", &self.openings.len())
            .finish()
    }
}

pub struct ZkpVoteBuilder {
    candidate_count: usize,
}

impl ZkpVoteBuilder {
    pub fn new(candidate_count: usize) -> Self {
        ZkpVoteBuilder { candidate_count }
    }

    pub fn candidate_count(&self) -> usize {
        self.candidate_count
    }

    pub fn build(&self, candidate_index: usize) -> Result<(ZkpVote, VoteSecrets), ProofError> {
        self.build_with_rng(candidate_index, &mut OsRng)
    }

    pub fn build_with_rng<R: RngCore + CryptoRng>(
        &self,
        candidate_index: usize,
        rng: &mut R,
    ) -> Result<(ZkpVote, VoteSecrets), ProofError> {
        if self.candidate_count == 0 {
            return Err(ProofError::EmptyVote);
        }
        if candidate_index >= self.candidate_count {
            return Err(ProofError::CandidateOutOfRange {
                index: candidate_index,
                count: self.candidate_count,
            });
        }

        let bits: Vec<u64> = (0..self.candidate_count)
            .map(|slot| u64::from(slot == candidate_index))
            .collect();
        let (vote, openings) = commit_bits(&bits, rng)?;
        Ok((
            vote,
            VoteSecrets {
                candidate_index,
                openings,
            },
        ))
    }
}

/// Commits and proves an arbitrary bit vector. Only one-hot vectors produce
/// a ballot that verifies.
pub(crate) fn commit_bits<R: RngCore + CryptoRng>(
    bits: &[u64],
    rng: &mut R,
) -> Result<(ZkpVote, Vec<Opening>), ProofError> {
    let mut slots = Vec::with_capacity(bits.len());
    let mut openings = Vec::with_capacity(bits.len());

    for &bit in bits {
        let (commitment, opening) = PedersenCommitment::commit_bit(bit, rng)?;
        let proof = prove_bit_with_rng(&commitment, bit, &opening.blinding, rng)?;
        slots.push(SlotProof { commitment, proof });
        openings.push(opening);
    }

    let blinding_sum: Scalar = openings.iter().map(|o| o.blinding).sum();
    let commitments: Vec<PedersenCommitment> = slots.iter().map(|s| s.commitment).collect();
    let sum_proof = SumProof::prove(&commitments, &blinding_sum, rng);

    Ok((ZkpVote { slots, sum_proof }, openings))
}

#[derive(Debug, Default, Clone)]
pub struct ZkpVoteVerifier {
    expected_candidates: Option<usize>,
}

impl ZkpVoteVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also require the ballot to have exactly `count` slots.
    pub fn with_candidate_count(mut self, count: usize) -> Self {
        self.expected_candidates = Some(count);
        self
    }

    pub fn verify(&self, vote: &ZkpVote) -> Result<(), ProofError> {
        if vote.slots.is_empty() {
            return Err(ProofError::EmptyVote);
        }
        if let Some(expected) = self.expected_candidates {
            if vote.slots.len() != expected {
                return Err(ProofError::LengthMismatch {
                    commitments: vote.slots.len(),
                    proofs: expected,
                });
            }
        }

        for (slot, entry) in vote.slots.iter().enumerate() {
            if !verify_bit(&entry.commitment, &entry.proof) {
                return Err(ProofError::BitProof { slot });
            }
        }

        if !vote.sum_proof.verify(&vote.commitments()) {
            return Err(ProofError::SumProof);
        }
        Ok(())
    }
}

/// Every slot proves a bit and the slots sum to one.
pub fn verify_vote(
    commitments: &[PedersenCommitment],
    proofs: &[BitProof],
    sum_proof: &SumProof,
) -> bool {
    if commitments.is_empty() || commitments.len() != proofs.len() {
        return false;
    }
    commitments
        .iter()
        .zip(proofs)
        .all(|(commitment, proof)| verify_bit(commitment, proof))
        && sum_proof.verify(commitments)
}

/// Homomorphic sum of one candidate's slot across ballots.
///
/// The result commits to that candidate's vote count under the sum of the
/// voters' blinding factors. Without those it stays verifiable but unopened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyCommitment {
    pub candidate_index: usize,
    pub commitment: PedersenCommitment,
    pub vote_count: usize,
}

impl TallyCommitment {
    pub fn verify_opening(&self, count: u64, blinding_sum: &Scalar) -> bool {
        self.commitment.verify_opening(count, blinding_sum)
    }

    /// Recovers the count given the summed blindings, if it is in range.
    pub fn open_with(&self, blinding_sum: &Scalar) -> Option<u64> {
        (0..=self.vote_count as u64).find(|count| self.verify_opening(*count, blinding_sum))
    }
}

pub fn tally(candidate_index: usize, votes: &[ZkpVote]) -> Result<TallyCommitment, ProofError> {
    let mut sum = PedersenCommitment::identity();
    for vote in votes {
        let slot = vote
            .slots
            .get(candidate_index)
            .ok_or(ProofError::CandidateOutOfRange {
                index: candidate_index,
                count: vote.slots.len(),
            })?;
        sum = sum + slot.commitment;
    }
    Ok(TallyCommitment {
        candidate_index,
        commitment: sum,
        vote_count: votes.len(),
    })
}

/// Receipt handed to the voter: SHA-256 over voter, election and the
/// ordered slot commitments.
pub fn verification_hash(voter: &str, election_id: &str, vote: &ZkpVote) -> String {
    let mut hasher = Sha256::new();
    hasher.update(voter.as_bytes());
    hasher.update(election_id.as_bytes());
    for slot in &vote.slots {
        hasher.update(slot.commitment.to_hex());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hot_vote_verifies() {
        for choice in 0..4 {
            let (vote, secrets) = ZkpVoteBuilder::new(4).build(choice).unwrap();
            assert_eq!(vote.candidate_count(), 4);
            assert_eq!(secrets.candidate_index, choice);
            assert!(ZkpVoteVerifier::new().verify(&vote).is_ok());
            assert!(verify_vote(&vote.commitments(), &vote.proofs(), &vote.sum_proof));
        }
    }

    #[test]
    fn test_zero_or_two_ones_fail() {
        let (none, _) = commit_bits(&[0, 0, 0], &mut OsRng).unwrap();
        let (two, _) = commit_bits(&[1, 0, 1], &mut OsRng).unwrap();

        assert_eq!(ZkpVoteVerifier::new().verify(&none), Err(ProofError::SumProof));
        assert_eq!(ZkpVoteVerifier::new().verify(&two), Err(ProofError::SumProof));
        assert!(!verify_vote(&two.commitments(), &two.proofs(), &two.sum_proof));
    }

    #[test]
    fn test_builder_bounds() {
        assert_eq!(
            ZkpVoteBuilder::new(3).build(3).err(),
            Some(ProofError::CandidateOutOfRange { index: 3, count: 3 })
        );
        assert_eq!(ZkpVoteBuilder::new(0).build(0).err(), Some(ProofError::EmptyVote));
    }

    #[test]
    fn test_verifier_catches_bad_slot() {
        let (mut vote, _) = ZkpVoteBuilder::new(3).build(1).unwrap();
        let (other, _) = ZkpVoteBuilder::new(3).build(1).unwrap();
        vote.slots[2].proof = other.slots[2].proof.clone();
        assert_eq!(
            ZkpVoteVerifier::new().verify(&vote),
            Err(ProofError::BitProof { slot: 2 })
        );
    }

    #[test]
    fn test_verifier_checks_candidate_count() {
        let (vote, _) = ZkpVoteBuilder::new(3).build(0).unwrap();
        assert!(ZkpVoteVerifier::new().with_candidate_count(3).verify(&vote).is_ok());
        assert!(ZkpVoteVerifier::new().with_candidate_count(4).verify(&vote).is_err());
        assert!(!verify_vote(&vote.commitments(), &vote.proofs()[..2], &vote.sum_proof));
    }

    #[test]
    fn test_tally_opens_to_count() {
        let choices = [0usize, 2, 2, 1, 2];
        let ballots: Vec<(ZkpVote, VoteSecrets)> = choices
            .iter()
            .map(|&c| ZkpVoteBuilder::new(3).build(c).unwrap())
            .collect();
        let votes: Vec<ZkpVote> = ballots.iter().map(|(v, _)| v.clone()).collect();

        for candidate in 0..3 {
            let result = tally(candidate, &votes).unwrap();
            let blinding_sum: Scalar = ballots
                .iter()
                .map(|(_, s)| s.blinding_for(candidate).unwrap())
                .sum();
            let expected = choices.iter().filter(|&&c| c == candidate).count() as u64;

            assert_eq!(result.vote_count, 5);
            assert!(result.verify_opening(expected, &blinding_sum));
            assert_eq!(result.open_with(&blinding_sum), Some(expected));
            assert_eq!(result.open_with(&Scalar::ZERO), None);
        }
    }

    #[test]
    fn test_tally_out_of_range() {
        let (vote, _) = ZkpVoteBuilder::new(2).build(0).unwrap();
        assert!(tally(5, &[vote]).is_err());
        assert_eq!(tally(0, &[]).unwrap().commitment, PedersenCommitment::identity());
    }

    #[test]
    fn test_verification_hash() {
        let (vote, _) = ZkpVoteBuilder::new(2).build(0).unwrap();
        let a = verification_hash("alice", "e1", &vote);
        assert_eq!(a.len(), 64);
        assert_eq!(a, verification_hash("alice", "e1", &vote));
        assert_ne!(a, verification_hash("bob", "e1", &vote));
    }

    #[test]
    fn test_wire_round_trip_keeps_validity() {
        let (vote, _) = ZkpVoteBuilder::new(3).build(2).unwrap();
        let json = serde_json::to_string(&vote).unwrap();
        let decoded: ZkpVote = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, vote);
        assert!(ZkpVoteVerifier::new().verify(&decoded).is_ok());
    }

    #[test]
    fn test_secrets_debug_is_redacted() {
        let (_, secrets) = ZkpVoteBuilder::new(2).build(1).unwrap();
        let rendered = format!("{:?}", secrets);
        assert!(rendered.contains("redacted"));
    }
}
