use crate::ledger::transaction::{
    Ballot, ElectionCreated, ElectionEnded, Transaction, TransactionKind, TransactionPayload, TxId,
    VoteCast,
};
use crate::zkp::{ProofError, ZkpVoteVerifier};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("election needs at least {min} candidates, got {got}")]
    TooFewCandidates { min: usize, got: usize },
    #[error("candidate #{0} has an empty name")]
    EmptyCandidate(usize),
    #[error("election start {start} is not before its end {end}")]
    InvalidWindow { start: i64, end: i64 },
    #[error("election start {start} is already in the past at creation time {created}")]
    StartInPast { start: i64, created: i64 },
    #[error("transaction kind {kind:?} does not match its {payload:?} payload")]
    KindMismatch {
        kind: TransactionKind,
        payload: TransactionKind,
    },
    #[error("unknown transaction kind `{0}`")]
    UnknownKind(String),
    #[error("malformed transaction: {0}")]
    Malformed(String),
    #[error("transaction id {claimed} does not match content hash {computed}")]
    IdMismatch { claimed: TxId, computed: TxId },
    #[error("invalid vote commitment bundle: {0}")]
    Proof(#[from] ProofError),
    #[error("invalid block #{index}: {reason}")]
    InvalidBlock { index: u64, reason: String },
    #[error("transaction {0} is already recorded")]
    DuplicateTransaction(TxId),
}

/// Stateless per-kind transaction rules.
///
/// Voter eligibility and double-vote checks belong to the registry in front
/// of the ledger; this only judges whether a transaction is well formed.
#[derive(Debug, Clone)]
pub struct Validator {
    min_candidates: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub const MIN_CANDIDATES: usize = 2;

    pub fn new() -> Self {
        Validator {
            min_candidates: Self::MIN_CANDIDATES,
        }
    }

    /// Raises the candidate floor. Values below two are ignored.
    pub fn with_min_candidates(mut self, min: usize) -> Self {
        self.min_candidates = min.max(Self::MIN_CANDIDATES);
        self
    }

    pub fn min_candidates(&self) -> usize {
        self.min_candidates
    }

    pub fn is_valid(&self, tx: &Transaction) -> bool {
        self.validate(tx).is_ok()
    }

    pub fn validate(&self, tx: &Transaction) -> Result<(), ValidationError> {
        if tx.id.is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        let computed = tx.calculate_id();
        if tx.id != computed {
            return Err(ValidationError::IdMismatch {
                claimed: tx.id.clone(),
                computed,
            });
        }
        if tx.kind != tx.payload.kind() {
            return Err(ValidationError::KindMismatch {
                kind: tx.kind,
                payload: tx.payload.kind(),
            });
        }

        match &tx.payload {
            TransactionPayload::VoteCast(vote) => self.validate_vote(vote),
            TransactionPayload::ElectionCreated(created) => {
                self.validate_election_created(created, tx.timestamp)
            }
            TransactionPayload::ElectionEnded(ended) => self.validate_election_ended(ended),
        }
    }

    pub fn validate_vote(&self, vote: &VoteCast) -> Result<(), ValidationError> {
        require(&vote.election_id, "election_id")?;
        require(&vote.voter, "voter")?;

        match &vote.ballot {
            Ballot::Plain { .. } => Ok(()),
            Ballot::Zkp(bundle) => {
                ZkpVoteVerifier::new().verify(bundle)?;
                Ok(())
            }
        }
    }

    pub fn validate_election_created(
        &self,
        created: &ElectionCreated,
        created_at: i64,
    ) -> Result<(), ValidationError> {
        require(&created.election_id, "election_id")?;
        require(&created.name, "name")?;
        require(&created.created_by, "created_by")?;

        if created.candidates.len() < self.min_candidates {
            return Err(ValidationError::TooFewCandidates {
                min: self.min_candidates,
                got: created.candidates.len(),
            });
        }
        if let Some(position) = created.candidates.iter().position(|c| c.trim().is_empty()) {
            return Err(ValidationError::EmptyCandidate(position));
        }

        if created.start_time >= created.end_time {
            return Err(ValidationError::InvalidWindow {
                start: created.start_time,
                end: created.end_time,
            });
        }
        if created.start_time < created_at {
            return Err(ValidationError::StartInPast {
                start: created.start_time,
                created: created_at,
            });
        }

        Ok(())
    }

    pub fn validate_election_ended(&self, ended: &ElectionEnded) -> Result<(), ValidationError> {
        require(&ended.election_id, "election_id")?;
        require(&ended.ended_by, "ended_by")?;
        Ok(())
    }
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zkp::ZkpVoteBuilder;

    const NOW: i64 = 1_700_000_000_000;

    fn election(start: i64, end: i64) -> TransactionPayload {
        TransactionPayload::ElectionCreated(ElectionCreated {
            election_id: "e1".to_string(),
            name: "Board".to_string(),
            candidates: vec!["Ada".to_string(), "Grace".to_string()],
            start_time: start,
            end_time: end,
            created_by: "admin".to_string(),
        })
    }

    fn vote(voter: &str, ballot: Ballot) -> TransactionPayload {
        TransactionPayload::VoteCast(VoteCast {
            election_id: "e1".to_string(),
            voter: voter.to_string(),
            ballot,
        })
    }

    #[test]
    fn test_valid_election() {
        let validator = Validator::new();
        let tx = Transaction::new(election(NOW + 1_000, NOW + 60_000), "node-1", NOW);
        assert!(validator.validate(&tx).is_ok());
    }

    #[test]
    fn test_election_starting_in_the_past() {
        let validator = Validator::new();
        let tx = Transaction::new(election(NOW - 1_000, NOW + 60_000), "node-1", NOW);
        assert_eq!(
            validator.validate(&tx),
            Err(ValidationError::StartInPast {
                start: NOW - 1_000,
                created: NOW
            })
        );
    }

    #[test]
    fn test_election_with_empty_window() {
        let validator = Validator::new();
        let same = Transaction::new(election(NOW + 5_000, NOW + 5_000), "node-1", NOW);
        let reversed = Transaction::new(election(NOW + 5_000, NOW + 1_000), "node-1", NOW);
        assert!(matches!(
            validator.validate(&same),
            Err(ValidationError::InvalidWindow { .. })
        ));
        assert!(matches!(
            validator.validate(&reversed),
            Err(ValidationError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_election_candidates() {
        let validator = Validator::new();
        let mut payload = election(NOW + 1, NOW + 2);
        if let TransactionPayload::ElectionCreated(created) = &mut payload {
            created.candidates = vec!["Solo".to_string()];
        }
        let tx = Transaction::new(payload.clone(), "node-1", NOW);
        assert_eq!(
            validator.validate(&tx),
            Err(ValidationError::TooFewCandidates { min: 2, got: 1 })
        );

        if let TransactionPayload::ElectionCreated(created) = &mut payload {
            created.candidates = vec!["Ada".to_string(), " ".to_string()];
        }
        let tx = Transaction::new(payload, "node-1", NOW);
        assert_eq!(validator.validate(&tx), Err(ValidationError::EmptyCandidate(1)));
    }

    #[test]
    fn test_with_min_candidates() {
        let validator = Validator::new().with_min_candidates(3);
        assert_eq!(validator.min_candidates(), 3);
        let tx = Transaction::new(election(NOW + 1, NOW + 2), "node-1", NOW);
        assert!(!validator.is_valid(&tx));

        assert_eq!(Validator::new().with_min_candidates(0).min_candidates(), 2);
    }

    #[test]
    fn test_plain_vote_requires_voter() {
        let validator = Validator::new();
        let ok = Transaction::new(vote("alice", Ballot::Plain { candidate_index: 1 }), "node-1", NOW);
        let anonymous = Transaction::new(vote("", Ballot::Plain { candidate_index: 1 }), "node-1", NOW);
        assert!(validator.is_valid(&ok));
        assert_eq!(
            validator.validate(&anonymous),
            Err(ValidationError::MissingField("voter"))
        );
    }

    #[test]
    fn test_zkp_vote_is_verified() {
        let validator = Validator::new();
        let (bundle, _) = ZkpVoteBuilder::new(3).build(2).unwrap();
        let ok = Transaction::new(vote("alice", Ballot::Zkp(bundle.clone())), "node-1", NOW);
        assert!(validator.is_valid(&ok));

        let mut forged = bundle;
        forged.slots.swap(0, 2);
        let tx = Transaction::new(vote("alice", Ballot::Zkp(forged)), "node-1", NOW);
        assert!(matches!(validator.validate(&tx), Err(ValidationError::Proof(_))));
    }

    #[test]
    fn test_election_ended_requires_fields() {
        let validator = Validator::new();
        let tx = Transaction::new(
            TransactionPayload::ElectionEnded(ElectionEnded {
                election_id: "e1".to_string(),
                ended_by: String::new(),
            }),
            "node-1",
            NOW,
        );
        assert_eq!(
            validator.validate(&tx),
            Err(ValidationError::MissingField("ended_by"))
        );
    }

    #[test]
    fn test_tampered_id_and_kind() {
        let validator = Validator::new();
        let mut tx = Transaction::new(election(NOW + 1, NOW + 2), "node-1", NOW);
        tx.kind = TransactionKind::ElectionEnded;
        assert!(matches!(
            validator.validate(&tx),
            Err(ValidationError::IdMismatch { .. })
        ));

        tx.id = tx.calculate_id();
        assert!(matches!(
            validator.validate(&tx),
            Err(ValidationError::KindMismatch { .. })
        ));
    }
}
