use crate::ledger::validator::ValidationError;
use crate::zkp::ZkpVote;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type NodeId = String;
pub type TxId = String;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    VoteCast,
    ElectionCreated,
    ElectionEnded,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 3] = [
        TransactionKind::VoteCast,
        TransactionKind::ElectionCreated,
        TransactionKind::ElectionEnded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::VoteCast => "VoteCast",
            TransactionKind::ElectionCreated => "ElectionCreated",
            TransactionKind::ElectionEnded => "ElectionEnded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

/// How a voter expressed their choice.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Ballot {
    /// Candidate index in the clear.
    Plain { candidate_index: u32 },
    /// One bit commitment per candidate slot, with proofs.
    Zkp(ZkpVote),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoteCast {
    pub election_id: String,
    pub voter: String,
    pub ballot: Ballot,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ElectionCreated {
    pub election_id: String,
    pub name: String,
    pub candidates: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub start_time: i64,
    pub end_time: i64,
    pub created_by: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ElectionEnded {
    pub election_id: String,
    pub ended_by: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionPayload {
    VoteCast(VoteCast),
    ElectionCreated(ElectionCreated),
    ElectionEnded(ElectionEnded),
}

impl TransactionPayload {
    pub fn kind(&self) -> TransactionKind {
        match self {
            TransactionPayload::VoteCast(_) => TransactionKind::VoteCast,
            TransactionPayload::ElectionCreated(_) => TransactionKind::ElectionCreated,
            TransactionPayload::ElectionEnded(_) => TransactionKind::ElectionEnded,
        }
    }

    pub fn election_id(&self) -> &str {
        match self {
            TransactionPayload::VoteCast(vote) => &vote.election_id,
            TransactionPayload::ElectionCreated(created) => &created.election_id,
            TransactionPayload::ElectionEnded(ended) => &ended.election_id,
        }
    }
}

/// An immutable election fact recorded on the ledger.
///
/// `id` is the SHA-256 of the canonical `(kind, payload)` encoding, so the
/// same fact submitted twice (to any node) carries the same id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    #[serde(default)]
    pub id: TxId,
    pub kind: TransactionKind,
    pub payload: TransactionPayload,
    pub timestamp: i64,
    #[serde(default)]
    pub origin_node_id: NodeId,
}

impl Transaction {
    pub fn new(payload: TransactionPayload, origin_node_id: impl Into<NodeId>, timestamp: i64) -> Self {
        let kind = payload.kind();
        let mut tx = Transaction {
            id: String::new(),
            kind,
            payload,
            timestamp,
            origin_node_id: origin_node_id.into(),
        };
        tx.id = tx.calculate_id();
        tx
    }

    /// Builds a transaction stamped with the current wall-clock time.
    pub fn now(payload: TransactionPayload, origin_node_id: impl Into<NodeId>) -> Self {
        Self::new(payload, origin_node_id, Utc::now().timestamp_millis())
    }

    pub fn calculate_id(&self) -> TxId {
        let canonical = serde_json::to_string(&(&self.kind, &self.payload)).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical);
        format!("{:x}", hasher.finalize())
    }

    pub fn has_valid_id(&self) -> bool {
        self.id == self.calculate_id()
    }

    /// Fills in the id, timestamp and origin when a client left them blank.
    pub fn complete(&mut self, origin: &str) {
        if self.id.is_empty() {
            self.id = self.calculate_id();
        }
        if self.timestamp == 0 {
            self.timestamp = Utc::now().timestamp_millis();
        }
        if self.origin_node_id.is_empty() {
            self.origin_node_id = origin.to_string();
        }
    }

    pub fn election_id(&self) -> &str {
        self.payload.election_id()
    }

    pub fn zkp_ballot(&self) -> Option<&ZkpVote> {
        match &self.payload {
            TransactionPayload::VoteCast(VoteCast {
                ballot: Ballot::Zkp(vote),
                ..
            }) => Some(vote),
            _ => None,
        }
    }

    /// Decodes a transaction from its JSON wire form.
    ///
    /// Kinds this ledger does not know are reported as `UnknownKind` rather
    /// than a generic decode failure.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        match value.get("kind").and_then(|k| k.as_str()) {
            Some(kind) if TransactionKind::parse(kind).is_none() => {
                return Err(ValidationError::UnknownKind(kind.to_string()));
            }
            None => return Err(ValidationError::MissingField("kind")),
            _ => {}
        }

        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}
