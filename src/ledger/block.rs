use crate::ledger::transaction::{NodeId, Transaction, TxId};
use crate::ledger::validator::ValidationError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_PRODUCER: &str = "genesis";
pub const GENESIS_TIMESTAMP: i64 = 0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub hash: String,
    pub producer_id: NodeId,
}

/// Lightweight view of a block for API consumers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub index: u64,
    pub timestamp: i64,
    pub hash: String,
    pub previous_hash: String,
    pub producer_id: NodeId,
    pub transaction_count: usize,
}

impl Block {
    pub fn new(
        index: u64,
        timestamp: i64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        producer_id: NodeId,
    ) -> Self {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            hash: String::new(),
            producer_id,
        };
        block.seal();
        block
    }

    /// The genesis block every node starts from. Identical everywhere.
    pub fn genesis() -> Self {
        Self::new(
            0,
            GENESIS_TIMESTAMP,
            Vec::new(),
            GENESIS_PREVIOUS_HASH.to_string(),
            GENESIS_PRODUCER.to_string(),
        )
    }

    pub fn calculate_hash(&self) -> String {
        let canonical = serde_json::to_string(&(
            self.index,
            self.timestamp,
            &self.transactions,
            &self.previous_hash,
            &self.producer_id,
        ))
        .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical);
        format!("{:x}", hasher.finalize())
    }

    pub fn seal(&mut self) {
        self.hash = self.calculate_hash();
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// True when `self` is the direct successor of `parent`.
    pub fn extends(&self, parent: &Block) -> bool {
        self.index == parent.index + 1 && self.previous_hash == parent.hash
    }

    /// Hash and shape checks that need no chain context.
    pub fn check_structure(&self) -> Result<(), ValidationError> {
        if !self.has_valid_hash() {
            return Err(self.invalid("hash does not match contents"));
        }
        if self.producer_id.is_empty() {
            return Err(self.invalid("missing producer id"));
        }
        if self.previous_hash.is_empty() {
            return Err(self.invalid("missing previous hash"));
        }
        if !self.is_genesis() && self.transactions.is_empty() {
            return Err(self.invalid("only genesis may be empty"));
        }
        Ok(())
    }

    pub fn transaction_ids(&self) -> impl Iterator<Item = &TxId> {
        self.transactions.iter().map(|tx| &tx.id)
    }

    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            index: self.index,
            timestamp: self.timestamp,
            hash: self.hash.clone(),
            previous_hash: self.previous_hash.clone(),
            producer_id: self.producer_id.clone(),
            transaction_count: self.transactions.len(),
        }
    }

    fn invalid(&self, reason: &str) -> ValidationError {
        ValidationError::InvalidBlock {
            index: self.index,
            reason: reason.to_string(),
        }
    }
}
