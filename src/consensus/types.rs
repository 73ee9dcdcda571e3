//! Consensus types and data structures

use crate::ledger::{BlockSummary, NodeId, NodeStatus};
use serde::Serialize;
use thiserror::Error;

/// Where the current block round is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RoundPhase {
    Idle,
    LeaderSelected,
    BlockProduced,
    Propagated,
    Reconciled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Cadence gate closed; the round was a no-op.
    NotDue { remaining_ms: i64 },
    /// The leader had nothing pending.
    NoTransactions { leader: NodeId },
    Produced(BlockSummary),
}

impl RoundOutcome {
    pub fn block(&self) -> Option<&BlockSummary> {
        match self {
            RoundOutcome::Produced(summary) => Some(summary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    InSync,
    /// Rolled back to `fork_point` and replayed `replayed` reference blocks.
    Incremental { fork_point: u64, replayed: usize },
    /// Rebuilt from genesis; `length` is the resulting chain length.
    Rebuilt { length: usize },
    Failed(ConsensusError),
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub reference: Option<NodeId>,
    pub actions: Vec<(NodeId, SyncAction)>,
    pub consistent: bool,
}

impl SyncReport {
    pub fn failures(&self) -> impl Iterator<Item = &(NodeId, SyncAction)> {
        self.actions
            .iter()
            .filter(|(_, action)| matches!(action, SyncAction::Failed(_)))
    }

    pub fn changed(&self) -> usize {
        self.actions
            .iter()
            .filter(|(_, action)| {
                matches!(action, SyncAction::Incremental { .. } | SyncAction::Rebuilt { .. })
            })
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkConsistency {
    pub consistent: bool,
    pub node_count: usize,
    pub block_count: usize,
    pub next_round_in_millis: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStats {
    pub node_count: usize,
    pub block_count: usize,
    pub pending_transactions: usize,
    pub processed_transactions: usize,
    pub last_block_time: Option<i64>,
    pub consistent: bool,
    pub block_interval_ms: i64,
    pub sync_interval_ms: i64,
    pub next_round_in_millis: i64,
    pub phase: RoundPhase,
    pub nodes: Vec<NodeStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RecoveryStatus {
    Reference,
    Synchronized,
    Failed(String),
    ResetToGenesis,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub reference: Option<NodeId>,
    pub nodes: Vec<(NodeId, RecoveryStatus)>,
}

impl RecoveryReport {
    pub fn is_success(&self) -> bool {
        !self
            .nodes
            .iter()
            .any(|(_, status)| matches!(status, RecoveryStatus::Failed(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("no node holds a valid chain, falling back to {fallback}")]
    Stall { fallback: NodeId },
    #[error("node {node} could not be reconciled: {reason}")]
    Divergence { node: NodeId, reason: String },
    #[error("consensus needs at least one node")]
    NoNodes,
}
