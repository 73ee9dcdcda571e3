//! Block rounds and fork resolution across a set of ledger nodes
//!
//! The coordinator never touches node internals. It only calls the public
//! `LedgerNode` operations: produce, receive, validate, roll back, rebuild.
//!
//! ## Structure
//! - `traits.rs` - `LeaderSchedule` and the round-robin schedule
//! - `types.rs` - round phases, reports, `ConsensusError`
//! - `tests.rs` - multi-node scenarios

pub use traits::{LeaderSchedule, RoundRobinSchedule};
pub use types::{
    ConsensusError, NetworkConsistency, NetworkStats, RecoveryReport, RecoveryStatus,
    RoundOutcome, RoundPhase, SyncAction, SyncReport,
};


mod traits;
mod types;

use crate::ledger::{Block, BlockReception, LedgerNode, NodeId};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Chains further apart than this are rebuilt instead of patched.
pub const MAX_INCREMENTAL_GAP: usize = 2;

#[derive(Debug)]
struct RoundState {
    phase: RoundPhase,
    last_block_time: Option<i64>,
}

pub struct ConsensusCoordinator {
    nodes: Vec<Arc<LedgerNode>>,
    schedule: Box<dyn LeaderSchedule>,
    block_interval_ms: i64,
    sync_interval_ms: i64,
    round: Mutex<RoundState>,
    sync_lock: Mutex<()>,
}

impl ConsensusCoordinator {
    pub fn new(
        nodes: Vec<Arc<LedgerNode>>,
        block_interval: Duration,
        sync_interval: Duration,
    ) -> Result<Self, ConsensusError> {
        if nodes.is_empty() {
            return Err(ConsensusError::NoNodes);
        }
        Ok(ConsensusCoordinator {
            nodes,
            schedule: Box::new(RoundRobinSchedule),
            block_interval_ms: millis(block_interval),
            sync_interval_ms: millis(sync_interval),
            round: Mutex::new(RoundState {
                phase: RoundPhase::Idle,
                last_block_time: None,
            }),
            sync_lock: Mutex::new(()),
        })
    }

    pub fn with_schedule(mut self, schedule: impl LeaderSchedule + 'static) -> Self {
        self.schedule = Box::new(schedule);
        self
    }

    pub fn nodes(&self) -> &[Arc<LedgerNode>] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Arc<LedgerNode>> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    pub fn block_interval_ms(&self) -> i64 {
        self.block_interval_ms
    }

    pub fn sync_interval_ms(&self) -> i64 {
        self.sync_interval_ms
    }

    pub fn phase(&self) -> RoundPhase {
        self.round.lock().phase
    }

    pub fn last_block_time(&self) -> Option<i64> {
        self.round.lock().last_block_time
    }

    pub fn run_round(&self) -> RoundOutcome {
        self.run_round_at(Utc::now().timestamp_millis())
    }

    /// One block round: cadence gate, pre-round consistency, leader,
    /// production, propagation, post-round consistency.
    pub fn run_round_at(&self, now_ms: i64) -> RoundOutcome {
        let mut round = self.round.lock();

        if let Some(last) = round.last_block_time {
            let elapsed = now_ms - last;
            if elapsed < self.block_interval_ms {
                let remaining_ms = self.block_interval_ms - elapsed;
                debug!(remaining_ms, "Block round not due yet");
                return RoundOutcome::NotDue { remaining_ms };
            }
        }

        if !self.all_consistent() {
            info!("Nodes disagree before block round, reconciling first");
            self.reconcile();
        }

        let leader = self.select_leader(now_ms);
        advance(&mut round, RoundPhase::LeaderSelected);
        debug!(leader = %leader.id(), schedule = self.schedule.name(), "Leader selected");

        let Some(block) = leader.produce_block(now_ms) else {
            advance(&mut round, RoundPhase::Idle);
            return RoundOutcome::NoTransactions {
                leader: leader.id().to_string(),
            };
        };
        round.last_block_time = Some(now_ms);
        advance(&mut round, RoundPhase::BlockProduced);

        for node in self.nodes.iter().filter(|n| n.id() != leader.id()) {
            match node.receive_block(block.clone()) {
                BlockReception::Applied | BlockReception::Duplicate => {}
                BlockReception::ForkSignal => {
                    debug!(node_id = %node.id(), block_index = block.index, "Left for reconciliation");
                }
                BlockReception::Rejected(e) => {
                    warn!(node_id = %node.id(), block_index = block.index, error = %e, "Peer rejected block");
                }
            }
        }
        advance(&mut round, RoundPhase::Propagated);

        if !self.all_consistent() {
            warn!(block_index = block.index, "Nodes still disagree after propagation, scheduling resync");
            self.reconcile();
        }
        advance(&mut round, RoundPhase::Reconciled);

        info!(
            leader = %leader.id(),
            block_index = block.index,
            tx_count = block.transactions.len(),
            "Block round complete"
        );
        advance(&mut round, RoundPhase::Idle);
        RoundOutcome::Produced(block.summary())
    }

    /// First node in schedule order whose chain validates.
    pub fn leader_for(&self, now_ms: i64) -> Result<&Arc<LedgerNode>, ConsensusError> {
        let order = self
            .schedule
            .candidates(now_ms, self.block_interval_ms, self.nodes.len());
        for index in order {
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            if node.validate_chain() {
                return Ok(node);
            }
            warn!(node_id = %node.id(), "Skipping leader candidate with an invalid chain");
        }
        Err(ConsensusError::Stall {
            fallback: self.nodes[0].id().to_string(),
        })
    }

    fn select_leader(&self, now_ms: i64) -> &Arc<LedgerNode> {
        match self.leader_for(now_ms) {
            Ok(node) => node,
            Err(e) => {
                warn!(error = %e, "Degraded leader selection");
                &self.nodes[0]
            }
        }
    }

    /// Same length and tip hash as node 0 on every node.
    pub fn all_consistent(&self) -> bool {
        let first = &self.nodes[0];
        let (length, tip) = (first.chain_len(), first.tip_hash());
        self.nodes[1..]
            .iter()
            .all(|node| node.chain_len() == length && node.tip_hash() == tip)
    }

    /// Longest valid chain, first found on ties.
    fn reference(&self) -> Option<(usize, Vec<Block>)> {
        let mut best: Option<(usize, Vec<Block>)> = None;
        for (index, node) in self.nodes.iter().enumerate() {
            if !node.validate_chain() {
                continue;
            }
            let chain = node.chain();
            let longer = best
                .as_ref()
                .map_or(true, |(_, current)| chain.len() > current.len());
            if longer {
                best = Some((index, chain));
            }
        }
        best
    }

    pub fn reference_chain(&self) -> Option<Vec<Block>> {
        self.reference().map(|(_, chain)| chain)
    }

    /// Brings every node onto the reference chain.
    pub fn reconcile(&self) -> SyncReport {
        let _guard = self.sync_lock.lock();

        let Some((reference_index, reference)) = self.reference() else {
            let stall = ConsensusError::Stall {
                fallback: self.nodes[0].id().to_string(),
            };
            warn!(error = %stall, "No valid reference chain, will retry next cycle");
            return SyncReport {
                reference: None,
                actions: Vec::new(),
                consistent: false,
            };
        };
        let reference_id = self.nodes[reference_index].id().to_string();

        let mut actions = Vec::with_capacity(self.nodes.len() - 1);
        for (index, node) in self.nodes.iter().enumerate() {
            if index == reference_index {
                continue;
            }
            let action = self.sync_node(node, &reference);
            if let SyncAction::Failed(e) = &action {
                warn!(node_id = %node.id(), error = %e, "Reconciliation failed, will retry next cycle");
            }
            actions.push((node.id().to_string(), action));
        }

        for node in &self.nodes {
            node.take_divergence_signal();
        }

        let report = SyncReport {
            reference: Some(reference_id),
            actions,
            consistent: self.all_consistent(),
        };
        if report.changed() > 0 {
            info!(
                reference = ?report.reference,
                changed = report.changed(),
                consistent = report.consistent,
                "Reconciliation pass complete"
            );
        }
        report
    }

    fn sync_node(&self, node: &LedgerNode, reference: &[Block]) -> SyncAction {
        let local = node.chain();
        let same_tip = local.len() == reference.len()
            && local.last().map(|b| &b.hash) == reference.last().map(|b| &b.hash);
        if same_tip && node.validate_chain() {
            return SyncAction::InSync;
        }

        let gap = local.len().abs_diff(reference.len());
        let first_differs = match (local.get(1), reference.get(1)) {
            (Some(ours), Some(theirs)) => ours.hash != theirs.hash,
            _ => false,
        };
        let shared = local
            .iter()
            .zip(reference)
            .take_while(|(ours, theirs)| ours.hash == theirs.hash)
            .count();

        if gap > MAX_INCREMENTAL_GAP || first_differs || shared == 0 || !node.validate_chain() {
            debug!(node_id = %node.id(), gap, first_differs, "Deep divergence, rebuilding");
            return match node.rebuild_from(reference) {
                Ok(length) => SyncAction::Rebuilt { length },
                Err(e) => SyncAction::Failed(divergence(node.id(), e)),
            };
        }

        let fork_point = (shared - 1) as u64;
        node.rollback_to(fork_point);
        let mut replayed = 0;
        for block in &reference[shared..] {
            if let Err(e) = node.apply_synced_block(block) {
                return SyncAction::Failed(divergence(node.id(), e));
            }
            replayed += 1;
        }
        info!(node_id = %node.id(), fork_point, replayed, "Resynchronized from fork point");
        SyncAction::Incremental {
            fork_point,
            replayed,
        }
    }

    /// Reconciles only when a node raised a fork signal or tips differ.
    pub fn reconcile_if_needed(&self) -> Option<SyncReport> {
        let signalled = self
            .nodes
            .iter()
            .map(|node| node.take_divergence_signal())
            .fold(false, |acc, raised| acc || raised);
        if signalled || !self.all_consistent() {
            Some(self.reconcile())
        } else {
            None
        }
    }

    /// Forces every node onto the longest valid chain with a full rebuild.
    /// With no valid chain anywhere, every node is reset to genesis.
    pub fn recover_network(&self) -> RecoveryReport {
        let _guard = self.sync_lock.lock();
        info!(node_count = self.nodes.len(), "Starting network recovery");

        let Some((reference_index, reference)) = self.reference() else {
            warn!("No node holds a valid chain, resetting every node to genesis");
            let nodes = self
                .nodes
                .iter()
                .map(|node| {
                    node.rollback_to(0);
                    (node.id().to_string(), RecoveryStatus::ResetToGenesis)
                })
                .collect();
            return RecoveryReport {
                reference: None,
                nodes,
            };
        };

        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let status = if index == reference_index {
                    RecoveryStatus::Reference
                } else {
                    match node.rebuild_from(&reference) {
                        Ok(_) => RecoveryStatus::Synchronized,
                        Err(e) => RecoveryStatus::Failed(e.to_string()),
                    }
                };
                (node.id().to_string(), status)
            })
            .collect();

        let report = RecoveryReport {
            reference: Some(self.nodes[reference_index].id().to_string()),
            nodes,
        };
        info!(reference = ?report.reference, success = report.is_success(), "Network recovery finished");
        report
    }

    pub fn next_round_in_ms(&self, now_ms: i64) -> i64 {
        match self.round.lock().last_block_time {
            Some(last) => (self.block_interval_ms - (now_ms - last)).max(0),
            None => 0,
        }
    }

    pub fn consistency(&self, now_ms: i64) -> NetworkConsistency {
        NetworkConsistency {
            consistent: self.all_consistent(),
            node_count: self.nodes.len(),
            block_count: self.nodes[0].chain_len(),
            next_round_in_millis: self.next_round_in_ms(now_ms),
        }
    }

    pub fn stats(&self, now_ms: i64) -> NetworkStats {
        let (phase, last_block_time) = {
            let round = self.round.lock();
            (round.phase, round.last_block_time)
        };
        NetworkStats {
            node_count: self.nodes.len(),
            block_count: self.nodes[0].chain_len(),
            pending_transactions: self.nodes.iter().map(|n| n.pending_count()).sum(),
            processed_transactions: self.nodes[0].processed_count(),
            last_block_time,
            consistent: self.all_consistent(),
            block_interval_ms: self.block_interval_ms,
            sync_interval_ms: self.sync_interval_ms,
            next_round_in_millis: self.next_round_in_ms(now_ms),
            phase,
            nodes: self.nodes.iter().map(|n| n.status()).collect(),
        }
    }
}

fn advance(round: &mut RoundState, phase: RoundPhase) {
    debug!(from = ?round.phase, to = ?phase, "Round phase");
    round.phase = phase;
}

fn divergence(node: &str, error: impl std::fmt::Display) -> ConsensusError {
    ConsensusError::Divergence {
        node: NodeId::from(node),
        reason: error.to_string(),
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
