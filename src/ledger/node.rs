//! A single ledger replica: pending pool, hash-linked chain, peer hooks

use crate::ledger::block::{Block, BlockSummary};
use crate::ledger::transaction::{NodeId, Transaction, TxId};
use crate::ledger::validator::{ValidationError, Validator};
use crate::network::message::{self, Envelope, Inbox, Mailbox, Message};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(TxId),
    /// Already pending or already on the chain. Not an error.
    Duplicate(TxId),
    Rejected(ValidationError),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReception {
    Applied,
    Duplicate,
    /// The block does not extend our tip; left for reconciliation.
    ForkSignal,
    Rejected(ValidationError),
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub pending_transactions: usize,
    pub chain_length: usize,
    pub tip: BlockSummary,
    pub divergence_suspected: bool,
}

#[derive(Debug)]
struct NodeState {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    pending_ids: HashSet<TxId>,
    committed_ids: HashSet<TxId>,
    divergence_suspected: bool,
}

impl NodeState {
    fn new() -> Self {
        NodeState {
            chain: vec![Block::genesis()],
            pending: Vec::new(),
            pending_ids: HashSet::new(),
            committed_ids: HashSet::new(),
            divergence_suspected: false,
        }
    }

    fn tip(&self) -> &Block {
        // the chain always holds at least genesis
        &self.chain[self.chain.len() - 1]
    }

    fn knows(&self, id: &str) -> bool {
        self.pending_ids.contains(id) || self.committed_ids.contains(id)
    }

    fn enqueue(&mut self, tx: Transaction) {
        self.pending_ids.insert(tx.id.clone());
        self.pending.push(tx);
    }

    /// Appends a block that already passed validation and records its
    /// transactions as committed.
    fn append(&mut self, block: Block) {
        let included: HashSet<&TxId> = block.transaction_ids().collect();
        self.pending.retain(|tx| !included.contains(&tx.id));
        for id in &included {
            self.pending_ids.remove(*id);
            self.committed_ids.insert((*id).clone());
        }
        self.chain.push(block);
    }

    fn append_structural(&mut self, block: &Block) -> Result<(), ValidationError> {
        block.check_structure()?;
        if !block.extends(self.tip()) {
            return Err(ValidationError::InvalidBlock {
                index: block.index,
                reason: format!("does not extend tip #{}", self.tip().index),
            });
        }
        self.append(block.clone());
        Ok(())
    }

    /// Drops every block above `index` and re-queues their transactions.
    fn truncate(&mut self, index: u64) -> usize {
        let keep = (index as usize).saturating_add(1).max(1);
        if keep >= self.chain.len() {
            return 0;
        }
        let removed: Vec<Block> = self.chain.drain(keep..).collect();
        for block in &removed {
            for tx in &block.transactions {
                self.committed_ids.remove(&tx.id);
                if !self.pending_ids.contains(&tx.id) {
                    self.enqueue(tx.clone());
                }
            }
        }
        removed.len()
    }
}

pub struct LedgerNode {
    id: NodeId,
    validator: Validator,
    state: RwLock<NodeState>,
    peers: RwLock<Vec<Mailbox>>,
    mailbox: Mailbox,
    inbox: Mutex<Option<Inbox>>,
}

impl LedgerNode {
    pub fn new(id: impl Into<NodeId>) -> Self {
        let id = id.into();
        let (mailbox, inbox) = message::channel(&id);
        LedgerNode {
            id,
            validator: Validator::new(),
            state: RwLock::new(NodeState::new()),
            peers: RwLock::new(Vec::new()),
            mailbox,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.clone()
    }

    /// Hands the inbox to a dispatcher. Only the first caller gets it.
    pub fn take_inbox(&self) -> Option<Inbox> {
        self.inbox.lock().take()
    }

    pub fn connect_peer(&self, peer: &LedgerNode) {
        if peer.id == self.id {
            return;
        }
        let mut peers = self.peers.write();
        if peers.iter().any(|mailbox| mailbox.owner() == peer.id) {
            return;
        }
        peers.push(peer.mailbox());
        debug!(node_id = %self.id, peer = %peer.id, "Connected to peer");
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers
            .read()
            .iter()
            .map(|mailbox| mailbox.owner().to_string())
            .collect()
    }

    /// Accepts a client transaction and broadcasts it to connected peers.
    pub fn submit(&self, mut tx: Transaction) -> SubmitOutcome {
        tx.complete(&self.id);
        let outcome = self.admit(tx.clone(), "client");
        if outcome.is_accepted() {
            self.broadcast(Message::Transaction(tx));
        }
        outcome
    }

    /// Peer-originated transaction. Same rules as `submit`, no re-broadcast.
    pub fn receive_transaction(&self, tx: Transaction) -> SubmitOutcome {
        self.admit(tx, "peer")
    }

    fn admit(&self, tx: Transaction, source: &str) -> SubmitOutcome {
        if let Err(e) = self.validator.validate(&tx) {
            warn!(node_id = %self.id, tx_id = %tx.id, source, error = %e, "Rejected transaction");
            return SubmitOutcome::Rejected(e);
        }

        let mut state = self.state.write();
        if state.knows(&tx.id) {
            debug!(node_id = %self.id, tx_id = %tx.id, source, "Ignoring duplicate transaction");
            return SubmitOutcome::Duplicate(tx.id);
        }
        let id = tx.id.clone();
        state.enqueue(tx);
        debug!(node_id = %self.id, tx_id = %id, source, pending = state.pending.len(), "Transaction pooled");
        SubmitOutcome::Accepted(id)
    }

    /// Seals every pending transaction into a block on top of the local tip.
    ///
    /// Snapshot and clear happen under one write lock, so transactions that
    /// arrive meanwhile wait for the next block.
    pub fn produce_block(&self, timestamp: i64) -> Option<Block> {
        let block = {
            let mut state = self.state.write();
            if state.pending.is_empty() {
                debug!(node_id = %self.id, "No pending transactions, skipping block");
                return None;
            }

            let tip = state.tip();
            let block = Block::new(
                tip.index + 1,
                timestamp,
                state.pending.clone(),
                tip.hash.clone(),
                self.id.clone(),
            );

            if let Err(e) = self.check_candidate(&state, &block) {
                warn!(node_id = %self.id, error = %e, "Produced block failed its own validation");
                return None;
            }

            state.append(block.clone());
            block
        };

        info!(
            node_id = %self.id,
            block_index = block.index,
            tx_count = block.transactions.len(),
            hash = %short(&block.hash),
            "Produced block"
        );
        self.broadcast(Message::Block(block.clone()));
        Some(block)
    }

    pub fn receive_block(&self, block: Block) -> BlockReception {
        let mut state = self.state.write();

        if state.chain.iter().any(|b| b.hash == block.hash) {
            return BlockReception::Duplicate;
        }
        if let Err(e) = block.check_structure() {
            warn!(node_id = %self.id, block_index = block.index, error = %e, "Rejected block");
            return BlockReception::Rejected(e);
        }
        if !block.extends(state.tip()) {
            state.divergence_suspected = true;
            warn!(
                node_id = %self.id,
                block_index = block.index,
                tip_index = state.tip().index,
                producer = %block.producer_id,
                "Block does not extend local tip, flagging for reconciliation"
            );
            return BlockReception::ForkSignal;
        }
        if let Err(e) = self.check_candidate(&state, &block) {
            warn!(node_id = %self.id, block_index = block.index, error = %e, "Rejected block");
            return BlockReception::Rejected(e);
        }

        debug!(node_id = %self.id, block_index = block.index, "Applied block from peer");
        state.append(block);
        BlockReception::Applied
    }

    /// Forced application used while reconciling: hash and link checks only,
    /// the block is assumed to be consensus-accepted already.
    pub fn apply_synced_block(&self, block: &Block) -> Result<(), ValidationError> {
        let mut state = self.state.write();
        if let Err(e) = state.append_structural(block) {
            warn!(node_id = %self.id, block_index = block.index, error = %e, "Sync block rejected");
            return Err(e);
        }
        debug!(node_id = %self.id, block_index = block.index, "Applied block during synchronization");
        Ok(())
    }

    pub fn validate_chain(&self) -> bool {
        let state = self.state.read();
        let genesis = Block::genesis();
        if state.chain.first().map(|b| &b.hash) != Some(&genesis.hash) {
            error!(node_id = %self.id, "Genesis block does not match network genesis");
            return false;
        }
        for pair in state.chain.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            if !current.has_valid_hash() {
                error!(node_id = %self.id, block_index = current.index, "Invalid block hash");
                return false;
            }
            if !current.extends(previous) {
                error!(node_id = %self.id, block_index = current.index, "Broken chain link");
                return false;
            }
        }
        true
    }

    /// Truncates the chain to `index` inclusive. Transactions from removed
    /// blocks go back into the pending pool. Returns the number of blocks removed.
    pub fn rollback_to(&self, index: u64) -> usize {
        let mut state = self.state.write();
        let before = state.chain.len();
        let removed = state.truncate(index);
        if removed > 0 {
            info!(
                node_id = %self.id,
                from = before - 1,
                to = index,
                requeued = state.pending.len(),
                "Rolled back chain"
            );
        }
        removed
    }

    /// Replaces everything after genesis with `reference[1..]`, replaying it
    /// block by block. Stops at the first structurally invalid block.
    pub fn rebuild_from(&self, reference: &[Block]) -> Result<usize, ValidationError> {
        let mut state = self.state.write();

        let genesis_matches = match reference.first() {
            Some(first) => first.hash == state.chain[0].hash,
            None => false,
        };
        if !genesis_matches {
            warn!(node_id = %self.id, "Reference chain has a foreign genesis, refusing rebuild");
            return Err(ValidationError::InvalidBlock {
                index: 0,
                reason: "reference genesis differs".to_string(),
            });
        }

        info!(node_id = %self.id, reference_length = reference.len(), "Rebuilding chain from reference");
        state.truncate(0);
        for block in &reference[1..] {
            if let Err(e) = state.append_structural(block) {
                warn!(
                    node_id = %self.id,
                    block_index = block.index,
                    chain_length = state.chain.len(),
                    error = %e,
                    "Chain rebuild stopped"
                );
                return Err(e);
            }
        }
        info!(node_id = %self.id, chain_length = state.chain.len(), "Chain rebuild complete");
        Ok(state.chain.len())
    }

    pub fn chain(&self) -> Vec<Block> {
        self.state.read().chain.clone()
    }

    pub fn chain_len(&self) -> usize {
        self.state.read().chain.len()
    }

    pub fn tip(&self) -> Block {
        self.state.read().tip().clone()
    }

    pub fn tip_hash(&self) -> String {
        self.state.read().tip().hash.clone()
    }

    pub fn summaries(&self) -> Vec<BlockSummary> {
        self.state.read().chain.iter().map(Block::summary).collect()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.read().pending.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.read().pending.len()
    }

    pub fn processed_count(&self) -> usize {
        self.state
            .read()
            .chain
            .iter()
            .map(|b| b.transactions.len())
            .sum()
    }

    pub fn contains_transaction(&self, id: &str) -> bool {
        self.state.read().committed_ids.contains(id)
    }

    pub fn divergence_suspected(&self) -> bool {
        self.state.read().divergence_suspected
    }

    /// Reads and clears the fork flag raised by `receive_block`.
    pub fn take_divergence_signal(&self) -> bool {
        std::mem::take(&mut self.state.write().divergence_suspected)
    }

    pub fn status(&self) -> NodeStatus {
        let state = self.state.read();
        NodeStatus {
            id: self.id.clone(),
            pending_transactions: state.pending.len(),
            chain_length: state.chain.len(),
            tip: state.tip().summary(),
            divergence_suspected: state.divergence_suspected,
        }
    }

    /// Entry point for the dispatcher.
    pub fn handle_envelope(&self, envelope: Envelope) {
        match envelope.message {
            Message::Transaction(tx) => {
                self.receive_transaction(tx);
            }
            Message::Block(block) => {
                self.receive_block(block);
            }
        }
    }

    /// Edits a stored block in place, bypassing every check.
    #[cfg(test)]
    pub(crate) fn tamper_block(&self, index: usize, edit: impl FnOnce(&mut Block)) {
        if let Some(block) = self.state.write().chain.get_mut(index) {
            edit(block);
        }
    }

    fn check_candidate(&self, state: &NodeState, block: &Block) -> Result<(), ValidationError> {
        block.check_structure()?;
        let mut seen = HashSet::new();
        for tx in &block.transactions {
            self.validator.validate(tx)?;
            if state.committed_ids.contains(&tx.id) || !seen.insert(&tx.id) {
                return Err(ValidationError::DuplicateTransaction(tx.id.clone()));
            }
        }
        Ok(())
    }

    fn broadcast(&self, message: Message) {
        let peers = self.peers.read();
        for peer in peers.iter() {
            let envelope = Envelope {
                from: self.id.clone(),
                message: message.clone(),
            };
            if !peer.deliver(envelope) {
                warn!(node_id = %self.id, peer = %peer.owner(), kind = message.label(), "Peer inbox closed");
            }
        }
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::transaction::{
        Ballot, ElectionEnded, TransactionPayload, VoteCast,
    };

    const NOW: i64 = 1_700_000_000_000;

    fn vote_tx(voter: &str) -> Transaction {
        Transaction::new(
            TransactionPayload::VoteCast(VoteCast {
                election_id: "e1".to_string(),
                voter: voter.to_string(),
                ballot: Ballot::Plain { candidate_index: 0 },
            }),
            "node-1",
            NOW,
        )
    }

    fn drain(inbox: &mut Inbox) -> Vec<Envelope> {
        std::iter::from_fn(|| inbox.try_next()).collect()
    }

    #[test]
    fn test_submit_and_duplicate() {
        crate::logger::init_test_logger();
        let node = LedgerNode::new("node-1");
        let tx = vote_tx("alice");

        assert_eq!(node.submit(tx.clone()), SubmitOutcome::Accepted(tx.id.clone()));
        assert_eq!(node.submit(tx.clone()), SubmitOutcome::Duplicate(tx.id.clone()));
        assert_eq!(node.receive_transaction(tx.clone()), SubmitOutcome::Duplicate(tx.id));
        assert_eq!(node.pending_count(), 1);
    }

    #[test]
    fn test_submit_rejects_invalid() {
        crate::logger::init_test_logger();
        let node = LedgerNode::new("node-1");
        let tx = Transaction::new(
            TransactionPayload::ElectionEnded(ElectionEnded {
                election_id: String::new(),
                ended_by: "admin".to_string(),
            }),
            "node-1",
            NOW,
        );
        assert!(matches!(node.submit(tx), SubmitOutcome::Rejected(_)));
        assert_eq!(node.pending_count(), 0);
    }

    #[test]
    fn test_submit_broadcasts_to_peers() {
        crate::logger::init_test_logger();
        let a = LedgerNode::new("node-1");
        let b = LedgerNode::new("node-2");
        a.connect_peer(&b);
        a.connect_peer(&b);
        a.connect_peer(&a);
        assert_eq!(a.peer_ids(), vec!["node-2".to_string()]);

        let mut inbox = b.take_inbox().unwrap();
        assert!(b.take_inbox().is_none());

        a.submit(vote_tx("alice"));
        let delivered = drain(&mut inbox);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].from, "node-1");

        for envelope in delivered {
            b.handle_envelope(envelope);
        }
        assert_eq!(b.pending_count(), 1);
    }

    #[test]
    fn test_produce_block_consumes_pool() {
        crate::logger::init_test_logger();
        let node = LedgerNode::new("node-1");
        assert!(node.produce_block(NOW).is_none());

        node.submit(vote_tx("alice"));
        node.submit(vote_tx("bob"));
        let block = node.produce_block(NOW).unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.previous_hash, Block::genesis().hash);
        assert_eq!(node.pending_count(), 0);
        assert_eq!(node.chain_len(), 2);
        assert!(node.validate_chain());

        // committed transactions cannot be pooled again
        let replay = vote_tx("alice");
        assert_eq!(node.receive_transaction(replay.clone()), SubmitOutcome::Duplicate(replay.id));
    }

    #[test]
    fn test_receive_block_extends_tip() {
        crate::logger::init_test_logger();
        let a = LedgerNode::new("node-1");
        let b = LedgerNode::new("node-2");
        let tx = vote_tx("alice");
        a.submit(tx.clone());
        b.receive_transaction(tx.clone());

        let block = a.produce_block(NOW).unwrap();
        assert_eq!(b.receive_block(block.clone()), BlockReception::Applied);
        assert_eq!(b.receive_block(block), BlockReception::Duplicate);
        assert_eq!(b.pending_count(), 0);
        assert!(b.contains_transaction(&tx.id));
        assert_eq!(a.tip_hash(), b.tip_hash());
    }

    #[test]
    fn test_receive_block_out_of_order_flags_fork() {
        crate::logger::init_test_logger();
        let a = LedgerNode::new("node-1");
        let b = LedgerNode::new("node-2");

        a.submit(vote_tx("alice"));
        a.produce_block(NOW).unwrap();
        a.submit(vote_tx("bob"));
        let second = a.produce_block(NOW + 1).unwrap();

        assert_eq!(b.receive_block(second), BlockReception::ForkSignal);
        assert_eq!(b.chain_len(), 1);
        assert!(b.divergence_suspected());
        assert!(b.take_divergence_signal());
        assert!(!b.divergence_suspected());
    }

    #[test]
    fn test_receive_block_rejects_tampering() {
        crate::logger::init_test_logger();
        let a = LedgerNode::new("node-1");
        let b = LedgerNode::new("node-2");
        a.submit(vote_tx("alice"));
        let mut block = a.produce_block(NOW).unwrap();
        block.producer_id = "node-9".to_string();

        assert!(matches!(b.receive_block(block), BlockReception::Rejected(_)));
        assert_eq!(b.chain_len(), 1);
    }

    #[test]
    fn test_receive_block_rejects_replayed_transaction() {
        crate::logger::init_test_logger();
        let a = LedgerNode::new("node-1");
        let tx = vote_tx("alice");
        a.submit(tx.clone());
        let first = a.produce_block(NOW).unwrap();

        let replay = Block::new(2, NOW + 1, vec![tx.clone()], first.hash.clone(), "node-2".to_string());
        assert_eq!(
            a.receive_block(replay),
            BlockReception::Rejected(ValidationError::DuplicateTransaction(tx.id))
        );
    }

    #[test]
    fn test_rollback_requeues_transactions() {
        crate::logger::init_test_logger();
        let node = LedgerNode::new("node-1");
        node.submit(vote_tx("alice"));
        node.produce_block(NOW).unwrap();
        node.submit(vote_tx("bob"));
        node.produce_block(NOW + 1).unwrap();

        assert_eq!(node.rollback_to(5), 0);
        assert_eq!(node.rollback_to(0), 2);
        assert_eq!(node.chain_len(), 1);
        assert_eq!(node.pending_count(), 2);
        assert!(node.validate_chain());

        // re-queued transactions are sealed again, once
        let block = node.produce_block(NOW + 2).unwrap();
        assert_eq!(block.transactions.len(), 2);
    }

    #[test]
    fn test_rebuild_from_reference() {
        crate::logger::init_test_logger();
        let a = LedgerNode::new("node-1");
        let b = LedgerNode::new("node-2");
        for (i, voter) in ["alice", "bob", "carol"].iter().enumerate() {
            a.submit(vote_tx(voter));
            a.produce_block(NOW + i as i64).unwrap();
        }
        b.submit(vote_tx("dave"));
        b.produce_block(NOW).unwrap();

        assert_eq!(b.rebuild_from(&a.chain()), Ok(4));
        assert_eq!(b.tip_hash(), a.tip_hash());
        assert!(b.validate_chain());
        // dave's vote was not in the reference and stays pending
        assert_eq!(b.pending_count(), 1);
    }

    #[test]
    fn test_rebuild_stops_at_broken_block() {
        crate::logger::init_test_logger();
        let a = LedgerNode::new("node-1");
        let b = LedgerNode::new("node-2");
        a.submit(vote_tx("alice"));
        a.produce_block(NOW).unwrap();
        a.submit(vote_tx("bob"));
        a.produce_block(NOW + 1).unwrap();

        let mut reference = a.chain();
        reference[2].timestamp += 1;

        assert!(b.rebuild_from(&reference).is_err());
        assert_eq!(b.chain_len(), 2);
        assert!(b.validate_chain());
    }

    #[test]
    fn test_rebuild_refuses_foreign_genesis() {
        crate::logger::init_test_logger();
        let node = LedgerNode::new("node-1");
        let mut reference = vec![Block::new(
            0,
            42,
            Vec::new(),
            "0".to_string(),
            "elsewhere".to_string(),
        )];
        reference.push(Block::genesis());
        assert!(node.rebuild_from(&reference).is_err());
        assert!(node.validate_chain());
    }

    #[test]
    fn test_pending_keeps_arrival_order() {
        crate::logger::init_test_logger();
        let node = LedgerNode::new("node-1");
        let voters = ["carol", "alice", "bob"];
        for voter in voters {
            node.submit(vote_tx(voter));
        }
        let pending: Vec<TxId> = node.pending_transactions().into_iter().map(|tx| tx.id).collect();
        let expected: Vec<TxId> = voters.iter().map(|voter| vote_tx(voter).id).collect();
        assert_eq!(pending, expected);
    }

    #[test]
    fn test_submit_during_production_loses_nothing() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        crate::logger::init_test_logger();
        let node = Arc::new(LedgerNode::new("node-1"));
        let done = Arc::new(AtomicBool::new(false));
        let total = 300;

        let submitter = {
            let node = Arc::clone(&node);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let ids: Vec<TxId> = (0..total)
                    .map(|i| match node.submit(vote_tx(&format!("voter-{}", i))) {
                        SubmitOutcome::Accepted(id) => id,
                        other => panic!("unexpected outcome {:?}", other),
                    })
                    .collect();
                done.store(true, Ordering::SeqCst);
                ids
            })
        };

        let mut round = 0;
        while !done.load(Ordering::SeqCst) {
            node.produce_block(NOW + round);
            round += 1;
        }
        let submitted = submitter.join().unwrap();
        node.produce_block(NOW + round);

        let sealed: Vec<TxId> = node
            .chain()
            .iter()
            .flat_map(|block| block.transactions.iter().map(|tx| tx.id.clone()))
            .collect();
        let unique: HashSet<&TxId> = sealed.iter().collect();
        assert_eq!(sealed.len(), total as usize);
        assert_eq!(unique.len(), sealed.len());
        assert!(submitted.iter().all(|id| unique.contains(id)));
        assert_eq!(node.pending_count(), 0);
        assert!(node.pending_transactions().is_empty());
        assert!(node.validate_chain());
    }

    #[test]
    fn test_status() {
        crate::logger::init_test_logger();
        let node = LedgerNode::new("node-1");
        node.submit(vote_tx("alice"));
        let status = node.status();
        assert_eq!(status.id, "node-1");
        assert_eq!(status.pending_transactions, 1);
        assert_eq!(status.chain_length, 1);
        assert_eq!(status.tip.index, 0);
    }
}
