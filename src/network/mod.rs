//! In-process node network and the inbound API surface
//!
//! Nodes talk only through their inboxes. The `Dispatcher` drains each
//! inbox and hands envelopes to the owning node; `NetworkHandle` owns the
//! nodes, the coordinator and the settlement client, and is what the API
//! layer holds.

pub mod message;

pub use message::{channel, Envelope, Inbox, Mailbox, Message};


use crate::config::NetworkConfig;
use crate::consensus::{
    ConsensusCoordinator, ConsensusError, NetworkConsistency, NetworkStats, RecoveryReport,
    SyncReport,
};
use crate::ledger::{
    BlockSummary, LedgerNode, SubmitOutcome, Transaction, TransactionPayload, TxId,
    ValidationError,
};
use crate::settlement::{
    DisabledSettlement, HttpSettlementClient, SettlementError, SettlementLedger, SettlementReceipt,
};
use crate::zkp::{self, TallyCommitment, ZkpVote};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Routes envelopes from node inboxes to their nodes.
#[derive(Default)]
pub struct Dispatcher {
    routes: Vec<(Arc<LedgerNode>, Inbox)>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes over the node's inbox. False if another dispatcher already has it.
    pub fn attach(&mut self, node: Arc<LedgerNode>) -> bool {
        match node.take_inbox() {
            Some(inbox) => {
                self.routes.push((node, inbox));
                true
            }
            None => false,
        }
    }

    /// Delivers everything queued right now. Returns the number of envelopes.
    pub fn drain(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let mut progressed = false;
            for (node, inbox) in self.routes.iter_mut() {
                while let Some(envelope) = inbox.try_next() {
                    debug!(node_id = %inbox.owner(), from = %envelope.from, kind = envelope.message.label(), "Dispatching");
                    node.handle_envelope(envelope);
                    delivered += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return delivered;
            }
        }
    }

    /// One delivery task per node, running for the life of the process.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        self.routes
            .into_iter()
            .map(|(node, mut inbox)| {
                tokio::spawn(async move {
                    while let Some(envelope) = inbox.next().await {
                        node.handle_envelope(envelope);
                    }
                    debug!(node_id = %inbox.owner(), "Inbox closed");
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub tx_id: TxId,
    /// `None` when mirroring is disabled or failed.
    pub mirrored: Option<SettlementReceipt>,
}

/// What the API layer reports back for a refused request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{reason}")]
pub struct Rejection {
    pub reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Rejection {
            reason: reason.into(),
        }
    }
}

impl From<ValidationError> for Rejection {
    fn from(e: ValidationError) -> Self {
        Rejection::new(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
}

pub struct NetworkHandle {
    config: NetworkConfig,
    nodes: Vec<Arc<LedgerNode>>,
    coordinator: Arc<ConsensusCoordinator>,
    dispatcher: Mutex<Option<Dispatcher>>,
    settlement: Arc<dyn SettlementLedger>,
    next_entry: AtomicUsize,
}

impl NetworkHandle {
    /// Builds `node-1..node-n`, connects them in a full mesh and wires the
    /// coordinator over them.
    pub fn new(
        config: NetworkConfig,
        settlement: Arc<dyn SettlementLedger>,
    ) -> Result<Self, NetworkError> {
        let nodes: Vec<Arc<LedgerNode>> = (1..=config.node_count.max(1))
            .map(|i| Arc::new(LedgerNode::new(format!("node-{}", i))))
            .collect();

        for node in &nodes {
            for peer in &nodes {
                node.connect_peer(peer);
            }
        }

        let mut dispatcher = Dispatcher::new();
        for node in &nodes {
            dispatcher.attach(Arc::clone(node));
        }

        let coordinator = ConsensusCoordinator::new(
            nodes.clone(),
            config.block_interval,
            config.sync_interval,
        )?;

        info!(
            node_count = nodes.len(),
            block_interval_ms = coordinator.block_interval_ms(),
            sync_interval_ms = coordinator.sync_interval_ms(),
            settlement = settlement.name(),
            "Ledger network ready"
        );

        Ok(NetworkHandle {
            config,
            nodes,
            coordinator: Arc::new(coordinator),
            dispatcher: Mutex::new(Some(dispatcher)),
            settlement,
            next_entry: AtomicUsize::new(0),
        })
    }

    /// Uses the HTTP settlement client when a URL is configured.
    pub fn from_config(config: NetworkConfig) -> Result<Self, NetworkError> {
        let settlement: Arc<dyn SettlementLedger> = match &config.settlement_url {
            Some(url) => Arc::new(
                HttpSettlementClient::new(url.as_str())?.with_max_retries(config.settlement_retries),
            ),
            None => Arc::new(DisabledSettlement),
        };
        Self::new(config, settlement)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[Arc<LedgerNode>] {
        &self.nodes
    }

    pub fn coordinator(&self) -> &Arc<ConsensusCoordinator> {
        &self.coordinator
    }

    /// Submits to the next node in rotation.
    pub async fn submit_transaction(
        &self,
        payload: TransactionPayload,
    ) -> Result<SubmissionReceipt, Rejection> {
        let index = self.next_entry.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        self.submit_transaction_at(index, payload).await
    }

    pub async fn submit_transaction_at(
        &self,
        index: usize,
        payload: TransactionPayload,
    ) -> Result<SubmissionReceipt, Rejection> {
        let node = self
            .nodes
            .get(index)
            .ok_or_else(|| Rejection::new(format!("no node at index {}", index)))?;
        let tx = Transaction::now(payload, node.id());
        self.submit_to(node, tx).await
    }

    /// Decodes a JSON transaction and submits it like any other.
    pub async fn submit_json(&self, raw: &str) -> Result<SubmissionReceipt, Rejection> {
        let tx = Transaction::from_json(raw)?;
        let index = self.next_entry.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        self.submit_to(&self.nodes[index], tx).await
    }

    async fn submit_to(
        &self,
        node: &LedgerNode,
        mut tx: Transaction,
    ) -> Result<SubmissionReceipt, Rejection> {
        // creation time is the receiving node's clock, never the client's
        tx.timestamp = Utc::now().timestamp_millis();
        tx.complete(node.id());
        let tx_id = match node.submit(tx.clone()) {
            SubmitOutcome::Accepted(id) => id,
            SubmitOutcome::Duplicate(id) => {
                return Err(Rejection::new(format!("transaction {} is already recorded", id)));
            }
            SubmitOutcome::Rejected(e) => return Err(e.into()),
        };

        let mirrored = match self.settlement.mirror_transaction(&tx).await {
            Ok(receipt) => Some(receipt),
            Err(SettlementError::Unavailable) => None,
            Err(e) => {
                warn!(tx_id = %tx_id, settlement = self.settlement.name(), error = %e, "Mirroring failed, transaction stays recorded locally");
                None
            }
        };

        Ok(SubmissionReceipt { tx_id, mirrored })
    }

    /// Delivers queued peer messages when the dispatcher is not running as
    /// background tasks.
    pub fn deliver_pending(&self) -> usize {
        match self.dispatcher.lock().as_mut() {
            Some(dispatcher) => dispatcher.drain(),
            None => 0,
        }
    }

    pub fn request_block_round(&self) -> Option<BlockSummary> {
        self.deliver_pending();
        let outcome = self.coordinator.run_round();
        self.deliver_pending();
        outcome.block().cloned()
    }

    pub fn get_chain_snapshot(&self, node_id: &str) -> Option<Vec<BlockSummary>> {
        self.coordinator.node(node_id).map(|node| node.summaries())
    }

    pub fn get_network_consistency(&self) -> NetworkConsistency {
        self.coordinator.consistency(Utc::now().timestamp_millis())
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.coordinator.stats(Utc::now().timestamp_millis())
    }

    pub fn synchronize(&self) -> SyncReport {
        self.deliver_pending();
        self.coordinator.reconcile()
    }

    pub fn recover_network(&self) -> RecoveryReport {
        self.coordinator.recover_network()
    }

    /// Homomorphic tally of one candidate over every ZKP ballot recorded
    /// for `election_id` on the reference chain.
    pub fn tally_candidate(
        &self,
        election_id: &str,
        candidate_index: usize,
    ) -> Result<TallyCommitment, Rejection> {
        let chain = self
            .coordinator
            .reference_chain()
            .ok_or_else(|| Rejection::new("no node holds a valid chain"))?;
        let votes: Vec<ZkpVote> = chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter(|tx| tx.election_id() == election_id)
            .filter_map(|tx| tx.zkp_ballot().cloned())
            .collect();
        zkp::tally(candidate_index, &votes).map_err(|e| Rejection::new(e.to_string()))
    }

    /// Initial synchronization, then the dispatcher and both periodic tasks.
    /// Returns their handles; calling it twice starts nothing new.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let Some(dispatcher) = self.dispatcher.lock().take() else {
            warn!("Network already started");
            return Vec::new();
        };

        let initial = self.coordinator.reconcile();
        info!(
            reference = ?initial.reference,
            consistent = initial.consistent,
            "Initial synchronization done"
        );

        let mut handles = dispatcher.spawn();

        let coordinator = Arc::clone(&self.coordinator);
        let block_interval = self.config.block_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(block_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                coordinator.run_round();
            }
        }));

        let coordinator = Arc::clone(&self.coordinator);
        let sync_interval = self.config.sync_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Some(report) = coordinator.reconcile_if_needed() {
                    if !report.consistent {
                        warn!(failures = report.failures().count(), "Nodes still inconsistent after sync");
                    }
                }
            }
        }));

        info!(tasks = handles.len(), "Network started");
        handles
    }
}
