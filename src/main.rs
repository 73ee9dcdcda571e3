use chrono::Utc;
use dplt_election_ledger::ledger::{
    Ballot, ElectionCreated, ElectionEnded, TransactionPayload, VoteCast,
};
use dplt_election_ledger::zkp::{verification_hash, VoteSecrets, ZkpVoteBuilder};
use dplt_election_ledger::{log_with_context, logger, NetworkConfig, NetworkHandle};
use curve25519_dalek::scalar::Scalar;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const ELECTION_ID: &str = "board-2024";
const CANDIDATES: [&str; 3] = ["Ada", "Grace", "Alan"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = NetworkConfig::from_env();
    logger::init(config.log_format)?;

    let network = Arc::new(NetworkHandle::from_config(config.clone())?);
    let handles = Arc::clone(&network).start();

    let now = Utc::now().timestamp_millis();
    let created = network
        .submit_transaction(TransactionPayload::ElectionCreated(ElectionCreated {
            election_id: ELECTION_ID.to_string(),
            name: "Board election".to_string(),
            candidates: CANDIDATES.iter().map(|c| c.to_string()).collect(),
            start_time: now + 1_000,
            end_time: now + 3_600_000,
            created_by: "admin".to_string(),
        }))
        .await?;
    info!(tx_id = %created.tx_id, "Election created");

    for (voter, choice) in [("alice", 0u32), ("bob", 1)] {
        let payload = TransactionPayload::VoteCast(VoteCast {
            election_id: ELECTION_ID.to_string(),
            voter: voter.to_string(),
            ballot: Ballot::Plain {
                candidate_index: choice,
            },
        });
        match network.submit_transaction(payload).await {
            Ok(receipt) => info!(voter, tx_id = %receipt.tx_id, "Plain vote recorded"),
            Err(rejection) => warn!(voter, reason = %rejection, "Vote rejected"),
        }
    }

    let mut secrets: Vec<VoteSecrets> = Vec::new();
    for (voter, choice) in [("carol", 2usize), ("dave", 2), ("erin", 0)] {
        let (vote, secret) = ZkpVoteBuilder::new(CANDIDATES.len()).build(choice)?;
        let receipt_hash = verification_hash(voter, ELECTION_ID, &vote);
        let payload = TransactionPayload::VoteCast(VoteCast {
            election_id: ELECTION_ID.to_string(),
            voter: voter.to_string(),
            ballot: Ballot::Zkp(vote),
        });
        match network.submit_transaction(payload).await {
            Ok(receipt) => {
                info!(voter, tx_id = %receipt.tx_id, verification = %receipt_hash, "Private vote recorded");
                secrets.push(secret);
            }
            Err(rejection) => warn!(voter, reason = %rejection, "Private vote rejected"),
        }
    }

    // a replay of the same ballot is refused
    let replay = TransactionPayload::VoteCast(VoteCast {
        election_id: ELECTION_ID.to_string(),
        voter: "alice".to_string(),
        ballot: Ballot::Plain { candidate_index: 0 },
    });
    if let Err(rejection) = network.submit_transaction(replay).await {
        info!(reason = %rejection, "Duplicate vote refused");
    }

    let settle = config.block_interval + config.sync_interval + Duration::from_millis(500);
    tokio::time::sleep(settle).await;

    network
        .submit_transaction(TransactionPayload::ElectionEnded(ElectionEnded {
            election_id: ELECTION_ID.to_string(),
            ended_by: "admin".to_string(),
        }))
        .await?;
    tokio::time::sleep(settle).await;

    for summary in network.get_chain_snapshot("node-1").unwrap_or_default() {
        info!(
            block_index = summary.index,
            producer = %summary.producer_id,
            tx_count = summary.transaction_count,
            hash = %summary.hash,
            "Chain"
        );
    }

    let consistency = network.get_network_consistency();
    info!(
        consistent = consistency.consistent,
        node_count = consistency.node_count,
        block_count = consistency.block_count,
        next_round_in_millis = consistency.next_round_in_millis,
        "Network consistency"
    );

    let stats = network.network_stats();
    info!(stats = %serde_json::to_string(&stats)?, "Network stats");

    for (index, name) in CANDIDATES.iter().enumerate() {
        let tally = network.tally_candidate(ELECTION_ID, index)?;
        let blinding_sum: Scalar = secrets.iter().filter_map(|s| s.blinding_for(index)).sum();
        match tally.open_with(&blinding_sum) {
            Some(count) => info!(candidate = name, private_votes = count, "Tally opened"),
            None => warn!(candidate = name, "Tally did not open with the collected blindings"),
        }
    }

    for handle in handles {
        handle.abort();
    }
    log_with_context!(info, "Node shutting down");
    Ok(())
}
