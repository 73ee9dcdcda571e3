//! Replicated election ledger ("DPLT")
//!
//! ## Structure
//! - `transaction.rs` - typed election facts and their content-hash ids
//! - `block.rs` - hash-linked batches of transactions and the shared genesis
//! - `validator.rs` - per-kind transaction rules and `ValidationError`
//! - `node.rs` - `LedgerNode`: pending pool, chain, peer propagation

pub mod block;
pub mod node;
pub mod transaction;
pub mod validator;

pub use block::{Block, BlockSummary};
pub use node::{BlockReception, LedgerNode, NodeStatus, SubmitOutcome};
pub use transaction::{
    Ballot, ElectionCreated, ElectionEnded, NodeId, Transaction, TransactionKind,
    TransactionPayload, TxId, VoteCast,
};
pub use validator::{ValidationError, Validator};
