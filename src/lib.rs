//! Replicated election ledger with zero-knowledge vote commitments
//!
//! ## Structure
//! - `ledger` - transactions, blocks, validation, per-node state
//! - `consensus` - block rounds, leader schedule, fork resolution
//! - `zkp` - Pedersen commitments, bit proofs, one-hot ballots, tallies
//! - `network` - inbox routing and the `NetworkHandle` API surface
//! - `settlement` - optional mirroring to an external ledger
//! - `config`, `logger` - environment settings and tracing setup

pub mod config;
pub mod consensus;
pub mod ledger;
pub mod logger;
pub mod network;
pub mod settlement;
pub mod zkp;

pub use config::NetworkConfig;
pub use network::{NetworkHandle, Rejection, SubmissionReceipt};
