//! Outbound mirroring of accepted transactions to an external settlement ledger

use crate::ledger::Transaction;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub accepted: bool,
    #[serde(rename = "externalRef", alias = "external_ref")]
    pub external_ref: String,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("settlement ledger is not configured")]
    Unavailable,
    #[error("request failed: {0}")]
    Http(String),
    #[error("settlement ledger rejected the transaction: {0}")]
    Rejected(String),
    #[error("could not decode settlement response: {0}")]
    Decode(String),
}

/// The external ledger this network optionally mirrors into. Failures here
/// never undo local acceptance.
#[async_trait]
pub trait SettlementLedger: Send + Sync {
    async fn mirror_transaction(&self, tx: &Transaction) -> Result<SettlementReceipt, SettlementError>;

    fn name(&self) -> &str;
}

/// Stand-in used when no settlement URL is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSettlement;

#[async_trait]
impl SettlementLedger for DisabledSettlement {
    async fn mirror_transaction(&self, _tx: &Transaction) -> Result<SettlementReceipt, SettlementError> {
        Err(SettlementError::Unavailable)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

/// POSTs each transaction as JSON to `{base_url}/transactions`.
pub struct HttpSettlementClient {
    client: Client,
    base_url: String,
    max_retries: u32,
}

impl HttpSettlementClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SettlementError> {
        let client = Client::builder()
            .user_agent(concat!("dplt-election-ledger/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SettlementError::Http(e.to_string()))?;

        Ok(HttpSettlementClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_retries: 3,
        })
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/transactions", self.base_url)
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * attempt as u64)
}

#[async_trait]
impl SettlementLedger for HttpSettlementClient {
    async fn mirror_transaction(&self, tx: &Transaction) -> Result<SettlementReceipt, SettlementError> {
        let url = self.endpoint();
        let mut last_error = SettlementError::Unavailable;

        for attempt in 1..=self.max_retries {
            match self.client.post(&url).json(tx).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        let body = response.text().await.unwrap_or_default();
                        return Err(SettlementError::Rejected(format!("{}: {}", status, body)));
                    }
                    if !status.is_success() {
                        warn!(tx_id = %tx.id, attempt, %status, "Settlement ledger returned an error status");
                        last_error = SettlementError::Http(format!("HTTP status: {}", status));
                        if attempt < self.max_retries {
                            tokio::time::sleep(backoff(attempt) * 2).await;
                        }
                        continue;
                    }

                    match response.json::<SettlementReceipt>().await {
                        Ok(receipt) if receipt.accepted => {
                            debug!(tx_id = %tx.id, external_ref = %receipt.external_ref, "Mirrored transaction");
                            return Ok(receipt);
                        }
                        Ok(receipt) => {
                            return Err(SettlementError::Rejected(receipt.external_ref));
                        }
                        Err(e) => {
                            last_error = SettlementError::Decode(e.to_string());
                        }
                    }
                }
                Err(e) => {
                    warn!(tx_id = %tx.id, attempt, error = %e, "Settlement request failed");
                    last_error = SettlementError::Http(e.to_string());
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        Err(last_error)
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ElectionEnded, TransactionPayload};

    fn tx() -> Transaction {
        Transaction::new(
            TransactionPayload::ElectionEnded(ElectionEnded {
                election_id: "e1".to_string(),
                ended_by: "admin".to_string(),
            }),
            "node-1",
            1,
        )
    }

    #[tokio::test]
    async fn test_disabled_settlement() {
        let result = DisabledSettlement.mirror_transaction(&tx()).await;
        assert!(matches!(result, Err(SettlementError::Unavailable)));
        assert_eq!(DisabledSettlement.name(), "disabled");
    }

    #[test]
    fn test_http_client_endpoint() {
        let client = HttpSettlementClient::new("http://127.0.0.1:9/").unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9/transactions");
        assert_eq!(client.name(), "http://127.0.0.1:9");
    }

    #[tokio::test]
    async fn test_unreachable_settlement_fails_after_retries() {
        let client = HttpSettlementClient::new("http://127.0.0.1:9")
            .unwrap()
            .with_max_retries(1);
        let result = client.mirror_transaction(&tx()).await;
        assert!(matches!(result, Err(SettlementError::Http(_))));
    }

    #[test]
    fn test_receipt_wire_names() {
        let receipt: SettlementReceipt =
            serde_json::from_str(r#"{"accepted":true,"externalRef":"0xabc"}"#).unwrap();
        assert_eq!(receipt.external_ref, "0xabc");
        let receipt: SettlementReceipt =
            serde_json::from_str(r#"{"accepted":false,"external_ref":"x"}"#).unwrap();
        assert!(!receipt.accepted);
    }
}
