//! Network submission and callback delivery.
//!
//! [`Submitter`] rebuilds the fully signed transaction from the stored
//! unsigned payload plus the collected signature set, then pushes it to the
//! chain's endpoint: Horizon for Stellar, JSON-RPC
//! `eth_sendRawTransaction` for the EVM family, REST for 1Money.
//! [`CallbackClient`] POSTs the completed record JSON to the client's
//! callback URL. Both are idempotent-safe by contract: a crashed worker may
//! cause a duplicate delivery, and the receiving side is expected to
//! tolerate it.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::chain::{ChainError, HandlerRegistry, TxObject};
use crate::queue::TaskError;
use crate::registry;
use crate::registry::KeyFormat;
use crate::types::TransactionRecord;

/// Maps an HTTP response status to the retry classification.
fn classify_status(status: reqwest::StatusCode, body: &str) -> TaskError {
    let snippet: String = body.chars().take(200).collect();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        TaskError::RateLimited(format!("HTTP 429: {}", snippet))
    } else if status.is_server_error() {
        TaskError::Transient(format!("HTTP {}: {}", status.as_u16(), snippet))
    } else {
        TaskError::Permanent(format!("HTTP {}: {}", status.as_u16(), snippet))
    }
}

/// Connection failures and timeouts are retryable; anything else is not.
fn classify_transport(err: reqwest::Error) -> TaskError {
    if err.is_timeout() || err.is_connect() {
        TaskError::Transient(err.to_string())
    } else {
        TaskError::Permanent(err.to_string())
    }
}

fn chain_error(err: ChainError) -> TaskError {
    match err {
        ChainError::TransientBackend(msg) => TaskError::Transient(msg),
        other => TaskError::Permanent(other.to_string()),
    }
}

/// Chain-specific network submission client.
pub struct Submitter {
    client: reqwest::Client,
    handlers: Arc<HandlerRegistry>,
    /// `(blockchain, network)` endpoint overrides from the environment.
    overrides: HashMap<(String, String), Url>,
    timeout: Duration,
}

impl Submitter {
    pub fn new(
        client: reqwest::Client,
        handlers: Arc<HandlerRegistry>,
        overrides: HashMap<(String, String), Url>,
        timeout: Duration,
    ) -> Self {
        Submitter {
            client,
            handlers,
            overrides,
            timeout,
        }
    }

    fn endpoint(&self, record: &TransactionRecord) -> Result<Url, TaskError> {
        let key = (record.blockchain.clone(), record.network_name.clone());
        if let Some(url) = self.overrides.get(&key) {
            return Ok(url.clone());
        }
        registry::network_config(&record.blockchain, &record.network_name)
            .and_then(|n| n.endpoint)
            .and_then(|e| Url::parse(e).ok())
            .ok_or_else(|| {
                TaskError::Permanent(format!(
                    "No submission endpoint for {}:{}",
                    record.blockchain, record.network_name
                ))
            })
    }

    /// The signed wire form: stored unsigned payload plus every collected
    /// signature, serialized in the record's encoding.
    fn signed_payload(&self, record: &TransactionRecord) -> Result<String, TaskError> {
        let handler = self.handlers.get(&record.blockchain).ok_or_else(|| {
            TaskError::Permanent(format!("No handler for blockchain {}", record.blockchain))
        })?;
        let network = registry::network_config(&record.blockchain, &record.network_name)
            .ok_or_else(|| {
                TaskError::Permanent(format!(
                    "Unknown network {}:{}",
                    record.blockchain, record.network_name
                ))
            })?;
        let mut tx: TxObject = handler
            .parse_transaction(&record.payload, record.encoding, network)
            .map_err(chain_error)?;
        for signature in &record.signatures {
            tx = handler
                .add_signature(&tx, &signature.signer_key, &signature.signature)
                .map_err(chain_error)?;
        }
        handler
            .serialize_transaction(&tx, record.encoding)
            .map_err(chain_error)
    }

    /// Submits the record's transaction to its network.
    #[instrument(skip_all, fields(hash = %record.hash, blockchain = %record.blockchain))]
    pub async fn submit(&self, record: &TransactionRecord) -> Result<(), TaskError> {
        let endpoint = self.endpoint(record)?;
        let payload = self.signed_payload(record)?;
        let key_format = registry::get(&record.blockchain)
            .map(|spec| spec.key_format)
            .ok_or_else(|| {
                TaskError::Permanent(format!("Unknown blockchain {}", record.blockchain))
            })?;

        match (record.blockchain.as_str(), key_format) {
            ("stellar", _) => self.submit_horizon(endpoint, &payload).await,
            (_, KeyFormat::EvmAddress) => self.submit_json_rpc(endpoint, &payload).await,
            ("onemoney", _) => self.submit_rest(endpoint, &payload).await,
            (other, _) => Err(TaskError::Permanent(format!(
                "No submission route for blockchain {}",
                other
            ))),
        }
    }

    async fn submit_horizon(&self, endpoint: Url, payload: &str) -> Result<(), TaskError> {
        let mut url = endpoint;
        url.path_segments_mut()
            .map_err(|_| TaskError::Permanent("Invalid Horizon endpoint".to_string()))?
            .pop_if_empty()
            .push("transactions");
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .form(&[("tx", payload)])
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body))
        }
    }

    async fn submit_json_rpc(&self, endpoint: Url, payload: &str) -> Result<(), TaskError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendRawTransaction",
            "params": [payload],
        });
        let response = self
            .client
            .post(endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let reply: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TaskError::Transient(format!("Invalid JSON-RPC response: {}", e)))?;
        match reply.get("error") {
            // The chain rejected the transaction itself; retrying the same
            // bytes can not succeed.
            Some(error) => Err(TaskError::Permanent(format!(
                "eth_sendRawTransaction rejected: {}",
                error
            ))),
            None => Ok(()),
        }
    }

    async fn submit_rest(&self, endpoint: Url, payload: &str) -> Result<(), TaskError> {
        let mut url = endpoint;
        url.path_segments_mut()
            .map_err(|_| TaskError::Permanent("Invalid submission endpoint".to_string()))?
            .pop_if_empty()
            .extend(["v1", "transactions"]);
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&json!({ "transaction": payload }))
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body))
        }
    }
}

/// Delivers the completed record to the client-supplied callback URL.
pub struct CallbackClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl CallbackClient {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        CallbackClient { client, timeout }
    }

    /// POSTs `body` as JSON. Any 2xx counts as delivered.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn deliver(&self, url: &Url, body: &serde_json::Value) -> Result<(), TaskError> {
        let response = self
            .client
            .post(url.clone())
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(classify_status(status, &text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down"),
            TaskError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, ""),
            TaskError::Transient(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY, ""),
            TaskError::Transient(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_REQUEST, "tx_failed"),
            TaskError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::NOT_FOUND, ""),
            TaskError::Permanent(_)
        ));
    }

    #[test]
    fn test_chain_error_classification() {
        assert!(matches!(
            chain_error(ChainError::TransientBackend("rpc down".to_string())),
            TaskError::Transient(_)
        ));
        assert!(matches!(
            chain_error(ChainError::InvalidInput("bad".to_string())),
            TaskError::Permanent(_)
        ));
    }
}
