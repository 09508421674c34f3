//! Upstream data source.
//!
//! [`RpcProvider`] is the seam between the ingestion modes and Solana RPC.
//! [`DefaultRpcProvider`] pages signature history through the Solana RPC client
//! and fetches transaction details with plain JSON-RPC over `reqwest`, so that a
//! whole page of details goes out as one batch request and an HTTP 413 can be
//! told apart from other failures.

use crate::config::CommitmentLevel;
use crate::types::records::{RawTransaction, SignatureInfo};
use crate::utils::error::{IngestError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::str::FromStr;
use std::time::Duration;

#[async_trait]
pub trait RpcProvider: Send + Sync {
    /// Up to `limit` signatures for `address`, newest first, strictly older than `before`.
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>>;

    /// Details for every signature in a single request, in input order.
    ///
    /// Unknown signatures come back as `None`. An oversized response surfaces
    /// as `IngestError::PayloadTooLarge`.
    async fn get_transactions(&self, signatures: &[Signature]) -> Result<Vec<Option<RawTransaction>>>;

    /// Details for one signature, `None` if the node doesn't have it.
    async fn get_transaction(&self, signature: &Signature) -> Result<Option<RawTransaction>>;
}

pub struct DefaultRpcProvider {
    client: RpcClient,
    http: reqwest::Client,
    rpc_url: String,
    commitment: CommitmentLevel,
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    id: usize,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl DefaultRpcProvider {
    /// Creates a provider for `rpc_url`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the HTTP client can't be built.
    pub fn new(rpc_url: &str, commitment: CommitmentLevel, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::ConfigError(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client: RpcClient::new_with_timeout_and_commitment(
                rpc_url.to_string(),
                timeout,
                commitment.into(),
            ),
            http,
            rpc_url: rpc_url.to_string(),
            commitment,
        })
    }

    fn transaction_request(&self, id: usize, signature: &Signature) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "getTransaction",
            "params": [
                signature.to_string(),
                {
                    "encoding": "jsonParsed",
                    "commitment": self.commitment.as_str(),
                    "maxSupportedTransactionVersion": 0
                }
            ]
        })
    }

    async fn post(&self, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(&self.rpc_url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE {
            return Err(IngestError::PayloadTooLarge(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(IngestError::HttpStatus {
                status: status.as_u16(),
                context: status.canonical_reason().unwrap_or("unknown status").to_string(),
            });
        }

        response.json::<Value>().await.map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> IngestError {
    if err.is_timeout() {
        IngestError::Timeout(err.to_string())
    } else if err.is_connect() {
        IngestError::ConnectionError(err.to_string())
    } else if err.is_decode() {
        IngestError::RpcError(format!("invalid response body: {err}"))
    } else {
        IngestError::RpcError(err.to_string())
    }
}

fn reply_error(signature: &Signature, error: &RpcErrorObject) -> IngestError {
    IngestError::JsonRpc {
        code: error.code,
        message: format!("getTransaction {signature}: {}", error.message),
    }
}

/// A `null` result means the node has no such transaction.
fn decode_transaction(signature: &Signature, result: Option<Value>) -> Option<RawTransaction> {
    match result {
        None | Some(Value::Null) => None,
        Some(value) => match serde_json::from_value(value) {
            Ok(tx) => Some(tx),
            Err(e) => {
                tracing::warn!(%signature, error = %e, "Undecodable transaction payload, skipping");
                None
            }
        },
    }
}

#[async_trait]
impl RpcProvider for DefaultRpcProvider {
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before,
            until: None,
            limit: Some(limit),
            commitment: Some(self.commitment.into()),
        };

        let statuses = self
            .client
            .get_signatures_for_address_with_config(address, config)
            .await?;

        statuses
            .into_iter()
            .map(|status| {
                let signature = Signature::from_str(&status.signature).map_err(|e| {
                    IngestError::DecodingError(format!(
                        "invalid signature '{}': {e}",
                        status.signature
                    ))
                })?;
                Ok(SignatureInfo {
                    signature,
                    slot: status.slot,
                })
            })
            .collect()
    }

    async fn get_transactions(&self, signatures: &[Signature]) -> Result<Vec<Option<RawTransaction>>> {
        if signatures.is_empty() {
            return Ok(Vec::new());
        }

        let batch: Vec<Value> = signatures
            .iter()
            .enumerate()
            .map(|(id, sig)| self.transaction_request(id, sig))
            .collect();

        let replies = match self.post(&Value::Array(batch)).await? {
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value::<RpcReply>)
                .collect::<std::result::Result<Vec<_>, _>>()?,
            other => {
                let message = other
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("non-array reply to batch request")
                    .to_string();
                return Err(IngestError::RpcError(message));
            }
        };

        let mut slots: Vec<Option<Option<Value>>> = vec![None; signatures.len()];
        for reply in replies {
            let Some(signature) = signatures.get(reply.id) else {
                continue;
            };
            if let Some(error) = &reply.error {
                return Err(reply_error(signature, error));
            }
            slots[reply.id] = Some(reply.result);
        }

        Ok(signatures
            .iter()
            .zip(slots)
            .map(|(sig, slot)| decode_transaction(sig, slot.flatten()))
            .collect())
    }

    async fn get_transaction(&self, signature: &Signature) -> Result<Option<RawTransaction>> {
        let reply: RpcReply = serde_json::from_value(self.post(&self.transaction_request(0, signature)).await?)?;
        if let Some(error) = &reply.error {
            return Err(reply_error(signature, error));
        }
        Ok(decode_transaction(signature, reply.result))
    }
}
