//! JSON-RPC 2.0 ledger gateway client
//!
//! Methods are named `lastwill_<operation>`; addresses and byte strings travel
//! as `0x` hex, records as the serde form of [`crate::types`]. The gateway
//! reports a missing contract and a reverted transaction with dedicated error
//! codes. There is no push channel: new registry entries are found by polling
//! `lastwill_contractCount`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lastwill_inherit::LegacyEnvelope;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::types::{Address, ContractState, KeeperRecord, Proposal, Timestamp, Transaction};
use crate::{ContractFeed, Ledger, LedgerError};

/// Gateway error code: no contract at the given address
pub const CONTRACT_NOT_FOUND: i64 = -32001;

/// Gateway error code: the transaction reverted
pub const TRANSACTION_FAILED: i64 = -32002;

/// Gateway error code: index out of range
pub const RECORD_NOT_FOUND: i64 = -32003;

/// Default delay between registry polls for new contracts.
pub const DEFAULT_REGISTRY_POLL: Duration = Duration::from_secs(15);

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// [`Ledger`] backed by a JSON-RPC gateway.
#[derive(Clone)]
pub struct RpcLedger {
    client: Client,
    url: Arc<str>,
    registry_poll: Duration,
}

impl RpcLedger {
    pub fn new(url: &str) -> Self {
        let local = url.starts_with("http://127.0.0.1") || url.starts_with("http://localhost");
        if !url.starts_with("https://") && !local {
            log::warn!("Ledger gateway {} is not using TLS", url);
        }
        Self {
            client: Client::new(),
            url: Arc::from(url),
            registry_poll: DEFAULT_REGISTRY_POLL,
        }
    }

    /// Delay between registry polls behind [`Ledger::subscribe_new_contracts`].
    pub fn with_registry_poll(mut self, delay: Duration) -> Self {
        self.registry_poll = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Raw call. A null or absent result comes back as `None`.
    async fn request(&self, method: &str, params: Value) -> Result<Option<Value>, LedgerError> {
        let subject = params_address(&params);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response: JsonRpcResponse<Value> = self
            .client
            .post(&*self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(format!("{}: {}", method, e)))?;

        if let Some(err) = response.error {
            return Err(match (err.code, subject) {
                (CONTRACT_NOT_FOUND, Some(address)) => LedgerError::ContractNotFound(address),
                (CONTRACT_NOT_FOUND | RECORD_NOT_FOUND, _) => {
                    LedgerError::RecordNotFound(err.message)
                }
                (TRANSACTION_FAILED, _) => LedgerError::TransactionFailed(err.message),
                (code, _) => LedgerError::Transport(format!("{} ({})", err.message, code)),
            });
        }

        Ok(response.result.filter(|v| !v.is_null()))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let value = self
            .request(method, params)
            .await?
            .ok_or_else(|| LedgerError::InvalidResponse(format!("{}: empty result", method)))?;
        decode(method, value)
    }

    async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, LedgerError> {
        self.request(method, params)
            .await?
            .map(|value| decode(method, value))
            .transpose()
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, LedgerError> {
    serde_json::from_value(value)
        .map_err(|e| LedgerError::InvalidResponse(format!("{}: {}", method, e)))
}

/// The contract address a call was about: the first address-shaped param.
fn params_address(params: &Value) -> Option<Address> {
    params
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .find_map(|s| s.parse().ok())
}

fn hex_bytes(s: &str) -> Result<Vec<u8>, LedgerError> {
    lastwill_core::wire::from_hex(s).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn now(&self) -> Result<Timestamp, LedgerError> {
        self.call("lastwill_now", json!([])).await
    }

    async fn contract_count(&self) -> Result<u64, LedgerError> {
        self.call("lastwill_contractCount", json!([])).await
    }

    async fn contract_at(&self, index: u64) -> Result<Address, LedgerError> {
        self.call("lastwill_contractAt", json!([index])).await
    }

    async fn contract_by_owner(&self, owner: &Address) -> Result<Option<Address>, LedgerError> {
        self.call_optional("lastwill_contractByOwner", json!([owner]))
            .await
    }

    async fn contract_state(&self, contract: &Address) -> Result<ContractState, LedgerError> {
        self.call("lastwill_contractState", json!([contract])).await
    }

    async fn keeper(
        &self,
        contract: &Address,
        keeper: &Address,
    ) -> Result<Option<KeeperRecord>, LedgerError> {
        self.call_optional("lastwill_keeper", json!([contract, keeper]))
            .await
    }

    async fn keeper_at(
        &self,
        contract: &Address,
        index: usize,
    ) -> Result<KeeperRecord, LedgerError> {
        self.call("lastwill_keeperAt", json!([contract, index])).await
    }

    async fn proposal_at(&self, contract: &Address, index: usize) -> Result<Proposal, LedgerError> {
        self.call("lastwill_proposalAt", json!([contract, index]))
            .await
    }

    async fn legacy(&self, contract: &Address) -> Result<Option<LegacyEnvelope>, LedgerError> {
        self.call_optional("lastwill_legacy", json!([contract])).await
    }

    async fn key_part_chunk_count(&self, contract: &Address) -> Result<usize, LedgerError> {
        self.call("lastwill_keyPartChunkCount", json!([contract]))
            .await
    }

    async fn key_part_chunk(
        &self,
        contract: &Address,
        index: usize,
    ) -> Result<Vec<u8>, LedgerError> {
        let chunk: String = self
            .call("lastwill_keyPartChunk", json!([contract, index]))
            .await?;
        hex_bytes(&chunk)
    }

    async fn submit(
        &self,
        from: &Address,
        contract: &Address,
        tx: Transaction,
    ) -> Result<(), LedgerError> {
        let receipt: Option<Value> = self
            .call_optional("lastwill_submit", json!([contract, from, tx]))
            .await?;
        if let Some(receipt) = receipt {
            log::debug!("[{}] Submitted, receipt {}", contract, receipt);
        }
        Ok(())
    }

    async fn subscribe_new_contracts(&self) -> Result<ContractFeed, LedgerError> {
        let mut seen = self.contract_count().await?;
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let ledger = self.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(ledger.registry_poll).await;
                if tx.is_closed() {
                    break;
                }

                let count = match ledger.contract_count().await {
                    Ok(count) => count,
                    Err(e) => {
                        log::warn!("Registry poll failed: {}", e);
                        continue;
                    }
                };

                while seen < count {
                    match ledger.contract_at(seen).await {
                        Ok(address) => {
                            if tx.send((seen, address)).await.is_err() {
                                return;
                            }
                            seen += 1;
                        }
                        Err(e) => {
                            log::warn!("Registry lookup #{} failed: {}", seen, e);
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_address() {
        let contract = Address([3; 20]);
        let params = json!([contract, 4]);
        assert_eq!(params_address(&params), Some(contract));
        assert_eq!(params_address(&json!([1, 2])), None);
    }

    #[test]
    fn test_error_response_shape() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32001,"message":"no code at address"}}"#;
        let parsed: JsonRpcResponse<Value> = serde_json::from_str(raw).unwrap();
        let err = parsed.error.unwrap();
        assert_eq!(err.code, CONTRACT_NOT_FOUND);
        assert!(parsed.result.is_none());
    }

    #[test]
    fn test_submit_params_shape() {
        let tx = Transaction::Propose {
            public_key: vec![2; 33],
            fee: 7,
        };
        let params = json!([Address([1; 20]), Address([2; 20]), tx]);
        assert_eq!(params_address(&params), Some(Address([1; 20])));
        assert_eq!(params[2]["type"], "propose");
        assert_eq!(params[2]["fee"], 7);
        assert!(params[0].as_str().unwrap().starts_with("0x0101"));
    }

    #[tokio::test]
    #[ignore = "requires a running ledger gateway"]
    async fn test_gateway_roundtrip() {
        let url = std::env::var("LASTWILL_LEDGER_RPC_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8645".into());
        let ledger = RpcLedger::new(&url);
        let count = ledger.contract_count().await.unwrap();
        if count > 0 {
            let contract = ledger.contract_at(count - 1).await.unwrap();
            let state = ledger.contract_state(&contract).await.unwrap();
            println!("{} {}", contract, state.phase);
        }
    }
}
