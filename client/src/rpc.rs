//! Ethereum JSON-RPC ledger binding over WebSocket.
//!
//! The node holds the account key (`eth_sendTransaction`), so the client
//! never signs. Connection handling follows a connect-once, reconnect-on-use
//! pattern: every request first checks the socket and rebuilds it if the
//! node dropped us.
//!
//! # Example
//!
//! ```no_run
//! use shroud_client::rpc::JsonRpcLedger;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = JsonRpcLedger::connect("ws://127.0.0.1:8546").await?;
//! let head = ledger.block_number().await?;
//! println!("node is at block {head}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::core::ClientError as RpcError;
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::abi;
use crate::error::{ClientError, ClientResult};
use crate::ledger::{
    ChainSnapshot, EventBatch, Ledger, LedgerTransaction, Receipt, ReceiptStatus,
};
use crate::types::{Address, GameId, TxHash};

#[derive(Clone, Debug)]
pub struct RpcConfig {
    /// WebSocket endpoint URL (e.g., "ws://127.0.0.1:8546")
    pub endpoint: String,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// How often `eth_getTransactionReceipt` is polled while waiting.
    pub receipt_poll_interval: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8546".to_string(),
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(2),
            receipt_poll_interval: Duration::from_millis(1000),
        }
    }
}

impl RpcConfig {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

/// `eth_sendTransaction` request object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRequest {
    from: String,
    to: String,
    data: String,
    nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gas_price: Option<String>,
}

impl From<&LedgerTransaction> for TransactionRequest {
    fn from(tx: &LedgerTransaction) -> Self {
        Self {
            from: tx.from.to_string(),
            to: tx.to.to_string(),
            data: format!("0x{}", hex::encode(tx.call.encode())),
            nonce: quantity(u128::from(tx.nonce)),
            gas: tx.gas.gas_limit.map(|limit| quantity(u128::from(limit))),
            gas_price: tx.gas.gas_price.map(quantity),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct RpcLog {
    topics: Vec<String>,
    data: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogFilter {
    address: String,
    from_block: String,
    to_block: String,
}

#[derive(Clone, Debug, Serialize)]
struct CallRequest {
    to: String,
    data: String,
}

fn quantity(value: u128) -> String {
    format!("{value:#x}")
}

fn parse_quantity(raw: &str) -> ClientResult<u128> {
    let digits = raw.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|err| ClientError::Ledger(format!("invalid quantity {raw}: {err}")))
}

fn parse_u64(raw: &str) -> ClientResult<u64> {
    let value = parse_quantity(raw)?;
    u64::try_from(value).map_err(|_| ClientError::Ledger(format!("quantity {raw} exceeds u64")))
}

fn decode_data(raw: &str) -> ClientResult<Vec<u8>> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|err| ClientError::Ledger(format!("invalid hex data: {err}")))
}

pub struct JsonRpcLedger {
    client: Arc<RwLock<WsClient>>,
    config: RpcConfig,
}

impl JsonRpcLedger {
    /// Connect to a node
    ///
    /// # Arguments
    ///
    /// * `endpoint` - WebSocket endpoint URL (e.g., "ws://127.0.0.1:8546")
    pub async fn connect(endpoint: &str) -> ClientResult<Self> {
        Self::connect_with_config(RpcConfig::with_endpoint(endpoint)).await
    }

    pub async fn connect_with_config(config: RpcConfig) -> ClientResult<Self> {
        let client = Self::build_client(&config).await?;
        Ok(Self {
            client: Arc::new(RwLock::new(client)),
            config,
        })
    }

    async fn build_client(config: &RpcConfig) -> ClientResult<WsClient> {
        WsClientBuilder::default()
            .connection_timeout(config.connection_timeout)
            .request_timeout(config.request_timeout)
            .build(&config.endpoint)
            .await
            .map_err(|e| ClientError::Ledger(format!("failed to connect to {}: {}", config.endpoint, e)))
    }

    async fn ensure_connected(&self) -> ClientResult<()> {
        let client = self.client.read().await;
        if client.is_connected() {
            return Ok(());
        }
        drop(client);

        let mut attempts = 0;
        loop {
            attempts += 1;
            match Self::build_client(&self.config).await {
                Ok(new_client) => {
                    let mut client = self.client.write().await;
                    *client = new_client;
                    debug!(endpoint = %self.config.endpoint, attempts, "reconnected to node");
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.max_reconnect_attempts {
                        return Err(e);
                    }
                    warn!(endpoint = %self.config.endpoint, attempts, "reconnect failed, retrying");
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }

    async fn request<R: DeserializeOwned>(
        &self,
        method: &str,
        params: ArrayParams,
    ) -> Result<R, RpcError> {
        let client = self.client.read().await;
        client.request(method, params).await
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: ArrayParams) -> ClientResult<R> {
        self.ensure_connected().await?;
        self.request(method, params)
            .await
            .map_err(|e| ClientError::Ledger(format!("{method} failed: {e}")))
    }

    pub async fn block_number(&self) -> ClientResult<u64> {
        let raw: String = self.call("eth_blockNumber", rpc_params![]).await?;
        parse_u64(&raw)
    }

    async fn receipt(&self, tx_hash: &TxHash) -> ClientResult<Option<Receipt>> {
        let raw: Option<RpcReceipt> = self
            .call("eth_getTransactionReceipt", rpc_params![tx_hash.to_string()])
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        // Some nodes return a receipt object for pending transactions.
        let Some(block) = raw.block_number.as_deref() else {
            return Ok(None);
        };
        let status = match raw.status.as_deref().map(parse_quantity).transpose()? {
            Some(0) => ReceiptStatus::Reverted,
            _ => ReceiptStatus::Success,
        };
        Ok(Some(Receipt {
            tx_hash: raw.transaction_hash.parse()?,
            block_number: parse_u64(block)?,
            status,
        }))
    }
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    async fn balance(&self, account: &Address) -> ClientResult<u128> {
        let raw: String = self
            .call("eth_getBalance", rpc_params![account.to_string(), "latest"])
            .await?;
        parse_quantity(&raw)
    }

    async fn nonce(&self, account: &Address) -> ClientResult<u64> {
        let raw: String = self
            .call(
                "eth_getTransactionCount",
                rpc_params![account.to_string(), "pending"],
            )
            .await?;
        parse_u64(&raw)
    }

    async fn submit(&self, tx: LedgerTransaction) -> ClientResult<TxHash> {
        self.ensure_connected().await?;
        let request = TransactionRequest::from(&tx);
        match self
            .request::<String>("eth_sendTransaction", rpc_params![request])
            .await
        {
            Ok(hash) => hash.parse(),
            Err(RpcError::Call(rejection)) => {
                Err(ClientError::Submission(rejection.message().to_string()))
            }
            Err(e) => Err(ClientError::Ledger(format!("eth_sendTransaction failed: {e}"))),
        }
    }

    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> ClientResult<Receipt> {
        loop {
            if let Some(receipt) = self.receipt(tx_hash).await? {
                return Ok(receipt);
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
    }

    async fn game_snapshot(&self, contract: &Address, game: GameId) -> ClientResult<ChainSnapshot> {
        let block_number = self.block_number().await?;
        let call = CallRequest {
            to: contract.to_string(),
            data: format!("0x{}", hex::encode(abi::get_units_call(game))),
        };
        let raw: String = self
            .call(
                "eth_call",
                rpc_params![call, quantity(u128::from(block_number))],
            )
            .await?;
        let units = abi::decode_units(&decode_data(&raw)?)?;
        Ok(ChainSnapshot {
            game,
            block_number,
            units,
        })
    }

    async fn events_since(
        &self,
        contract: &Address,
        game: GameId,
        from_block: u64,
    ) -> ClientResult<EventBatch> {
        let head = self.block_number().await?;
        if from_block > head {
            return Ok(EventBatch {
                events: Vec::new(),
                next_block: from_block,
            });
        }
        let filter = LogFilter {
            address: contract.to_string(),
            from_block: quantity(u128::from(from_block)),
            to_block: quantity(u128::from(head)),
        };
        let logs: Vec<RpcLog> = self.call("eth_getLogs", rpc_params![filter]).await?;
        let mut events = Vec::new();
        for log in logs {
            let Some(topic) = log.topics.first() else {
                continue;
            };
            let topic = decode_data(topic)?;
            if let Some(event) = abi::decode_event(&topic, &decode_data(&log.data)?)? {
                if event.game() == game {
                    events.push(event);
                }
            }
        }
        Ok(EventBatch {
            events,
            next_block: head + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{GasOverrides, LedgerCall};

    #[test]
    fn quantities_are_minimal_hex() {
        assert_eq!(quantity(0), "0x0");
        assert_eq!(quantity(255), "0xff");
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0x1bc16d674ec80000").unwrap(), 2_000_000_000_000_000_000);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn transaction_request_shape() {
        let tx = LedgerTransaction {
            from: Address([1; 20]),
            to: Address([2; 20]),
            call: LedgerCall::JoinGame { game: 1 },
            nonce: 7,
            gas: GasOverrides {
                gas_limit: Some(21_000),
                gas_price: None,
            },
        };
        let json = serde_json::to_value(TransactionRequest::from(&tx)).unwrap();
        assert_eq!(json["nonce"], "0x7");
        assert_eq!(json["gas"], "0x5208");
        assert!(json.get("gasPrice").is_none());
        assert!(json["data"].as_str().unwrap().starts_with("0x"));
    }
}
