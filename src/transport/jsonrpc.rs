// JSON-RPC transport layer implementation
// This file implements the Ethereum JSON-RPC client used for contract
// reads, gas estimation, receipts and raw transaction submission
//
// Numan Thabit 2025 Nov

use super::{ChainReader, ChainWriter, Connector, ReceiptStatus};
use crate::config::{NetworkConfig, RpcSettings};
use crate::errors::ChainError;
use crate::signing::OperatorKey;
use alloy_consensus::TxLegacy;
use alloy_primitives::{Address, Bytes, TxKind, U256};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct JsonRpc {
    http: Client,
    url: Url,
    chain_id: u64,
    operator: Arc<OperatorKey>,
    /// Serializes account-nonce lookup and broadcast for the operating account
    submit_lock: Arc<Mutex<()>>,
    next_id: Arc<AtomicU64>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ReceiptBody {
    status: Option<String>,
}

impl JsonRpc {
    pub fn new(
        http: Client,
        url: Url,
        chain_id: u64,
        operator: Arc<OperatorKey>,
        submit_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            http,
            url,
            chain_id,
            operator,
            submit_lock,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChainError::Transport(format!("{method} send: {e}")))?;
        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ChainError::Transport(format!("{method}: http {status}")));
        }
        if !status.is_success() {
            return Err(ChainError::Rpc {
                code: i64::from(status.as_u16()),
                message: format!("{method}: http {status}"),
            });
        }
        let body: RpcResponse = resp
            .json()
            .await
            .map_err(|e| ChainError::Transport(format!("{method} json parse: {e}")))?;
        if let Some(err) = body.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<U256, ChainError> {
        let value = self.request(method, params).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| ChainError::Decode(format!("{method}: expected hex quantity")))?;
        parse_quantity(raw)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        let price = self.quantity("eth_gasPrice", json!([])).await?;
        u128::try_from(price).map_err(|_| ChainError::Decode("gas price overflows u128".into()))
    }

    async fn account_nonce(&self, address: Address) -> Result<u64, ChainError> {
        let nonce = self
            .quantity(
                "eth_getTransactionCount",
                json!([format!("{address:#x}"), "pending"]),
            )
            .await?;
        u64::try_from(nonce).map_err(|_| ChainError::Decode("account nonce overflows u64".into()))
    }
}

pub fn parse_quantity(raw: &str) -> Result<U256, ChainError> {
    let digits = raw.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Decode(format!("bad quantity {raw}: {e}")))
}

fn decode_hex_data(raw: &str) -> Result<Vec<u8>, ChainError> {
    hex::decode(raw.trim_start_matches("0x"))
        .map_err(|e| ChainError::Decode(format!("bad hex data: {e}")))
}

#[async_trait]
impl ChainReader for JsonRpc {
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let value = self
            .request(
                "eth_call",
                json!([
                    { "to": format!("{to:#x}"), "data": format!("0x{}", hex::encode(&data)) },
                    "latest"
                ]),
            )
            .await?;
        let raw = value
            .as_str()
            .ok_or_else(|| ChainError::Decode("eth_call: expected hex data".into()))?;
        decode_hex_data(raw)
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
    ) -> Result<u64, ChainError> {
        let gas = self
            .quantity(
                "eth_estimateGas",
                json!([{
                    "from": format!("{from:#x}"),
                    "to": format!("{to:#x}"),
                    "data": format!("0x{}", hex::encode(&data)),
                }]),
            )
            .await?;
        u64::try_from(gas).map_err(|_| ChainError::Decode("gas estimate overflows u64".into()))
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<ReceiptStatus>, ChainError> {
        let value = self
            .request("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let receipt: ReceiptBody = serde_json::from_value(value)
            .map_err(|e| ChainError::Decode(format!("receipt: {e}")))?;
        match receipt.status.as_deref() {
            Some("0x1") => Ok(Some(ReceiptStatus::Succeeded)),
            Some("0x0") => Ok(Some(ReceiptStatus::Reverted)),
            other => Err(ChainError::Decode(format!(
                "receipt status {other:?} not understood"
            ))),
        }
    }
}

#[async_trait]
impl ChainWriter for JsonRpc {
    fn operator(&self) -> Address {
        self.operator.address()
    }

    async fn submit(
        &self,
        to: Address,
        data: Vec<u8>,
        gas_limit: u64,
    ) -> Result<String, ChainError> {
        let _guard = self.submit_lock.lock().await;
        let (gas_price, nonce) = tokio::try_join!(
            self.gas_price(),
            self.account_nonce(self.operator.address())
        )?;
        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(to),
            value: U256::ZERO,
            input: Bytes::from(data),
        };
        let raw = self.operator.sign_legacy(&tx)?;
        let value = self
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(&raw))]),
            )
            .await?;
        let hash = value
            .as_str()
            .ok_or_else(|| ChainError::Decode("eth_sendRawTransaction: expected hash".into()))?
            .to_string();
        debug!(endpoint = %self.url, tx_hash = %hash, nonce = nonce, "transaction broadcast");
        Ok(hash)
    }
}

/// Production connector: one HTTP client and one operating key shared by
/// every endpoint of every network.
pub struct RpcConnector {
    http: Client,
    operator: Arc<OperatorKey>,
    submit_lock: Arc<Mutex<()>>,
}

impl RpcConnector {
    pub fn new(settings: &RpcSettings, operator: Arc<OperatorKey>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .gzip(true)
            .build()
            .context("build HTTP client for JSON-RPC")?;
        Ok(Self {
            http,
            operator,
            submit_lock: Arc::new(Mutex::new(())),
        })
    }
}

impl Connector for RpcConnector {
    fn connect(
        &self,
        network: &NetworkConfig,
        endpoint: &Url,
    ) -> Result<(Arc<dyn ChainReader>, Arc<dyn ChainWriter>), ChainError> {
        let rpc = Arc::new(JsonRpc::new(
            self.http.clone(),
            endpoint.clone(),
            network.chain_id,
            Arc::clone(&self.operator),
            Arc::clone(&self.submit_lock),
        ));
        Ok((rpc.clone(), rpc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), U256::ZERO);
        assert_eq!(parse_quantity("0x").unwrap(), U256::ZERO);
        assert_eq!(parse_quantity("0x5208").unwrap(), U256::from(21_000u64));
        assert!(matches!(parse_quantity("0xzz"), Err(ChainError::Decode(_))));
    }

    #[test]
    fn decodes_call_results() {
        let data = decode_hex_data("0x000000000000000000000000000000000000000000000000000000000098968000")
            .unwrap();
        assert_eq!(data.len(), 33);
        assert!(decode_hex_data("0xabc").is_err());
    }

    #[test]
    fn receipt_status_field_deserializes() {
        let receipt: ReceiptBody =
            serde_json::from_value(json!({ "status": "0x0", "blockNumber": "0x10" })).unwrap();
        assert_eq!(receipt.status.as_deref(), Some("0x0"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let key = Arc::new(OperatorKey::from_hex(&"46".repeat(32)).unwrap());
        let rpc = JsonRpc::new(
            Client::new(),
            "http://127.0.0.1:9".parse().unwrap(),
            1,
            key,
            Arc::new(Mutex::new(())),
        );
        let err = rpc.call(Address::ZERO, vec![]).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
