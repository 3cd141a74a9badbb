// Transport layer
// Read/write handles against one network endpoint, the bounded local retry
// wrapped around every handle call, and the endpoint registry with failover
//
// Numan Thabit 2025 Nov

pub mod abi;
pub mod jsonrpc;
#[cfg(test)]
pub(crate) mod mock;
pub mod registry;

use crate::config::{NetworkConfig, RpcSettings};
use crate::errors::ChainError;
use crate::metrics::{REQ_ERRORS, REQ_LATENCY};
use abi::{IMoniRouter, IERC20};
use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use backoff::backoff::Constant;
use backoff::future::retry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use registry::{Connector, NetworkRegistry};

/// Receipt state of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Succeeded,
    Reverted,
}

/// Unauthenticated view access to one endpoint.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError>;
    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: Vec<u8>,
    ) -> Result<u64, ChainError>;
    /// `None` while the transaction is still pending.
    async fn receipt(&self, tx_hash: &str) -> Result<Option<ReceiptStatus>, ChainError>;
}

/// State-mutating access, signed with the shared operating account.
#[async_trait]
pub trait ChainWriter: Send + Sync {
    fn operator(&self) -> Address;
    /// Sign and broadcast; returns the transaction hash.
    async fn submit(&self, to: Address, data: Vec<u8>, gas_limit: u64)
        -> Result<String, ChainError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RpcSettings) -> Self {
        Self {
            attempts: settings.local_retry_attempts.max(1),
            backoff: Duration::from_millis(settings.local_retry_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RpcSettings::default())
    }
}

/// Run `op` up to `policy.attempts` times with a fixed pause, retrying only
/// transient errors.
pub async fn with_local_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut attempt = 0u32;
    retry(Constant::new(policy.backoff), || {
        attempt += 1;
        let last = attempt >= policy.attempts;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(err) if err.is_transient() && !last => Err(backoff::Error::transient(err)),
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        }
    })
    .await
}

/// Handles bound to the endpoint a network's cursor pointed at when the
/// connection was taken.
#[derive(Clone)]
pub struct Connection {
    pub config: Arc<NetworkConfig>,
    pub endpoint: Url,
    reader: Arc<dyn ChainReader>,
    writer: Arc<dyn ChainWriter>,
    retry: RetryPolicy,
}

impl Connection {
    pub fn new(
        config: Arc<NetworkConfig>,
        endpoint: Url,
        reader: Arc<dyn ChainReader>,
        writer: Arc<dyn ChainWriter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            config,
            endpoint,
            reader,
            writer,
            retry,
        }
    }

    pub fn operator(&self) -> Address {
        self.writer.operator()
    }

    async fn timed<T, F, Fut>(&self, method: &str, op: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        self.timed_with(self.retry, method, op).await
    }

    async fn timed_with<T, F, Fut>(
        &self,
        policy: RetryPolicy,
        method: &str,
        op: F,
    ) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let network = self.config.id.as_str();
        let _timer = REQ_LATENCY
            .with_label_values(&[network, method])
            .start_timer();
        let result = with_local_retry(policy, op).await;
        if result.is_err() {
            REQ_ERRORS.with_label_values(&[network, method]).inc();
        }
        result
    }

    pub async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        self.timed("eth_call", || self.reader.call(to, data.clone()))
            .await
    }

    async fn call_uint<C: SolCall<Return = U256>>(
        &self,
        to: Address,
        data: Vec<u8>,
    ) -> Result<U256, ChainError> {
        let raw = self.call(to, data).await?;
        abi::decode_returns::<C>(&raw)
    }

    pub async fn token_balance(&self, owner: Address) -> Result<U256, ChainError> {
        self.call_uint::<IERC20::balanceOfCall>(self.config.token, abi::balance_of(owner))
            .await
    }

    /// Spend the router contract is authorized to make on `owner`'s behalf.
    pub async fn router_allowance(&self, owner: Address) -> Result<U256, ChainError> {
        self.call_uint::<IERC20::allowanceCall>(
            self.config.token,
            abi::allowance(owner, self.config.router),
        )
        .await
    }

    pub async fn router_nonce(&self, owner: Address) -> Result<U256, ChainError> {
        self.call_uint::<IMoniRouter::noncesCall>(self.config.router, abi::nonces(owner))
            .await
    }

    pub async fn fee_quote(&self, amount: U256) -> Result<U256, ChainError> {
        self.call_uint::<IMoniRouter::quoteFeeCall>(self.config.router, abi::quote_fee(amount))
            .await
    }

    pub async fn estimate_gas(&self, to: Address, data: Vec<u8>) -> Result<u64, ChainError> {
        let from = self.operator();
        self.timed("eth_estimateGas", || {
            self.reader.estimate_gas(from, to, data.clone())
        })
        .await
    }

    /// Broadcast is attempted once. A lost response may still have landed,
    /// so repeating it here could move funds twice.
    pub async fn submit(
        &self,
        to: Address,
        data: Vec<u8>,
        gas_limit: u64,
    ) -> Result<String, ChainError> {
        let once = RetryPolicy {
            attempts: 1,
            ..self.retry
        };
        self.timed_with(once, "eth_sendRawTransaction", || {
            self.writer.submit(to, data.clone(), gas_limit)
        })
        .await
    }

    pub async fn receipt(&self, tx_hash: &str) -> Result<Option<ReceiptStatus>, ChainError> {
        self.timed("eth_getTransactionReceipt", || self.reader.receipt(tx_hash))
            .await
    }
}
