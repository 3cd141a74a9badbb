// Transfer executor - pre-flight reads, payload encoding, submission and
// confirmation for one transfer on one network
// Outcomes come back classified; only caller mistakes surface as errors
//
// Numan Thabit 2025 Nov

use super::outcome::{ExecutionOutcome, FailureKind, TransferFailure, TransferKind, TransferReceipt, TransferRequest};
use crate::config::{NetworkConfig, NetworkId, RpcSettings};
use crate::errors::{ChainError, RouteError};
use crate::transport::abi::{self, BuilderCode};
use crate::transport::{Connection, NetworkRegistry, ReceiptStatus};
use crate::units::{from_units, to_units};
use alloy_primitives::{Address, U256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Execution statistics for monitoring
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub rerouted_transfers: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
    pub gas_margin_percent: u64,
}

impl From<&RpcSettings> for ExecutorSettings {
    fn from(settings: &RpcSettings) -> Self {
        Self {
            receipt_poll_interval: settings.receipt_poll_interval(),
            receipt_timeout: settings.receipt_timeout(),
            gas_margin_percent: settings.gas_margin_percent,
        }
    }
}

enum Confirmation {
    Confirmed(ReceiptStatus),
    TimedOut,
}

pub struct TransferExecutor {
    registry: Arc<NetworkRegistry>,
    builder_code: Option<BuilderCode>,
    settings: ExecutorSettings,
    /// One lock per (network, paying account); held from the router nonce
    /// read until the receipt is in
    sender_locks: Mutex<HashMap<(NetworkId, Address), Arc<tokio::sync::Mutex<()>>>>,
    total_executions: AtomicU64,
    successful_executions: AtomicU64,
    failed_executions: AtomicU64,
    rerouted_transfers: AtomicU64,
}

impl TransferExecutor {
    pub fn new(
        registry: Arc<NetworkRegistry>,
        builder_code: Option<BuilderCode>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            registry,
            builder_code,
            settings,
            sender_locks: Mutex::new(HashMap::new()),
            total_executions: AtomicU64::new(0),
            successful_executions: AtomicU64::new(0),
            failed_executions: AtomicU64::new(0),
            rerouted_transfers: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    pub fn get_stats(&self) -> ExecutionStats {
        let total = self.total_executions.load(Ordering::Relaxed);
        let successful = self.successful_executions.load(Ordering::Relaxed);
        ExecutionStats {
            total_executions: total,
            successful_executions: successful,
            failed_executions: self.failed_executions.load(Ordering::Relaxed),
            rerouted_transfers: self.rerouted_transfers.load(Ordering::Relaxed),
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    pub(crate) fn record_reroute(&self) {
        self.rerouted_transfers.fetch_add(1, Ordering::Relaxed);
    }

    fn sender_lock(&self, network: &NetworkId, account: Address) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .sender_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry((network.clone(), account)).or_default())
    }

    /// Execute `req` on `req.network`. Pre-submission transport failures
    /// walk the network's endpoint list; anything after broadcast does not
    /// re-submit.
    #[tracing::instrument(skip_all, fields(network = %req.network, token = %req.token))]
    pub async fn execute(&self, req: &TransferRequest) -> Result<ExecutionOutcome, RouteError> {
        let config = self
            .registry
            .config(req.network.as_str())
            .ok_or_else(|| RouteError::UnknownNetwork(req.network.to_string()))?;
        let units = to_units(req.amount, config.decimals)
            .map_err(|e| RouteError::InvalidAmount(e.to_string()))?;
        self.total_executions.fetch_add(1, Ordering::Relaxed);

        let paying = match req.kind {
            TransferKind::Standard => req.sender,
            TransferKind::Disbursement => config.router,
        };
        let lock = self.sender_lock(&req.network, paying);
        let _guard = lock.lock().await;

        let outcome = loop {
            match self.attempt(req, &config, units).await {
                Ok(outcome) => break outcome,
                Err(err) if err.is_transient() && self.registry.report_failure(&req.network) => {
                    debug!(error = %err, "pre-flight failed; retrying on next endpoint");
                }
                Err(err) => {
                    let detail = if err.is_transient() {
                        warn!(error = %err, "all endpoints exhausted");
                        "all endpoints failed"
                    } else {
                        warn!(error = %err, "pre-flight call failed");
                        "network returned an unreadable response"
                    };
                    break ExecutionOutcome::failed(
                        FailureKind::NetworkUnreachable,
                        req.network.clone(),
                        detail,
                    );
                }
            }
        };

        if outcome.is_success() {
            self.successful_executions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_executions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(outcome)
    }

    /// One pass against the endpoint currently selected. `Err` means no
    /// transaction was broadcast.
    async fn attempt(
        &self,
        req: &TransferRequest,
        config: &NetworkConfig,
        units: U256,
    ) -> Result<ExecutionOutcome, ChainError> {
        let conn = self.registry.get_connection(&req.network)?;
        let reference = abi::reference_for(&req.token);

        let payload = match req.kind {
            TransferKind::Standard => {
                let (nonce, balance, allowance) = tokio::try_join!(
                    conn.router_nonce(req.sender),
                    conn.token_balance(req.sender),
                    conn.router_allowance(req.sender),
                )?;
                if balance < units {
                    return Ok(ExecutionOutcome::failed(
                        FailureKind::InsufficientBalance,
                        req.network.clone(),
                        format!(
                            "balance {} {} is below the requested {} {}",
                            from_units(balance, config.decimals),
                            config.symbol,
                            req.amount,
                            config.symbol
                        ),
                    ));
                }
                if allowance < units {
                    return Ok(ExecutionOutcome::failed(
                        FailureKind::InsufficientAllowance,
                        req.network.clone(),
                        format!(
                            "router allowance {} {} is below the requested {} {}",
                            from_units(allowance, config.decimals),
                            config.symbol,
                            req.amount,
                            config.symbol
                        ),
                    ));
                }
                abi::route_transfer(req.sender, req.recipient, units, nonce, reference)
            }
            TransferKind::Disbursement => {
                let float = conn.token_balance(config.router).await?;
                if float < units {
                    return Ok(ExecutionOutcome::failed(
                        FailureKind::ContractUnderfunded,
                        req.network.clone(),
                        format!(
                            "router holds {} {}, disbursement needs {} {}",
                            from_units(float, config.decimals),
                            config.symbol,
                            req.amount,
                            config.symbol
                        ),
                    ));
                }
                abi::disburse(req.recipient, units, reference)
            }
        };

        let fee_units = conn.fee_quote(units).await?;
        let calldata = self.finish_calldata(config, payload);

        let estimate = match conn.estimate_gas(config.router, calldata.clone()).await {
            Ok(gas) => gas,
            Err(err @ ChainError::Rpc { .. }) => {
                warn!(error = %err, "gas estimation rejected the call");
                return Ok(ExecutionOutcome::failed(
                    FailureKind::Reverted,
                    req.network.clone(),
                    "gas estimation rejected the call",
                ));
            }
            Err(err) => return Err(err),
        };
        let gas_limit = estimate.saturating_mul(100 + self.settings.gas_margin_percent) / 100;

        let tx_hash = match conn.submit(config.router, calldata, gas_limit).await {
            Ok(hash) => hash,
            Err(err @ ChainError::Rpc { .. }) => {
                warn!(error = %err, "broadcast rejected");
                return Ok(ExecutionOutcome::failed(
                    FailureKind::Reverted,
                    req.network.clone(),
                    "broadcast rejected",
                ));
            }
            Err(err) => {
                // The transaction may still land; never re-broadcast blindly.
                warn!(error = %err, "broadcast outcome unknown");
                if err.is_transient() {
                    self.registry.report_failure(&req.network);
                }
                return Ok(ExecutionOutcome::failed(
                    FailureKind::NetworkUnreachable,
                    req.network.clone(),
                    "broadcast outcome unknown",
                ));
            }
        };
        debug!(tx_hash = %tx_hash, gas_limit, "submitted; awaiting receipt");

        let outcome = match self.await_receipt(&req.network, conn, &tx_hash).await {
            Confirmation::Confirmed(ReceiptStatus::Succeeded) => {
                let fee = from_units(fee_units, config.decimals);
                info!(tx_hash = %tx_hash, amount = %req.amount, fee = %fee, "transfer confirmed");
                ExecutionOutcome::Success(TransferReceipt {
                    network: req.network.clone(),
                    tx_hash,
                    fee,
                    amount: req.amount,
                    amount_units: units,
                    symbol: config.symbol.clone(),
                    rerouted_from: None,
                })
            }
            Confirmation::Confirmed(ReceiptStatus::Reverted) => {
                warn!(tx_hash = %tx_hash, "transfer reverted on-chain");
                ExecutionOutcome::Failed(
                    TransferFailure::new(
                        FailureKind::Reverted,
                        req.network.clone(),
                        "transaction reverted on-chain",
                    )
                    .with_tx(tx_hash),
                )
            }
            Confirmation::TimedOut => ExecutionOutcome::Failed(
                TransferFailure::new(
                    FailureKind::NetworkUnreachable,
                    req.network.clone(),
                    format!(
                        "no receipt within {}s",
                        self.settings.receipt_timeout.as_secs()
                    ),
                )
                .with_tx(tx_hash),
            ),
        };
        Ok(outcome)
    }

    /// Core ABI payload, plus the attribution suffix where the network asks
    /// for it.
    fn finish_calldata(&self, config: &NetworkConfig, mut payload: Vec<u8>) -> Vec<u8> {
        if config.builder_suffix {
            if let Some(code) = &self.builder_code {
                code.append_to(&mut payload);
            }
        }
        payload
    }

    async fn await_receipt(
        &self,
        network: &NetworkId,
        mut conn: Connection,
        tx_hash: &str,
    ) -> Confirmation {
        let deadline = Instant::now() + self.settings.receipt_timeout;
        loop {
            match conn.receipt(tx_hash).await {
                Ok(Some(status)) => return Confirmation::Confirmed(status),
                Ok(None) => {}
                Err(err) if err.is_transient() => {
                    warn!(tx_hash = %tx_hash, error = %err, "receipt poll failed");
                    if self.registry.report_failure(network) {
                        match self.registry.get_connection(network) {
                            Ok(next) => conn = next,
                            Err(err) => warn!(error = %err, "reconnect failed"),
                        }
                    }
                }
                Err(err) => warn!(tx_hash = %tx_hash, error = %err, "receipt unreadable"),
            }
            if Instant::now() >= deadline {
                warn!(tx_hash = %tx_hash, "receipt wait timed out");
                return Confirmation::TimedOut;
            }
            tokio::time::sleep(self.settings.receipt_poll_interval).await;
        }
    }
}
