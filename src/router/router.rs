// Cross-chain router
// Tries the preferred network, scans alternates on a funds shortfall and
// reroutes to the first network that can pay. Each step is a named
// transition of an explicit state machine
//
// Numan Thabit 2025 Nov

use super::execution::{ExecutionStats, TransferExecutor};
use super::funds::FundsVerifier;
use super::outcome::{
    AuthorizationNeeded, ExecutionOutcome, FundsStatus, TransferFailure, TransferKind,
    TransferRequest,
};
use crate::config::NetworkId;
use crate::errors::RouteError;
use crate::ledger::{LedgerEntry, LedgerSink};
use crate::metrics::TRANSFER_OUTCOMES;
use crate::transport::NetworkRegistry;
use alloy_primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Where a single logical transfer currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteState {
    Trying {
        network: NetworkId,
        /// Preferred-network failure that caused a reroute here
        origin: Option<TransferFailure>,
    },
    Scanning {
        origin: TransferFailure,
    },
    Rerouting {
        network: NetworkId,
        origin: TransferFailure,
    },
    Done(ExecutionOutcome),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub recipient: Address,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemReport {
    pub index: usize,
    pub recipient: Address,
    pub token: String,
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BatchItemReport>,
}

/// High-level router that ties verification, execution and the ledger
/// together
pub struct CrossChainRouter {
    registry: Arc<NetworkRegistry>,
    verifier: FundsVerifier,
    executor: Arc<TransferExecutor>,
    ledger: Arc<dyn LedgerSink>,
}

impl CrossChainRouter {
    pub fn new(executor: Arc<TransferExecutor>, ledger: Arc<dyn LedgerSink>) -> Self {
        let registry = Arc::clone(executor.registry());
        Self {
            verifier: FundsVerifier::new(Arc::clone(&registry)),
            registry,
            executor,
            ledger,
        }
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    pub fn get_stats(&self) -> ExecutionStats {
        self.executor.get_stats()
    }

    /// Route `req` and execute it, reporting the network actually used.
    /// The ledger sees exactly one entry per call that returns `Ok`.
    #[tracing::instrument(skip_all, fields(preferred = %req.network, token = %req.token))]
    pub async fn route_and_execute(
        &self,
        req: &TransferRequest,
    ) -> Result<ExecutionOutcome, RouteError> {
        if !self.registry.contains(req.network.as_str()) {
            return Err(RouteError::UnknownNetwork(req.network.to_string()));
        }

        let mut state = RouteState::Trying {
            network: req.network.clone(),
            origin: None,
        };
        let outcome = loop {
            state = match state {
                RouteState::Trying { network, origin } => {
                    self.try_network(req, network, origin).await?
                }
                RouteState::Scanning { origin } => self.scan(req, origin).await,
                RouteState::Rerouting { network, origin } => {
                    self.reroute(req, network, origin).await
                }
                RouteState::Done(outcome) => break outcome,
            };
        };

        self.finish(req, &outcome).await;
        Ok(outcome)
    }

    /// Trying -> Done, or Trying -> Scanning on a funds shortfall of the
    /// preferred network when rerouting is allowed. An alternate that
    /// refuses the request outright ends the transfer with the preferred
    /// network's shortfall.
    async fn try_network(
        &self,
        req: &TransferRequest,
        network: NetworkId,
        origin: Option<TransferFailure>,
    ) -> Result<RouteState, RouteError> {
        let attempt = req.on_network(network);
        match (self.executor.execute(&attempt).await, origin) {
            (Ok(outcome), origin) => Ok(Self::after_attempt(
                req,
                outcome,
                origin.map(|o| o.network),
            )),
            (Err(err), Some(origin)) => {
                warn!(network = %attempt.network, error = %err, "alternate refused rerouted transfer");
                Ok(RouteState::Done(Self::exhausted(origin)))
            }
            (Err(err), None) => Err(err),
        }
    }

    pub(crate) fn after_attempt(
        req: &TransferRequest,
        outcome: ExecutionOutcome,
        rerouted_from: Option<NetworkId>,
    ) -> RouteState {
        match outcome {
            ExecutionOutcome::Success(mut receipt) => {
                receipt.rerouted_from = rerouted_from;
                RouteState::Done(ExecutionOutcome::Success(receipt))
            }
            ExecutionOutcome::Failed(failure)
                if failure.kind.is_funds_shortfall()
                    && rerouted_from.is_none()
                    && req.allow_reroute
                    && req.kind == TransferKind::Standard =>
            {
                RouteState::Scanning { origin: failure }
            }
            other => RouteState::Done(other),
        }
    }

    /// Scanning -> Rerouting or Done.
    async fn scan(&self, req: &TransferRequest, origin: TransferFailure) -> RouteState {
        let statuses = self
            .verifier
            .scan_alternates(req.sender, req.amount, Some(&origin.network))
            .await;
        Self::select_alternate(req.amount, &statuses, origin)
    }

    /// First alternate with both balance and allowance wins. A balance-only
    /// alternate is only ever reported.
    pub fn select_alternate(
        required: Decimal,
        statuses: &[FundsStatus],
        origin: TransferFailure,
    ) -> RouteState {
        if let Some(chosen) = statuses.iter().find(|s| s.reachable && s.is_eligible()) {
            return RouteState::Rerouting {
                network: chosen.network.clone(),
                origin,
            };
        }
        if let Some(funded) = statuses.iter().find(|s| s.reachable && s.has_balance) {
            return RouteState::Done(Self::needs_authorization(required, funded, &origin));
        }
        RouteState::Done(Self::exhausted(origin))
    }

    /// Rerouting -> Trying, after re-checking the chosen network.
    async fn reroute(
        &self,
        req: &TransferRequest,
        network: NetworkId,
        origin: TransferFailure,
    ) -> RouteState {
        let status = self
            .verifier
            .check_funds(req.sender, req.amount, &network)
            .await;
        if status.is_eligible() {
            info!(from = %origin.network, to = %network, reason = origin.kind.as_str(), "rerouting transfer");
            self.executor.record_reroute();
            RouteState::Trying {
                network,
                origin: Some(origin),
            }
        } else if status.has_balance {
            RouteState::Done(Self::needs_authorization(req.amount, &status, &origin))
        } else {
            RouteState::Done(Self::exhausted(origin))
        }
    }

    fn needs_authorization(
        required: Decimal,
        status: &FundsStatus,
        origin: &TransferFailure,
    ) -> ExecutionOutcome {
        ExecutionOutcome::NeedsAuthorization(AuthorizationNeeded {
            network: status.network.clone(),
            symbol: status.symbol.clone(),
            balance: status.balance,
            allowance: status.allowance,
            required,
            origin: origin.network.clone(),
        })
    }

    fn exhausted(mut origin: TransferFailure) -> ExecutionOutcome {
        origin.checked_all_networks = true;
        ExecutionOutcome::Failed(origin)
    }

    async fn finish(&self, req: &TransferRequest, outcome: &ExecutionOutcome) {
        let label = outcome
            .failure_kind()
            .map(|k| k.as_str())
            .unwrap_or_else(|| outcome.status());
        TRANSFER_OUTCOMES
            .with_label_values(&[outcome.network().as_str(), label])
            .inc();
        match outcome {
            ExecutionOutcome::Success(r) => info!(
                network = %r.network,
                tx_hash = %r.tx_hash,
                rerouted_from = ?r.rerouted_from,
                "transfer succeeded"
            ),
            other => warn!(
                network = %other.network(),
                status = other.status(),
                kind = ?other.failure_kind(),
                tx_hash = ?other.tx_hash(),
                "transfer did not complete"
            ),
        }
        if let Err(err) = self
            .ledger
            .record(LedgerEntry::from_outcome(req, outcome))
            .await
        {
            warn!(error = %err, "ledger write failed");
        }
    }

    /// Transfers run one at a time in submission order. Each item gets its
    /// own idempotency token derived from the command token, its position
    /// and its recipient.
    pub async fn route_batch(
        &self,
        sender: Address,
        items: &[BatchItem],
        command_token: &str,
        network: &NetworkId,
    ) -> Result<BatchReport, RouteError> {
        if command_token.trim().is_empty() {
            return Err(RouteError::MissingToken);
        }
        let requests = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                TransferRequest::new(
                    sender,
                    item.recipient,
                    item.amount,
                    batch_token(command_token, index, item.recipient),
                    network.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = BatchReport {
            succeeded: 0,
            failed: 0,
            items: Vec::with_capacity(requests.len()),
        };
        for (index, req) in requests.into_iter().enumerate() {
            let outcome = self.route_and_execute(&req).await?;
            if outcome.is_success() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            report.items.push(BatchItemReport {
                index,
                recipient: req.recipient,
                token: req.token,
                outcome,
            });
        }
        Ok(report)
    }

    pub async fn check_funds_across_networks(
        &self,
        sender: Address,
        amount: Decimal,
        exclude: Option<&NetworkId>,
    ) -> Vec<FundsStatus> {
        self.verifier.scan_alternates(sender, amount, exclude).await
    }
}

pub fn batch_token(command_token: &str, index: usize, recipient: Address) -> String {
    format!("{command_token}:{index}:{recipient}")
}
