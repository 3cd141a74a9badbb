// Transfer requests and classified outcomes
// This file defines what callers hand to the routing engine and the closed
// set of results it hands back
//
// Numan Thabit 2025 Nov

use crate::config::{NetworkConfig, NetworkId};
use crate::errors::RouteError;
use alloy_primitives::{Address, U256};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Upper bound on the detail string carried by a failure.
pub const MAX_DETAIL_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Moves the sender's tokens through the router under their allowance
    #[default]
    Standard,
    /// Pays the recipient out of the router contract's own float
    Disbursement,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub sender: Address,
    pub recipient: Address,
    /// Human units; converted per network at execution time
    pub amount: Decimal,
    /// Caller-supplied idempotency token, unique per logical transfer
    pub token: String,
    pub network: NetworkId,
    pub kind: TransferKind,
    pub allow_reroute: bool,
}

impl TransferRequest {
    pub fn new(
        sender: Address,
        recipient: Address,
        amount: Decimal,
        token: impl Into<String>,
        network: NetworkId,
    ) -> Result<Self, RouteError> {
        if amount <= Decimal::ZERO {
            return Err(RouteError::InvalidAmount(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let token = token.into();
        if token.trim().is_empty() {
            return Err(RouteError::MissingToken);
        }
        Ok(Self {
            sender,
            recipient,
            amount,
            token,
            network,
            kind: TransferKind::Standard,
            allow_reroute: true,
        })
    }

    pub fn disbursement(mut self) -> Self {
        self.kind = TransferKind::Disbursement;
        self
    }

    pub fn with_reroute(mut self, allow: bool) -> Self {
        self.allow_reroute = allow;
        self
    }

    /// Same logical transfer, aimed at another network.
    pub fn on_network(&self, network: NetworkId) -> Self {
        Self {
            network,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientBalance,
    InsufficientAllowance,
    Reverted,
    NetworkUnreachable,
    ContractUnderfunded,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InsufficientBalance => "insufficient_balance",
            FailureKind::InsufficientAllowance => "insufficient_allowance",
            FailureKind::Reverted => "reverted",
            FailureKind::NetworkUnreachable => "network_unreachable",
            FailureKind::ContractUnderfunded => "contract_underfunded",
        }
    }

    /// Failures another network might not have.
    pub fn is_funds_shortfall(&self) -> bool {
        matches!(
            self,
            FailureKind::InsufficientBalance | FailureKind::InsufficientAllowance
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferFailure {
    pub kind: FailureKind,
    pub network: NetworkId,
    pub detail: String,
    /// Present when a transaction was broadcast before the failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Every configured network was scanned before giving up
    #[serde(default)]
    pub checked_all_networks: bool,
}

impl TransferFailure {
    pub fn new(kind: FailureKind, network: NetworkId, detail: impl Into<String>) -> Self {
        Self {
            kind,
            network,
            detail: bounded(detail.into()),
            tx_hash: None,
            checked_all_networks: false,
        }
    }

    pub fn with_tx(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Network the transfer actually executed on
    pub network: NetworkId,
    pub tx_hash: String,
    /// Router fee quoted before submission, in human units
    pub fee: Decimal,
    pub amount: Decimal,
    pub amount_units: U256,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerouted_from: Option<NetworkId>,
}

/// An alternate network holds the funds but the router may not spend them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationNeeded {
    pub network: NetworkId,
    pub symbol: String,
    pub balance: Decimal,
    pub allowance: Decimal,
    pub required: Decimal,
    /// Preferred network whose funds shortfall started the scan
    pub origin: NetworkId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success(TransferReceipt),
    Failed(TransferFailure),
    NeedsAuthorization(AuthorizationNeeded),
}

impl ExecutionOutcome {
    pub fn failed(kind: FailureKind, network: NetworkId, detail: impl Into<String>) -> Self {
        ExecutionOutcome::Failed(TransferFailure::new(kind, network, detail))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    /// Network the outcome is reported against.
    pub fn network(&self) -> &NetworkId {
        match self {
            ExecutionOutcome::Success(r) => &r.network,
            ExecutionOutcome::Failed(f) => &f.network,
            ExecutionOutcome::NeedsAuthorization(a) => &a.network,
        }
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Success(r) => Some(&r.tx_hash),
            ExecutionOutcome::Failed(f) => f.tx_hash.as_deref(),
            ExecutionOutcome::NeedsAuthorization(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ExecutionOutcome::Failed(f) => Some(f.kind),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success(_) => "success",
            ExecutionOutcome::Failed(_) => "failed",
            ExecutionOutcome::NeedsAuthorization(_) => "needs_authorization",
        }
    }

    /// One message class per outcome; never includes transport text.
    pub fn user_message(&self) -> String {
        match self {
            ExecutionOutcome::Success(r) => {
                let via = r
                    .rerouted_from
                    .as_ref()
                    .map(|from| format!(" (rerouted from {from})"))
                    .unwrap_or_default();
                format!(
                    "Sent {} {} on {}{via}. Fee {} {}. Tx {}",
                    r.amount, r.symbol, r.network, r.fee, r.symbol, r.tx_hash
                )
            }
            ExecutionOutcome::NeedsAuthorization(a) => format!(
                "Not enough funds on {}. {} holds {} {} but the router is only approved for {} {}; approve at least {} {} on {} and try again",
                a.origin, a.network, a.balance, a.symbol, a.allowance, a.symbol, a.required, a.symbol, a.network
            ),
            ExecutionOutcome::Failed(f) => {
                let scope = if f.checked_all_networks {
                    " (checked all networks)"
                } else {
                    ""
                };
                match f.kind {
                    FailureKind::InsufficientBalance => {
                        format!("Insufficient balance on {}{scope}: {}", f.network, f.detail)
                    }
                    FailureKind::InsufficientAllowance => format!(
                        "The router is not approved to spend this amount on {}{scope}: {}",
                        f.network, f.detail
                    ),
                    FailureKind::Reverted => format!(
                        "The transfer was rejected on {}{}",
                        f.network,
                        f.tx_hash
                            .as_ref()
                            .map(|h| format!(" (tx {h})"))
                            .unwrap_or_default()
                    ),
                    FailureKind::NetworkUnreachable => {
                        format!("{} is unreachable right now, try again later", f.network)
                    }
                    FailureKind::ContractUnderfunded => format!(
                        "The payout contract on {} does not hold enough funds",
                        f.network
                    ),
                }
            }
        }
    }
}

/// Pre-flight view of one address on one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundsStatus {
    pub network: NetworkId,
    pub has_balance: bool,
    pub has_allowance: bool,
    pub balance: Decimal,
    pub allowance: Decimal,
    pub symbol: String,
    /// False when both endpoint attempts failed and the zeros are placeholders
    pub reachable: bool,
}

impl FundsStatus {
    pub fn measured(
        config: &NetworkConfig,
        required: Decimal,
        balance: Decimal,
        allowance: Decimal,
    ) -> Self {
        // dust that rounds to nothing cannot be sent here at all
        let required = round_to_network(required, config.decimals);
        let payable = required > Decimal::ZERO;
        Self {
            network: config.id.clone(),
            has_balance: payable && balance >= required,
            has_allowance: payable && allowance >= required,
            balance,
            allowance,
            symbol: config.symbol.clone(),
            reachable: true,
        }
    }

    pub fn unavailable(config: &NetworkConfig) -> Self {
        Self {
            network: config.id.clone(),
            has_balance: false,
            has_allowance: false,
            balance: Decimal::ZERO,
            allowance: Decimal::ZERO,
            symbol: config.symbol.clone(),
            reachable: false,
        }
    }

    /// Both checks pass, so a transfer here is expected to go through.
    pub fn is_eligible(&self) -> bool {
        self.has_balance && self.has_allowance
    }
}

/// The amount a network will actually be asked to move.
pub fn round_to_network(amount: Decimal, decimals: u32) -> Decimal {
    amount.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

fn bounded(detail: String) -> String {
    if detail.chars().count() <= MAX_DETAIL_CHARS {
        return detail;
    }
    let mut cut: String = detail.chars().take(MAX_DETAIL_CHARS - 3).collect();
    cut.push_str("...");
    cut
}
