// Transfer ledger sink
// Append-only record of every terminal transfer outcome
//
// Numan Thabit 2025 Nov

use crate::config::NetworkId;
use crate::router::outcome::{ExecutionOutcome, FailureKind, TransferRequest};
use alloy_primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Success,
    Failed,
    NeedsAuthorization,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sender: Address,
    pub recipient: Address,
    pub amount: Decimal,
    pub fee: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub network: NetworkId,
    pub status: LedgerStatus,
    pub error_kind: Option<FailureKind>,
    pub idempotency_token: String,
}

impl LedgerEntry {
    pub fn from_outcome(req: &TransferRequest, outcome: &ExecutionOutcome) -> Self {
        let (status, fee, error_kind) = match outcome {
            ExecutionOutcome::Success(r) => (LedgerStatus::Success, Some(r.fee), None),
            ExecutionOutcome::Failed(f) => (LedgerStatus::Failed, None, Some(f.kind)),
            ExecutionOutcome::NeedsAuthorization(_) => {
                (LedgerStatus::NeedsAuthorization, None, None)
            }
        };
        Self {
            sender: req.sender,
            recipient: req.recipient,
            amount: req.amount,
            fee,
            tx_hash: outcome.tx_hash().map(str::to_string),
            network: outcome.network().clone(),
            status,
            error_kind,
            idempotency_token: req.token.clone(),
        }
    }
}

#[async_trait]
pub trait LedgerSink: Send + Sync {
    async fn record(&self, entry: LedgerEntry) -> Result<()>;
}

/// Emits each entry as a structured event on the `ledger` target.
#[derive(Debug, Default)]
pub struct TracingLedger;

#[async_trait]
impl LedgerSink for TracingLedger {
    async fn record(&self, entry: LedgerEntry) -> Result<()> {
        info!(
            target: "ledger",
            sender = %entry.sender,
            recipient = %entry.recipient,
            amount = %entry.amount,
            fee = ?entry.fee,
            tx_hash = ?entry.tx_hash,
            network = %entry.network,
            status = ?entry.status,
            error_kind = ?entry.error_kind,
            token = %entry.idempotency_token,
            "ledger entry"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryLedger {
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LedgerSink for MemoryLedger {
    async fn record(&self, entry: LedgerEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("ledger mutex poisoned"))?
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::outcome::{TransferFailure, TransferReceipt};
    use alloy_primitives::U256;

    fn req() -> TransferRequest {
        TransferRequest::new(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            Decimal::new(15, 0),
            "cmd:0",
            NetworkId::from("x"),
        )
        .unwrap()
    }

    #[test]
    fn success_entry_uses_network_actually_used() {
        let outcome = ExecutionOutcome::Success(TransferReceipt {
            network: NetworkId::from("y"),
            tx_hash: "0x01".into(),
            fee: Decimal::new(75, 3),
            amount: Decimal::new(15, 0),
            amount_units: U256::from(15_000_000u64),
            symbol: "USDC".into(),
            rerouted_from: Some(NetworkId::from("x")),
        });
        let entry = LedgerEntry::from_outcome(&req(), &outcome);
        assert_eq!(entry.network.as_str(), "y");
        assert_eq!(entry.status, LedgerStatus::Success);
        assert_eq!(entry.fee, Some(Decimal::new(75, 3)));
        assert_eq!(entry.tx_hash.as_deref(), Some("0x01"));
    }

    #[tokio::test]
    async fn memory_ledger_appends() {
        let ledger = MemoryLedger::default();
        let outcome = ExecutionOutcome::Failed(
            TransferFailure::new(FailureKind::Reverted, NetworkId::from("x"), "reverted")
                .with_tx("0x02"),
        );
        ledger
            .record(LedgerEntry::from_outcome(&req(), &outcome))
            .await
            .unwrap();
        TracingLedger
            .record(LedgerEntry::from_outcome(&req(), &outcome))
            .await
            .unwrap();
        let entries = ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, LedgerStatus::Failed);
        assert_eq!(entries[0].error_kind, Some(FailureKind::Reverted));
        assert_eq!(entries[0].tx_hash.as_deref(), Some("0x02"));
    }
}
