// Router module - routing and execution plane
// Funds verification, single-network execution and the cross-chain router
// that decides where a transfer actually runs, plus its HTTP surface
//
// Numan Thabit 2025 Nov

pub mod api;
pub mod execution;
pub mod funds;
pub mod outcome;

#[allow(clippy::module_inception)]
pub mod router;


pub use execution::{ExecutionStats, ExecutorSettings, TransferExecutor};
pub use funds::FundsVerifier;
pub use outcome::{
    AuthorizationNeeded, ExecutionOutcome, FailureKind, FundsStatus, TransferFailure,
    TransferKind, TransferReceipt, TransferRequest,
};
pub use router::{BatchItem, BatchReport, CrossChainRouter, RouteState};
