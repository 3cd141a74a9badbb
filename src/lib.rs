// Library root module for moni-router
// This file defines the public API and module structure of the cross-chain
// payment router and the giveaway distributor built on it
//
// Numan Thabit 2025 Nov

pub mod config;
pub mod distributor;
pub mod errors;
pub mod identity;
pub mod ledger;
pub mod metrics;
pub mod router;
pub mod signing;
pub mod transport;
pub mod units;
