// Metrics and observability module
// This file handles collection and reporting of RPC latency, endpoint
// failover and transfer outcome metrics
//
// Numan Thabit 2025 Nov

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

pub static REQ_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "moni_rpc_latency_seconds",
        "latency for upstream RPC calls, including local retries",
        &["network", "method"]
    )
    .unwrap()
});

pub static REQ_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "moni_rpc_errors_total",
        "RPC calls that failed after local retries",
        &["network", "method"]
    )
    .unwrap()
});

pub static ENDPOINT_FAILOVERS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "moni_endpoint_failovers_total",
        "endpoint cursor advances",
        &["network"]
    )
    .unwrap()
});

pub static TRANSFER_OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "moni_transfer_outcomes_total",
        "terminal transfer outcomes by network actually used",
        &["network", "outcome"]
    )
    .unwrap()
});

pub static CLAIMS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "moni_claims_total",
        "distribution claims by result",
        &["result"]
    )
    .unwrap()
});
