// Error types and error handling module
// This file defines the typed errors raised by the chain transport and
// the caller-facing errors of the routing engine
//
// Numan Thabit 2025 Nov

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("signing error: {0}")]
    Signing(String),
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
}

impl ChainError {
    /// Connection, timeout and upstream-availability failures. These are the
    /// only errors worth retrying locally or failing over to another endpoint.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

/// Errors in what the caller asked for, as opposed to what the chain did.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("missing idempotency token")]
    MissingToken,
    #[error("invalid round: {0}")]
    InvalidRound(String),
}
