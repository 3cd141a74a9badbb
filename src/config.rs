// Configuration management module
// This file handles loading and parsing of configuration settings
// from environment variables and the network registry file
//
// Numan Thabit 2025 Nov

use crate::transport::abi::BuilderCode;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Largest precision a human amount can carry through `rust_decimal`.
pub const MAX_DECIMALS: u32 = 28;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP API bind address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Hex-encoded 32-byte secp256k1 key of the shared operating account
    pub operator_key_hex: String,
    /// Attribution code appended on networks flagged with `builder_suffix`
    pub builder_code: Option<String>,
    /// YAML file with the network registry and identity directory
    pub registry_file: PathBuf,
    #[serde(default)]
    pub rpc: RpcSettings,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("MONI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn load_registry(&self) -> Result<RegistryFile> {
        let raw = std::fs::read_to_string(&self.registry_file)
            .with_context(|| format!("read registry file {}", self.registry_file.display()))?;
        let registry: RegistryFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse registry file {}", self.registry_file.display()))?;
        validate_networks(&registry.networks)?;
        check_builder_code(&registry.networks, self.builder_code.as_deref())?;
        Ok(registry)
    }

    pub fn builder_code(&self) -> Result<Option<BuilderCode>, ConfigError> {
        self.builder_code
            .as_deref()
            .map(BuilderCode::parse)
            .transpose()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub request_timeout_ms: u64,
    pub local_retry_attempts: u32,
    pub local_retry_backoff_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub receipt_timeout_ms: u64,
    pub gas_margin_percent: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            local_retry_attempts: 3,
            local_retry_backoff_ms: 250,
            receipt_poll_interval_ms: 1_000,
            receipt_timeout_ms: 120_000,
            gas_margin_percent: 20,
        }
    }
}

impl RpcSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }
}

/// Contents of the registry YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryFile {
    pub networks: Vec<NetworkConfig>,
    /// MoniTag -> wallet address
    #[serde(default)]
    pub directory: HashMap<String, Address>,
    /// Platform user id -> wallet address
    #[serde(default)]
    pub senders: HashMap<String, Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for NetworkId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NetworkId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Static per-network deployment description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub id: NetworkId,
    pub chain_id: u64,
    /// Ordered by preference; failover walks this list front to back
    pub endpoints: Vec<Url>,
    pub router: Address,
    pub token: Address,
    pub decimals: u32,
    pub symbol: String,
    /// Append the builder-code attribution suffix to router calldata
    #[serde(default)]
    pub builder_suffix: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no networks configured")]
    NoNetworks,
    #[error("network {0} is configured twice")]
    DuplicateNetwork(String),
    #[error("network {0} has no endpoints")]
    NoEndpoints(String),
    #[error("network {network} decimals {decimals} exceed 28")]
    Decimals { network: String, decimals: u32 },
    #[error("network {0} enables builder_suffix but no builder_code is configured")]
    MissingBuilderCode(String),
    #[error("invalid builder code: {0}")]
    BuilderCode(String),
}

pub fn validate_networks(networks: &[NetworkConfig]) -> Result<(), ConfigError> {
    if networks.is_empty() {
        return Err(ConfigError::NoNetworks);
    }
    let mut seen = HashSet::new();
    for network in networks {
        if !seen.insert(network.id.clone()) {
            return Err(ConfigError::DuplicateNetwork(network.id.to_string()));
        }
        if network.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints(network.id.to_string()));
        }
        if network.decimals > MAX_DECIMALS {
            return Err(ConfigError::Decimals {
                network: network.id.to_string(),
                decimals: network.decimals,
            });
        }
    }
    Ok(())
}

/// Networks flagged for the attribution suffix need a valid code.
pub fn check_builder_code(
    networks: &[NetworkConfig],
    builder_code: Option<&str>,
) -> Result<(), ConfigError> {
    if let Some(code) = builder_code {
        BuilderCode::parse(code)?;
    } else if let Some(network) = networks.iter().find(|n| n.builder_suffix) {
        return Err(ConfigError::MissingBuilderCode(network.id.to_string()));
    }
    Ok(())
}
