// Funds verifier
// Pre-flight balance and allowance checks for one address, on one network
// or fanned out across every alternate network
//
// Numan Thabit 2025 Nov

use super::outcome::FundsStatus;
use crate::config::{NetworkConfig, NetworkId};
use crate::errors::ChainError;
use crate::transport::NetworkRegistry;
use crate::units::from_units;
use alloy_primitives::Address;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct FundsVerifier {
    registry: Arc<NetworkRegistry>,
}

impl FundsVerifier {
    pub fn new(registry: Arc<NetworkRegistry>) -> Self {
        Self { registry }
    }

    /// Never fails: an unreadable network comes back as an unreachable,
    /// all-false status so a scan over many networks keeps going.
    pub async fn check_funds(
        &self,
        address: Address,
        amount: Decimal,
        network: &NetworkId,
    ) -> FundsStatus {
        let Some(config) = self.registry.config(network.as_str()) else {
            warn!(network = %network, "funds check on unknown network");
            return FundsStatus {
                network: network.clone(),
                has_balance: false,
                has_allowance: false,
                balance: Decimal::ZERO,
                allowance: Decimal::ZERO,
                symbol: String::new(),
                reachable: false,
            };
        };

        match self.read(&config, address, amount).await {
            Ok(status) => status,
            Err(err) if err.is_transient() && self.registry.report_failure(network) => {
                debug!(network = %network, error = %err, "funds read failed; retrying on next endpoint");
                match self.read(&config, address, amount).await {
                    Ok(status) => status,
                    Err(err) => {
                        if err.is_transient() {
                            self.registry.report_failure(network);
                        }
                        warn!(network = %network, error = %err, "funds read failed on next endpoint");
                        FundsStatus::unavailable(&config)
                    }
                }
            }
            Err(err) => {
                warn!(network = %network, error = %err, "funds read failed");
                FundsStatus::unavailable(&config)
            }
        }
    }

    async fn read(
        &self,
        config: &NetworkConfig,
        address: Address,
        amount: Decimal,
    ) -> Result<FundsStatus, ChainError> {
        let conn = self.registry.get_connection(&config.id)?;
        let (balance, allowance) =
            tokio::try_join!(conn.token_balance(address), conn.router_allowance(address))?;
        Ok(FundsStatus::measured(
            config,
            amount,
            from_units(balance, config.decimals),
            from_units(allowance, config.decimals),
        ))
    }

    /// One check per configured network other than `exclude`, run
    /// concurrently, returned in registry order.
    pub async fn scan_alternates(
        &self,
        address: Address,
        amount: Decimal,
        exclude: Option<&NetworkId>,
    ) -> Vec<FundsStatus> {
        let checks = self
            .registry
            .networks()
            .filter(|config| Some(&config.id) != exclude)
            .map(|config| config.id.clone())
            .collect::<Vec<_>>();
        join_all(
            checks
                .iter()
                .map(|network| self.check_funds(address, amount, network)),
        )
        .await
    }
}
