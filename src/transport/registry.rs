// Network registry with per-network endpoint failover
// Holds the static network configuration and the process-wide endpoint
// cursor for each network. The cursor only moves forward and stops at the
// last configured endpoint
//
// Numan Thabit 2025 Nov

use super::{ChainReader, ChainWriter, Connection, RetryPolicy};
use crate::config::{validate_networks, ConfigError, NetworkConfig, NetworkId};
use crate::errors::ChainError;
use crate::metrics::ENDPOINT_FAILOVERS;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Builds read/write handles for one endpoint of one network.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        network: &NetworkConfig,
        endpoint: &Url,
    ) -> Result<(Arc<dyn ChainReader>, Arc<dyn ChainWriter>), ChainError>;
}

struct NetworkEntry {
    config: Arc<NetworkConfig>,
    cursor: AtomicUsize,
}

pub struct NetworkRegistry {
    networks: Vec<NetworkEntry>,
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
}

impl NetworkRegistry {
    pub fn new(
        networks: Vec<NetworkConfig>,
        connector: Arc<dyn Connector>,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        validate_networks(&networks)?;
        Ok(Self {
            networks: networks
                .into_iter()
                .map(|config| NetworkEntry {
                    config: Arc::new(config),
                    cursor: AtomicUsize::new(0),
                })
                .collect(),
            connector,
            retry,
        })
    }

    fn entry(&self, network: &str) -> Option<&NetworkEntry> {
        self.networks.iter().find(|e| e.config.id.as_str() == network)
    }

    /// Networks in configuration order. Scans iterate in this order.
    pub fn networks(&self) -> impl Iterator<Item = &Arc<NetworkConfig>> {
        self.networks.iter().map(|e| &e.config)
    }

    pub fn config(&self, network: &str) -> Option<Arc<NetworkConfig>> {
        self.entry(network).map(|e| Arc::clone(&e.config))
    }

    pub fn contains(&self, network: &str) -> bool {
        self.entry(network).is_some()
    }

    pub fn cursor(&self, network: &str) -> Option<usize> {
        self.entry(network).map(|e| e.cursor.load(Ordering::Acquire))
    }

    pub fn current_endpoint(&self, network: &str) -> Option<Url> {
        let entry = self.entry(network)?;
        let idx = entry.cursor.load(Ordering::Acquire);
        entry.config.endpoints.get(idx).cloned()
    }

    /// Handles against the endpoint the network's cursor currently selects.
    pub fn get_connection(&self, network: &NetworkId) -> Result<Connection, ChainError> {
        let entry = self
            .entry(network.as_str())
            .ok_or_else(|| ChainError::UnknownNetwork(network.to_string()))?;
        let idx = entry.cursor.load(Ordering::Acquire);
        let endpoint = entry.config.endpoints[idx].clone();
        let (reader, writer) = self.connector.connect(&entry.config, &endpoint)?;
        debug!(network = %network, endpoint = %endpoint, "connection acquired");
        Ok(Connection::new(
            Arc::clone(&entry.config),
            endpoint,
            reader,
            writer,
            self.retry,
        ))
    }

    /// Advance the network to its next endpoint. Returns false when the
    /// cursor already sits on the last endpoint (or the network is unknown).
    pub fn report_failure(&self, network: &NetworkId) -> bool {
        let Some(entry) = self.entry(network.as_str()) else {
            return false;
        };
        let last = entry.config.endpoints.len() - 1;
        match entry
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |idx| {
                (idx < last).then_some(idx + 1)
            }) {
            Ok(previous) => {
                let next = previous + 1;
                ENDPOINT_FAILOVERS
                    .with_label_values(&[network.as_str()])
                    .inc();
                warn!(
                    network = %network,
                    failed = %entry.config.endpoints[previous],
                    endpoint = %entry.config.endpoints[next],
                    index = next,
                    "endpoint failover"
                );
                true
            }
            Err(_) => {
                warn!(
                    network = %network,
                    endpoint = %entry.config.endpoints[last],
                    "last endpoint failing; no further failover"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{network, MockChain};

    fn registry(endpoints: usize) -> NetworkRegistry {
        let chain = MockChain::new();
        NetworkRegistry::new(
            vec![network("x", 6, endpoints), network("y", 18, 1)],
            chain.connector(),
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn cursor_advances_once_per_failure() {
        let registry = registry(4);
        let x = NetworkId::from("x");
        for n in 1..4 {
            assert!(registry.report_failure(&x));
            assert_eq!(registry.cursor("x"), Some(n));
        }
    }

    #[test]
    fn cursor_caps_at_last_endpoint() {
        let registry = registry(3);
        let x = NetworkId::from("x");
        for _ in 0..10 {
            registry.report_failure(&x);
        }
        assert_eq!(registry.cursor("x"), Some(2));
        assert!(!registry.report_failure(&x));
        assert_eq!(registry.cursor("x"), Some(2));
    }

    #[test]
    fn failover_is_per_network() {
        let registry = registry(3);
        registry.report_failure(&NetworkId::from("x"));
        assert_eq!(registry.cursor("x"), Some(1));
        assert_eq!(registry.cursor("y"), Some(0));
    }

    #[test]
    fn connection_follows_cursor() {
        let registry = registry(2);
        let x = NetworkId::from("x");
        let first = registry.get_connection(&x).unwrap();
        registry.report_failure(&x);
        let second = registry.get_connection(&x).unwrap();
        assert_ne!(first.endpoint, second.endpoint);
        assert_eq!(Some(second.endpoint), registry.current_endpoint("x"));
    }

    #[test]
    fn unknown_network_is_an_error() {
        let registry = registry(1);
        assert!(matches!(
            registry.get_connection(&NetworkId::from("nope")),
            Err(ChainError::UnknownNetwork(_))
        ));
        assert!(!registry.report_failure(&NetworkId::from("nope")));
    }
}
