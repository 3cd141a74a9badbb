// Scripted in-memory chain for tests
// Decodes the real calldata produced by the ABI module and keeps token
// balances, allowances, router nonces and receipts per network. Endpoints
// can be marked dead to exercise failover
//
// Numan Thabit 2025 Nov

use super::abi::{BuilderCode, IMoniRouter, IERC20};
use super::{ChainReader, ChainWriter, Connector, ReceiptStatus};
use crate::config::{NetworkConfig, NetworkId};
use crate::errors::ChainError;
use crate::units::to_units;
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use url::Url;

pub(crate) const OPERATOR: Address = Address::repeat_byte(0x0e);

pub(crate) fn network(id: &str, decimals: u32, endpoints: usize) -> NetworkConfig {
    NetworkConfig {
        id: NetworkId::from(id),
        chain_id: 1000 + id.len() as u64,
        endpoints: (0..endpoints)
            .map(|i| Url::parse(&format!("http://{id}-{i}.rpc.test/")).unwrap())
            .collect(),
        router: Address::from_slice(&keccak256(format!("router:{id}"))[12..]),
        token: Address::from_slice(&keccak256(format!("token:{id}"))[12..]),
        decimals,
        symbol: format!("T{}", id.to_uppercase()),
        builder_suffix: false,
    }
}

pub(crate) fn amount(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[derive(Debug, Clone)]
pub(crate) struct Submission {
    pub network: String,
    pub endpoint: Url,
    pub tx_hash: String,
    pub from: Option<Address>,
    pub amount: U256,
    pub reference: B256,
    pub builder_code: Option<String>,
    pub gas_limit: u64,
    pub reverted: bool,
}

#[derive(Default)]
struct MockNetwork {
    /// (token, owner) -> balance
    balances: HashMap<(Address, Address), U256>,
    /// (owner, spender) -> allowance on the network token
    allowances: HashMap<(Address, Address), U256>,
    nonces: HashMap<Address, U256>,
    fee_bps: u64,
    revert_all: bool,
    revert_recipients: HashSet<Address>,
    estimate_reverts: bool,
    used_refs: HashSet<B256>,
}

#[derive(Default)]
struct MockState {
    networks: HashMap<String, MockNetwork>,
    dead: HashSet<Url>,
    reads: Vec<(String, Url)>,
    submissions: Vec<Submission>,
    receipts: HashMap<String, ReceiptStatus>,
    next_tx: u64,
}

pub(crate) struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
        })
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            chain: Arc::clone(self),
        })
    }

    fn with_network<T>(&self, id: &str, f: impl FnOnce(&mut MockNetwork) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(state.networks.entry(id.to_string()).or_default())
    }

    pub fn fund(&self, network: &NetworkConfig, owner: Address, human: &str) {
        let units = to_units(amount(human), network.decimals).unwrap();
        self.with_network(network.id.as_str(), |n| {
            n.balances.insert((network.token, owner), units);
        });
    }

    pub fn fund_router(&self, network: &NetworkConfig, human: &str) {
        self.fund(network, network.router, human);
    }

    pub fn approve(&self, network: &NetworkConfig, owner: Address, human: &str) {
        let units = to_units(amount(human), network.decimals).unwrap();
        self.with_network(network.id.as_str(), |n| {
            n.allowances.insert((owner, network.router), units);
        });
    }

    pub fn approve_unlimited(&self, network: &NetworkConfig, owner: Address) {
        self.with_network(network.id.as_str(), |n| {
            n.allowances.insert((owner, network.router), U256::MAX);
        });
    }

    pub fn set_fee_bps(&self, network: &NetworkConfig, bps: u64) {
        self.with_network(network.id.as_str(), |n| n.fee_bps = bps);
    }

    pub fn set_router_nonce(&self, network: &NetworkConfig, owner: Address, nonce: u64) {
        self.with_network(network.id.as_str(), |n| {
            n.nonces.insert(owner, U256::from(nonce));
        });
    }

    pub fn revert_all(&self, network: &NetworkConfig) {
        self.with_network(network.id.as_str(), |n| n.revert_all = true);
    }

    pub fn revert_to(&self, network: &NetworkConfig, recipient: Address) {
        self.with_network(network.id.as_str(), |n| {
            n.revert_recipients.insert(recipient);
        });
    }

    pub fn reject_estimates(&self, network: &NetworkConfig) {
        self.with_network(network.id.as_str(), |n| n.estimate_reverts = true);
    }

    pub fn kill_endpoint(&self, endpoint: &Url) {
        self.state.lock().unwrap().dead.insert(endpoint.clone());
    }

    pub fn kill_network(&self, network: &NetworkConfig) {
        let mut state = self.state.lock().unwrap();
        for endpoint in &network.endpoints {
            state.dead.insert(endpoint.clone());
        }
    }

    pub fn balance(&self, network: &NetworkConfig, owner: Address) -> U256 {
        self.with_network(network.id.as_str(), |n| {
            n.balances
                .get(&(network.token, owner))
                .copied()
                .unwrap_or_default()
        })
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn submissions_on(&self, network: &str) -> Vec<Submission> {
        self.submissions()
            .into_iter()
            .filter(|s| s.network == network)
            .collect()
    }

    pub fn reads_on(&self, network: &str) -> Vec<Url> {
        self.state
            .lock()
            .unwrap()
            .reads
            .iter()
            .filter(|(n, _)| n == network)
            .map(|(_, url)| url.clone())
            .collect()
    }

    fn check_alive(&self, network: &str, endpoint: &Url) -> Result<(), ChainError> {
        let mut state = self.state.lock().unwrap();
        state.reads.push((network.to_string(), endpoint.clone()));
        if state.dead.contains(endpoint) {
            return Err(ChainError::Transport(format!(
                "connection refused: {endpoint}"
            )));
        }
        Ok(())
    }
}

struct MockConnector {
    chain: Arc<MockChain>,
}

impl Connector for MockConnector {
    fn connect(
        &self,
        network: &NetworkConfig,
        endpoint: &Url,
    ) -> Result<(Arc<dyn ChainReader>, Arc<dyn ChainWriter>), ChainError> {
        let handle = Arc::new(MockHandle {
            chain: Arc::clone(&self.chain),
            config: network.clone(),
            endpoint: endpoint.clone(),
        });
        Ok((handle.clone(), handle))
    }
}

struct MockHandle {
    chain: Arc<MockChain>,
    config: NetworkConfig,
    endpoint: Url,
}

impl MockHandle {
    fn id(&self) -> &str {
        self.config.id.as_str()
    }
}

#[async_trait]
impl ChainReader for MockHandle {
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        self.chain.check_alive(self.id(), &self.endpoint)?;
        let token = self.config.token;
        let router = self.config.router;
        let value = self.chain.with_network(self.id(), |n| {
            if let (true, Ok(c)) = (to == token, IERC20::balanceOfCall::abi_decode(&data)) {
                Ok(n.balances.get(&(token, c.owner)).copied().unwrap_or_default())
            } else if let (true, Ok(c)) = (to == token, IERC20::allowanceCall::abi_decode(&data)) {
                Ok(n.allowances
                    .get(&(c.owner, c.spender))
                    .copied()
                    .unwrap_or_default())
            } else if let (true, Ok(c)) = (to == router, IMoniRouter::noncesCall::abi_decode(&data)) {
                Ok(n.nonces.get(&c.owner).copied().unwrap_or_default())
            } else if let (true, Ok(c)) =
                (to == router, IMoniRouter::quoteFeeCall::abi_decode(&data))
            {
                Ok(c.amount * U256::from(n.fee_bps) / U256::from(10_000u64))
            } else {
                Err(ChainError::Rpc {
                    code: -32000,
                    message: "execution reverted: unknown selector".into(),
                })
            }
        })?;
        Ok(value.to_be_bytes::<32>().to_vec())
    }

    async fn estimate_gas(
        &self,
        _from: Address,
        _to: Address,
        _data: Vec<u8>,
    ) -> Result<u64, ChainError> {
        self.chain.check_alive(self.id(), &self.endpoint)?;
        if self.chain.with_network(self.id(), |n| n.estimate_reverts) {
            return Err(ChainError::Rpc {
                code: 3,
                message: "execution reverted".into(),
            });
        }
        Ok(100_000)
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<ReceiptStatus>, ChainError> {
        self.chain.check_alive(self.id(), &self.endpoint)?;
        Ok(self.chain.state.lock().unwrap().receipts.get(tx_hash).copied())
    }
}

#[async_trait]
impl ChainWriter for MockHandle {
    fn operator(&self) -> Address {
        OPERATOR
    }

    async fn submit(
        &self,
        to: Address,
        data: Vec<u8>,
        gas_limit: u64,
    ) -> Result<String, ChainError> {
        self.chain.check_alive(self.id(), &self.endpoint)?;
        let (payload, builder_code) = BuilderCode::split(&data);
        let payload = payload.to_vec();
        let token = self.config.token;
        let router = self.config.router;

        let (from, amount, reference, reverted) =
            self.chain.with_network(self.id(), |n| {
                let route = IMoniRouter::routeTransferCall::abi_decode(&payload);
                let disburse = IMoniRouter::disburseCall::abi_decode(&payload);
                if let (true, Ok(call)) = (to == router, route) {
                    let IMoniRouter::routeTransferCall {
                        from,
                        to: recipient,
                        amount,
                        nonce,
                        paymentRef: reference,
                    } = call;
                    let balance = n.balances.get(&(token, from)).copied().unwrap_or_default();
                    let allowance = n
                        .allowances
                        .get(&(from, router))
                        .copied()
                        .unwrap_or_default();
                    let expected_nonce = n.nonces.get(&from).copied().unwrap_or_default();
                    let reverted = n.revert_all
                        || n.revert_recipients.contains(&recipient)
                        || n.used_refs.contains(&reference)
                        || nonce != expected_nonce
                        || balance < amount
                        || allowance < amount;
                    if !reverted {
                        n.balances.insert((token, from), balance - amount);
                        *n.balances.entry((token, recipient)).or_default() += amount;
                        if allowance != U256::MAX {
                            n.allowances.insert((from, router), allowance - amount);
                        }
                        n.nonces.insert(from, expected_nonce + U256::from(1u64));
                        n.used_refs.insert(reference);
                    }
                    (Some(from), amount, reference, reverted)
                } else if let (true, Ok(call)) = (to == router, disburse) {
                    let IMoniRouter::disburseCall {
                        to: recipient,
                        amount,
                        paymentRef: reference,
                    } = call;
                    let float = n.balances.get(&(token, router)).copied().unwrap_or_default();
                    let reverted = n.revert_all
                        || n.revert_recipients.contains(&recipient)
                        || n.used_refs.contains(&reference)
                        || float < amount;
                    if !reverted {
                        n.balances.insert((token, router), float - amount);
                        *n.balances.entry((token, recipient)).or_default() += amount;
                        n.used_refs.insert(reference);
                    }
                    (None, amount, reference, reverted)
                } else {
                    (None, U256::ZERO, B256::ZERO, true)
                }
            });

        let mut state = self.chain.state.lock().unwrap();
        state.next_tx += 1;
        let tx_hash = format!("0x{:064x}", state.next_tx);
        let status = if reverted {
            ReceiptStatus::Reverted
        } else {
            ReceiptStatus::Succeeded
        };
        state.receipts.insert(tx_hash.clone(), status);
        state.submissions.push(Submission {
            network: self.id().to_string(),
            endpoint: self.endpoint.clone(),
            tx_hash: tx_hash.clone(),
            from,
            amount,
            reference,
            builder_code,
            gas_limit,
            reverted,
        });
        Ok(tx_hash)
    }
}
