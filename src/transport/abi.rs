// ABI definitions for the token and router contracts
// Calls are declared with alloy's sol! macro; only the attribution suffix is custom
//
// Numan Thabit 2025 Nov

use crate::config::ConfigError;
use crate::errors::ChainError;
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::{sol, SolCall};

sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
        function allowance(address owner, address spender) external view returns (uint256 remaining);
    }

    interface IMoniRouter {
        function nonces(address owner) external view returns (uint256 nonce);
        function quoteFee(uint256 amount) external view returns (uint256 fee);
        function routeTransfer(
            address from,
            address to,
            uint256 amount,
            uint256 nonce,
            bytes32 paymentRef
        ) external;
        function disburse(address to, uint256 amount, bytes32 paymentRef) external;
    }
}

pub fn balance_of(owner: Address) -> Vec<u8> {
    IERC20::balanceOfCall { owner }.abi_encode()
}

pub fn allowance(owner: Address, spender: Address) -> Vec<u8> {
    IERC20::allowanceCall { owner, spender }.abi_encode()
}

pub fn nonces(owner: Address) -> Vec<u8> {
    IMoniRouter::noncesCall { owner }.abi_encode()
}

pub fn quote_fee(amount: U256) -> Vec<u8> {
    IMoniRouter::quoteFeeCall { amount }.abi_encode()
}

pub fn route_transfer(
    from: Address,
    to: Address,
    amount: U256,
    nonce: U256,
    reference: B256,
) -> Vec<u8> {
    IMoniRouter::routeTransferCall {
        from,
        to,
        amount,
        nonce,
        paymentRef: reference,
    }
    .abi_encode()
}

pub fn disburse(to: Address, amount: U256, reference: B256) -> Vec<u8> {
    IMoniRouter::disburseCall {
        to,
        amount,
        paymentRef: reference,
    }
    .abi_encode()
}

/// On-chain reference for a caller-supplied idempotency token.
pub fn reference_for(token: &str) -> B256 {
    keccak256(token.as_bytes())
}

/// Decode the single `uint256` returned by a view call.
pub fn decode_returns<C: SolCall<Return = U256>>(data: &[u8]) -> Result<U256, ChainError> {
    C::abi_decode_returns(data).map_err(|e| ChainError::Decode(format!("{}: {e}", C::SIGNATURE)))
}

pub const BUILDER_CODE_LEN: usize = 16;
pub const BUILDER_SUFFIX_LEN: usize = BUILDER_CODE_LEN + 2 + BUILDER_MARKER.len();
const BUILDER_SCHEMA: u8 = 0x00;
const BUILDER_MARKER: [u8; 16] = [
    0x80, 0x21, 0x80, 0x21, 0x80, 0x21, 0x80, 0x21, 0x80, 0x21, 0x80, 0x21, 0x80, 0x21, 0x80,
    0x21,
];

/// Attribution code appended to router calldata on networks that opt in.
///
/// Layout: code (ASCII, zero-padded to 16 bytes) || code length || schema || marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderCode {
    code: [u8; BUILDER_CODE_LEN],
    len: u8,
}

impl BuilderCode {
    pub fn parse(code: &str) -> Result<Self, ConfigError> {
        let bytes = code.as_bytes();
        if bytes.is_empty() || bytes.len() > BUILDER_CODE_LEN {
            return Err(ConfigError::BuilderCode(format!(
                "length must be 1..={BUILDER_CODE_LEN}, got {}",
                bytes.len()
            )));
        }
        if !bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_') {
            return Err(ConfigError::BuilderCode(format!(
                "{code:?} must be ASCII alphanumeric"
            )));
        }
        let mut padded = [0u8; BUILDER_CODE_LEN];
        padded[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            code: padded,
            len: bytes.len() as u8,
        })
    }

    pub fn suffix(&self) -> [u8; BUILDER_SUFFIX_LEN] {
        let mut out = [0u8; BUILDER_SUFFIX_LEN];
        out[..BUILDER_CODE_LEN].copy_from_slice(&self.code);
        out[BUILDER_CODE_LEN] = self.len;
        out[BUILDER_CODE_LEN + 1] = BUILDER_SCHEMA;
        out[BUILDER_CODE_LEN + 2..].copy_from_slice(&BUILDER_MARKER);
        out
    }

    /// Appends after the fully encoded call; never touches the ABI words.
    pub fn append_to(&self, calldata: &mut Vec<u8>) {
        calldata.extend_from_slice(&self.suffix());
    }

    /// Strip a trailing suffix, returning the core payload and the code.
    pub fn split(calldata: &[u8]) -> (&[u8], Option<String>) {
        if calldata.len() < BUILDER_SUFFIX_LEN
            || calldata[calldata.len() - BUILDER_MARKER.len()..] != BUILDER_MARKER
        {
            return (calldata, None);
        }
        let start = calldata.len() - BUILDER_SUFFIX_LEN;
        let suffix = &calldata[start..];
        let len = (suffix[BUILDER_CODE_LEN] as usize).min(BUILDER_CODE_LEN);
        let code = String::from_utf8_lossy(&suffix[..len]).into_owned();
        (&calldata[..start], Some(code))
    }
}
