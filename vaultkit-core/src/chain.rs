//! Supported networks and the well-known contract deployments on them.

use std::str::FromStr;

use alloy_primitives::{address, Address};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::error::VaultKitError;

/// `EntryPoint` v0.7, the same address on every chain.
pub const ENTRY_POINT_V07: Address = address!("0x0000000071727De22E5E9d8BAf0edAc6f37da032");

/// Safe 4337 module v0.3.0, the verifying contract of Safe operation signatures.
pub const SAFE_4337_MODULE: Address = address!("0x75cf11467937ce3F2f357CE24ffc3DBF8fD5c226");

/// `MultiSend` v1.4.1, target of batched account calls.
pub const SAFE_MULTI_SEND: Address = address!("0x38869bf66a61cF6bDB996A6aE40D5853Fd43B526");

/// Delay module singleton the instances proxy to.
pub const DELAY_MODULE_SINGLETON: Address =
    address!("0xd54895b1121a2ee3f37b502f507631fa1331bed6");

/// Zodiac module proxy factory.
pub const DELAY_MODULE_FACTORY: Address =
    address!("0x000000000000aDdB49795b0f9bA5BC298cDda236");

/// Decimals of the custodied token.
pub const TOKEN_DECIMALS: u8 = 6;

/// A network funds can be custodied on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Chain {
    /// Arbitrum Sepolia testnet.
    ArbitrumSepolia,
    /// Base Sepolia testnet.
    BaseSepolia,
}

impl Chain {
    /// EIP-155 chain id.
    #[must_use]
    pub const fn id(self) -> u64 {
        match self {
            Self::ArbitrumSepolia => 421_614,
            Self::BaseSepolia => 84_532,
        }
    }

    /// Looks up a chain by its EIP-155 id.
    ///
    /// # Errors
    /// `InvalidChainSelector` if the id is not supported.
    pub fn from_id(id: u64) -> Result<Self, VaultKitError> {
        Self::iter()
            .find(|chain| chain.id() == id)
            .ok_or_else(|| VaultKitError::InvalidChainSelector(id.to_string()))
    }

    /// Parses a chain from either its name (`base-sepolia`) or its id (`84532`).
    ///
    /// # Errors
    /// `InvalidChainSelector` if neither form matches a supported chain.
    pub fn from_selector(selector: &str) -> Result<Self, VaultKitError> {
        let selector = selector.trim();
        if let Ok(id) = selector.parse::<u64>() {
            return Self::from_id(id);
        }
        Self::from_str(&selector.to_ascii_lowercase())
            .map_err(|_| VaultKitError::InvalidChainSelector(selector.to_string()))
    }

    /// Prefix of the per-chain environment variables, e.g. `BASE_SEPOLIA`.
    #[must_use]
    pub fn env_prefix(self) -> String {
        self.as_ref().replace('-', "_").to_ascii_uppercase()
    }

    /// USDC deployment on this chain.
    #[must_use]
    pub const fn usdc(self) -> Address {
        match self {
            Self::ArbitrumSepolia => address!("0x75faf114eafb1BDbe2F0316DF893fd58CE46AA4d"),
            Self::BaseSepolia => address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
        }
    }

    /// Public JSON-RPC endpoint used when no override is configured.
    #[must_use]
    pub const fn default_rpc_url(self) -> &'static str {
        match self {
            Self::ArbitrumSepolia => "https://sepolia-rollup.arbitrum.io/rpc",
            Self::BaseSepolia => "https://sepolia.base.org",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_selectors() {
        assert_eq!(Chain::from_selector("421614").unwrap(), Chain::ArbitrumSepolia);
        assert_eq!(Chain::from_selector("base-sepolia").unwrap(), Chain::BaseSepolia);
        assert_eq!(Chain::from_selector(" Base-Sepolia ").unwrap(), Chain::BaseSepolia);
    }

    #[test]
    fn test_unknown_chain_is_rejected() {
        for selector in ["1", "mainnet", ""] {
            match Chain::from_selector(selector) {
                Err(VaultKitError::InvalidChainSelector(value)) => {
                    assert_eq!(value, selector);
                }
                other => panic!("unexpected result for {selector:?}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(Chain::ArbitrumSepolia.env_prefix(), "ARBITRUM_SEPOLIA");
        assert_eq!(Chain::BaseSepolia.to_string(), "base-sepolia");
    }
}
