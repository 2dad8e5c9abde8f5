//! Everything a workflow needs to know about the custody setup, built once per invocation.

use std::path::PathBuf;

use alloy_primitives::Address;

use crate::{
    address::{derive_module_address, ModuleInstanceParams},
    chain::{Chain, DELAY_MODULE_FACTORY, DELAY_MODULE_SINGLETON},
    error::VaultKitError,
    operation::OperationContext,
    signature::{QuorumPolicy, SignatureCollector},
    store::OperationStore,
};

/// Owner signatures the account requires once the guard is set up.
pub const ACCOUNT_THRESHOLD: usize = 2;

/// Default module cooldown, seconds.
pub const DEFAULT_COOLDOWN: u64 = 60;

/// Default module expiration window, seconds.
pub const DEFAULT_EXPIRATION: u64 = 600;

/// URLs of the services a chain is reached through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// ERC-4337 bundler.
    pub bundler_url: String,
    /// Sponsoring paymaster.
    pub paymaster_url: String,
    /// Node JSON-RPC.
    pub rpc_url: String,
}

/// Custody configuration of one account on one chain.
///
/// Cooldown and expiration must match the deployed module: they are part of its address,
/// and nothing checks them against chain state before a call reverts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Network the account lives on.
    pub chain: Chain,
    /// The Safe account holding the funds.
    pub account: Address,
    /// The owner, who can also recover through the timelock.
    pub owner: Address,
    /// The co-signer.
    pub cosigner: Address,
    /// Module cooldown, seconds.
    pub cooldown: u64,
    /// Module expiration window, seconds.
    pub expiration: u64,
    /// The custodied token.
    pub token: Address,
    /// Contract paying out co-signed withdrawals, if used.
    pub fund_provider: Option<Address>,
    /// Directory of the operation store.
    pub store_dir: PathBuf,
}

impl VaultConfig {
    /// Configuration with the default guard parameters, the chain's USDC as token and the
    /// store in the working directory.
    #[must_use]
    pub fn new(chain: Chain, account: Address, owner: Address, cosigner: Address) -> Self {
        Self {
            chain,
            account,
            owner,
            cosigner,
            cooldown: DEFAULT_COOLDOWN,
            expiration: DEFAULT_EXPIRATION,
            token: chain.usdc(),
            fund_provider: None,
            store_dir: PathBuf::from("."),
        }
    }

    /// Parameters of the account's Delay module instance.
    #[must_use]
    pub const fn module_params(&self) -> ModuleInstanceParams {
        ModuleInstanceParams {
            owner_account: self.account,
            cooldown: self.cooldown,
            expiration: self.expiration,
            singleton: DELAY_MODULE_SINGLETON,
            factory: DELAY_MODULE_FACTORY,
        }
    }

    /// Address of the account's Delay module instance.
    #[must_use]
    pub fn module_address(&self) -> Address {
        derive_module_address(&self.module_params())
    }

    /// Where operations for this chain are valid.
    #[must_use]
    pub const fn context(&self) -> OperationContext {
        OperationContext::for_chain(self.chain)
    }

    /// Owner and co-signer, both required.
    ///
    /// # Errors
    /// `InvalidInput` if owner and co-signer are the same address.
    pub fn policy(&self) -> Result<QuorumPolicy, VaultKitError> {
        QuorumPolicy::new(vec![self.owner, self.cosigner], ACCOUNT_THRESHOLD)
    }

    /// Signature collector for this account.
    ///
    /// # Errors
    /// See [`Self::policy`].
    pub fn collector(&self) -> Result<SignatureCollector, VaultKitError> {
        Ok(SignatureCollector::new(self.context(), self.policy()?))
    }

    /// The operation store.
    #[must_use]
    pub fn store(&self) -> OperationStore {
        OperationStore::new(self.store_dir.clone())
    }

    /// The fund provider, required by co-signed withdrawals.
    ///
    /// # Errors
    /// `InvalidInput` when none is configured.
    pub fn require_fund_provider(&self) -> Result<Address, VaultKitError> {
        self.fund_provider
            .ok_or_else(|| VaultKitError::invalid_input("fund_provider", "not configured"))
    }
}
