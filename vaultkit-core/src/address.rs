//! Counterfactual address of a Delay module instance.
//!
//! The module proxy factory deploys an EIP-1167 minimal proxy with `CREATE2`, salted with
//! the hash of the initializer and the owning account. Every input below is part of the
//! on-chain derivation, so the address can be known (and enabled, funded, targeted) before
//! the module exists.

use alloy_primitives::{hex, keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolValue};

use crate::contracts::IDelayModule;

/// Creation code of the minimal proxy, before the singleton address.
const PROXY_CREATION_PREFIX: [u8; 19] = hex!("602d8060093d393df3363d3d373d3d3d363d73");
/// Creation code of the minimal proxy, after the singleton address.
const PROXY_CREATION_SUFFIX: [u8; 15] = hex!("5af43d82803e903d91602b57fd5bf3");

/// Constructor parameters that fully determine a Delay module instance.
///
/// The account is used as owner, avatar and target of the module. Cooldown and expiration
/// are baked into the initializer, so changing either one means a new module at a new
/// address rather than a reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleInstanceParams {
    /// The Safe account owning the module.
    pub owner_account: Address,
    /// Seconds between queueing and being allowed to execute.
    pub cooldown: u64,
    /// Seconds after the cooldown during which execution stays valid.
    pub expiration: u64,
    /// The Delay singleton (master copy) the proxy delegates to.
    pub singleton: Address,
    /// The module proxy factory performing the deployment.
    pub factory: Address,
}

impl ModuleInstanceParams {
    /// ABI-encoded `setUp(bytes)` call the factory runs on the fresh proxy.
    #[must_use]
    pub fn initializer(&self) -> Bytes {
        let owner = self.owner_account;
        let params = (
            owner,
            owner,
            owner,
            U256::from(self.cooldown),
            U256::from(self.expiration),
        )
            .abi_encode_params();
        IDelayModule::setUpCall {
            initializeParams: params.into(),
        }
        .abi_encode()
        .into()
    }

    /// The salt nonce handed to the factory: the owner account read as an integer.
    #[must_use]
    pub fn salt_nonce(&self) -> U256 {
        U256::from_be_slice(self.owner_account.as_slice())
    }

    /// Creation code of the proxy pointing at the singleton.
    #[must_use]
    pub fn proxy_creation_code(&self) -> Vec<u8> {
        [
            PROXY_CREATION_PREFIX.as_slice(),
            self.singleton.as_slice(),
            PROXY_CREATION_SUFFIX.as_slice(),
        ]
        .concat()
    }

    /// `keccak256(keccak256(initializer) || pad32(owner_account))`.
    #[must_use]
    pub fn salt(&self) -> B256 {
        let initializer_hash = keccak256(self.initializer());
        let padded_owner = self.owner_account.into_word();
        keccak256([initializer_hash.as_slice(), padded_owner.as_slice()].concat())
    }
}

/// Derives the address the factory will deploy the module instance at.
///
/// `keccak256(0xff || factory || salt || keccak256(creation_code))[12..]`
#[must_use]
pub fn derive_module_address(params: &ModuleInstanceParams) -> Address {
    let init_code_hash = keccak256(params.proxy_creation_code());
    params.factory.create2(params.salt().0, init_code_hash.0)
}
