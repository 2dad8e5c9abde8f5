//! Calldata for every call the workflows submit.
//!
//! Builders here are pure: they encode what they are told to and never look up or guess
//! module parameters. A module deployed with other parameters than assumed is only
//! detected when the call reverts.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;

use crate::{
    address::{derive_module_address, ModuleInstanceParams},
    contracts::{IDelayModule, IERC20, IFundProvider, IModuleProxyFactory, ISafe},
    operation::Call,
};

/// How the module executes a queued call on behalf of the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OperationType {
    /// Plain `CALL`.
    #[default]
    Call = 0,
    /// `DELEGATECALL` from the account.
    DelegateCall = 1,
}

/// A call executed by the account through the Delay module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedCall {
    /// Target contract.
    pub to: Address,
    /// Native value forwarded.
    pub value: U256,
    /// Calldata.
    pub data: Bytes,
    /// Call or delegate call.
    pub operation: OperationType,
}

impl GuardedCall {
    /// Hash the module stores for a queued call:
    /// `keccak256(abi.encodePacked(to, value, data, operation))`.
    #[must_use]
    pub fn queue_hash(&self) -> B256 {
        keccak256(
            [
                self.to.as_slice(),
                &self.value.to_be_bytes::<32>(),
                self.data.as_ref(),
                &[self.operation as u8],
            ]
            .concat(),
        )
    }
}

/// Calls that deploy and wire up a module instance, in dependency order.
///
/// 1. deploy the instance through the factory,
/// 2. enable it on the account,
/// 3. enable `guardian` on the instance (allowed to queue),
/// 4. optionally raise the account threshold.
#[must_use]
pub fn setup_calls(
    params: &ModuleInstanceParams,
    guardian: Address,
    raise_threshold_to: Option<u64>,
) -> Vec<Call> {
    let module = derive_module_address(params);
    let mut calls = vec![
        Call::new(
            params.factory,
            IModuleProxyFactory::deployModuleCall {
                masterCopy: params.singleton,
                initializer: params.initializer(),
                saltNonce: params.salt_nonce(),
            }
            .abi_encode()
            .into(),
        ),
        Call::new(
            params.owner_account,
            ISafe::enableModuleCall { module }.abi_encode().into(),
        ),
        Call::new(
            module,
            IDelayModule::enableModuleCall { module: guardian }
                .abi_encode()
                .into(),
        ),
    ];
    if let Some(threshold) = raise_threshold_to {
        calls.push(change_threshold(params.owner_account, threshold));
    }
    calls
}

/// `account.changeThreshold(threshold)`.
#[must_use]
pub fn change_threshold(account: Address, threshold: u64) -> Call {
    Call::new(
        account,
        ISafe::changeThresholdCall {
            _threshold: U256::from(threshold),
        }
        .abi_encode()
        .into(),
    )
}

/// Start and finalize calls against one module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelockCalls {
    module: Address,
}

impl TimelockCalls {
    /// Targets the instance derived from `params`.
    #[must_use]
    pub fn new(params: &ModuleInstanceParams) -> Self {
        Self {
            module: derive_module_address(params),
        }
    }

    /// The module the calls target.
    #[must_use]
    pub const fn module(&self) -> Address {
        self.module
    }

    /// Queues `guarded`: `execTransactionFromModule(to, value, data, operation)`.
    #[must_use]
    pub fn start(&self, guarded: &GuardedCall) -> Call {
        Call::new(
            self.module,
            IDelayModule::execTransactionFromModuleCall {
                to: guarded.to,
                value: guarded.value,
                data: guarded.data.clone(),
                operation: guarded.operation as u8,
            }
            .abi_encode()
            .into(),
        )
    }

    /// Executes the queued `guarded`: `executeNextTx(to, value, data, operation)`.
    #[must_use]
    pub fn finalize(&self, guarded: &GuardedCall) -> Call {
        Call::new(
            self.module,
            IDelayModule::executeNextTxCall {
                to: guarded.to,
                value: guarded.value,
                data: guarded.data.clone(),
                operation: guarded.operation as u8,
            }
            .abi_encode()
            .into(),
        )
    }

    /// Drops expired entries from the head of the queue so a newly queued call is next.
    #[must_use]
    pub fn skip_expired(&self) -> Call {
        Call::new(
            self.module,
            IDelayModule::skipExpiredCall {}.abi_encode().into(),
        )
    }
}

/// ERC-20 `transfer(to, amount)` calldata.
#[must_use]
pub fn transfer_data(to: Address, amount: U256) -> Bytes {
    IERC20::transferCall { to, value: amount }
        .abi_encode()
        .into()
}

/// `token.transfer(to, amount)` as a direct account call.
#[must_use]
pub fn token_transfer(token: Address, to: Address, amount: U256) -> Call {
    Call::new(token, transfer_data(to, amount))
}

/// `token.approve(spender, amount)`.
#[must_use]
pub fn token_approve(token: Address, spender: Address, amount: U256) -> Call {
    Call::new(
        token,
        IERC20::approveCall {
            spender,
            value: amount,
        }
        .abi_encode()
        .into(),
    )
}

/// A token withdrawal the module executes for the account.
#[must_use]
pub fn guarded_token_transfer(token: Address, to: Address, amount: U256) -> GuardedCall {
    GuardedCall {
        to: token,
        value: U256::ZERO,
        data: transfer_data(to, amount),
        operation: OperationType::Call,
    }
}

/// `provider.withdraw(to, amount, signature)`, authorized by the co-signer's signature
/// over the provider's withdrawal hash.
#[must_use]
pub fn guarded_withdrawal(
    provider: Address,
    to: Address,
    amount: U256,
    cosigner_signature: Bytes,
) -> Call {
    Call::new(
        provider,
        IFundProvider::withdrawCall {
            to,
            amount,
            signature: cosigner_signature,
        }
        .abi_encode()
        .into(),
    )
}
