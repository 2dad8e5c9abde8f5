//! Seams to the outside world.
//!
//! Workflows are generic over these traits. The crate ships HTTP implementations
//! ([`crate::bundler::BundlerClient`], [`crate::rpc::ChainReader`]); tests substitute
//! in-memory ones.

use std::future::Future;

use alloy_primitives::{Address, B256, U256};

use crate::{
    error::VaultKitError,
    operation::{Call, Receipt, UserOperation},
    timelock::TimelockEntry,
};

/// Relays batched account operations (bundler and paymaster).
pub trait AccountFacade: Send + Sync {
    /// Builds an unsigned, sponsored operation executing `calls` in order.
    fn prepare_operation(
        &self,
        calls: &[Call],
    ) -> impl Future<Output = Result<UserOperation, VaultKitError>> + Send;

    /// Submits a fully authorized operation, returning its user operation hash.
    fn send_operation(
        &self,
        operation: &UserOperation,
    ) -> impl Future<Output = Result<B256, VaultKitError>> + Send;

    /// Waits until the operation is included.
    fn wait_for_receipt(
        &self,
        user_operation_hash: B256,
    ) -> impl Future<Output = Result<Receipt, VaultKitError>> + Send;
}

/// Reads token balances.
pub trait LedgerReader: Send + Sync {
    /// Raw balance of `holder` in `token`.
    fn token_balance(
        &self,
        token: Address,
        holder: Address,
    ) -> impl Future<Output = Result<U256, VaultKitError>> + Send;
}

/// Reads the owner configuration of a Safe account.
pub trait AccountReader: Send + Sync {
    /// Current owners, in the account's own order.
    fn owners(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<Vec<Address>, VaultKitError>> + Send;

    /// Signatures the account requires.
    fn threshold(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<U256, VaultKitError>> + Send;

    /// Whether `module` may execute through the account.
    fn module_enabled(
        &self,
        account: Address,
        module: Address,
    ) -> impl Future<Output = Result<bool, VaultKitError>> + Send;
}

/// Reads the queue of a Delay module instance and the chain clock.
pub trait GuardReader: Send + Sync {
    /// The entry `executeNextTx` would act on, if any. `cooldown` and `expiration` are
    /// the module parameters the caller derived the address from.
    fn queued_entry(
        &self,
        module: Address,
        cooldown: u64,
        expiration: u64,
    ) -> impl Future<Output = Result<Option<TimelockEntry>, VaultKitError>> + Send;

    /// The entry queued most recently, if the module has not executed or skipped it yet.
    fn latest_entry(
        &self,
        module: Address,
        cooldown: u64,
        expiration: u64,
    ) -> impl Future<Output = Result<Option<TimelockEntry>, VaultKitError>> + Send;

    /// Timestamp of the latest block.
    fn latest_timestamp(&self) -> impl Future<Output = Result<u64, VaultKitError>> + Send;
}

/// Sends plain transactions from an externally owned account.
pub trait TransactionSender: Send + Sync {
    /// Address transactions are sent from.
    fn sender(&self) -> Address;

    /// Sends `call` and waits for its receipt.
    fn send_call(&self, call: &Call) -> impl Future<Output = Result<Receipt, VaultKitError>> + Send;
}

/// Asks a fund provider which hash authorizes a withdrawal.
pub trait WithdrawalAuthority: Send + Sync {
    /// `provider.getWithdrawalHash(to, amount)`.
    fn withdrawal_hash(
        &self,
        provider: Address,
        to: Address,
        amount: U256,
    ) -> impl Future<Output = Result<B256, VaultKitError>> + Send;
}
