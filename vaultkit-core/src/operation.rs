//! Batched account operations (ERC-4337 v0.7 user operations) and their Safe hash.

use alloy_primitives::{aliases::U48, Address, Bytes, B256, U256};
use alloy_sol_types::{Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};

use crate::{
    chain::{Chain, ENTRY_POINT_V07, SAFE_4337_MODULE},
    contracts::SafeOp,
    error::VaultKitError,
};

/// One call executed by the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Target contract.
    pub to: Address,
    /// Native value forwarded with the call.
    pub value: U256,
    /// ABI-encoded calldata.
    pub data: Bytes,
}

impl Call {
    /// A call that forwards no native value.
    #[must_use]
    pub const fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            value: U256::ZERO,
            data,
        }
    }
}

/// Receipt of an included transaction or user operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the transaction that included the operation.
    pub transaction_hash: B256,
    /// Whether execution succeeded.
    pub success: bool,
}

/// An ERC-4337 v0.7 user operation in its unpacked form.
///
/// Optional fields are genuinely absent rather than zero: a missing paymaster encodes to
/// an empty `paymasterAndData`, which hashes differently from a zero paymaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    /// The smart account.
    pub sender: Address,
    /// Anti-replay nonce (key in the upper 192 bits).
    pub nonce: U256,
    /// Account factory, only for an undeployed account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    /// Account factory calldata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    /// Calldata the `EntryPoint` hands to the account.
    pub call_data: Bytes,
    /// Gas for the main execution.
    pub call_gas_limit: U256,
    /// Gas for validation.
    pub verification_gas_limit: U256,
    /// Gas paid to the bundler for overhead.
    pub pre_verification_gas: U256,
    /// EIP-1559 max fee per gas.
    pub max_fee_per_gas: U256,
    /// EIP-1559 priority fee per gas.
    pub max_priority_fee_per_gas: U256,
    /// Paymaster sponsoring the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    /// Gas for paymaster validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    /// Gas for the paymaster post-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    /// Paymaster-specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    /// Account signature. Empty until authorized.
    pub signature: Bytes,
}

impl UserOperation {
    /// `factory || factory_data`, or empty for a deployed account.
    #[must_use]
    pub fn init_code(&self) -> Bytes {
        self.factory.map_or_else(Bytes::new, |factory| {
            let data = self.factory_data.clone().unwrap_or_default();
            [factory.as_slice(), data.as_ref()].concat().into()
        })
    }

    /// `paymaster || uint128(verification gas) || uint128(post-op gas) || paymaster_data`,
    /// or empty without a paymaster.
    #[must_use]
    pub fn paymaster_and_data(&self) -> Bytes {
        self.paymaster.map_or_else(Bytes::new, |paymaster| {
            let verification = self.paymaster_verification_gas_limit.unwrap_or_default();
            let post_op = self.paymaster_post_op_gas_limit.unwrap_or_default();
            let data = self.paymaster_data.clone().unwrap_or_default();
            [
                paymaster.as_slice(),
                &verification.to_be_bytes::<32>()[16..],
                &post_op.to_be_bytes::<32>()[16..],
                data.as_ref(),
            ]
            .concat()
            .into()
        })
    }

    /// The same operation carrying `signature`.
    #[must_use]
    pub fn with_signature(self, signature: Bytes) -> Self {
        Self { signature, ..self }
    }
}

/// Where an operation is valid: the chain and the contracts that verify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationContext {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// `EntryPoint` the operation is submitted through.
    pub entry_point: Address,
    /// Safe 4337 module verifying owner signatures.
    pub safe_module: Address,
}

impl OperationContext {
    /// Canonical deployments (`EntryPoint` v0.7, Safe 4337 module v0.3.0) on `chain`.
    #[must_use]
    pub const fn for_chain(chain: Chain) -> Self {
        Self {
            chain_id: chain.id(),
            entry_point: ENTRY_POINT_V07,
            safe_module: SAFE_4337_MODULE,
        }
    }

    fn domain(&self) -> Eip712Domain {
        Eip712Domain::new(
            None,
            None,
            Some(U256::from(self.chain_id)),
            Some(self.safe_module),
            None,
        )
    }

    /// The EIP-712 `SafeOp` hash owners sign for `operation`.
    ///
    /// Every field except the signature is covered, so re-preparing an operation (fresh
    /// gas prices, a new paymaster stub) yields a different hash.
    ///
    /// # Errors
    /// `InvalidInput` if a gas field does not fit the 128-bit slot the module hashes.
    pub fn operation_hash(&self, operation: &UserOperation) -> Result<B256, VaultKitError> {
        let safe_op = SafeOp {
            safe: operation.sender,
            nonce: operation.nonce,
            initCode: operation.init_code(),
            callData: operation.call_data.clone(),
            verificationGasLimit: to_u128(
                operation.verification_gas_limit,
                "verification_gas_limit",
            )?,
            callGasLimit: to_u128(operation.call_gas_limit, "call_gas_limit")?,
            preVerificationGas: operation.pre_verification_gas,
            maxPriorityFeePerGas: to_u128(
                operation.max_priority_fee_per_gas,
                "max_priority_fee_per_gas",
            )?,
            maxFeePerGas: to_u128(operation.max_fee_per_gas, "max_fee_per_gas")?,
            paymasterAndData: operation.paymaster_and_data(),
            validAfter: U48::ZERO,
            validUntil: U48::ZERO,
            entryPoint: self.entry_point,
        };
        Ok(safe_op.eip712_signing_hash(&self.domain()))
    }
}

fn to_u128(value: U256, attribute: &str) -> Result<u128, VaultKitError> {
    u128::try_from(value)
        .map_err(|_| VaultKitError::invalid_input(attribute, format!("{value} exceeds 128 bits")))
}
