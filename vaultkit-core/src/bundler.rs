//! [`AccountFacade`] over an ERC-4337 bundler and a sponsoring paymaster.
//!
//! Preparing an operation takes four round trips: the account nonce from the
//! `EntryPoint`, the bundler's `fast` gas price, then the paymaster fills in gas limits and
//! sponsorship for a draft carrying a stub signature of the final length.

use std::time::Duration;

use alloy_primitives::{aliases::U192, hex, Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::json;

use crate::{
    chain::{ENTRY_POINT_V07, SAFE_MULTI_SEND},
    config::Endpoints,
    contracts::{IEntryPoint, IMultiSend, ISafe4337Module},
    error::VaultKitError,
    facade::AccountFacade,
    operation::{Call, Receipt, UserOperation},
    payload::OperationType,
    rpc::{ChainReader, JsonRpcClient},
};

/// Per-owner placeholder with the length and shape of a real signature, for gas estimation.
const STUB_SIGNATURE: [u8; 65] = hex!(
    "fffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c"
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GasPrice {
    max_fee_per_gas: U256,
    max_priority_fee_per_gas: U256,
}

#[derive(Debug, Deserialize)]
struct GasPriceTiers {
    fast: GasPrice,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sponsorship {
    call_gas_limit: U256,
    verification_gas_limit: U256,
    pre_verification_gas: U256,
    paymaster: Address,
    paymaster_verification_gas_limit: U256,
    paymaster_post_op_gas_limit: U256,
    paymaster_data: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncludedIn {
    transaction_hash: B256,
}

#[derive(Debug, Deserialize)]
struct UserOperationReceipt {
    success: bool,
    receipt: IncludedIn,
}

enum Poll {
    Pending,
    Failed(VaultKitError),
}

/// Bundler, paymaster and node endpoints acting for one account.
#[derive(Debug)]
pub struct BundlerClient {
    bundler: JsonRpcClient,
    paymaster: JsonRpcClient,
    chain: ChainReader,
    account: Address,
    signers: usize,
    poll_interval: Duration,
    max_polls: usize,
}

impl BundlerClient {
    /// A client for `account`, whose operations carry `signers` owner signatures.
    #[must_use]
    pub fn new(endpoints: &Endpoints, account: Address, signers: usize) -> Self {
        Self {
            bundler: JsonRpcClient::new(endpoints.bundler_url.clone()),
            paymaster: JsonRpcClient::new(endpoints.paymaster_url.clone()),
            chain: ChainReader::new(endpoints.rpc_url.clone()),
            account,
            signers,
            poll_interval: Duration::from_secs(2),
            max_polls: 60,
        }
    }

    /// Overrides how often and how long `wait_for_receipt` polls.
    #[must_use]
    pub const fn with_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    /// Signature placeholder sized for `signers` owners.
    fn stub_signature(&self) -> Bytes {
        let mut stub = vec![0u8; 12];
        for _ in 0..self.signers {
            stub.extend_from_slice(&STUB_SIGNATURE);
        }
        stub.into()
    }

    async fn nonce(&self) -> Result<U256, VaultKitError> {
        self.chain
            .client()
            .view(
                ENTRY_POINT_V07,
                IEntryPoint::getNonceCall {
                    sender: self.account,
                    key: U192::ZERO,
                },
            )
            .await
    }
}

/// Calldata the Safe 4337 module executes for `calls`: the call itself, or a delegate
/// call into `MultiSend` for a batch.
///
/// # Errors
/// `InvalidInput` for an empty batch.
pub fn account_call_data(calls: &[Call]) -> Result<Bytes, VaultKitError> {
    let (to, value, data, operation) = match calls {
        [] => return Err(VaultKitError::invalid_input("calls", "nothing to execute")),
        [call] => (call.to, call.value, call.data.clone(), OperationType::Call),
        batch => (
            SAFE_MULTI_SEND,
            U256::ZERO,
            IMultiSend::multiSendCall {
                transactions: pack_multi_send(batch),
            }
            .abi_encode()
            .into(),
            OperationType::DelegateCall,
        ),
    };
    Ok(ISafe4337Module::executeUserOpWithErrorStringCall {
        to,
        value,
        data,
        operation: operation as u8,
    }
    .abi_encode()
    .into())
}

/// `uint8 operation || address to || uint256 value || uint256 length || bytes data` per call.
fn pack_multi_send(calls: &[Call]) -> Bytes {
    let mut packed = Vec::new();
    for call in calls {
        packed.push(OperationType::Call as u8);
        packed.extend_from_slice(call.to.as_slice());
        packed.extend_from_slice(&call.value.to_be_bytes::<32>());
        packed.extend_from_slice(&U256::from(call.data.len()).to_be_bytes::<32>());
        packed.extend_from_slice(&call.data);
    }
    packed.into()
}

impl AccountFacade for BundlerClient {
    async fn prepare_operation(&self, calls: &[Call]) -> Result<UserOperation, VaultKitError> {
        let call_data = account_call_data(calls)?;
        let nonce = self.nonce().await?;
        let GasPriceTiers { fast } = self
            .bundler
            .call("pimlico_getUserOperationGasPrice", json!([]))
            .await?;

        let draft = UserOperation {
            sender: self.account,
            nonce,
            factory: None,
            factory_data: None,
            call_data,
            call_gas_limit: U256::ZERO,
            verification_gas_limit: U256::ZERO,
            pre_verification_gas: U256::ZERO,
            max_fee_per_gas: fast.max_fee_per_gas,
            max_priority_fee_per_gas: fast.max_priority_fee_per_gas,
            paymaster: None,
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
            paymaster_data: None,
            signature: self.stub_signature(),
        };
        let sponsorship: Sponsorship = self
            .paymaster
            .call("pm_sponsorUserOperation", json!([draft, ENTRY_POINT_V07]))
            .await?;

        let operation = UserOperation {
            call_gas_limit: sponsorship.call_gas_limit,
            verification_gas_limit: sponsorship.verification_gas_limit,
            pre_verification_gas: sponsorship.pre_verification_gas,
            paymaster: Some(sponsorship.paymaster),
            paymaster_verification_gas_limit: Some(sponsorship.paymaster_verification_gas_limit),
            paymaster_post_op_gas_limit: Some(sponsorship.paymaster_post_op_gas_limit),
            paymaster_data: Some(sponsorship.paymaster_data),
            signature: Bytes::new(),
            ..draft
        };
        tracing::debug!(
            sender = %operation.sender,
            nonce = %operation.nonce,
            calls = calls.len(),
            paymaster = %sponsorship.paymaster,
            "prepared sponsored operation"
        );
        Ok(operation)
    }

    async fn send_operation(&self, operation: &UserOperation) -> Result<B256, VaultKitError> {
        let user_operation_hash: B256 = self
            .bundler
            .call("eth_sendUserOperation", json!([operation, ENTRY_POINT_V07]))
            .await?;
        tracing::info!(%user_operation_hash, bundler = self.bundler.url(), "operation submitted");
        Ok(user_operation_hash)
    }

    async fn wait_for_receipt(&self, user_operation_hash: B256) -> Result<Receipt, VaultKitError> {
        let backoff = ConstantBuilder::default()
            .with_delay(self.poll_interval)
            .with_max_times(self.max_polls);

        let polled = (|| async {
            let receipt: Option<UserOperationReceipt> = self
                .bundler
                .call("eth_getUserOperationReceipt", json!([user_operation_hash]))
                .await
                .map_err(Poll::Failed)?;
            receipt.ok_or(Poll::Pending)
        })
        .retry(backoff)
        .when(|poll| matches!(poll, Poll::Pending))
        .await;

        match polled {
            Ok(receipt) => {
                tracing::info!(
                    %user_operation_hash,
                    transaction_hash = %receipt.receipt.transaction_hash,
                    success = receipt.success,
                    "operation included"
                );
                Ok(Receipt {
                    transaction_hash: receipt.receipt.transaction_hash,
                    success: receipt.success,
                })
            }
            Err(Poll::Failed(err)) => Err(err),
            Err(Poll::Pending) => Err(VaultKitError::NetworkError {
                url: self.bundler.url().to_string(),
                status: None,
                error: format!(
                    "{user_operation_hash} not included after {} polls",
                    self.max_polls + 1
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;
    use mockito::{Matcher, Server};

    use super::*;
    use crate::payload::token_transfer;

    const ACCOUNT: Address = address!("0x5afe5afe5afe5afe5afe5afe5afe5afe5afe5afe");
    const TOKEN: Address = address!("0x75faf114eafb1BDbe2F0316DF893fd58CE46AA4d");
    const PAYMASTER: Address = address!("0x777777777777777777777777777777777777aaaa");

    fn client(server: &Server) -> BundlerClient {
        let endpoints = Endpoints {
            bundler_url: format!("{}/bundler", server.url()),
            paymaster_url: format!("{}/paymaster", server.url()),
            rpc_url: format!("{}/rpc", server.url()),
        };
        BundlerClient::new(&endpoints, ACCOUNT, 2).with_polling(Duration::from_millis(1), 2)
    }

    fn rpc_result(result: &serde_json::Value) -> String {
        json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string()
    }

    #[test]
    fn test_single_call_is_executed_directly() {
        let call = token_transfer(TOKEN, ACCOUNT, U256::from(100));
        let data = account_call_data(std::slice::from_ref(&call)).unwrap();
        let decoded = ISafe4337Module::executeUserOpWithErrorStringCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.to, TOKEN);
        assert_eq!(decoded.data, call.data);
        assert_eq!(decoded.operation, 0);
    }

    #[test]
    fn test_batch_goes_through_multi_send() {
        let calls = [
            token_transfer(TOKEN, ACCOUNT, U256::from(1)),
            token_transfer(TOKEN, PAYMASTER, U256::from(2)),
        ];
        let data = account_call_data(&calls).unwrap();
        let decoded = ISafe4337Module::executeUserOpWithErrorStringCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.to, SAFE_MULTI_SEND);
        assert_eq!(decoded.operation, 1);

        let inner = IMultiSend::multiSendCall::abi_decode(&decoded.data).unwrap();
        let entry_len = 1 + 20 + 32 + 32 + calls[0].data.len();
        assert_eq!(inner.transactions.len(), 2 * entry_len);
        assert_eq!(inner.transactions[0], 0);
        assert_eq!(&inner.transactions[1..21], TOKEN.as_slice());
        assert_eq!(&inner.transactions[85..entry_len], &calls[0].data[..]);
    }

    #[test]
    fn test_stub_signature_is_sized_per_signer() {
        let endpoints = Endpoints {
            bundler_url: "http://127.0.0.1:1/bundler".to_string(),
            paymaster_url: "http://127.0.0.1:1/paymaster".to_string(),
            rpc_url: "http://127.0.0.1:1/rpc".to_string(),
        };
        let stub = BundlerClient::new(&endpoints, ACCOUNT, 2).stub_signature();
        assert_eq!(stub.len(), 12 + 2 * 65);
        assert!(stub[..12].iter().all(|byte| *byte == 0));
        assert_eq!(stub[12 + 64], 0x1c);
        assert_eq!(stub[12 + 65 + 64], 0x1c);
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        assert!(account_call_data(&[]).is_err());
    }

    #[tokio::test]
    async fn test_prepare_operation_applies_price_and_sponsorship() {
        let mut server = Server::new_async().await;
        let _nonce = server
            .mock("POST", "/rpc")
            .with_body(rpc_result(&json!(format!(
                "0x{}",
                hex::encode(U256::from(9).to_be_bytes::<32>())
            ))))
            .create_async()
            .await;
        let _price = server
            .mock("POST", "/bundler")
            .match_body(Matcher::Regex("pimlico_getUserOperationGasPrice".into()))
            .with_body(rpc_result(&json!({
                "slow": { "maxFeePerGas": "0x1", "maxPriorityFeePerGas": "0x1" },
                "standard": { "maxFeePerGas": "0x2", "maxPriorityFeePerGas": "0x2" },
                "fast": { "maxFeePerGas": "0x59682f00", "maxPriorityFeePerGas": "0xf4240" },
            })))
            .create_async()
            .await;
        let sponsor = server
            .mock("POST", "/paymaster")
            .match_body(Matcher::Regex("pm_sponsorUserOperation".into()))
            .with_body(rpc_result(&json!({
                "callGasLimit": "0x1d4c0",
                "verificationGasLimit": "0x3d090",
                "preVerificationGas": "0xcb20",
                "paymaster": PAYMASTER,
                "paymasterVerificationGasLimit": "0x9c40",
                "paymasterPostOpGasLimit": "0x1",
                "paymasterData": "0x00112233",
            })))
            .create_async()
            .await;

        let operation = client(&server)
            .prepare_operation(&[token_transfer(TOKEN, ACCOUNT, U256::from(100))])
            .await
            .unwrap();

        sponsor.assert_async().await;
        assert_eq!(operation.sender, ACCOUNT);
        assert_eq!(operation.nonce, U256::from(9));
        assert_eq!(operation.max_fee_per_gas, U256::from(1_500_000_000_u64));
        assert_eq!(operation.max_priority_fee_per_gas, U256::from(1_000_000));
        assert_eq!(operation.call_gas_limit, U256::from(120_000));
        assert_eq!(operation.paymaster, Some(PAYMASTER));
        assert_eq!(operation.paymaster_post_op_gas_limit, Some(U256::from(1)));
        assert!(operation.signature.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_receipt_reports_execution_result() {
        let mut server = Server::new_async().await;
        let transaction_hash = B256::repeat_byte(0x77);
        let _receipt = server
            .mock("POST", "/bundler")
            .with_body(rpc_result(&json!({
                "success": false,
                "receipt": { "transactionHash": transaction_hash },
            })))
            .create_async()
            .await;

        let receipt = client(&server)
            .wait_for_receipt(B256::repeat_byte(0x01))
            .await
            .unwrap();
        assert_eq!(
            receipt,
            Receipt {
                transaction_hash,
                success: false
            }
        );
    }

    #[tokio::test]
    async fn test_wait_for_receipt_gives_up() {
        let mut server = Server::new_async().await;
        let pending = server
            .mock("POST", "/bundler")
            .with_body(rpc_result(&serde_json::Value::Null))
            .expect(3)
            .create_async()
            .await;

        let err = client(&server)
            .wait_for_receipt(B256::repeat_byte(0x01))
            .await
            .unwrap_err();
        pending.assert_async().await;
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_send_operation_returns_the_user_operation_hash() {
        let mut server = Server::new_async().await;
        let hash = B256::repeat_byte(0x99);
        let _send = server
            .mock("POST", "/bundler")
            .match_body(Matcher::Regex("eth_sendUserOperation".into()))
            .with_body(rpc_result(&json!(hash)))
            .create_async()
            .await;

        let operation = crate::operation::test_support::sample_operation();
        let sent = client(&server).send_operation(&operation).await.unwrap();
        assert_eq!(sent, hash);
    }
}
