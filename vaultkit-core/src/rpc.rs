//! JSON-RPC over HTTP and the chain reads built on it.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{aliases::U64, Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolType, SolValue};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use crate::{
    contracts::{IDelayModule, ISafe, IERC20, IFundProvider},
    error::VaultKitError,
    facade::{AccountReader, GuardReader, LedgerReader, WithdrawalAuthority},
    http_request::Request,
    timelock::TimelockEntry,
};

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// A JSON-RPC 2.0 endpoint.
#[derive(Debug)]
pub(crate) struct JsonRpcClient {
    url: String,
    request: Request,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request: Request::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Calls `method`. A `null` result deserializes into `R` like any other value, so
    /// callers expecting "not yet" answers ask for an `Option`.
    pub(crate) async fn call<P: Serialize + Send + Sync, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, VaultKitError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let builder = self.request.post(&self.url)?.json(&body);
        let response = self.request.handle(builder).await?;
        let response: RpcResponse =
            response
                .json()
                .await
                .map_err(|err| VaultKitError::NetworkError {
                    url: self.url.clone(),
                    status: None,
                    error: format!("invalid JSON-RPC response to {method}: {err}"),
                })?;

        if let Some(error) = response.error {
            tracing::debug!(method, code = error.code, message = %error.message, "rpc error");
            return Err(VaultKitError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(serde_json::from_value(response.result)?)
    }

    /// `eth_call` against the latest block.
    pub(crate) async fn eth_call(&self, to: Address, data: Bytes) -> Result<Bytes, VaultKitError> {
        self.call("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }

    /// Calls a view function and decodes its single return value.
    pub(crate) async fn view<C, R>(&self, to: Address, call: C) -> Result<R, VaultKitError>
    where
        C: SolCall + Send,
        R: SolValue + From<<R::SolType as SolType>::RustType>,
    {
        let returned = self.eth_call(to, call.abi_encode().into()).await?;
        R::abi_decode(&returned).map_err(|err| {
            VaultKitError::Serialization(format!("cannot decode {}: {err}", C::SIGNATURE))
        })
    }
}

#[derive(Deserialize)]
struct BlockHeader {
    timestamp: U64,
}

/// Reads balances, Delay module queues and withdrawal hashes from a chain node.
#[derive(Debug)]
pub struct ChainReader {
    client: JsonRpcClient,
}

impl ChainReader {
    /// A reader against the JSON-RPC endpoint at `rpc_url`.
    #[must_use]
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            client: JsonRpcClient::new(rpc_url),
        }
    }

    pub(crate) const fn client(&self) -> &JsonRpcClient {
        &self.client
    }
}

impl LedgerReader for ChainReader {
    async fn token_balance(&self, token: Address, holder: Address) -> Result<U256, VaultKitError> {
        self.client
            .view(token, IERC20::balanceOfCall { owner: holder })
            .await
    }
}

impl AccountReader for ChainReader {
    async fn owners(&self, account: Address) -> Result<Vec<Address>, VaultKitError> {
        self.client.view(account, ISafe::getOwnersCall {}).await
    }

    async fn threshold(&self, account: Address) -> Result<U256, VaultKitError> {
        self.client.view(account, ISafe::getThresholdCall {}).await
    }

    async fn module_enabled(&self, account: Address, module: Address) -> Result<bool, VaultKitError> {
        self.client
            .view(account, ISafe::isModuleEnabledCall { module })
            .await
    }
}

impl ChainReader {
    /// The entry at queue position `nonce`.
    async fn entry_at(
        &self,
        module: Address,
        nonce: U256,
        cooldown: u64,
        expiration: u64,
    ) -> Result<TimelockEntry, VaultKitError> {
        let created_at: U256 = self
            .client
            .view(module, IDelayModule::getTxCreatedAtCall { nonce })
            .await?;
        let call_hash: B256 = self
            .client
            .view(module, IDelayModule::getTxHashCall { nonce })
            .await?;
        let queued_at = u64::try_from(created_at)
            .map_err(|_| VaultKitError::invalid_input("queued_at", created_at))?;

        tracing::debug!(%module, %nonce, queued_at, %call_hash, "read queued entry");
        Ok(TimelockEntry {
            queued_at,
            cooldown,
            expiration,
            call_hash,
        })
    }

    /// `(txNonce, queueNonce)`: the next entry to execute and the next free position.
    async fn queue_bounds(&self, module: Address) -> Result<(U256, U256), VaultKitError> {
        let next: U256 = self.client.view(module, IDelayModule::txNonceCall {}).await?;
        let queued: U256 = self
            .client
            .view(module, IDelayModule::queueNonceCall {})
            .await?;
        Ok((next, queued))
    }
}

impl GuardReader for ChainReader {
    async fn queued_entry(
        &self,
        module: Address,
        cooldown: u64,
        expiration: u64,
    ) -> Result<Option<TimelockEntry>, VaultKitError> {
        let (next, queued) = self.queue_bounds(module).await?;
        if next >= queued {
            return Ok(None);
        }
        self.entry_at(module, next, cooldown, expiration)
            .await
            .map(Some)
    }

    async fn latest_entry(
        &self,
        module: Address,
        cooldown: u64,
        expiration: u64,
    ) -> Result<Option<TimelockEntry>, VaultKitError> {
        let (next, queued) = self.queue_bounds(module).await?;
        if next >= queued {
            return Ok(None);
        }
        self.entry_at(module, queued - U256::from(1), cooldown, expiration)
            .await
            .map(Some)
    }

    async fn latest_timestamp(&self) -> Result<u64, VaultKitError> {
        let block: Option<BlockHeader> = self
            .client
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let block = block.ok_or_else(|| VaultKitError::Rpc {
            code: 0,
            message: "latest block not available".to_string(),
        })?;
        Ok(block.timestamp.to::<u64>())
    }
}

impl WithdrawalAuthority for ChainReader {
    async fn withdrawal_hash(
        &self,
        provider: Address,
        to: Address,
        amount: U256,
    ) -> Result<B256, VaultKitError> {
        self.client
            .view(provider, IFundProvider::getWithdrawalHashCall { to, amount })
            .await
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;
    use mockito::Matcher;

    use super::*;

    const MODULE: Address = address!("0xd0cf0de495b210c767f83a4ced136e830be48191");

    fn word(value: u64) -> String {
        format!("0x{}", alloy_primitives::hex::encode(U256::from(value).to_be_bytes::<32>()))
    }

    fn result(value: &str) -> String {
        json!({ "jsonrpc": "2.0", "id": 1, "result": value }).to_string()
    }

    async fn mock_view(
        server: &mut mockito::Server,
        selector: [u8; 4],
        body: String,
    ) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex(format!(
                "\"data\":\"0x{}",
                alloy_primitives::hex::encode(selector)
            )))
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_token_balance() {
        let mut server = mockito::Server::new_async().await;
        let mock = mock_view(&mut server, IERC20::balanceOfCall::SELECTOR, result(&word(2_500_000))).await;

        let reader = ChainReader::new(server.url());
        let balance = reader
            .token_balance(Address::repeat_byte(1), Address::repeat_byte(2))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(balance, U256::from(2_500_000));
    }

    #[tokio::test]
    async fn test_account_owners_and_threshold() {
        let mut server = mockito::Server::new_async().await;
        let owners = vec![Address::repeat_byte(1), Address::repeat_byte(2)];
        let _owners = mock_view(
            &mut server,
            ISafe::getOwnersCall::SELECTOR,
            result(&format!("0x{}", alloy_primitives::hex::encode(owners.abi_encode()))),
        )
        .await;
        let _threshold = mock_view(&mut server, ISafe::getThresholdCall::SELECTOR, result(&word(2))).await;
        let _enabled = mock_view(&mut server, ISafe::isModuleEnabledCall::SELECTOR, result(&word(1))).await;

        let reader = ChainReader::new(server.url());
        let account = Address::repeat_byte(0x5a);
        assert_eq!(reader.owners(account).await.unwrap(), owners);
        assert_eq!(reader.threshold(account).await.unwrap(), U256::from(2));
        assert!(reader.module_enabled(account, MODULE).await.unwrap());
    }

    #[tokio::test]
    async fn test_queued_entry_reads_the_head_of_the_queue() {
        let mut server = mockito::Server::new_async().await;
        let hash = B256::repeat_byte(0x42);
        let _next = mock_view(&mut server, IDelayModule::txNonceCall::SELECTOR, result(&word(3))).await;
        let _queued = mock_view(&mut server, IDelayModule::queueNonceCall::SELECTOR, result(&word(4))).await;
        let _created = mock_view(
            &mut server,
            IDelayModule::getTxCreatedAtCall::SELECTOR,
            result(&word(1_700_000_000)),
        )
        .await;
        let _hash = mock_view(
            &mut server,
            IDelayModule::getTxHashCall::SELECTOR,
            result(&format!("0x{}", alloy_primitives::hex::encode(hash))),
        )
        .await;

        let entry = ChainReader::new(server.url())
            .queued_entry(MODULE, 60, 600)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            entry,
            TimelockEntry {
                queued_at: 1_700_000_000,
                cooldown: 60,
                expiration: 600,
                call_hash: hash,
            }
        );
    }

    #[tokio::test]
    async fn test_latest_entry_reads_the_tail_of_the_queue() {
        let mut server = mockito::Server::new_async().await;
        let _next = mock_view(&mut server, IDelayModule::txNonceCall::SELECTOR, result(&word(3))).await;
        let _queued = mock_view(&mut server, IDelayModule::queueNonceCall::SELECTOR, result(&word(5))).await;
        let at_tail = |selector: [u8; 4]| {
            format!(
                "\"data\":\"0x{}{}",
                alloy_primitives::hex::encode(selector),
                &word(4)[2..]
            )
        };
        let created = server
            .mock("POST", "/")
            .match_body(Matcher::Regex(at_tail(IDelayModule::getTxCreatedAtCall::SELECTOR)))
            .with_body(result(&word(1_700_000_700)))
            .create_async()
            .await;
        let _hash = server
            .mock("POST", "/")
            .match_body(Matcher::Regex(at_tail(IDelayModule::getTxHashCall::SELECTOR)))
            .with_body(result(&format!("0x{}", "42".repeat(32))))
            .create_async()
            .await;

        let entry = ChainReader::new(server.url())
            .latest_entry(MODULE, 60, 600)
            .await
            .unwrap()
            .unwrap();
        created.assert_async().await;
        assert_eq!(entry.queued_at, 1_700_000_700);
        assert_eq!(entry.call_hash, B256::repeat_byte(0x42));
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let mut server = mockito::Server::new_async().await;
        let _next = mock_view(&mut server, IDelayModule::txNonceCall::SELECTOR, result(&word(5))).await;
        let _queued = mock_view(&mut server, IDelayModule::queueNonceCall::SELECTOR, result(&word(5))).await;

        let entry = ChainReader::new(server.url())
            .queued_entry(MODULE, 60, 600)
            .await
            .unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_latest_timestamp() {
        let mut server = mockito::Server::new_async().await;
        let _block = server
            .mock("POST", "/")
            .match_body(Matcher::Regex("eth_getBlockByNumber".to_string()))
            .with_body(
                json!({ "jsonrpc": "2.0", "id": 1, "result": { "number": "0x10", "timestamp": "0x6553f100" } })
                    .to_string(),
            )
            .create_async()
            .await;

        let timestamp = ChainReader::new(server.url()).latest_timestamp().await.unwrap();
        assert_eq!(timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_rpc_error_object_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _revert = server
            .mock("POST", "/")
            .with_body(
                json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": 3, "message": "execution reverted" } })
                    .to_string(),
            )
            .create_async()
            .await;

        let err = ChainReader::new(server.url())
            .withdrawal_hash(Address::repeat_byte(1), Address::repeat_byte(2), U256::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultKitError::Rpc { code: 3, ref message } if message == "execution reverted"));
        assert!(!err.is_retryable());
    }
}
