#![allow(dead_code, missing_docs)]

//! In-memory account, Delay module and token ledger shared across the workflow tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{address, eip191_hash_message, keccak256, Address, Bytes, Signature, B256, U256};
use alloy_sol_types::{sol, SolCall, SolValue};
use vaultkit_core::{
    bundler::account_call_data,
    chain::Chain,
    config::VaultConfig,
    facade::{
        AccountFacade, AccountReader, GuardReader, LedgerReader, TransactionSender,
        WithdrawalAuthority,
    },
    operation::{Call, OperationContext, Receipt, UserOperation},
    signature::{FinalAuthorization, QuorumPolicy},
    timelock::TimelockEntry,
    VaultKitError,
};

sol! {
    interface IToken {
        function transfer(address to, uint256 value) external returns (bool);
        function approve(address spender, uint256 value) external returns (bool);
    }

    interface IAccount {
        function enableModule(address module) external;
        function changeThreshold(uint256 threshold) external;
    }

    interface IDelay {
        function execTransactionFromModule(address to, uint256 value, bytes data, uint8 operation) external returns (bool success);
        function executeNextTx(address to, uint256 value, bytes data, uint8 operation) external;
        function skipExpired() external;
    }

    interface IProvider {
        function withdraw(address to, uint256 amount, bytes signature) external;
    }
}

pub const ACCOUNT: Address = address!("0x5afe5afe5afe5afe5afe5afe5afe5afe5afe5afe");
pub const FUND_PROVIDER: Address = address!("0xf0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0");

pub fn key(byte: u8) -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&B256::repeat_byte(byte)).unwrap()
}

/// The owner, the co-signer and their account's configuration, with the store in `store_dir`.
pub struct Parties {
    pub owner: PrivateKeySigner,
    pub cosigner: PrivateKeySigner,
    pub config: VaultConfig,
}

pub fn parties(store_dir: &Path) -> Parties {
    let owner = key(0x01);
    let cosigner = key(0x02);
    let config = VaultConfig {
        fund_provider: Some(FUND_PROVIDER),
        store_dir: store_dir.to_path_buf(),
        ..VaultConfig::new(
            Chain::ArbitrumSepolia,
            ACCOUNT,
            owner.address(),
            cosigner.address(),
        )
    };
    Parties {
        owner,
        cosigner,
        config,
    }
}

fn receipt_hash(counter: &mut u64) -> B256 {
    *counter += 1;
    keccak256(counter.to_be_bytes())
}

/// ERC-20 balances, keyed by token and holder.
#[derive(Default)]
pub struct MockLedger {
    balances: Mutex<HashMap<(Address, Address), U256>>,
}

impl MockLedger {
    pub fn set(&self, token: Address, holder: Address, amount: u64) {
        self.balances
            .lock()
            .unwrap()
            .insert((token, holder), U256::from(amount));
    }

    pub fn balance(&self, token: Address, holder: Address) -> U256 {
        self.balances
            .lock()
            .unwrap()
            .get(&(token, holder))
            .copied()
            .unwrap_or_default()
    }

    /// Moves tokens, or returns false (a revert) if `from` holds too little.
    pub fn transfer(&self, token: Address, from: Address, to: Address, amount: U256) -> bool {
        let mut balances = self.balances.lock().unwrap();
        let available = balances.get(&(token, from)).copied().unwrap_or_default();
        if available < amount {
            return false;
        }
        balances.insert((token, from), available - amount);
        *balances.entry((token, to)).or_default() += amount;
        true
    }
}

impl LedgerReader for MockLedger {
    async fn token_balance(&self, token: Address, holder: Address) -> Result<U256, VaultKitError> {
        Ok(self.balance(token, holder))
    }
}

/// Fund provider releasing tokens against the co-signer's signature over
/// `keccak256(abi.encode(to, amount))`.
pub struct MockFundProvider {
    pub cosigner: Address,
}

impl MockFundProvider {
    fn hash(to: Address, amount: U256) -> B256 {
        keccak256((to, amount).abi_encode())
    }

    fn authorizes(&self, to: Address, amount: U256, signature: &[u8]) -> bool {
        let digest = eip191_hash_message(Self::hash(to, amount));
        Signature::from_raw(signature)
            .and_then(|signature| signature.recover_address_from_prehash(&digest))
            .is_ok_and(|signer| signer == self.cosigner)
    }
}

impl WithdrawalAuthority for MockFundProvider {
    async fn withdrawal_hash(
        &self,
        _provider: Address,
        to: Address,
        amount: U256,
    ) -> Result<B256, VaultKitError> {
        Ok(Self::hash(to, amount))
    }
}

#[derive(Default)]
struct AccountState {
    nonce: u64,
    prepared: HashMap<Bytes, Vec<Call>>,
    receipts: HashMap<B256, Receipt>,
    executed: Vec<Call>,
    approvals: Vec<(Address, Address, U256)>,
    modules: Vec<Address>,
    counter: u64,
}

type SendHook = Box<dyn FnOnce() + Send>;

/// A Safe behind a bundler: checks nonce and owner signatures the way the `EntryPoint` and
/// the Safe 4337 module do, then executes token transfers, approvals, fund provider
/// withdrawals and threshold changes against the ledger.
pub struct MockAccount {
    pub address: Address,
    context: OperationContext,
    owners: Vec<Address>,
    threshold: Mutex<usize>,
    ledger: Arc<MockLedger>,
    provider: Option<MockFundProvider>,
    state: Mutex<AccountState>,
    on_send: Mutex<Option<SendHook>>,
}

impl MockAccount {
    pub fn new(config: &VaultConfig, threshold: usize, ledger: Arc<MockLedger>) -> Self {
        Self {
            address: config.account,
            context: config.context(),
            owners: vec![config.owner, config.cosigner],
            threshold: Mutex::new(threshold),
            ledger,
            provider: Some(MockFundProvider {
                cosigner: config.cosigner,
            }),
            state: Mutex::default(),
            on_send: Mutex::default(),
        }
    }

    /// Runs `hook` once, right after the next operation executes.
    pub fn on_send(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_send.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn threshold(&self) -> usize {
        *self.threshold.lock().unwrap()
    }

    pub fn nonce(&self) -> u64 {
        self.state.lock().unwrap().nonce
    }

    pub fn executed(&self) -> Vec<Call> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn approvals(&self) -> Vec<(Address, Address, U256)> {
        self.state.lock().unwrap().approvals.clone()
    }

    fn execute(&self, state: &mut AccountState, call: &Call) -> bool {
        let selector = call.data.get(..4).unwrap_or_default();
        let succeeded = if selector == IToken::transferCall::SELECTOR {
            let transfer = IToken::transferCall::abi_decode(&call.data).unwrap();
            self.ledger
                .transfer(call.to, self.address, transfer.to, transfer.value)
        } else if selector == IToken::approveCall::SELECTOR {
            let approve = IToken::approveCall::abi_decode(&call.data).unwrap();
            state.approvals.push((call.to, approve.spender, approve.value));
            true
        } else if selector == IAccount::enableModuleCall::SELECTOR && call.to == self.address {
            let enable = IAccount::enableModuleCall::abi_decode(&call.data).unwrap();
            state.modules.push(enable.module);
            true
        } else if selector == IAccount::changeThresholdCall::SELECTOR && call.to == self.address {
            let change = IAccount::changeThresholdCall::abi_decode(&call.data).unwrap();
            *self.threshold.lock().unwrap() = change.threshold.to::<usize>();
            true
        } else if selector == IProvider::withdrawCall::SELECTOR {
            let withdraw = IProvider::withdrawCall::abi_decode(&call.data).unwrap();
            let provider = self.provider.as_ref().unwrap();
            provider.authorizes(withdraw.to, withdraw.amount, &withdraw.signature)
                && self.ledger.transfer(
                    // the provider pays out in the token its balance is kept in
                    self.ledger_token(),
                    call.to,
                    withdraw.to,
                    withdraw.amount,
                )
        } else {
            // module deployment and the guardian on the module: accepted, no ledger effect
            true
        };
        state.executed.push(call.clone());
        succeeded
    }

    fn ledger_token(&self) -> Address {
        Chain::from_id(self.context.chain_id).unwrap().usdc()
    }
}

impl AccountFacade for MockAccount {
    async fn prepare_operation(&self, calls: &[Call]) -> Result<UserOperation, VaultKitError> {
        let call_data = account_call_data(calls)?;
        let mut state = self.state.lock().unwrap();
        state.prepared.insert(call_data.clone(), calls.to_vec());
        Ok(UserOperation {
            sender: self.address,
            nonce: U256::from(state.nonce),
            factory: None,
            factory_data: None,
            call_data,
            call_gas_limit: U256::from(150_000),
            verification_gas_limit: U256::from(300_000),
            pre_verification_gas: U256::from(60_000),
            max_fee_per_gas: U256::from(2_000_000_000_u64),
            max_priority_fee_per_gas: U256::from(1_000_000),
            paymaster: Some(address!("0x777777777777777777777777777777777777aaaa")),
            paymaster_verification_gas_limit: Some(U256::from(40_000)),
            paymaster_post_op_gas_limit: Some(U256::ZERO),
            paymaster_data: Some(Bytes::from_static(&[0x01, 0x02])),
            signature: Bytes::new(),
        })
    }

    async fn send_operation(&self, operation: &UserOperation) -> Result<B256, VaultKitError> {
        let hash = self.context.operation_hash(operation)?;
        let policy = QuorumPolicy::new(self.owners.clone(), self.threshold())?;
        let authorization = FinalAuthorization::try_from(operation.signature.clone())?;
        policy.verify(hash, &authorization)?;

        let mut state = self.state.lock().unwrap();
        if operation.nonce != U256::from(state.nonce) {
            return Err(VaultKitError::Rpc {
                code: -32602,
                message: "AA25 invalid account nonce".to_string(),
            });
        }
        let calls = state.prepared.get(&operation.call_data).cloned().unwrap();
        state.nonce += 1;
        let success = calls.iter().all(|call| self.execute(&mut state, call));
        let transaction_hash = receipt_hash(&mut state.counter);
        state.receipts.insert(
            hash,
            Receipt {
                transaction_hash,
                success,
            },
        );
        drop(state);
        if let Some(hook) = self.on_send.lock().unwrap().take() {
            hook();
        }
        Ok(hash)
    }

    async fn wait_for_receipt(&self, user_operation_hash: B256) -> Result<Receipt, VaultKitError> {
        self.state
            .lock()
            .unwrap()
            .receipts
            .get(&user_operation_hash)
            .copied()
            .ok_or_else(|| VaultKitError::NetworkError {
                url: "mock://bundler".to_string(),
                status: None,
                error: "receipt not found".to_string(),
            })
    }
}

impl AccountReader for MockAccount {
    async fn owners(&self, account: Address) -> Result<Vec<Address>, VaultKitError> {
        assert_eq!(account, self.address);
        Ok(self.owners.clone())
    }

    async fn threshold(&self, account: Address) -> Result<U256, VaultKitError> {
        assert_eq!(account, self.address);
        Ok(U256::from(self.threshold()))
    }

    async fn module_enabled(&self, account: Address, module: Address) -> Result<bool, VaultKitError> {
        assert_eq!(account, self.address);
        Ok(self.state.lock().unwrap().modules.contains(&module))
    }
}

struct QueuedTx {
    hash: B256,
    created_at: u64,
    to: Address,
    data: Bytes,
}

#[derive(Default)]
struct DelayState {
    now: u64,
    tx_nonce: usize,
    queue: Vec<QueuedTx>,
    counter: u64,
}

/// The account's Delay module seen from the owner's EOA, with a manually advanced clock.
///
/// Mirrors the module's checks: only the enabled owner may queue, `executeNextTx` needs
/// the cooldown to have passed, the entry not to have expired and the same call, and
/// `skipExpired` drops lapsed entries from the head of the queue.
pub struct MockDelay {
    pub module: Address,
    owner: Address,
    account: Address,
    cooldown: u64,
    expiration: u64,
    ledger: Arc<MockLedger>,
    state: Mutex<DelayState>,
}

impl MockDelay {
    pub fn new(config: &VaultConfig, ledger: Arc<MockLedger>, now: u64) -> Self {
        Self {
            module: config.module_address(),
            owner: config.owner,
            account: config.account,
            cooldown: config.cooldown,
            expiration: config.expiration,
            ledger,
            state: Mutex::new(DelayState {
                now,
                ..DelayState::default()
            }),
        }
    }

    pub fn advance(&self, seconds: u64) {
        self.state.lock().unwrap().now += seconds;
    }

    pub fn now(&self) -> u64 {
        self.state.lock().unwrap().now
    }

    fn entry(tx: &QueuedTx, cooldown: u64, expiration: u64) -> TimelockEntry {
        TimelockEntry {
            queued_at: tx.created_at,
            cooldown,
            expiration,
            call_hash: tx.hash,
        }
    }

    pub fn queue_len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.queue.len() - state.tx_nonce
    }

    fn expired(&self, created_at: u64, now: u64) -> bool {
        self.expiration != 0 && created_at + self.cooldown + self.expiration < now
    }

    fn transaction_hash(to: Address, value: U256, data: &Bytes, operation: u8) -> B256 {
        keccak256(
            [
                to.as_slice(),
                &value.to_be_bytes::<32>(),
                data.as_ref(),
                &[operation],
            ]
            .concat(),
        )
    }

    fn apply(&self, state: &mut DelayState, call: &Call) -> bool {
        let selector = call.data.get(..4).unwrap_or_default();
        if selector == IDelay::execTransactionFromModuleCall::SELECTOR {
            let queued = IDelay::execTransactionFromModuleCall::abi_decode(&call.data).unwrap();
            state.queue.push(QueuedTx {
                hash: Self::transaction_hash(queued.to, queued.value, &queued.data, queued.operation),
                created_at: state.now,
                to: queued.to,
                data: queued.data,
            });
            true
        } else if selector == IDelay::executeNextTxCall::SELECTOR {
            let next = IDelay::executeNextTxCall::abi_decode(&call.data).unwrap();
            let hash = Self::transaction_hash(next.to, next.value, &next.data, next.operation);
            let Some(head) = state.queue.get(state.tx_nonce) else {
                return false;
            };
            if state.now < head.created_at + self.cooldown
                || self.expired(head.created_at, state.now)
                || head.hash != hash
            {
                return false;
            }
            let transfer = IToken::transferCall::abi_decode(&head.data).unwrap();
            if !self
                .ledger
                .transfer(head.to, self.account, transfer.to, transfer.value)
            {
                return false;
            }
            state.tx_nonce += 1;
            true
        } else if selector == IDelay::skipExpiredCall::SELECTOR {
            while state
                .queue
                .get(state.tx_nonce)
                .is_some_and(|head| self.expired(head.created_at, state.now))
            {
                state.tx_nonce += 1;
            }
            true
        } else {
            false
        }
    }
}

impl GuardReader for MockDelay {
    async fn queued_entry(
        &self,
        module: Address,
        cooldown: u64,
        expiration: u64,
    ) -> Result<Option<TimelockEntry>, VaultKitError> {
        if module != self.module {
            return Ok(None);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .queue
            .get(state.tx_nonce)
            .map(|head| Self::entry(head, cooldown, expiration)))
    }

    async fn latest_entry(
        &self,
        module: Address,
        cooldown: u64,
        expiration: u64,
    ) -> Result<Option<TimelockEntry>, VaultKitError> {
        if module != self.module {
            return Ok(None);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .queue
            .get(state.tx_nonce..)
            .and_then(<[QueuedTx]>::last)
            .map(|tail| Self::entry(tail, cooldown, expiration)))
    }

    async fn latest_timestamp(&self) -> Result<u64, VaultKitError> {
        Ok(self.now())
    }
}

impl TransactionSender for MockDelay {
    fn sender(&self) -> Address {
        self.owner
    }

    async fn send_call(&self, call: &Call) -> Result<Receipt, VaultKitError> {
        let mut state = self.state.lock().unwrap();
        let success = call.to == self.module && self.apply(&mut state, call);
        Ok(Receipt {
            transaction_hash: receipt_hash(&mut state.counter),
            success,
        })
    }
}
