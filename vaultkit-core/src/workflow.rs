//! The custody use cases, one function each, parameterized by configuration and by the
//! collaborators they talk to.

use std::path::PathBuf;

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, U256};

use crate::{
    amount::TokenAmount,
    chain::Chain,
    config::{VaultConfig, ACCOUNT_THRESHOLD},
    error::VaultKitError,
    facade::{
        AccountFacade, AccountReader, GuardReader, LedgerReader, TransactionSender,
        WithdrawalAuthority,
    },
    operation::{Call, Receipt, UserOperation},
    payload::{
        guarded_token_transfer, guarded_withdrawal, setup_calls, token_approve, token_transfer,
        GuardedCall, TimelockCalls,
    },
    signature::{sign_withdrawal_request, FinalAuthorization, QuorumPolicy, SignatureCollector},
    store::{Slot, StoredAuthorizationRecord},
    timelock::{GuardPhase, TimelockEntry, TimelockGuard},
};

/// Sends an authorized operation and requires it to succeed.
async fn submit<A: AccountFacade>(
    account: &A,
    operation: UserOperation,
    authorization: FinalAuthorization,
) -> Result<Receipt, VaultKitError> {
    let signed = operation.with_signature(authorization.into_bytes());
    let user_operation_hash = account.send_operation(&signed).await?;
    let receipt = account.wait_for_receipt(user_operation_hash).await?;
    if !receipt.success {
        return Err(VaultKitError::OperationFailed(receipt.transaction_hash));
    }
    Ok(receipt)
}

/// Prepares `calls`, has every key in `signers` sign and submits.
async fn sign_and_submit<A: AccountFacade>(
    collector: &SignatureCollector,
    account: &A,
    calls: &[Call],
    signers: &[&PrivateKeySigner],
) -> Result<Receipt, VaultKitError> {
    let operation = account.prepare_operation(calls).await?;
    let partials = signers
        .iter()
        .map(|signer| collector.sign_partial(&operation, signer))
        .collect::<Result<Vec<_>, _>>()?;
    let authorization = collector.assemble_final(&operation, &partials)?;
    submit(account, operation, authorization).await
}

/// Deploys and enables the Delay module, lets the owner queue through it and raises the
/// account threshold to both signers.
///
/// Runs while the account still accepts the owner alone, so only the owner signs. `account`
/// must size its signature stub for a single signer.
///
/// # Errors
/// Any preparation, signing or submission failure; `OperationFailed` if the batch reverted.
pub async fn setup_guard<A: AccountFacade>(
    config: &VaultConfig,
    account: &A,
    owner: &PrivateKeySigner,
) -> Result<Receipt, VaultKitError> {
    let single_owner = SignatureCollector::new(
        config.context(),
        QuorumPolicy::new(vec![config.owner, config.cosigner], 1)?,
    );
    let threshold = u64::try_from(ACCOUNT_THRESHOLD)
        .map_err(|err| VaultKitError::invalid_input("threshold", err))?;
    let calls = setup_calls(&config.module_params(), config.owner, Some(threshold));

    let receipt = sign_and_submit(&single_owner, account, &calls, &[owner]).await?;
    tracing::info!(
        module = %config.module_address(),
        cooldown = config.cooldown,
        expiration = config.expiration,
        transaction_hash = %receipt.transaction_hash,
        "guard module enabled"
    );
    Ok(receipt)
}

/// First half of a two-signer transfer: prepares `amount` of the token to `recipient`, signs
/// it as the owner and leaves it in `slot` for the co-signer.
///
/// # Errors
/// Preparation and signing failures, `Storage` if the record cannot be written.
pub async fn propose<A: AccountFacade>(
    config: &VaultConfig,
    account: &A,
    owner: &PrivateKeySigner,
    slot: Slot,
    recipient: Address,
    amount: U256,
) -> Result<PathBuf, VaultKitError> {
    let collector = config.collector()?;
    let operation = account
        .prepare_operation(&[token_transfer(config.token, recipient, amount)])
        .await?;
    let partial = collector.sign_partial(&operation, owner)?;
    let record = StoredAuthorizationRecord {
        chain_id: config.chain.id(),
        operation,
        partial,
    };
    let path = config.store().save(slot, &record)?;
    tracing::info!(
        %slot,
        %recipient,
        amount = %TokenAmount(amount),
        operation_hash = %record.partial.operation_hash,
        "proposed transfer, waiting for the co-signer"
    );
    Ok(path)
}

fn ensure_same_chain(
    config: &VaultConfig,
    record: &StoredAuthorizationRecord,
) -> Result<(), VaultKitError> {
    if record.chain_id == config.chain.id() {
        return Ok(());
    }
    Err(VaultKitError::invalid_input(
        "chain_id",
        format!(
            "proposal was prepared for chain {}, not {}",
            record.chain_id,
            config.chain.id()
        ),
    ))
}

/// Second half: loads the proposal from `slot`, adds the co-signer's signature, submits it
/// and clears the slot.
///
/// Once the operation executed the receipt is returned even if the slot cannot be cleared;
/// that failure is only logged.
///
/// # Errors
/// `RecordNotFound` without a proposal, `MismatchedOperation` if the stored signature does
/// not cover the stored operation, `InvalidInput` for a proposal from another chain, and
/// submission failures. The slot is kept when submission fails.
pub async fn countersign_and_submit<A: AccountFacade>(
    config: &VaultConfig,
    account: &A,
    cosigner: &PrivateKeySigner,
    slot: Slot,
) -> Result<Receipt, VaultKitError> {
    let store = config.store();
    let record = store.load(slot)?;
    ensure_same_chain(config, &record)?;

    let collector = config.collector()?;
    let countersigned = collector.sign_partial(&record.operation, cosigner)?;
    let authorization =
        collector.assemble_final(&record.operation, &[record.partial.clone(), countersigned])?;
    let receipt = submit(account, record.operation, authorization).await?;
    if let Err(err) = store.consume(slot) {
        tracing::warn!(
            %slot,
            transaction_hash = %receipt.transaction_hash,
            error = %err,
            "operation executed but the proposal was not removed, delete it before proposing again"
        );
    }

    tracing::info!(%slot, transaction_hash = %receipt.transaction_hash, "co-signed operation executed");
    Ok(receipt)
}

/// The recovery transfer: `amount` of the token from the account to the owner, or the whole
/// balance when no amount is given.
async fn recovery_call<L: LedgerReader>(
    config: &VaultConfig,
    ledger: &L,
    amount: Option<U256>,
) -> Result<(U256, GuardedCall), VaultKitError> {
    let amount = match amount {
        Some(amount) => amount,
        None => ledger.token_balance(config.token, config.account).await?,
    };
    if amount.is_zero() {
        return Err(VaultKitError::invalid_input("amount", "nothing to recover"));
    }
    Ok((
        amount,
        guarded_token_transfer(config.token, config.owner, amount),
    ))
}

async fn observe_guard<G: GuardReader>(
    config: &VaultConfig,
    reader: &G,
) -> Result<(TimelockGuard, u64), VaultKitError> {
    let module = config.module_address();
    let pending = reader
        .queued_entry(module, config.cooldown, config.expiration)
        .await?;
    let now = reader.latest_timestamp().await?;
    Ok((TimelockGuard::observed(module, pending), now))
}

/// Outcome of [`start_recovery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStarted {
    /// The queued entry as read back from the module.
    pub entry: TimelockEntry,
    /// Receipt of the `start` transaction.
    pub receipt: Receipt,
}

/// Owner-only recovery, step one: queues the recovery transfer on the Delay module.
///
/// An expired entry at the head of the queue is skipped first so the new one is next. The
/// module only skips entries strictly past their window; if the stale entry survives the
/// skip, nothing is queued.
///
/// # Errors
/// - `InvalidInput` unless `sender` is the owner, the only address enabled on the module.
/// - `TimelockOccupied` while another entry is pending, or while an expired one is still
///   at the head of the queue after the skip.
/// - `InsufficientFunds` if the account holds less than `amount`.
/// - `OperationFailed` if a transaction reverted.
pub async fn start_recovery<G, S, L>(
    config: &VaultConfig,
    reader: &G,
    sender: &S,
    ledger: &L,
    amount: Option<U256>,
) -> Result<RecoveryStarted, VaultKitError>
where
    G: GuardReader,
    S: TransactionSender,
    L: LedgerReader,
{
    if sender.sender() != config.owner {
        return Err(VaultKitError::invalid_input(
            "sender",
            format!("only the owner {} can queue on the module", config.owner),
        ));
    }
    let (required, guarded) = recovery_call(config, ledger, amount).await?;
    let available = ledger.token_balance(config.token, config.account).await?;
    if available < required {
        return Err(VaultKitError::InsufficientFunds {
            holder: config.account,
            required,
            available,
        });
    }

    let (mut guard, now) = observe_guard(config, reader).await?;
    guard.ensure_can_start(now)?;
    let calls = TimelockCalls::new(&config.module_params());
    if guard.phase(now) == GuardPhase::Expired {
        tracing::info!(module = %calls.module(), "skipping expired entry");
        let skipped = sender.send_call(&calls.skip_expired()).await?;
        if !skipped.success {
            return Err(VaultKitError::OperationFailed(skipped.transaction_hash));
        }
        (guard, _) = observe_guard(config, reader).await?;
        if let Some(stale) = guard.pending() {
            tracing::warn!(
                module = %calls.module(),
                queued_at = stale.queued_at,
                "expired entry is still at the head of the queue"
            );
            return Err(VaultKitError::TimelockOccupied {
                queued_at: stale.queued_at,
            });
        }
    }

    let receipt = sender.send_call(&calls.start(&guarded)).await?;
    if !receipt.success {
        return Err(VaultKitError::OperationFailed(receipt.transaction_hash));
    }
    let entry = reader
        .latest_entry(calls.module(), config.cooldown, config.expiration)
        .await?
        .ok_or(VaultKitError::NoQueuedEntry(calls.module()))?;
    if entry.call_hash != guarded.queue_hash() {
        return Err(VaultKitError::MismatchedTimelockCall {
            queued: entry.call_hash,
            requested: guarded.queue_hash(),
        });
    }
    let entry = guard.record_start(&receipt, entry)?;

    tracing::info!(
        module = %calls.module(),
        amount = %TokenAmount(required),
        executable_at = entry.executable_at(),
        transaction_hash = %receipt.transaction_hash,
        "recovery queued"
    );
    Ok(RecoveryStarted { entry, receipt })
}

/// Owner-only recovery, step two: executes the queued recovery transfer once the cooldown
/// has elapsed.
///
/// `amount` must be the amount that was queued; without it the current balance is used,
/// which only matches if the balance did not change in between.
///
/// # Errors
/// - `NoQueuedEntry` / `TimelockNotReady` / `TimelockExpired` per the module state.
/// - `MismatchedTimelockCall` when the transfer differs from the queued one.
/// - `OperationFailed` if the transaction reverted.
pub async fn finalize_recovery<G, S, L>(
    config: &VaultConfig,
    reader: &G,
    sender: &S,
    ledger: &L,
    amount: Option<U256>,
) -> Result<Receipt, VaultKitError>
where
    G: GuardReader,
    S: TransactionSender,
    L: LedgerReader,
{
    let (amount, guarded) = recovery_call(config, ledger, amount).await?;
    let (mut guard, now) = observe_guard(config, reader).await?;
    guard.ensure_can_finalize(guarded.queue_hash(), now)?;

    let calls = TimelockCalls::new(&config.module_params());
    let receipt = sender.send_call(&calls.finalize(&guarded)).await?;
    guard.record_finalize(&receipt)?;

    tracing::info!(
        module = %calls.module(),
        amount = %TokenAmount(amount),
        recipient = %config.owner,
        transaction_hash = %receipt.transaction_hash,
        "recovery executed"
    );
    Ok(receipt)
}

/// Current state of the account's guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardStatus {
    /// The module instance.
    pub module: Address,
    /// Latest block timestamp the phase was evaluated at.
    pub now: u64,
    /// The entry at the head of the queue.
    pub entry: Option<TimelockEntry>,
    /// Phase at `now`.
    pub phase: GuardPhase,
}

/// Reads the guard queue and evaluates it at the latest block.
///
/// # Errors
/// Network and decoding failures.
pub async fn guard_status<G: GuardReader>(
    config: &VaultConfig,
    reader: &G,
) -> Result<GuardStatus, VaultKitError> {
    let (guard, now) = observe_guard(config, reader).await?;
    Ok(GuardStatus {
        module: guard.module(),
        now,
        entry: guard.pending().copied(),
        phase: guard.phase(now),
    })
}

/// Withdraws `amount` from the fund provider into the account, authorized by the co-signer,
/// and optionally approves `spender` for the same amount in the same operation.
///
/// The co-signer only authorizes against a pending claim in [`Slot::Claim`]; the claim is
/// left in place for `countersign`.
///
/// # Errors
/// - `InvalidInput` without a configured fund provider, or for a claim from another chain.
/// - `RecordNotFound` without a pending claim; nothing is signed.
/// - `InsufficientFunds` if the provider holds less than `amount`; nothing is signed.
/// - signing and submission failures.
#[allow(clippy::too_many_arguments)]
pub async fn co_signed_withdrawal<A, W, L>(
    config: &VaultConfig,
    account: &A,
    authority: &W,
    ledger: &L,
    owner: &PrivateKeySigner,
    cosigner: &PrivateKeySigner,
    amount: U256,
    spender: Option<Address>,
) -> Result<Receipt, VaultKitError>
where
    A: AccountFacade,
    W: WithdrawalAuthority,
    L: LedgerReader,
{
    let provider = config.require_fund_provider()?;
    let claim = config.store().load(Slot::Claim)?;
    ensure_same_chain(config, &claim)?;
    let available = ledger.token_balance(config.token, provider).await?;
    if available < amount {
        return Err(VaultKitError::InsufficientFunds {
            holder: provider,
            required: amount,
            available,
        });
    }

    let withdrawal_hash = authority
        .withdrawal_hash(provider, config.account, amount)
        .await?;
    let cosigner_signature = sign_withdrawal_request(withdrawal_hash, cosigner)?;
    let mut calls = vec![guarded_withdrawal(
        provider,
        config.account,
        amount,
        cosigner_signature,
    )];
    if let Some(spender) = spender {
        calls.push(token_approve(config.token, spender, amount));
    }

    let receipt = sign_and_submit(&config.collector()?, account, &calls, &[owner, cosigner]).await?;
    tracing::info!(
        %provider,
        amount = %TokenAmount(amount),
        transaction_hash = %receipt.transaction_hash,
        "co-signed withdrawal executed"
    );
    Ok(receipt)
}

/// On-chain owner configuration of the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfiguration {
    /// The account.
    pub account: Address,
    /// Owners as the account reports them.
    pub owners: Vec<Address>,
    /// Signatures required.
    pub threshold: U256,
    /// The derived Delay module instance.
    pub module: Address,
    /// Whether the account lets that module execute.
    pub module_enabled: bool,
}

impl AccountConfiguration {
    /// Whether `setup` has taken effect: the module is enabled and both signers are
    /// required.
    #[must_use]
    pub fn is_guarded(&self) -> bool {
        self.module_enabled && self.threshold == U256::from(ACCOUNT_THRESHOLD)
    }
}

/// Reads owners, threshold and module status of the account.
///
/// # Errors
/// Network and decoding failures.
pub async fn account_configuration<R: AccountReader>(
    config: &VaultConfig,
    reader: &R,
) -> Result<AccountConfiguration, VaultKitError> {
    let module = config.module_address();
    Ok(AccountConfiguration {
        account: config.account,
        owners: reader.owners(config.account).await?,
        threshold: reader.threshold(config.account).await?,
        module,
        module_enabled: reader.module_enabled(config.account, module).await?,
    })
}

/// Token holdings on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBalance {
    /// The chain.
    pub chain: Chain,
    /// The account's balance.
    pub account: TokenAmount,
    /// The fund provider's balance, when one is configured.
    pub fund_provider: Option<TokenAmount>,
}

/// Reads the balances of the account and fund provider on the configured chain.
///
/// # Errors
/// Network and decoding failures.
pub async fn chain_balance<L: LedgerReader>(
    config: &VaultConfig,
    ledger: &L,
) -> Result<ChainBalance, VaultKitError> {
    let account = ledger.token_balance(config.token, config.account).await?;
    let fund_provider = match config.fund_provider {
        Some(provider) => Some(TokenAmount(
            ledger.token_balance(config.token, provider).await?,
        )),
        None => None,
    };
    Ok(ChainBalance {
        chain: config.chain,
        account: TokenAmount(account),
        fund_provider,
    })
}

/// Sum of the account balances across chains, for display. Funds never move between chains.
#[must_use]
pub fn global_balance(balances: &[ChainBalance]) -> TokenAmount {
    TokenAmount(
        balances
            .iter()
            .fold(U256::ZERO, |total, balance| total.saturating_add(balance.account.raw())),
    )
}
