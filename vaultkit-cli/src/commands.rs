use alloy_primitives::Address;
use strum::IntoEnumIterator;
use vaultkit_core::{
    amount::TokenAmount,
    bundler::BundlerClient,
    chain::Chain,
    config::ACCOUNT_THRESHOLD,
    rpc::ChainReader,
    store::Slot,
    timelock::GuardPhase,
    workflow::{self, ChainBalance},
};

use crate::{
    eoa::EoaSender,
    settings::{rpc_url, Settings},
};

pub async fn address(settings: &Settings) -> eyre::Result<()> {
    let config = &settings.config;
    println!("account:    {}", config.account);
    println!("module:     {}", config.module_address());
    println!("cooldown:   {}s", config.cooldown);
    println!("expiration: {}s", config.expiration);

    let reader = ChainReader::new(rpc_url(config.chain));
    let onchain = workflow::account_configuration(config, &reader).await?;
    println!("threshold:  {}", onchain.threshold);
    for owner in &onchain.owners {
        println!("owner:      {owner}");
    }
    println!("module enabled: {}", onchain.module_enabled);
    if !onchain.is_guarded() {
        println!("guard not active, run `vaultkit setup`");
    }
    Ok(())
}

pub async fn setup(settings: &Settings) -> eyre::Result<()> {
    let config = &settings.config;
    // the account still accepts the owner alone
    let account = BundlerClient::new(&settings.endpoints()?, config.account, 1);
    let receipt = workflow::setup_guard(config, &account, settings.owner_key()?).await?;
    println!(
        "module {} enabled, account now requires {ACCOUNT_THRESHOLD} signatures ({})",
        config.module_address(),
        receipt.transaction_hash
    );
    Ok(())
}

pub async fn status(settings: &Settings) -> eyre::Result<()> {
    let config = &settings.config;
    let reader = ChainReader::new(rpc_url(config.chain));
    let status = workflow::guard_status(config, &reader).await?;

    println!("module: {}", status.module);
    match (status.phase, status.entry) {
        (GuardPhase::NoEntry | GuardPhase::Executed, _) | (_, None) => {
            println!("nothing queued");
        }
        (phase, Some(entry)) => {
            println!("phase:         {phase:?}");
            println!("queued at:     {}", entry.queued_at);
            println!("executable at: {}", entry.executable_at());
            match entry.expires_at() {
                Some(expires_at) => println!("expires at:    {expires_at}"),
                None => println!("expires at:    never"),
            }
            if phase == GuardPhase::Queued {
                println!(
                    "executable in {}s",
                    entry.executable_at().saturating_sub(status.now)
                );
            }
        }
    }
    Ok(())
}

pub async fn start_recovery(settings: &Settings, amount: Option<TokenAmount>) -> eyre::Result<()> {
    let config = &settings.config;
    let rpc_url = rpc_url(config.chain);
    let reader = ChainReader::new(rpc_url.clone());
    let sender = EoaSender::new(settings.owner_key()?.clone(), &rpc_url)?;

    let started = workflow::start_recovery(
        config,
        &reader,
        &sender,
        &reader,
        amount.map(TokenAmount::raw),
    )
    .await?;
    println!(
        "recovery queued ({}), executable from {}",
        started.receipt.transaction_hash,
        started.entry.executable_at()
    );
    Ok(())
}

pub async fn finalize_recovery(
    settings: &Settings,
    amount: Option<TokenAmount>,
) -> eyre::Result<()> {
    let config = &settings.config;
    let rpc_url = rpc_url(config.chain);
    let reader = ChainReader::new(rpc_url.clone());
    let sender = EoaSender::new(settings.owner_key()?.clone(), &rpc_url)?;

    let receipt = workflow::finalize_recovery(
        config,
        &reader,
        &sender,
        &reader,
        amount.map(TokenAmount::raw),
    )
    .await?;
    println!("recovered to {} ({})", config.owner, receipt.transaction_hash);
    Ok(())
}

pub async fn propose(
    settings: &Settings,
    slot: Slot,
    to: Option<Address>,
    amount: TokenAmount,
) -> eyre::Result<()> {
    let config = &settings.config;
    let account = BundlerClient::new(&settings.endpoints()?, config.account, ACCOUNT_THRESHOLD);
    let recipient = to.unwrap_or(config.cosigner);

    let path = workflow::propose(
        config,
        &account,
        settings.owner_key()?,
        slot,
        recipient,
        amount.raw(),
    )
    .await?;
    println!("proposal saved to {}", path.display());
    println!("next: vaultkit countersign --slot {slot}");
    Ok(())
}

pub async fn countersign(settings: &Settings, slot: Slot) -> eyre::Result<()> {
    let config = &settings.config;
    let account = BundlerClient::new(&settings.endpoints()?, config.account, ACCOUNT_THRESHOLD);
    let receipt =
        workflow::countersign_and_submit(config, &account, settings.cosigner_key()?, slot).await?;
    println!("executed ({})", receipt.transaction_hash);
    Ok(())
}

pub async fn withdraw(
    settings: &Settings,
    amount: TokenAmount,
    approve: Option<Address>,
) -> eyre::Result<()> {
    let config = &settings.config;
    let endpoints = settings.endpoints()?;
    let account = BundlerClient::new(&endpoints, config.account, ACCOUNT_THRESHOLD);
    let reader = ChainReader::new(endpoints.rpc_url.clone());

    let receipt = workflow::co_signed_withdrawal(
        config,
        &account,
        &reader,
        &reader,
        settings.owner_key()?,
        settings.cosigner_key()?,
        amount.raw(),
        approve,
    )
    .await?;
    println!("withdrew {amount} into {} ({})", config.account, receipt.transaction_hash);
    Ok(())
}

fn print_balance(balance: &ChainBalance) {
    println!("{}: {}", balance.chain, balance.account);
    if let Some(provider) = balance.fund_provider {
        println!("{} fund provider: {provider}", balance.chain);
    }
}

pub async fn balance(settings: &Settings, all_chains: bool) -> eyre::Result<()> {
    let chains: Vec<Chain> = if all_chains {
        Chain::iter().collect()
    } else {
        vec![settings.config.chain]
    };

    let mut balances = Vec::with_capacity(chains.len());
    for chain in chains {
        let reader = ChainReader::new(rpc_url(chain));
        let balance = workflow::chain_balance(&settings.config_for(chain), &reader).await?;
        print_balance(&balance);
        balances.push(balance);
    }
    if all_chains {
        println!("total: {}", workflow::global_balance(&balances));
    }
    Ok(())
}
