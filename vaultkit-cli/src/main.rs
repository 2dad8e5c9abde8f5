//! `vaultkit`: operator CLI for a co-signed Safe with a timelocked recovery path.

use alloy_primitives::Address;
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use vaultkit_core::{amount::TokenAmount, chain::Chain, store::Slot};

mod commands;
mod eoa;
mod logging;
mod settings;

#[derive(Parser)]
#[command(name = "vaultkit", version)]
#[command(about = "Co-signed Safe custody with a timelocked owner recovery path", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

/// Settings shared by every command. Each can also come from the environment or `.env.local`.
#[derive(Args)]
struct GlobalArgs {
    /// Network, by name (`base-sepolia`) or chain id
    #[arg(long, global = true, env = "CHAIN", default_value = "arbitrum-sepolia", value_parser = Chain::from_selector)]
    chain: Chain,

    /// The Safe account holding the funds
    #[arg(long, global = true, env = "SMART_ACCOUNT_ADDRESS")]
    account: Option<Address>,

    /// Owner key, needed to set up, propose, recover and withdraw
    #[arg(long, global = true, env = "USER_PRIVATE_KEY", hide_env_values = true, value_parser = settings::secret)]
    owner_key: Option<SecretString>,

    /// Co-signer key, needed to countersign and withdraw
    #[arg(long, global = true, env = "COSIGNER_PRIVATE_KEY", hide_env_values = true, value_parser = settings::secret)]
    cosigner_key: Option<SecretString>,

    /// Owner address, when the owner key is not at hand
    #[arg(long, global = true, env = "OWNER_ADDRESS")]
    owner: Option<Address>,

    /// Co-signer address, when the co-signer key is not at hand
    #[arg(long, global = true, env = "COSIGNER_ADDRESS")]
    cosigner: Option<Address>,

    /// Guard module cooldown, seconds
    #[arg(long, global = true, env = "COOLDOWN", default_value_t = vaultkit_core::config::DEFAULT_COOLDOWN)]
    cooldown: u64,

    /// Guard module expiration window, seconds (0 never expires)
    #[arg(long, global = true, env = "EXPIRATION", default_value_t = vaultkit_core::config::DEFAULT_EXPIRATION)]
    expiration: u64,

    /// Contract paying out co-signed withdrawals
    #[arg(long, global = true, env = "FUND_PROVIDER_ADDRESS")]
    fund_provider: Option<Address>,

    /// Directory proposals are handed over through
    #[arg(long, global = true, env = "VAULTKIT_STORE_DIR", default_value = ".")]
    store_dir: std::path::PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print the guard module address and the account's on-chain owners and threshold
    Address,
    /// Deploy and enable the guard module, then require both signers on the account
    Setup,
    /// Show the guard queue at the latest block
    Status,
    /// Owner-only recovery through the timelock
    Recovery {
        #[command(subcommand)]
        step: RecoveryStep,
    },
    /// Prepare a token transfer and sign it as the owner
    Propose {
        /// Hand-off slot
        #[arg(long)]
        slot: Slot,
        /// Recipient, the co-signer by default
        #[arg(long)]
        to: Option<Address>,
        /// Amount in whole tokens, e.g. `1.5`
        #[arg(long)]
        amount: TokenAmount,
    },
    /// Add the co-signer's signature to a proposal and submit it
    Countersign {
        /// Hand-off slot
        #[arg(long)]
        slot: Slot,
    },
    /// Withdraw from the fund provider into the account, authorized by the co-signer against the pending claim
    Withdraw {
        /// Amount in whole tokens
        #[arg(long)]
        amount: TokenAmount,
        /// Also approve this spender for the amount, in the same operation
        #[arg(long)]
        approve: Option<Address>,
    },
    /// Token balances of the account and fund provider
    Balance {
        /// Every supported chain, with the total
        #[arg(long)]
        all_chains: bool,
    },
}

#[derive(Subcommand)]
enum RecoveryStep {
    /// Queue a transfer of the account's tokens to the owner
    Start {
        /// Amount in whole tokens, the whole balance by default
        #[arg(long)]
        amount: Option<TokenAmount>,
    },
    /// Execute the queued transfer once the cooldown has passed
    Finalize {
        /// The queued amount, the whole balance by default
        #[arg(long)]
        amount: Option<TokenAmount>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    logging::init(cli.global.verbose)?;
    let settings = settings::Settings::from_args(cli.global)?;

    match cli.command {
        Command::Address => commands::address(&settings).await,
        Command::Setup => commands::setup(&settings).await,
        Command::Status => commands::status(&settings).await,
        Command::Recovery {
            step: RecoveryStep::Start { amount },
        } => commands::start_recovery(&settings, amount).await,
        Command::Recovery {
            step: RecoveryStep::Finalize { amount },
        } => commands::finalize_recovery(&settings, amount).await,
        Command::Propose { slot, to, amount } => {
            commands::propose(&settings, slot, to, amount).await
        }
        Command::Countersign { slot } => commands::countersign(&settings, slot).await,
        Command::Withdraw { amount, approve } => {
            commands::withdraw(&settings, amount, approve).await
        }
        Command::Balance { all_chains } => commands::balance(&settings, all_chains).await,
    }
}
