use std::convert::Infallible;

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::Address;
use eyre::{eyre, WrapErr};
use secrecy::{ExposeSecret, SecretString};
use vaultkit_core::{
    chain::Chain,
    config::{Endpoints, VaultConfig},
};

use crate::GlobalArgs;

/// Keeps a key from the command line or environment wrapped until it is parsed.
#[allow(clippy::unnecessary_wraps)]
pub fn secret(raw: &str) -> Result<SecretString, Infallible> {
    Ok(SecretString::from(raw.trim().to_owned()))
}

/// Parses a hex private key, with or without `0x`.
fn private_key(role: &str, secret: &SecretString) -> eyre::Result<PrivateKeySigner> {
    secret
        .expose_secret()
        .parse()
        .map_err(|_| eyre!("the {role} key is not a 32-byte hex private key"))
}

/// Resolved configuration of one invocation.
pub struct Settings {
    pub config: VaultConfig,
    owner_key: Option<PrivateKeySigner>,
    cosigner_key: Option<PrivateKeySigner>,
}

impl Settings {
    pub fn from_args(args: GlobalArgs) -> eyre::Result<Self> {
        let account = args
            .account
            .ok_or_else(|| eyre!("no account, set SMART_ACCOUNT_ADDRESS or pass --account"))?;
        let owner_key = args
            .owner_key
            .as_ref()
            .map(|secret| private_key("owner", secret))
            .transpose()?;
        let cosigner_key = args
            .cosigner_key
            .as_ref()
            .map(|secret| private_key("co-signer", secret))
            .transpose()?;
        let owner = resolve_party("owner", args.owner, owner_key.as_ref())?;
        let cosigner = resolve_party("co-signer", args.cosigner, cosigner_key.as_ref())?;

        let config = VaultConfig {
            cooldown: args.cooldown,
            expiration: args.expiration,
            fund_provider: args.fund_provider,
            store_dir: args.store_dir,
            ..VaultConfig::new(args.chain, account, owner, cosigner)
        };
        tracing::debug!(
            chain = %config.chain,
            %account,
            %owner,
            %cosigner,
            module = %config.module_address(),
            "configuration resolved"
        );

        Ok(Self {
            config,
            owner_key,
            cosigner_key,
        })
    }

    pub fn owner_key(&self) -> eyre::Result<&PrivateKeySigner> {
        self.owner_key
            .as_ref()
            .ok_or_else(|| eyre!("this command signs as the owner, set USER_PRIVATE_KEY"))
    }

    pub fn cosigner_key(&self) -> eyre::Result<&PrivateKeySigner> {
        self.cosigner_key
            .as_ref()
            .ok_or_else(|| eyre!("this command signs as the co-signer, set COSIGNER_PRIVATE_KEY"))
    }

    /// The same account on another chain. The fund provider is only known for the
    /// configured chain.
    pub fn config_for(&self, chain: Chain) -> VaultConfig {
        if chain == self.config.chain {
            return self.config.clone();
        }
        VaultConfig {
            chain,
            token: chain.usdc(),
            fund_provider: None,
            ..self.config.clone()
        }
    }

    pub fn endpoints(&self) -> eyre::Result<Endpoints> {
        let chain = self.config.chain;
        Ok(Endpoints {
            bundler_url: chain_var(chain, "BUNDLER_URL")?,
            paymaster_url: chain_var(chain, "PAYMASTER_URL")?,
            rpc_url: rpc_url(chain),
        })
    }
}

/// `<CHAIN>_RPC_URL`, or the chain's public endpoint.
pub fn rpc_url(chain: Chain) -> String {
    chain_var(chain, "RPC_URL").unwrap_or_else(|_| chain.default_rpc_url().to_string())
}

fn chain_var(chain: Chain, suffix: &str) -> eyre::Result<String> {
    let name = format!("{}_{suffix}", chain.env_prefix());
    std::env::var(&name).wrap_err_with(|| format!("{name} is not set"))
}

fn resolve_party(
    role: &str,
    address: Option<Address>,
    key: Option<&PrivateKeySigner>,
) -> eyre::Result<Address> {
    match (address, key) {
        (Some(address), Some(key)) if address != key.address() => Err(eyre!(
            "{role} address {address} does not match the {role} key ({})",
            key.address()
        )),
        (Some(address), _) => Ok(address),
        (None, Some(key)) => Ok(key.address()),
        (None, None) => Err(eyre!("the {role} is unknown, pass its address or its key")),
    }
}
