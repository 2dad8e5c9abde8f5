use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use alloy_primitives::Address;
use vaultkit_core::{
    facade::TransactionSender,
    operation::{Call, Receipt},
    VaultKitError,
};

/// Plain transactions from the owner's key, used for the guard module calls.
pub struct EoaSender {
    address: Address,
    url: String,
    provider: DynProvider,
}

impl EoaSender {
    pub fn new(signer: PrivateKeySigner, rpc_url: &str) -> eyre::Result<Self> {
        let address = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url.parse()?)
            .erased();
        Ok(Self {
            address,
            url: rpc_url.to_string(),
            provider,
        })
    }

    fn network_error(&self, error: impl ToString) -> VaultKitError {
        VaultKitError::NetworkError {
            url: self.url.clone(),
            status: None,
            error: error.to_string(),
        }
    }
}

impl TransactionSender for EoaSender {
    fn sender(&self) -> Address {
        self.address
    }

    async fn send_call(&self, call: &Call) -> Result<Receipt, VaultKitError> {
        let request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(call.to)
            .with_value(call.value)
            .with_input(call.data.clone());
        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|err| self.network_error(err))?;
        tracing::debug!(transaction_hash = %pending.tx_hash(), to = %call.to, "transaction sent");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|err| self.network_error(err))?;
        Ok(Receipt {
            transaction_hash: receipt.transaction_hash,
            success: receipt.status(),
        })
    }
}
