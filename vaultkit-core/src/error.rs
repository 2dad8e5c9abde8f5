use std::path::PathBuf;

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;

/// Error outputs from `VaultKit`
#[derive(Debug, Error)]
pub enum VaultKitError {
    /// The network identifier is not one of the supported chains
    #[error("invalid_chain_selector: {0} is not a supported chain")]
    InvalidChainSelector(String),
    /// A workflow step tried to load a record that was never saved
    #[error("record_not_found: no record at {path}, run `{producer}` first")]
    RecordNotFound {
        /// Location the record was expected at.
        path: PathBuf,
        /// The command that produces the record.
        producer: &'static str,
    },
    /// Fewer partial authorizations than the account threshold
    #[error("insufficient_quorum: {provided} of {required} required signatures")]
    InsufficientQuorum {
        /// The account threshold.
        required: usize,
        /// Number of partial authorizations supplied.
        provided: usize,
    },
    /// A partial authorization was produced over a different operation
    #[error("mismatched_operation: expected {expected}, partial signed {found}")]
    MismatchedOperation {
        /// Hash of the operation being assembled.
        expected: B256,
        /// Hash the partial authorization covers.
        found: B256,
    },
    /// The signer is not an owner of the account
    #[error("unknown_signer: {0} is not an account owner")]
    UnknownSigner(Address),
    /// The same owner signed twice
    #[error("duplicate_signer: {0}")]
    DuplicateSigner(Address),
    /// Pre-flight balance check failed
    #[error("insufficient_funds: {holder} holds {available}, {required} required")]
    InsufficientFunds {
        /// Address whose balance was checked.
        holder: Address,
        /// Amount the operation needs.
        required: U256,
        /// Amount currently held.
        available: U256,
    },
    /// The queued entry is still in its cooldown
    #[error("timelock_not_ready: executable in {remaining} seconds")]
    TimelockNotReady {
        /// Seconds until the entry becomes executable.
        remaining: u64,
    },
    /// The queued entry lapsed; a fresh `start` is required
    #[error("timelock_expired: entry expired at {expired_at}, queue it again")]
    TimelockExpired {
        /// Timestamp at which the entry stopped being executable.
        expired_at: u64,
    },
    /// An entry is already queued or executable on the module
    #[error("timelock_occupied: an entry queued at {queued_at} is still pending")]
    TimelockOccupied {
        /// Timestamp at which the pending entry was queued.
        queued_at: u64,
    },
    /// `finalize` was requested without a queued entry
    #[error("no_queued_entry: nothing is queued on module {0}")]
    NoQueuedEntry(Address),
    /// The call to finalize differs from the queued one
    #[error("mismatched_timelock_call: queued {queued}, finalizing {requested}")]
    MismatchedTimelockCall {
        /// Hash of the queued call.
        queued: B256,
        /// Hash of the call about to be finalized.
        requested: B256,
    },
    /// The presented input is not valid for the requested operation
    #[error("invalid_input_{attribute}: {reason}")]
    InvalidInput {
        /// The attribute that is invalid.
        attribute: String,
        /// The reason the input is invalid.
        reason: String,
    },
    /// Unexpected error serializing information
    #[error("serialization_error: {0}")]
    Serialization(String),
    /// A stored record was written with an unknown schema version
    #[error("unsupported_record_version: {0}")]
    UnsupportedRecordVersion(u32),
    /// Filesystem failure in the operation store
    #[error("storage_error at {path}: {error}")]
    Storage {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        error: String,
    },
    /// Network connection error with details
    #[error("network_error at {url} (status {status:?}): {error}")]
    NetworkError {
        /// The URL that was requested.
        url: String,
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Description of the failure.
        error: String,
    },
    /// A JSON-RPC endpoint answered with an error object
    #[error("rpc_error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// The operation was included but reverted
    #[error("operation_failed: {0} was included but did not succeed")]
    OperationFailed(B256),
    /// The local key could not produce a signature
    #[error("signing_error: {0}")]
    Signing(String),
}

impl VaultKitError {
    /// Whether the failure is transient and the same request can be sent again.
    ///
    /// Only transport failures qualify: no response, rate limiting, or a server error.
    /// Everything else needs a new operation, new funds or more time before a retry can
    /// succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError {
                status: None | Some(429 | 500..=599),
                ..
            }
        )
    }

    pub(crate) fn invalid_input(attribute: &str, reason: impl ToString) -> Self {
        Self::InvalidInput {
            attribute: attribute.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for VaultKitError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<alloy::signers::Error> for VaultKitError {
    fn from(error: alloy::signers::Error) -> Self {
        Self::Signing(error.to_string())
    }
}
