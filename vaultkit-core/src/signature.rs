//! Offline collection of owner signatures.
//!
//! Each owner signs the operation hash on their own machine ([`SignatureCollector::sign_partial`]).
//! Whoever holds enough partial authorizations merges them into the account signature
//! ([`SignatureCollector::assemble_final`]). No step here touches the network.

use std::collections::BTreeMap;

use alloy::signers::{local::PrivateKeySigner, SignerSync};
use alloy_primitives::{Address, Bytes, Signature, B256};

use crate::{
    error::VaultKitError,
    operation::{OperationContext, UserOperation},
};

/// Length of one ECDSA signature (`r || s || v`).
pub const SIGNATURE_LENGTH: usize = 65;

/// `uint48 validAfter || uint48 validUntil`, both zero (no validity window).
const VALIDITY_PREFIX: [u8; 12] = [0; 12];

/// One owner's signature over one operation hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAuthorization {
    /// The owner that signed.
    pub signer: Address,
    /// 65-byte ECDSA signature, `v` in `{27, 28}`.
    pub signature: Bytes,
    /// The operation hash the signature covers.
    pub operation_hash: B256,
}

/// The signature field of a threshold-authorized operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalAuthorization(Bytes);

impl FinalAuthorization {
    /// Validity prefix followed by the owner signatures.
    #[must_use]
    pub const fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// The concatenated owner signatures, without the validity prefix.
    #[must_use]
    pub fn signatures(&self) -> &[u8] {
        &self.0[VALIDITY_PREFIX.len()..]
    }

    /// Consumes the authorization into the operation's `signature` field.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl TryFrom<Bytes> for FinalAuthorization {
    type Error = VaultKitError;

    /// Reads back the `signature` field of a submitted operation.
    fn try_from(field: Bytes) -> Result<Self, Self::Error> {
        let signatures = field.len().saturating_sub(VALIDITY_PREFIX.len());
        if field.len() <= VALIDITY_PREFIX.len() || !signatures.is_multiple_of(SIGNATURE_LENGTH) {
            return Err(VaultKitError::invalid_input(
                "signature",
                format!("{} bytes is not a validity prefix followed by signatures", field.len()),
            ));
        }
        Ok(Self(field))
    }
}

/// Owners of the account and how many of them must sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumPolicy {
    owners: Vec<Address>,
    threshold: usize,
}

impl QuorumPolicy {
    /// # Errors
    /// `InvalidInput` for a zero threshold, a threshold above the owner count, or
    /// duplicate owners.
    pub fn new(mut owners: Vec<Address>, threshold: usize) -> Result<Self, VaultKitError> {
        if threshold == 0 || threshold > owners.len() {
            return Err(VaultKitError::invalid_input(
                "threshold",
                format!("{threshold} is not within 1..={}", owners.len()),
            ));
        }
        owners.sort_unstable();
        if owners.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(VaultKitError::invalid_input("owners", "duplicate owner"));
        }
        Ok(Self { owners, threshold })
    }

    /// Owners in ascending address order.
    #[must_use]
    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    /// Signatures required.
    #[must_use]
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether `address` is an owner.
    #[must_use]
    pub fn is_owner(&self, address: Address) -> bool {
        self.owners.binary_search(&address).is_ok()
    }

    /// Checks `authorization` the way the account does before executing: the first
    /// `threshold` signatures must recover to owners in strictly ascending order.
    ///
    /// # Errors
    /// `InsufficientQuorum`, `UnknownSigner`, `DuplicateSigner`, or `InvalidInput`
    /// for malformed or unordered signatures.
    pub fn verify(
        &self,
        hash: B256,
        authorization: &FinalAuthorization,
    ) -> Result<(), VaultKitError> {
        let signatures = authorization.signatures();
        let provided = signatures.len() / SIGNATURE_LENGTH;
        if provided < self.threshold {
            return Err(VaultKitError::InsufficientQuorum {
                required: self.threshold,
                provided,
            });
        }
        let mut last = Address::ZERO;
        for raw in signatures.chunks_exact(SIGNATURE_LENGTH).take(self.threshold) {
            let owner = recover(raw, hash)?;
            if !self.is_owner(owner) {
                return Err(VaultKitError::UnknownSigner(owner));
            }
            if owner == last {
                return Err(VaultKitError::DuplicateSigner(owner));
            }
            if owner < last {
                return Err(VaultKitError::invalid_input(
                    "signatures",
                    "not ordered by ascending owner",
                ));
            }
            last = owner;
        }
        Ok(())
    }
}

/// Produces and merges owner signatures for operations of one account.
#[derive(Debug, Clone)]
pub struct SignatureCollector {
    context: OperationContext,
    policy: QuorumPolicy,
}

impl SignatureCollector {
    /// A collector for operations valid in `context`, owned per `policy`.
    #[must_use]
    pub const fn new(context: OperationContext, policy: QuorumPolicy) -> Self {
        Self { context, policy }
    }

    /// The ownership policy assembled authorizations must satisfy.
    #[must_use]
    pub const fn policy(&self) -> &QuorumPolicy {
        &self.policy
    }

    /// Hash the owners sign for `operation`.
    ///
    /// # Errors
    /// See [`OperationContext::operation_hash`].
    pub fn operation_hash(&self, operation: &UserOperation) -> Result<B256, VaultKitError> {
        self.context.operation_hash(operation)
    }

    /// Signs `operation` with one owner's key.
    ///
    /// # Errors
    /// `Signing` if the key fails, `InvalidInput` if the operation cannot be hashed.
    pub fn sign_partial(
        &self,
        operation: &UserOperation,
        signer: &PrivateKeySigner,
    ) -> Result<PartialAuthorization, VaultKitError> {
        let operation_hash = self.operation_hash(operation)?;
        let signature = signer.sign_hash_sync(&operation_hash)?;
        tracing::debug!(signer = %signer.address(), %operation_hash, "signed partial authorization");
        Ok(PartialAuthorization {
            signer: signer.address(),
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
            operation_hash,
        })
    }

    /// Merges partial authorizations over `operation` into its account signature.
    ///
    /// Signatures are laid out in ascending owner order whatever order they are given in.
    ///
    /// # Errors
    /// - `InsufficientQuorum` with fewer partials than the threshold.
    /// - `MismatchedOperation` when a partial covers another hash, or its signature does
    ///   not recover to its signer for this operation.
    /// - `UnknownSigner` / `DuplicateSigner` for non-owners and repeated owners.
    pub fn assemble_final(
        &self,
        operation: &UserOperation,
        partials: &[PartialAuthorization],
    ) -> Result<FinalAuthorization, VaultKitError> {
        if partials.len() < self.policy.threshold {
            return Err(VaultKitError::InsufficientQuorum {
                required: self.policy.threshold,
                provided: partials.len(),
            });
        }
        let expected = self.operation_hash(operation)?;

        let mut by_owner = BTreeMap::new();
        for partial in partials {
            if partial.operation_hash != expected {
                return Err(VaultKitError::MismatchedOperation {
                    expected,
                    found: partial.operation_hash,
                });
            }
            if recover(&partial.signature, expected)? != partial.signer {
                return Err(VaultKitError::MismatchedOperation {
                    expected,
                    found: partial.operation_hash,
                });
            }
            if !self.policy.is_owner(partial.signer) {
                return Err(VaultKitError::UnknownSigner(partial.signer));
            }
            if by_owner
                .insert(partial.signer, partial.signature.clone())
                .is_some()
            {
                return Err(VaultKitError::DuplicateSigner(partial.signer));
            }
        }

        let mut assembled = VALIDITY_PREFIX.to_vec();
        for signature in by_owner.values() {
            assembled.extend_from_slice(signature);
        }
        tracing::debug!(
            operation_hash = %expected,
            signers = by_owner.len(),
            "assembled final authorization"
        );
        Ok(FinalAuthorization(assembled.into()))
    }
}

/// EIP-191 signature over a fund provider's withdrawal hash, as `withdraw` expects it.
///
/// # Errors
/// `Signing` if the key fails.
pub fn sign_withdrawal_request(
    withdrawal_hash: B256,
    signer: &PrivateKeySigner,
) -> Result<Bytes, VaultKitError> {
    let signature = signer.sign_message_sync(withdrawal_hash.as_slice())?;
    Ok(Bytes::copy_from_slice(&signature.as_bytes()))
}

fn recover(raw: &[u8], hash: B256) -> Result<Address, VaultKitError> {
    if raw.len() != SIGNATURE_LENGTH {
        return Err(VaultKitError::invalid_input(
            "signature",
            format!("expected {SIGNATURE_LENGTH} bytes, got {}", raw.len()),
        ));
    }
    Signature::from_raw(raw)
        .and_then(|signature| signature.recover_address_from_prehash(&hash))
        .map_err(|err| VaultKitError::invalid_input("signature", err))
}
