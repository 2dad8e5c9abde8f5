//! Hand-off of a proposed operation between two signing sessions.
//!
//! The first signer saves the prepared operation with their partial authorization; the
//! second signer, in another process and possibly days later, loads it back. The file is
//! the only link between the two, so its encoding has to give back exactly the operation
//! that was signed:
//!
//! - the record carries a schema `version`, unknown versions are refused;
//! - absent optional fields are written as an explicit `null` and must be present on read,
//!   so an absent paymaster never turns into a zero one;
//! - integers that can exceed 64 bits are base-10 strings, decided per field.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{error::VaultKitError, operation::UserOperation, signature::PartialAuthorization};

const RECORD_VERSION: u32 = 1;

/// Named hand-off location. Each slot holds at most one pending record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Slot {
    /// Account pays the co-signer for a claim.
    Claim,
    /// Account reimburses the co-signer.
    Reimbursement,
}

impl Slot {
    /// File name of the slot inside the store directory.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Claim => "claim-operation.json",
            Self::Reimbursement => "reimbursement-operation.json",
        }
    }

    /// The command that fills the slot.
    #[must_use]
    pub const fn producer(self) -> &'static str {
        match self {
            Self::Claim => "vaultkit propose --slot claim",
            Self::Reimbursement => "vaultkit propose --slot reimbursement",
        }
    }
}

/// A prepared operation with the first owner's signature, waiting for the second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAuthorizationRecord {
    /// Chain the operation was prepared for.
    pub chain_id: u64,
    /// The operation exactly as signed.
    pub operation: UserOperation,
    /// The first owner's partial authorization.
    pub partial: PartialAuthorization,
}

impl StoredAuthorizationRecord {
    /// Canonical JSON encoding of the record.
    ///
    /// # Errors
    /// `Serialization` if encoding fails.
    pub fn encode(&self) -> Result<String, VaultKitError> {
        Ok(serde_json::to_string_pretty(&RecordV1::from(self))?)
    }

    /// Parses a record produced by [`Self::encode`].
    ///
    /// # Errors
    /// `UnsupportedRecordVersion` for another schema version, `Serialization` for a
    /// malformed record or a missing field.
    pub fn decode(encoded: &str) -> Result<Self, VaultKitError> {
        let probe: VersionProbe = serde_json::from_str(encoded)?;
        if probe.version != RECORD_VERSION {
            return Err(VaultKitError::UnsupportedRecordVersion(probe.version));
        }
        let record: RecordV1 = serde_json::from_str(encoded)?;
        Ok(record.into())
    }
}

/// Slot files in one directory.
#[derive(Debug, Clone)]
pub struct OperationStore {
    dir: PathBuf,
}

impl OperationStore {
    /// A store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of `slot`.
    #[must_use]
    pub fn path(&self, slot: Slot) -> PathBuf {
        self.dir.join(slot.file_name())
    }

    /// Writes `record` into `slot`, replacing whatever was there.
    ///
    /// The write goes to a temporary file that is synced and renamed over the slot, so a
    /// reader sees either the previous record or the new one.
    ///
    /// # Errors
    /// `Storage` on I/O failure, `Serialization` if encoding fails.
    pub fn save(
        &self,
        slot: Slot,
        record: &StoredAuthorizationRecord,
    ) -> Result<PathBuf, VaultKitError> {
        let path = self.path(slot);
        let encoded = record.encode()?;
        fs::create_dir_all(&self.dir).map_err(|err| storage_error(&self.dir, &err))?;
        if path.exists() {
            tracing::warn!(path = %path.display(), %slot, "replacing a record that was never consumed");
        }

        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(|err| storage_error(&tmp, &err))?;
        file.write_all(encoded.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|err| storage_error(&tmp, &err))?;
        fs::rename(&tmp, &path).map_err(|err| storage_error(&path, &err))?;

        tracing::info!(path = %path.display(), %slot, "saved partially authorized operation");
        Ok(path)
    }

    /// Reads the record in `slot`.
    ///
    /// # Errors
    /// `RecordNotFound` naming the producing command when the slot is empty, `Storage` on
    /// other I/O failures, decoding errors from [`StoredAuthorizationRecord::decode`].
    pub fn load(&self, slot: Slot) -> Result<StoredAuthorizationRecord, VaultKitError> {
        let path = self.path(slot);
        let encoded = match fs::read_to_string(&path) {
            Ok(encoded) => encoded,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(VaultKitError::RecordNotFound {
                    path,
                    producer: slot.producer(),
                });
            }
            Err(err) => return Err(storage_error(&path, &err)),
        };
        StoredAuthorizationRecord::decode(&encoded)
    }

    /// Removes the record in `slot` once it has been submitted. An empty slot is fine.
    ///
    /// # Errors
    /// `Storage` on I/O failure.
    pub fn consume(&self, slot: Slot) -> Result<(), VaultKitError> {
        let path = self.path(slot);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "consumed record");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(storage_error(&path, &err)),
        }
    }
}

fn storage_error(path: &Path, err: &std::io::Error) -> VaultKitError {
    VaultKitError::Storage {
        path: path.to_path_buf(),
        error: err.to_string(),
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RecordV1 {
    version: u32,
    chain_id: u64,
    operation: OperationV1,
    partial: PartialV1,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct OperationV1 {
    sender: Address,
    #[serde(with = "decimal")]
    nonce: U256,
    #[serde(deserialize_with = "explicit")]
    factory: Option<Address>,
    #[serde(deserialize_with = "explicit")]
    factory_data: Option<Bytes>,
    call_data: Bytes,
    #[serde(with = "decimal")]
    call_gas_limit: U256,
    #[serde(with = "decimal")]
    verification_gas_limit: U256,
    #[serde(with = "decimal")]
    pre_verification_gas: U256,
    #[serde(with = "decimal")]
    max_fee_per_gas: U256,
    #[serde(with = "decimal")]
    max_priority_fee_per_gas: U256,
    #[serde(deserialize_with = "explicit")]
    paymaster: Option<Address>,
    #[serde(with = "optional_decimal")]
    paymaster_verification_gas_limit: Option<U256>,
    #[serde(with = "optional_decimal")]
    paymaster_post_op_gas_limit: Option<U256>,
    #[serde(deserialize_with = "explicit")]
    paymaster_data: Option<Bytes>,
    signature: Bytes,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PartialV1 {
    signer: Address,
    signature: Bytes,
    operation_hash: B256,
}

impl From<&StoredAuthorizationRecord> for RecordV1 {
    fn from(record: &StoredAuthorizationRecord) -> Self {
        let operation = record.operation.clone();
        Self {
            version: RECORD_VERSION,
            chain_id: record.chain_id,
            operation: OperationV1 {
                sender: operation.sender,
                nonce: operation.nonce,
                factory: operation.factory,
                factory_data: operation.factory_data,
                call_data: operation.call_data,
                call_gas_limit: operation.call_gas_limit,
                verification_gas_limit: operation.verification_gas_limit,
                pre_verification_gas: operation.pre_verification_gas,
                max_fee_per_gas: operation.max_fee_per_gas,
                max_priority_fee_per_gas: operation.max_priority_fee_per_gas,
                paymaster: operation.paymaster,
                paymaster_verification_gas_limit: operation.paymaster_verification_gas_limit,
                paymaster_post_op_gas_limit: operation.paymaster_post_op_gas_limit,
                paymaster_data: operation.paymaster_data,
                signature: operation.signature,
            },
            partial: PartialV1 {
                signer: record.partial.signer,
                signature: record.partial.signature.clone(),
                operation_hash: record.partial.operation_hash,
            },
        }
    }
}

impl From<RecordV1> for StoredAuthorizationRecord {
    fn from(record: RecordV1) -> Self {
        let operation = record.operation;
        Self {
            chain_id: record.chain_id,
            operation: UserOperation {
                sender: operation.sender,
                nonce: operation.nonce,
                factory: operation.factory,
                factory_data: operation.factory_data,
                call_data: operation.call_data,
                call_gas_limit: operation.call_gas_limit,
                verification_gas_limit: operation.verification_gas_limit,
                pre_verification_gas: operation.pre_verification_gas,
                max_fee_per_gas: operation.max_fee_per_gas,
                max_priority_fee_per_gas: operation.max_priority_fee_per_gas,
                paymaster: operation.paymaster,
                paymaster_verification_gas_limit: operation.paymaster_verification_gas_limit,
                paymaster_post_op_gas_limit: operation.paymaster_post_op_gas_limit,
                paymaster_data: operation.paymaster_data,
                signature: operation.signature,
            },
            partial: PartialAuthorization {
                signer: record.partial.signer,
                signature: record.partial.signature,
                operation_hash: record.partial.operation_hash,
            },
        }
    }
}

/// An optional field that must be written out, `null` included.
fn explicit<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

mod decimal {
    use alloy_primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<U256, String> {
        if raw.is_empty() || !raw.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(format!("`{raw}` is not a base-10 integer"));
        }
        U256::from_str_radix(raw, 10).map_err(|err| format!("`{raw}`: {err}"))
    }
}

mod optional_decimal {
    use alloy_primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.collect_str(value),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| super::decimal::parse(&raw).map_err(D::Error::custom))
            .transpose()
    }
}
