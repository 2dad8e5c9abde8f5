//! Lifecycle of a call queued on the Delay module.
//!
//! Pure logic: no I/O and no clock. Callers pass the timestamp they trust (the latest
//! block) and the receipts they observed.
//!
//! ```text
//! start lands        queued_at + cooldown        + expiration
//!     |------ Queued ------|------ Executable ------|------ Expired
//! ```
//!
//! The module holds a single slot: nothing new may be queued while an entry is Queued or
//! Executable. An Expired entry cannot be cancelled, only superseded by a fresh `start`.

use alloy_primitives::{Address, B256};

use crate::{error::VaultKitError, operation::Receipt};

/// Time-derived status of a queued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelockStatus {
    /// Cooldown still running.
    Queued,
    /// Inside the execution window.
    Executable,
    /// Window passed without execution.
    Expired,
}

/// A call sitting in the module queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelockEntry {
    /// Timestamp of the block that included the `start` call.
    pub queued_at: u64,
    /// Module cooldown in seconds.
    pub cooldown: u64,
    /// Module expiration window in seconds. `0` never expires, as on the module.
    pub expiration: u64,
    /// `GuardedCall::queue_hash` of the queued call.
    pub call_hash: B256,
}

impl TimelockEntry {
    /// First timestamp at which `finalize` is accepted.
    #[must_use]
    pub const fn executable_at(&self) -> u64 {
        self.queued_at.saturating_add(self.cooldown)
    }

    /// First timestamp at which the entry is expired, if it can expire.
    #[must_use]
    pub const fn expires_at(&self) -> Option<u64> {
        if self.expiration == 0 {
            None
        } else {
            Some(self.executable_at().saturating_add(self.expiration))
        }
    }

    /// Status of the entry at `now`.
    #[must_use]
    pub const fn status(&self, now: u64) -> TimelockStatus {
        if now < self.executable_at() {
            return TimelockStatus::Queued;
        }
        match self.expires_at() {
            Some(expires_at) if now >= expires_at => TimelockStatus::Expired,
            _ => TimelockStatus::Executable,
        }
    }

    /// Whether a `finalize` submitted at `now` can succeed.
    #[must_use]
    pub const fn can_finalize(&self, now: u64) -> bool {
        matches!(self.status(now), TimelockStatus::Executable)
    }
}

/// Full lifecycle phase, including the states without a pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    /// Nothing was queued.
    NoEntry,
    /// See [`TimelockStatus::Queued`].
    Queued,
    /// See [`TimelockStatus::Executable`].
    Executable,
    /// The last entry was finalized.
    Executed,
    /// See [`TimelockStatus::Expired`].
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Pending(TimelockEntry),
    Executed,
}

/// Client-side model of one module instance's queue slot.
///
/// Transitions are only taken on observed success receipts; a failed or unsent call leaves
/// the state untouched so the same call can be sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelockGuard {
    module: Address,
    slot: Slot,
}

impl TimelockGuard {
    /// A module with nothing queued.
    #[must_use]
    pub const fn new(module: Address) -> Self {
        Self {
            module,
            slot: Slot::Empty,
        }
    }

    /// A module whose pending entry (if any) was read from chain.
    #[must_use]
    pub const fn observed(module: Address, pending: Option<TimelockEntry>) -> Self {
        let slot = match pending {
            Some(entry) => Slot::Pending(entry),
            None => Slot::Empty,
        };
        Self { module, slot }
    }

    /// The module instance this guard models.
    #[must_use]
    pub const fn module(&self) -> Address {
        self.module
    }

    /// The pending entry, whatever its status.
    #[must_use]
    pub const fn pending(&self) -> Option<&TimelockEntry> {
        match &self.slot {
            Slot::Pending(entry) => Some(entry),
            Slot::Empty | Slot::Executed => None,
        }
    }

    /// Phase at `now`.
    #[must_use]
    pub const fn phase(&self, now: u64) -> GuardPhase {
        match &self.slot {
            Slot::Empty => GuardPhase::NoEntry,
            Slot::Executed => GuardPhase::Executed,
            Slot::Pending(entry) => match entry.status(now) {
                TimelockStatus::Queued => GuardPhase::Queued,
                TimelockStatus::Executable => GuardPhase::Executable,
                TimelockStatus::Expired => GuardPhase::Expired,
            },
        }
    }

    /// Checks that a `start` submitted at `now` would not collide with a pending entry.
    ///
    /// # Errors
    /// `TimelockOccupied` while an entry is Queued or Executable.
    pub const fn ensure_can_start(&self, now: u64) -> Result<(), VaultKitError> {
        match &self.slot {
            Slot::Pending(entry) if !matches!(entry.status(now), TimelockStatus::Expired) => {
                Err(VaultKitError::TimelockOccupied {
                    queued_at: entry.queued_at,
                })
            }
            _ => Ok(()),
        }
    }

    /// Records a landed `start`, moving to Queued.
    ///
    /// # Errors
    /// `OperationFailed` for a reverted receipt, `TimelockOccupied` if the slot is taken.
    pub fn record_start(
        &mut self,
        receipt: &Receipt,
        entry: TimelockEntry,
    ) -> Result<TimelockEntry, VaultKitError> {
        if !receipt.success {
            return Err(VaultKitError::OperationFailed(receipt.transaction_hash));
        }
        self.ensure_can_start(entry.queued_at)?;
        self.slot = Slot::Pending(entry);
        tracing::debug!(
            module = %self.module,
            queued_at = entry.queued_at,
            executable_at = entry.executable_at(),
            "timelock entry queued"
        );
        Ok(entry)
    }

    /// Checks that finalizing the call hashed to `call_hash` at `now` can succeed.
    ///
    /// # Errors
    /// `NoQueuedEntry`, `TimelockNotReady`, `TimelockExpired` (needs a fresh `start`,
    /// never retryable) or `MismatchedTimelockCall`.
    pub fn ensure_can_finalize(
        &self,
        call_hash: B256,
        now: u64,
    ) -> Result<&TimelockEntry, VaultKitError> {
        let Slot::Pending(entry) = &self.slot else {
            return Err(VaultKitError::NoQueuedEntry(self.module));
        };
        match entry.status(now) {
            TimelockStatus::Queued => Err(VaultKitError::TimelockNotReady {
                remaining: entry.executable_at() - now,
            }),
            TimelockStatus::Expired => Err(VaultKitError::TimelockExpired {
                expired_at: entry.expires_at().unwrap_or_default(),
            }),
            TimelockStatus::Executable if entry.call_hash != call_hash => {
                Err(VaultKitError::MismatchedTimelockCall {
                    queued: entry.call_hash,
                    requested: call_hash,
                })
            }
            TimelockStatus::Executable => Ok(entry),
        }
    }

    /// Records a landed `finalize`, consuming the entry.
    ///
    /// # Errors
    /// `OperationFailed` for a reverted receipt, `NoQueuedEntry` without a pending entry.
    pub fn record_finalize(&mut self, receipt: &Receipt) -> Result<(), VaultKitError> {
        if !receipt.success {
            return Err(VaultKitError::OperationFailed(receipt.transaction_hash));
        }
        if !matches!(self.slot, Slot::Pending(_)) {
            return Err(VaultKitError::NoQueuedEntry(self.module));
        }
        self.slot = Slot::Executed;
        tracing::debug!(module = %self.module, "timelock entry executed");
        Ok(())
    }
}
