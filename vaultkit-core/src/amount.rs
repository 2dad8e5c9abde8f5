//! Token amounts in whole units for display and command-line input.

use std::{fmt, ops::Deref, str::FromStr};

use alloy_primitives::U256;

use crate::{chain::TOKEN_DECIMALS, error::VaultKitError};

/// A raw token amount, displayed and parsed in whole units with [`TOKEN_DECIMALS`] decimals.
///
/// Arithmetic and comparisons happen on the raw integer; the decimal form is only for people.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    /// The raw integer.
    #[must_use]
    pub const fn raw(self) -> U256 {
        self.0
    }
}

impl From<U256> for TokenAmount {
    fn from(raw: U256) -> Self {
        Self(raw)
    }
}

impl From<TokenAmount> for U256 {
    fn from(amount: TokenAmount) -> Self {
        amount.0
    }
}

impl Deref for TokenAmount {
    type Target = U256;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = U256::from(10).pow(U256::from(TOKEN_DECIMALS));
        let (whole, fraction) = self.0.div_rem(unit);
        let fraction = format!(
            "{:0>width$}",
            fraction.to::<u64>(),
            width = usize::from(TOKEN_DECIMALS)
        );
        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            write!(f, "{whole}")
        } else {
            write!(f, "{whole}.{fraction}")
        }
    }
}

impl FromStr for TokenAmount {
    type Err = VaultKitError;

    /// Parses `"12"`, `"0.5"` or `"1.000001"`. More decimals than the token has are refused
    /// rather than rounded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| VaultKitError::invalid_input("amount", format!("`{s}` {reason}"));
        let s = s.trim();
        let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("is empty"));
        }
        if !whole.bytes().chain(fraction.bytes()).all(|byte| byte.is_ascii_digit()) {
            return Err(invalid("is not a decimal number"));
        }
        if fraction.len() > usize::from(TOKEN_DECIMALS) {
            return Err(invalid("has too many decimals"));
        }

        let digits = format!(
            "{whole}{fraction:0<width$}",
            width = usize::from(TOKEN_DECIMALS)
        );
        U256::from_str_radix(&digits, 10)
            .map(Self)
            .map_err(|_| invalid("does not fit 256 bits"))
    }
}
