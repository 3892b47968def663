//! Money Conversion Module
//!
//! Unified conversion between internal u64 representation and client-facing
//! string/Decimal representation. All conversions MUST go through this module.
//!
//! ## Design Principles
//! 1. Single Source of Truth: SymbolManager provides all decimal configurations
//! 2. Explicit Error Handling: No silent truncation
//! 3. Type Safety: Use wrapper types where possible
//!
//! ## Internal Representation
//! - All amounts are stored as `u64` (or `i64` for signed balances)
//! - The scale factor is `10^decimals` (e.g., 10^8 for BTC = satoshi)
//! - The authoritative source for decimals is `SymbolManager`
//!
//! ## Usage
//! (Internal utilities for money handling. Use `SymbolManager` for public API.)

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

// ============================================================================
// Core Money Types (Newtype Wrappers)
// ============================================================================

/// Represents an unsigned monetary amount scaled by 10^decimals.
/// Internal value is private to force construction through audited money logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScaledAmount(u64);

impl ScaledAmount {
    pub fn to_raw(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }
}

impl From<u64> for ScaledAmount {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Deref for ScaledAmount {
    type Target = u64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ScaledAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Converts a Decimal to internal ScaledAmount, truncating toward zero
/// instead of rejecting excess precision.
///
/// This is the truncation rule Intake applies to raw client quantity/price
/// input against a TradingPair's precision: extra fractional digits are
/// simply dropped, never rounded. Negative or zero input truncates to zero;
/// callers must reject a zero result themselves.
pub(crate) fn truncate_decimal(amount: Decimal, decimals: u32) -> ScaledAmount {
    if amount.is_sign_negative() {
        return ScaledAmount(0);
    }
    let multiplier = Decimal::from(10u64.pow(decimals));
    let scaled = (amount * multiplier).trunc();
    ScaledAmount(scaled.to_u64().unwrap_or(u64::MAX))
}

/// Returns `10^decimals` as a `ScaledAmount`, i.e. the internal unit for a
/// scale (e.g. `unit_amount(8)` is the satoshi-per-BTC unit).
#[inline]
pub fn unit_amount(decimals: u32) -> ScaledAmount {
    ScaledAmount(10u64.pow(decimals))
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn truncate_decimal_truncates_toward_zero() {
        let d = Decimal::from_str("1.239").unwrap();
        assert_eq!(*truncate_decimal(d, 2), 123);
        assert_eq!(*truncate_decimal(d, 8), 123_900_000);
    }

    #[test]
    fn truncate_decimal_rejects_negative_and_caps_overflow() {
        let neg = Decimal::from_str("-1.5").unwrap();
        assert_eq!(*truncate_decimal(neg, 2), 0);
    }

    #[test]
    fn unit_amount_is_power_of_ten() {
        assert_eq!(*unit_amount(0), 1);
        assert_eq!(*unit_amount(2), 100);
        assert_eq!(*unit_amount(8), 100_000_000);
    }

    #[test]
    fn scaled_amount_checked_arithmetic() {
        let a = ScaledAmount::from(5u64);
        let b = ScaledAmount::from(3u64);
        assert_eq!(*a.checked_add(b).unwrap(), 8);
        assert_eq!(*a.checked_sub(b).unwrap(), 2);
        assert!(b.checked_sub(a).is_none());
    }
}
