//! # Money Module
//!
//! Provides the `Money` type: an amount in integer minor units (cents).
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Partial payments must add up EXACTLY to the declared total.           │
//! │                                                                         │
//! │  floats:   20.10 + 29.90 = 49.99999999999999   → sale never settles    │
//! │  cents:    2010  + 2990  = 5000                → sale settles          │
//! │                                                                         │
//! │  The settlement check (paid >= declared) is only sound on integers.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use saleledger_core::money::Money;
//!
//! let total = Money::from_cents(5000);
//! let paid = Money::from_cents(2000);
//! assert_eq!(total.remaining_after(paid).to_string(), "30.00");
//!
//! let parsed: Money = "30.00".parse().unwrap();
//! assert_eq!(parsed.cents(), 3000);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// Serialized as a bare integer of cents so the wire format never carries
/// floating point.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Line subtotal: unit price × quantity.
    ///
    /// Returns `None` on overflow, which only a corrupt price or quantity
    /// can produce.
    #[inline]
    pub fn multiply_quantity(&self, quantity: i64) -> Option<Money> {
        self.0.checked_mul(quantity).map(Money)
    }

    /// `max(self - paid, 0)`.
    ///
    /// ## Example
    /// ```rust
    /// use saleledger_core::money::Money;
    ///
    /// let total = Money::from_cents(3000);
    /// assert_eq!(total.remaining_after(Money::from_cents(5000)), Money::zero());
    /// ```
    #[inline]
    pub fn remaining_after(&self, paid: Money) -> Money {
        Money((self.0 - paid.0).max(0))
    }

    /// Sums an iterator, returning `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(iter: I) -> Option<Money> {
        iter.into_iter()
            .try_fold(0i64, |acc, m| acc.checked_add(m.0))
            .map(Money)
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Mul<i64> for Money {
    type Output = Money;

    fn mul(self, rhs: i64) -> Money {
        Money(self.0 * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), Add::add)
    }
}

// =============================================================================
// Display / Parsing
// =============================================================================

/// Two-place decimal, no currency symbol: `30.00`, `-5.50`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Error parsing a decimal amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid amount '{input}': {reason}")]
pub struct MoneyParseError {
    pub input: String,
    pub reason: &'static str,
}

/// Parses `"30"`, `"30.5"`, `"30.50"`, `"-5.50"`.
///
/// More than two decimal places is rejected rather than rounded.
impl FromStr for Money {
    type Err = MoneyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| MoneyParseError {
            input: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (major, minor) = match digits.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (digits, ""),
        };

        if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err("expected digits before the decimal point"));
        }
        if minor.len() > 2 {
            return Err(err("at most two decimal places"));
        }
        if !minor.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err("expected digits after the decimal point"));
        }

        let major: i64 = major.parse().map_err(|_| err("amount too large"))?;
        let minor: i64 = match minor.len() {
            0 => 0,
            1 => minor.parse::<i64>().map_err(|_| err("bad fraction"))? * 10,
            _ => minor.parse().map_err(|_| err("bad fraction"))?,
        };

        let cents = major
            .checked_mul(100)
            .and_then(|c| c.checked_add(minor))
            .ok_or_else(|| err("amount too large"))?;

        Ok(Money(if negative { -cents } else { cents }))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
