//! Money Conversion Module
//!
//! Unified conversion between the internal minor-unit representation and
//! client-facing decimal strings. All conversions MUST go through this module.
//!
//! ## Internal Representation
//! - Every amount is an `i64` count of cents wrapped in [`Cents`]
//! - Settlement is single-currency (USD), so the scale is fixed at 10^2
//! - Decimal strings only exist at the HTTP boundary
//!
//! ```rust
//! use partner_settlement::money::{format_amount, parse_amount, Cents};
//!
//! let internal = parse_amount("105.20").unwrap();
//! assert_eq!(internal, Cents(10_520));
//! assert_eq!(format_amount(internal), "105.20");
//! ```

use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of decimal places of the settlement currency
pub const CURRENCY_DECIMALS: u32 = 2;

/// ISO code sent to the payment rail
pub const CURRENCY: &str = "usd";

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Cents
// ============================================================================

/// Amount in minor units (cents)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cents(pub i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, rhs: Cents) -> Option<Cents> {
        self.0.checked_add(rhs.0).map(Cents)
    }

    pub fn checked_sub(self, rhs: Cents) -> Option<Cents> {
        self.0.checked_sub(rhs.0).map(Cents)
    }

    /// Exact decimal value in currency units (e.g. 10520 -> 105.20)
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, CURRENCY_DECIMALS)
    }
}

impl Add for Cents {
    type Output = Cents;

    fn add(self, rhs: Cents) -> Cents {
        Cents(self.0 + rhs.0)
    }
}

impl Sub for Cents {
    type Output = Cents;

    fn sub(self, rhs: Cents) -> Cents {
        Cents(self.0 - rhs.0)
    }
}

impl Neg for Cents {
    type Output = Cents;

    fn neg(self) -> Cents {
        Cents(-self.0)
    }
}

impl std::iter::Sum for Cents {
    fn sum<I: Iterator<Item = Cents>>(iter: I) -> Cents {
        Cents(iter.map(|c| c.0).sum())
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_amount(*self))
    }
}

// ============================================================================
// Parse: Client → Internal
// ============================================================================

/// Convert a client decimal string to cents.
///
/// # Errors
/// * `InvalidFormat` - not a plain decimal number
/// * `PrecisionOverflow` - more than two decimal places
/// * `InvalidAmount` - zero or negative
/// * `Overflow` - does not fit in i64 cents
pub fn parse_amount(amount_str: &str) -> Result<Cents, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if amount_str.starts_with('+') || amount_str.contains(['e', 'E']) {
        return Err(MoneyError::InvalidFormat(amount_str.to_string()));
    }

    let decimal = Decimal::from_str(amount_str)
        .map_err(|_| MoneyError::InvalidFormat(amount_str.to_string()))?;
    from_decimal(decimal)
}

/// Convert a decimal currency value to cents, rejecting sub-cent precision
pub fn from_decimal(decimal: Decimal) -> Result<Cents, MoneyError> {
    if decimal <= Decimal::ZERO {
        return Err(MoneyError::InvalidAmount);
    }

    let normalized = decimal.normalize();
    if normalized.scale() > CURRENCY_DECIMALS {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: CURRENCY_DECIMALS,
        });
    }

    let scaled = normalized
        .checked_mul(Decimal::from(10i64.pow(CURRENCY_DECIMALS)))
        .ok_or(MoneyError::Overflow)?;
    scaled.to_i64().map(Cents).ok_or(MoneyError::Overflow)
}

// ============================================================================
// Format: Internal → Client
// ============================================================================

/// Format cents as a fixed two-decimal string ("105.20", "-3.05")
pub fn format_amount(amount: Cents) -> String {
    let divisor = 10i64.pow(CURRENCY_DECIMALS);
    let sign = if amount.0 < 0 { "-" } else { "" };
    let abs = amount.0.unsigned_abs();
    format!(
        "{}{}.{:0>width$}",
        sign,
        abs / divisor as u64,
        abs % divisor as u64,
        width = CURRENCY_DECIMALS as usize
    )
}
