//! Fee calculation utilities
//!
//! All fee rates use 10^6 precision: 20_000 = 2.00%.
//! Results are rounded half-up to the nearest cent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Cents;

/// Fee rate precision (10^6 = 1,000,000)
pub const FEE_PRECISION: i64 = 1_000_000;

/// Default platform fee rate (20_000 = 2.00%)
pub const DEFAULT_PLATFORM_RATE: i64 = 20_000;

/// Default processing fee rate (29_000 = 2.90%)
pub const DEFAULT_PROCESSING_RATE: i64 = 29_000;

/// Default fixed processing fee per charge (30 cents)
pub const DEFAULT_PROCESSING_FIXED: i64 = 30;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Fee calculation would overflow")]
    Overflow,
}

/// Who bears the fees of a charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    /// Supporter funding a project: charged base + fees, recipient gets base
    PayerAbsorbs,
    /// Partner payouts and peer payments: charged base, recipient nets base - platform fee
    RecipientAbsorbs,
}

/// Configurable fee rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub platform_rate: i64,
    pub processing_rate: i64,
    pub processing_fixed_cents: i64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            platform_rate: DEFAULT_PLATFORM_RATE,
            processing_rate: DEFAULT_PROCESSING_RATE,
            processing_fixed_cents: DEFAULT_PROCESSING_FIXED,
        }
    }
}

/// Result of a fee computation, all in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub base: Cents,
    pub processing_fee: Cents,
    pub platform_fee: Cents,
    pub total_charged: Cents,
    pub net_to_recipient: Cents,
}

impl FeeBreakdown {
    /// Portion of the charge the rail withholds for the platform
    /// before forwarding the remainder to the connected payee.
    #[inline]
    pub fn application_fee(&self) -> Cents {
        self.total_charged - self.net_to_recipient
    }
}

/// Apply a rate to an amount, rounding half-up.
///
/// Uses i128 intermediate to prevent overflow.
///
/// # Example
/// ```
/// use partner_settlement::fee::apply_rate;
/// // 100.00 * 2.9% = 2.90
/// assert_eq!(apply_rate(10_000, 29_000), Some(290));
/// // 0.25 * 2% = 0.005 -> rounds up to 0.01
/// assert_eq!(apply_rate(25, 20_000), Some(1));
/// ```
#[inline]
pub fn apply_rate(amount: i64, rate: i64) -> Option<i64> {
    let scaled = (amount as i128).checked_mul(rate as i128)?;
    let rounded = (scaled + (FEE_PRECISION as i128 / 2)) / FEE_PRECISION as i128;
    i64::try_from(rounded).ok()
}

/// Compute the fee breakdown for a gross amount.
pub fn compute_fees(
    base: Cents,
    mode: FeeMode,
    schedule: &FeeSchedule,
) -> Result<FeeBreakdown, FeeError> {
    if !base.is_positive() {
        return Err(FeeError::InvalidAmount);
    }

    let platform_fee = Cents(apply_rate(base.0, schedule.platform_rate).ok_or(FeeError::Overflow)?);

    match mode {
        FeeMode::PayerAbsorbs => {
            let processing_fee = apply_rate(base.0, schedule.processing_rate)
                .and_then(|f| f.checked_add(schedule.processing_fixed_cents))
                .map(Cents)
                .ok_or(FeeError::Overflow)?;
            let total_charged = base
                .checked_add(processing_fee)
                .and_then(|t| t.checked_add(platform_fee))
                .ok_or(FeeError::Overflow)?;

            Ok(FeeBreakdown {
                base,
                processing_fee,
                platform_fee,
                total_charged,
                net_to_recipient: base,
            })
        }
        FeeMode::RecipientAbsorbs => Ok(FeeBreakdown {
            base,
            processing_fee: Cents::ZERO,
            platform_fee,
            total_charged: base,
            net_to_recipient: base - platform_fee,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payer_absorbs_scenario() {
        let fees =
            compute_fees(Cents(10_000), FeeMode::PayerAbsorbs, &FeeSchedule::default()).unwrap();
        assert_eq!(fees.processing_fee, Cents(320));
        assert_eq!(fees.platform_fee, Cents(200));
        assert_eq!(fees.total_charged, Cents(10_520));
        assert_eq!(fees.net_to_recipient, Cents(10_000));
        assert_eq!(fees.application_fee(), Cents(520));
    }

    #[test]
    fn test_recipient_absorbs_scenario() {
        let fees = compute_fees(
            Cents(50_000),
            FeeMode::RecipientAbsorbs,
            &FeeSchedule::default(),
        )
        .unwrap();
        assert_eq!(fees.platform_fee, Cents(1_000));
        assert_eq!(fees.net_to_recipient, Cents(49_000));
        assert_eq!(fees.total_charged, Cents(50_000));
        assert_eq!(fees.processing_fee, Cents::ZERO);
        assert_eq!(fees.application_fee(), Cents(1_000));
    }

    #[test]
    fn test_conservation_across_amounts() {
        let schedule = FeeSchedule::default();
        for base in (1..5_000).chain([99_999, 1_000_000, 123_456_789]) {
            let base = Cents(base);

            let p = compute_fees(base, FeeMode::PayerAbsorbs, &schedule).unwrap();
            assert_eq!(p.total_charged, p.base + p.processing_fee + p.platform_fee);
            assert_eq!(p.net_to_recipient, base);

            let r = compute_fees(base, FeeMode::RecipientAbsorbs, &schedule).unwrap();
            assert_eq!(r.net_to_recipient, base - r.platform_fee);
            assert_eq!(r.total_charged, base);
            assert!(r.net_to_recipient.is_positive());
        }
    }

    #[test]
    fn test_round_half_up() {
        // 0.25 * 2% = 0.005 -> 0.01
        assert_eq!(apply_rate(25, 20_000), Some(1));
        // 0.24 * 2% = 0.0048 -> 0.00
        assert_eq!(apply_rate(24, 20_000), Some(0));
        // 1.00 * 2.9% = 0.029 -> 0.03
        assert_eq!(apply_rate(100, 29_000), Some(3));
    }

    #[test]
    fn test_invalid_amount() {
        let schedule = FeeSchedule::default();
        assert_eq!(
            compute_fees(Cents(0), FeeMode::PayerAbsorbs, &schedule),
            Err(FeeError::InvalidAmount)
        );
        assert_eq!(
            compute_fees(Cents(-100), FeeMode::RecipientAbsorbs, &schedule),
            Err(FeeError::InvalidAmount)
        );
    }

    #[test]
    fn test_no_overflow() {
        let schedule = FeeSchedule::default();
        assert_eq!(
            compute_fees(Cents(i64::MAX), FeeMode::PayerAbsorbs, &schedule),
            Err(FeeError::Overflow)
        );
        // recipient-absorbs never adds to the base, so it stays representable
        let r = compute_fees(Cents(i64::MAX), FeeMode::RecipientAbsorbs, &schedule).unwrap();
        assert_eq!(r.total_charged, Cents(i64::MAX));
    }
}
