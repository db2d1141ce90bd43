//! Withdrawal Lifecycle
//!
//! A partner asks to withdraw earned profit share; the organization owner
//! approves or rejects; processing settles it through the payment rail.
//!
//! # Safety properties
//!
//! - Outstanding plus recently completed requests never exceed the partner's
//!   available profit share (capped insert in the store)
//! - At most one processing attempt reaches the rail at a time (per-invitation
//!   mutex plus store claim lease)
//! - Retrying after an unknown outcome reuses the settlement transaction, and
//!   with it the rail idempotency key
//! - A failed attempt leaves the request `APPROVED`

pub mod lock;
pub mod manager;
pub mod state;
pub mod types;

pub use lock::{KeyGuard, KeyedLocks};
pub use manager::{WithdrawalConfig, WithdrawalManager};
pub use state::WithdrawalStatus;
pub use types::{CapOutcome, CreateWithdrawal, Decision, ProcessOutcome, WithdrawalRequest};
