//! Partner Settlement - payment settlement and withdrawal lifecycle engine
//!
//! Moves money between payers, recipients and the platform through an
//! external payment rail, keeps an authoritative ledger of every attempt,
//! and drives partner profit-share withdrawals from request to payout.
//!
//! # Modules
//!
//! - [`core_types`] - Identifiers and the acting principal
//! - [`money`] - Cents and decimal-string conversion
//! - [`fee`] - Fee calculator
//! - [`rail`] - Payment rail trait, registry, HTTP and mock implementations
//! - [`store`] - Durable store traits, in-memory and PostgreSQL backends
//! - [`ledger`] - Ledger writer (provisional rows, atomic finalize)
//! - [`payment`] - Payment intent orchestrator and reconciliation worker
//! - [`withdrawal`] - Withdrawal lifecycle manager
//! - [`webhook`] - Signed rail event reconciler
//! - [`balance`] - Profit-share and rail balance accessor
//! - [`profiles`] - Payer/payee provisioning and payouts
//! - [`gateway`] - HTTP API

// Core types - must be first!
pub mod core_types;
pub mod money;

pub mod error;
pub mod fee;
pub mod rail;

// Persistence
pub mod db;
pub mod ledger;
pub mod store;

// Settlement components
pub mod balance;
pub mod payment;
pub mod profiles;
pub mod webhook;
pub mod withdrawal;

// Runtime
pub mod config;
pub mod gateway;
pub mod logging;

// Convenient re-exports at crate root
pub use core_types::{
    AccountId, Actor, InvitationId, OrganizationId, ProjectId, ReportId, TransactionId,
    WithdrawalId,
};
pub use error::SettlementError;
pub use fee::{FeeBreakdown, FeeMode, FeeSchedule, compute_fees};
pub use ledger::LedgerWriter;
pub use money::Cents;
pub use payment::{PaymentOrchestrator, ReconciliationWorker};
pub use webhook::WebhookReconciler;
pub use withdrawal::{WithdrawalManager, WithdrawalStatus};
