//! Payment Intent Orchestrator
//!
//! Drives a split payment through the rail with persist-before-call:
//!
//! ```text
//! write pending tx ──▶ rail.create_payment_intent(idempotency = tx id) ──▶ finalize
//!                                   │
//!                timeout / 5xx ─────┴──▶ UnknownOutcome (row stays pending)
//! ```
//!
//! A pending row is finalized exactly once, by whichever path wins the
//! compare-and-set: this orchestrator, the webhook reconciler, or the
//! reconciliation [`worker`].

pub mod orchestrator;
pub mod worker;

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::core_types::{AccountId, ProjectId, TransactionId};
use crate::error::SettlementError;
use crate::fee::{FeeBreakdown, FeeError};
use crate::money::Cents;
use crate::ledger::{TransactionKind, TransactionRefs, TransactionStatus};
use crate::rail::{IntentStatus, RailError, RailKind};
use crate::store::StoreError;

pub use orchestrator::PaymentOrchestrator;
pub use worker::{ReconciliationWorker, WorkerConfig};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Payer {0} has no payer profile")]
    NoPayerProfile(AccountId),

    #[error("Recipient {0} has no payee profile")]
    NoRecipientProfile(AccountId),

    #[error("Recipient has not completed onboarding")]
    RecipientOnboardingIncomplete { onboarding_url: String },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Transaction {0} already failed")]
    AlreadyFailed(TransactionId),

    #[error("Rail rejected transaction {transaction_id} ({code}): {message}")]
    ExternalRailRejected {
        transaction_id: TransactionId,
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("Outcome unknown for transaction {transaction_id}: {detail}")]
    UnknownOutcome {
        transaction_id: TransactionId,
        detail: String,
    },

    #[error("Rail accepted {external_id} but recording transaction {transaction_id} failed: {detail}")]
    PartialFailure {
        transaction_id: TransactionId,
        external_id: String,
        detail: String,
    },

    #[error("Rail error: {0}")]
    Rail(#[from] RailError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<FeeError> for PaymentError {
    fn from(e: FeeError) -> Self {
        PaymentError::InvalidAmount(e.to_string())
    }
}

impl From<PaymentError> for SettlementError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::InvalidAmount(msg) | PaymentError::InvalidRequest(msg) => {
                SettlementError::Validation(msg)
            }
            PaymentError::AccountNotFound(id) => {
                SettlementError::NotFound(format!("account {}", id))
            }
            PaymentError::ProjectNotFound(id) => {
                SettlementError::NotFound(format!("project {}", id))
            }
            PaymentError::TransactionNotFound(id) => {
                SettlementError::NotFound(format!("transaction {}", id))
            }
            e @ (PaymentError::NoPayerProfile(_) | PaymentError::NoRecipientProfile(_)) => {
                SettlementError::precondition(e.to_string())
            }
            PaymentError::RecipientOnboardingIncomplete { onboarding_url } => {
                SettlementError::onboarding_incomplete(onboarding_url)
            }
            PaymentError::AlreadyFailed(id) => {
                SettlementError::InvalidStateTransition(format!("transaction {} already failed", id))
            }
            PaymentError::ExternalRailRejected {
                code,
                message,
                retryable,
                ..
            } => SettlementError::ExternalRail {
                code,
                message,
                retryable,
            },
            PaymentError::UnknownOutcome {
                transaction_id,
                detail,
            } => SettlementError::UnknownOutcome {
                transaction_id,
                detail,
            },
            PaymentError::PartialFailure {
                transaction_id,
                external_id,
                detail,
            } => SettlementError::PartialFailure {
                transaction_id,
                external_id,
                detail,
            },
            PaymentError::Rail(e) => e.into(),
            PaymentError::Store(e) => e.into(),
        }
    }
}

/// A split transfer to drive through the rail
#[derive(Debug, Clone)]
pub struct TransferOrder {
    pub payer: AccountId,
    pub recipient: AccountId,
    pub kind: TransactionKind,
    pub rail: RailKind,
    pub fees: FeeBreakdown,
    pub refs: TransactionRefs,
    pub metadata: BTreeMap<String, String>,
    /// Charge the payer's stored instrument now instead of handing back a
    /// client secret for on-session confirmation
    pub confirm: bool,
    /// Continue an earlier attempt whose outcome was unknown
    pub resume: Option<TransactionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub transaction_id: TransactionId,
    pub external_operation_id: Option<String>,
    pub client_secret: Option<String>,
    pub status: TransactionStatus,
    pub intent_status: Option<IntentStatus>,
}

/// Payment started by an authenticated payer
///
/// Exactly one of `project_id` (supporter funding, payer absorbs fees) or
/// `recipient_account_id` (peer payment, recipient absorbs fees) is set.
#[derive(Debug, Clone, Default)]
pub struct StartPayment {
    pub amount: Cents,
    pub project_id: Option<ProjectId>,
    pub recipient_account_id: Option<AccountId>,
    pub method: Option<RailKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentStarted {
    pub receipt: TransferReceipt,
    pub fees: FeeBreakdown,
}
