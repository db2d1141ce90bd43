//! Settlement error type
//!
//! Every component error converts into [`SettlementError`], which carries the
//! machine code and HTTP status the gateway reports.

use thiserror::Error;

use crate::core_types::{TransactionId, WithdrawalId};
use crate::fee::FeeError;
use crate::money::MoneyError;
use crate::rail::RailError;
use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Not allowed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Business precondition not met; `onboarding_url` tells the payee where
    /// to finish onboarding when that is the reason
    #[error("Precondition failed: {reason}")]
    PreconditionFailed {
        reason: String,
        onboarding_url: Option<String>,
    },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Payment rail rejected the request ({code}): {message}")]
    ExternalRail {
        code: String,
        message: String,
        retryable: bool,
    },

    /// The rail may or may not have acted; reconciliation will settle it
    #[error("Outcome unknown for transaction {transaction_id}: {detail}")]
    UnknownOutcome {
        transaction_id: TransactionId,
        detail: String,
    },

    /// The rail succeeded but the local write did not
    #[error("Partial failure on transaction {transaction_id} ({external_id}): {detail}")]
    PartialFailure {
        transaction_id: TransactionId,
        external_id: String,
        detail: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    pub fn precondition(reason: impl Into<String>) -> Self {
        SettlementError::PreconditionFailed {
            reason: reason.into(),
            onboarding_url: None,
        }
    }

    pub fn onboarding_incomplete(onboarding_url: impl Into<String>) -> Self {
        SettlementError::PreconditionFailed {
            reason: "Payee onboarding is not complete".to_string(),
            onboarding_url: Some(onboarding_url.into()),
        }
    }

    pub fn withdrawal_not_found(id: WithdrawalId) -> Self {
        SettlementError::NotFound(format!("withdrawal request {}", id))
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::Validation(_) => "VALIDATION_ERROR",
            SettlementError::Unauthorized => "UNAUTHORIZED",
            SettlementError::Authorization(_) => "FORBIDDEN",
            SettlementError::NotFound(_) => "NOT_FOUND",
            SettlementError::PreconditionFailed { .. } => "PRECONDITION_FAILED",
            SettlementError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            SettlementError::ExternalRail { .. } => "EXTERNAL_RAIL_ERROR",
            SettlementError::UnknownOutcome { .. } => "UNKNOWN_OUTCOME",
            SettlementError::PartialFailure { .. } => "PARTIAL_FAILURE",
            SettlementError::Database(_) => "DATABASE_ERROR",
            SettlementError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code
    pub fn http_status(&self) -> u16 {
        match self {
            SettlementError::Validation(_) => 400,
            SettlementError::Unauthorized => 401,
            SettlementError::Authorization(_) => 403,
            SettlementError::NotFound(_) => 404,
            SettlementError::InvalidStateTransition(_) => 409,
            SettlementError::PreconditionFailed { .. } => 422,
            SettlementError::ExternalRail { .. } => 502,
            SettlementError::UnknownOutcome { .. } => 504,
            SettlementError::PartialFailure { .. }
            | SettlementError::Database(_)
            | SettlementError::Internal(_) => 500,
        }
    }

    /// Safe to retry the same operation later
    pub fn is_retryable(&self) -> bool {
        match self {
            SettlementError::ExternalRail { retryable, .. } => *retryable,
            SettlementError::UnknownOutcome { .. } | SettlementError::Database(_) => true,
            _ => false,
        }
    }
}

impl From<StoreError> for SettlementError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientBalance(_) => {
                SettlementError::precondition("Insufficient balance")
            }
            other => SettlementError::Database(other.to_string()),
        }
    }
}

impl From<FeeError> for SettlementError {
    fn from(e: FeeError) -> Self {
        SettlementError::Validation(e.to_string())
    }
}

impl From<MoneyError> for SettlementError {
    fn from(e: MoneyError) -> Self {
        SettlementError::Validation(e.to_string())
    }
}

impl From<RailError> for SettlementError {
    /// For rail calls with no local transaction at stake (profiles, balance
    /// lookups). Transfers map rail errors themselves.
    fn from(e: RailError) -> Self {
        match e {
            RailError::Rejected {
                code,
                message,
                retryable,
            } => SettlementError::ExternalRail {
                code,
                message,
                retryable,
            },
            RailError::Unsupported(kind) => {
                SettlementError::Validation(format!("Payment method {} is not available", kind))
            }
            other => SettlementError::ExternalRail {
                code: other.code().to_string(),
                message: other.to_string(),
                retryable: true,
            },
        }
    }
}
