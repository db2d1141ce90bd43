//! Webhook Reconciler
//!
//! Applies asynchronous rail notifications to the ledger. Every effect is a
//! compare-and-set or an ordered upsert, so redelivery and reordering of
//! events never double-apply anything; the processed-event table only saves
//! repeated work.

pub mod events;
pub mod reconciler;
pub mod signature;

use serde::Serialize;
use thiserror::Error;

use crate::error::SettlementError;
use crate::store::StoreError;

pub use events::{Envelope, RailEvent};
pub use reconciler::WebhookReconciler;
pub use signature::{SIGNATURE_HEADER, sign_payload, verify_signature};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<WebhookError> for SettlementError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::InvalidSignature(_) | WebhookError::InvalidPayload(_) => {
                SettlementError::Validation(e.to_string())
            }
            WebhookError::Store(e) => e.into(),
        }
    }
}

/// What happened to a delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Effects applied (or already in place)
    Applied,
    /// Event id seen before
    Duplicate,
    /// Not relevant, stale, or unknown to this ledger
    Ignored,
}
