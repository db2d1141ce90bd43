//! Withdrawal request types

use chrono::{DateTime, Utc};

use super::state::WithdrawalStatus;
use crate::core_types::{AccountId, InvitationId, OrganizationId, ReportId, TransactionId, WithdrawalId};
use crate::money::Cents;

/// Input for `WithdrawalManager::create`
#[derive(Debug, Clone)]
pub struct CreateWithdrawal {
    pub partner_invitation_id: InvitationId,
    pub organization_id: OrganizationId,
    pub amount: Cents,
    /// Snapshot to check against; latest for the invitation when absent
    pub financial_report_id: Option<ReportId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub partner_invitation_id: InvitationId,
    pub organization_id: OrganizationId,
    pub amount: Cents,
    pub financial_report_id: Option<ReportId>,
    pub status: WithdrawalStatus,
    pub rejection_reason: Option<String>,
    pub external_operation_id: Option<String>,
    /// Settlement transaction of the current (or last unknown-outcome) attempt.
    /// Reused as the rail idempotency key on retry.
    pub settlement_tx_id: Option<TransactionId>,
    /// Processing lease holder
    pub claim_token: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub requested_by: AccountId,
    pub decided_by: Option<AccountId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    pub fn new(input: &CreateWithdrawal, requested_by: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            id: WithdrawalId::new(),
            partner_invitation_id: input.partner_invitation_id,
            organization_id: input.organization_id,
            amount: input.amount,
            financial_report_id: input.financial_report_id,
            status: WithdrawalStatus::Pending,
            rejection_reason: None,
            external_operation_id: None,
            settlement_tx_id: None,
            claim_token: None,
            claimed_at: None,
            requested_by,
            decided_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status change performed by approve / reject
#[derive(Debug, Clone)]
pub struct Decision {
    pub from: WithdrawalStatus,
    pub to: WithdrawalStatus,
    pub decided_by: Option<AccountId>,
    pub reason: Option<String>,
}

/// Outcome of the store's capped insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapOutcome {
    Inserted,
    /// Nothing written; `available` is what remained under the cap
    Exceeded { available: Cents },
}

/// Result of `WithdrawalManager::process`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub withdrawal: WithdrawalRequest,
    pub transaction_id: Option<TransactionId>,
    /// False when the request was already completed and no rail call was made
    pub settled_now: bool,
}
