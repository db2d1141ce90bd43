//! Ledger transaction types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, InvitationId, ProjectId, TransactionId, WithdrawalId};
use crate::fee::FeeBreakdown;
use crate::money::Cents;
use crate::rail::RailKind;

/// What a ledger row settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Supporter funding a project, or a peer payment
    Payment,
    /// Organization owner settling a partner withdrawal
    Withdrawal,
    Investment,
    /// Connected balance paid out to the payee's bank
    Payout,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Payment => "payment",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Investment => "investment",
            TransactionKind::Payout => "payout",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(TransactionKind::Payment),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "investment" => Ok(TransactionKind::Investment),
            "payout" => Ok(TransactionKind::Payout),
            other => Err(format!("Unknown transaction kind: {}", other)),
        }
    }
}

/// Transaction status
///
/// One-way: `Pending` → `Completed` | `Failed`. Terminal rows are never
/// rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("Unknown transaction status: {}", other)),
        }
    }
}

/// Business objects a transaction settles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRefs {
    pub project_id: Option<ProjectId>,
    pub partner_invitation_id: Option<InvitationId>,
    pub withdrawal_id: Option<WithdrawalId>,
}

/// Balance change applied together with a status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceCredit {
    pub account_id: AccountId,
    /// Negative for debits
    pub delta: Cents,
}

/// Input for `LedgerWriter::record_transaction`
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub counterparty_id: Option<AccountId>,
    pub kind: TransactionKind,
    pub rail: RailKind,
    pub fees: FeeBreakdown,
    pub refs: TransactionRefs,
}

/// Ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    /// Payer / initiator
    pub account_id: AccountId,
    pub counterparty_id: Option<AccountId>,
    pub kind: TransactionKind,
    pub rail: RailKind,
    /// Total charged
    pub amount: Cents,
    pub platform_fee: Cents,
    pub processing_fee: Cents,
    pub net_amount: Cents,
    pub status: TransactionStatus,
    pub external_operation_id: Option<String>,
    pub refs: TransactionRefs,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Provisional `pending` row for a new transfer
    pub fn pending(new: NewTransaction, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            account_id: new.account_id,
            counterparty_id: new.counterparty_id,
            kind: new.kind,
            rail: new.rail,
            amount: new.fees.total_charged,
            platform_fee: new.fees.platform_fee,
            processing_fee: new.fees.processing_fee,
            net_amount: new.fees.net_to_recipient,
            status: TransactionStatus::Pending,
            external_operation_id: None,
            refs: new.refs,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Credit owed to the counterparty once the transfer completes
    pub fn recipient_credit(&self) -> Option<BalanceCredit> {
        match self.kind {
            TransactionKind::Payout => None,
            _ => self.counterparty_id.map(|account_id| BalanceCredit {
                account_id,
                delta: self.net_amount,
            }),
        }
    }
}

/// Status transition request for `finalize_transaction`
#[derive(Debug, Clone, Default)]
pub struct Finalize {
    pub external_id: Option<String>,
    pub failure_reason: Option<String>,
    /// Applied only when this call performs the transition
    pub credit: Option<BalanceCredit>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee::{FeeMode, FeeSchedule, compute_fees};

    #[test]
    fn test_status_is_one_way() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert_eq!(
            "completed".parse::<TransactionStatus>().unwrap(),
            TransactionStatus::Completed
        );
        assert!("done".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_pending_row_carries_fees() {
        let fees = compute_fees(
            Cents(10_000),
            FeeMode::PayerAbsorbs,
            &FeeSchedule::default(),
        )
        .unwrap();
        let recipient = AccountId::new();
        let tx = Transaction::pending(
            NewTransaction {
                id: TransactionId::new(),
                account_id: AccountId::new(),
                counterparty_id: Some(recipient),
                kind: TransactionKind::Payment,
                rail: RailKind::CardTransfer,
                fees,
                refs: TransactionRefs::default(),
            },
            Utc::now(),
        );
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount, Cents(10_520));
        assert_eq!(tx.net_amount, Cents(10_000));
        assert_eq!(
            tx.recipient_credit(),
            Some(BalanceCredit {
                account_id: recipient,
                delta: Cents(10_000)
            })
        );
    }
}
