//! Durable store
//!
//! Everything the engine persists goes through the async traits below. Two
//! implementations share the same semantics:
//!
//! - [`postgres::PgStore`] - production, one SQL statement or transaction per
//!   atomic operation
//! - [`memory::MemoryStore`] - tests and `store: memory` dev mode, every
//!   operation under one lock
//!
//! Atomic operations (`update_balance`, `finalize_transaction`,
//! `insert_withdrawal_capped`, `claim_withdrawal`, `complete_withdrawal`) are
//! single store calls so application code never does read-modify-write.

pub mod directory;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core_types::{
    AccountId, InvitationId, OrganizationId, ProjectId, ReportId, TransactionId, WithdrawalId,
};
use crate::ledger::types::{BalanceCredit, Finalize, Transaction, TransactionStatus};
use crate::money::Cents;
use crate::withdrawal::types::{CapOutcome, Decision, WithdrawalRequest};

pub use directory::{
    Account, FinancialReport, InvitationStatus, Organization, PartnerInvitation, PayeeProfile,
    PayerProfile, Project, Subscription,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Balance of account {0} would become negative")]
    InsufficientBalance(AccountId),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(e.to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

/// Ledger rows and account balances
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new row; `Duplicate` if the id exists
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    async fn find_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn transactions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Stamp the rail operation id on a row that is still pending
    async fn attach_external_id(
        &self,
        id: TransactionId,
        external_id: &str,
    ) -> Result<bool, StoreError>;

    /// Compare-and-set `pending → to`, applying `finalize.credit` in the same
    /// atomic step. Returns false (and changes nothing) when the row was not
    /// pending.
    async fn finalize_transaction(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        finalize: &Finalize,
    ) -> Result<bool, StoreError>;

    /// Atomic increment; returns the new balance.
    /// `InsufficientBalance` if the result would be negative.
    async fn update_balance(&self, account_id: AccountId, delta: Cents)
    -> Result<Cents, StoreError>;

    /// Pending rows last touched before `older_than`, oldest first
    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError>;
}

/// Accounts, organizations, projects, invitations and report snapshots
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn find_account_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Account>, StoreError>;

    /// Store the payer profile unless one exists; returns the stored profile
    async fn set_payer_profile_if_absent(
        &self,
        id: AccountId,
        profile: &PayerProfile,
    ) -> Result<PayerProfile, StoreError>;

    /// Store the payee profile unless one exists; returns the stored profile
    async fn set_payee_profile_if_absent(
        &self,
        id: AccountId,
        profile: &PayeeProfile,
    ) -> Result<PayeeProfile, StoreError>;

    async fn set_payee_onboarding(
        &self,
        payee_id: &str,
        completed: bool,
    ) -> Result<bool, StoreError>;

    /// Set (`Some`) or clear (`None`) subscription fields of the account
    /// owning `customer_id`, only if `event_at` is not older than the last
    /// applied subscription event.
    async fn apply_subscription(
        &self,
        customer_id: &str,
        subscription: Option<&Subscription>,
        event_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn insert_organization(&self, org: &Organization) -> Result<(), StoreError>;

    async fn get_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, StoreError>;

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError>;

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError>;

    async fn insert_invitation(&self, invitation: &PartnerInvitation) -> Result<(), StoreError>;

    async fn get_invitation(
        &self,
        id: InvitationId,
    ) -> Result<Option<PartnerInvitation>, StoreError>;

    async fn insert_report(&self, report: &FinancialReport) -> Result<(), StoreError>;

    async fn get_report(&self, id: ReportId) -> Result<Option<FinancialReport>, StoreError>;

    async fn latest_report(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Option<FinancialReport>, StoreError>;
}

/// Withdrawal requests
#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Insert `request` only if, for its invitation, pending + approved
    /// amounts plus completed amounts created since `since`, plus the new
    /// amount, stay within `cap`. Check and insert are one atomic step.
    async fn insert_withdrawal_capped(
        &self,
        request: &WithdrawalRequest,
        cap: Cents,
        since: DateTime<Utc>,
    ) -> Result<CapOutcome, StoreError>;

    async fn get_withdrawal(&self, id: WithdrawalId)
    -> Result<Option<WithdrawalRequest>, StoreError>;

    async fn list_withdrawals(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Vec<WithdrawalRequest>, StoreError>;

    /// Amounts (outstanding, completed since `since`) for an invitation
    async fn withdrawal_usage(
        &self,
        invitation_id: InvitationId,
        since: DateTime<Utc>,
    ) -> Result<(Cents, Cents), StoreError>;

    /// Compare-and-set status change
    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        decision: &Decision,
    ) -> Result<bool, StoreError>;

    /// Take the processing lease if the request is approved and the lease is
    /// free or was claimed before `expired_before`
    async fn claim_withdrawal(
        &self,
        id: WithdrawalId,
        token: &str,
        expired_before: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn release_claim(&self, id: WithdrawalId, token: &str) -> Result<bool, StoreError>;

    /// Record the settlement attempt while holding the lease
    async fn set_settlement_tx(
        &self,
        id: WithdrawalId,
        token: &str,
        tx_id: TransactionId,
    ) -> Result<bool, StoreError>;

    /// Forget the settlement attempt if it is still `expected`
    async fn clear_settlement_tx(
        &self,
        id: WithdrawalId,
        expected: TransactionId,
    ) -> Result<bool, StoreError>;

    /// One atomic step: settle the transaction (`pending → completed` with
    /// `credit` if it is still pending), mark the request `completed` with the
    /// external id, and clear the lease. Returns false if the request was not
    /// approved, settles through another transaction, or the transaction has
    /// already failed.
    async fn complete_withdrawal(
        &self,
        id: WithdrawalId,
        tx_id: TransactionId,
        external_id: &str,
        credit: Option<BalanceCredit>,
    ) -> Result<bool, StoreError>;
}

/// Processed webhook events
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn is_event_processed(&self, event_id: &str) -> Result<bool, StoreError>;

    /// Returns false if the event was already recorded
    async fn record_event(&self, event_id: &str, event_type: &str) -> Result<bool, StoreError>;
}

/// Everything the engine needs from a store
pub trait Store: LedgerStore + DirectoryStore + WithdrawalStore + EventStore {}

impl<T> Store for T where T: LedgerStore + DirectoryStore + WithdrawalStore + EventStore {}
