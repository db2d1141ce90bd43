//! In-memory store
//!
//! All state sits behind one `std::sync::Mutex`, so each trait method is
//! atomic exactly like its SQL counterpart. The lock is never held across an
//! `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::*;
use crate::withdrawal::state::WithdrawalStatus;

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    organizations: HashMap<OrganizationId, Organization>,
    projects: HashMap<ProjectId, Project>,
    invitations: HashMap<InvitationId, PartnerInvitation>,
    reports: HashMap<ReportId, FinancialReport>,
    transactions: HashMap<TransactionId, Transaction>,
    withdrawals: HashMap<WithdrawalId, WithdrawalRequest>,
    events: HashSet<String>,
}

impl State {
    fn apply_credit(&mut self, credit: &BalanceCredit) -> Result<Cents, StoreError> {
        let account = self
            .accounts
            .get_mut(&credit.account_id)
            .ok_or_else(|| StoreError::Database(format!("account {} not found", credit.account_id)))?;
        let next = account
            .balance
            .checked_add(credit.delta)
            .ok_or_else(|| StoreError::Database("balance overflow".into()))?;
        if next.value() < 0 {
            return Err(StoreError::InsufficientBalance(credit.account_id));
        }
        account.balance = next;
        Ok(next)
    }

    /// Validate a credit without applying it
    fn check_credit(&self, credit: &BalanceCredit) -> Result<(), StoreError> {
        let account = self
            .accounts
            .get(&credit.account_id)
            .ok_or_else(|| StoreError::Database(format!("account {} not found", credit.account_id)))?;
        match account.balance.checked_add(credit.delta) {
            Some(next) if next.value() >= 0 => Ok(()),
            Some(_) => Err(StoreError::InsufficientBalance(credit.account_id)),
            None => Err(StoreError::Database("balance overflow".into())),
        }
    }

    fn finalize(
        &mut self,
        id: TransactionId,
        to: TransactionStatus,
        finalize: &Finalize,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.transactions.get(&id) {
            Some(tx) if tx.status == TransactionStatus::Pending => {}
            _ => return Ok(false),
        }
        if let Some(credit) = &finalize.credit {
            self.check_credit(credit)?;
        }

        if let Some(tx) = self.transactions.get_mut(&id) {
            tx.status = to;
            if let Some(ext) = &finalize.external_id {
                tx.external_operation_id = Some(ext.clone());
            }
            if finalize.failure_reason.is_some() {
                tx.failure_reason = finalize.failure_reason.clone();
            }
            tx.updated_at = now;
        }
        if let Some(credit) = &finalize.credit {
            self.apply_credit(credit)?;
        }
        Ok(true)
    }

    fn usage(&self, invitation_id: InvitationId, since: DateTime<Utc>) -> (Cents, Cents) {
        let mut outstanding = Cents::ZERO;
        let mut completed = Cents::ZERO;
        for w in self
            .withdrawals
            .values()
            .filter(|w| w.partner_invitation_id == invitation_id)
        {
            if w.status.is_outstanding() {
                outstanding = outstanding + w.amount;
            } else if w.status == WithdrawalStatus::Completed && w.created_at >= since {
                completed = completed + w.amount;
            }
        }
        (outstanding, completed)
    }
}

/// In-memory [`Store`] implementation
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.transactions.contains_key(&tx.id) {
            return Err(StoreError::Duplicate(format!("transaction {}", tx.id)));
        }
        state.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.lock()?.transactions.get(&id).cloned())
    }

    async fn find_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .lock()?
            .transactions
            .values()
            .find(|t| t.external_operation_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn transactions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.lock()?;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.account_id == account_id || t.counterparty_id == Some(account_id))
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.created_at);
        Ok(rows)
    }

    async fn attach_external_id(
        &self,
        id: TransactionId,
        external_id: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.transactions.get_mut(&id) {
            Some(tx) if tx.status == TransactionStatus::Pending => {
                tx.external_operation_id = Some(external_id.to_string());
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize_transaction(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        finalize: &Finalize,
    ) -> Result<bool, StoreError> {
        self.lock()?.finalize(id, to, finalize, Utc::now())
    }

    async fn update_balance(
        &self,
        account_id: AccountId,
        delta: Cents,
    ) -> Result<Cents, StoreError> {
        self.lock()?.apply_credit(&BalanceCredit { account_id, delta })
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.lock()?;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Pending && t.updated_at < older_than)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.updated_at);
        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.accounts.contains_key(&account.id) {
            return Err(StoreError::Duplicate(format!("account {}", account.id)));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.lock()?.accounts.get(&id).cloned())
    }

    async fn find_account_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .lock()?
            .accounts
            .values()
            .find(|a| a.payer.as_ref().map(|p| p.customer_id.as_str()) == Some(customer_id))
            .cloned())
    }

    async fn set_payer_profile_if_absent(
        &self,
        id: AccountId,
        profile: &PayerProfile,
    ) -> Result<PayerProfile, StoreError> {
        let mut state = self.lock()?;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::Database(format!("account {} not found", id)))?;
        Ok(account.payer.get_or_insert_with(|| profile.clone()).clone())
    }

    async fn set_payee_profile_if_absent(
        &self,
        id: AccountId,
        profile: &PayeeProfile,
    ) -> Result<PayeeProfile, StoreError> {
        let mut state = self.lock()?;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::Database(format!("account {} not found", id)))?;
        Ok(account.payee.get_or_insert_with(|| profile.clone()).clone())
    }

    async fn set_payee_onboarding(
        &self,
        payee_id: &str,
        completed: bool,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let payee = state
            .accounts
            .values_mut()
            .filter_map(|a| a.payee.as_mut())
            .find(|p| p.payee_id == payee_id);
        match payee {
            Some(p) => {
                p.onboarding_completed = completed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply_subscription(
        &self,
        customer_id: &str,
        subscription: Option<&Subscription>,
        event_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let account = state
            .accounts
            .values_mut()
            .find(|a| a.payer.as_ref().map(|p| p.customer_id.as_str()) == Some(customer_id));
        let Some(account) = account else {
            return Ok(false);
        };
        if account.subscription_event_at.is_some_and(|last| event_at < last) {
            return Ok(false);
        }
        account.subscription = subscription.cloned();
        account.subscription_event_at = Some(event_at);
        Ok(true)
    }

    async fn insert_organization(&self, org: &Organization) -> Result<(), StoreError> {
        self.lock()?.organizations.insert(org.id, org.clone());
        Ok(())
    }

    async fn get_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, StoreError> {
        Ok(self.lock()?.organizations.get(&id).cloned())
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        self.lock()?.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.lock()?.projects.get(&id).cloned())
    }

    async fn insert_invitation(&self, invitation: &PartnerInvitation) -> Result<(), StoreError> {
        self.lock()?
            .invitations
            .insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn get_invitation(
        &self,
        id: InvitationId,
    ) -> Result<Option<PartnerInvitation>, StoreError> {
        Ok(self.lock()?.invitations.get(&id).cloned())
    }

    async fn insert_report(&self, report: &FinancialReport) -> Result<(), StoreError> {
        self.lock()?.reports.insert(report.id, report.clone());
        Ok(())
    }

    async fn get_report(&self, id: ReportId) -> Result<Option<FinancialReport>, StoreError> {
        Ok(self.lock()?.reports.get(&id).cloned())
    }

    async fn latest_report(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Option<FinancialReport>, StoreError> {
        Ok(self
            .lock()?
            .reports
            .values()
            .filter(|r| r.partner_invitation_id == invitation_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }
}

#[async_trait]
impl WithdrawalStore for MemoryStore {
    async fn insert_withdrawal_capped(
        &self,
        request: &WithdrawalRequest,
        cap: Cents,
        since: DateTime<Utc>,
    ) -> Result<CapOutcome, StoreError> {
        let mut state = self.lock()?;
        let (outstanding, completed) = state.usage(request.partner_invitation_id, since);
        let available = cap - outstanding - completed;
        if request.amount > available {
            return Ok(CapOutcome::Exceeded {
                available: available.max(Cents::ZERO),
            });
        }
        if state.withdrawals.contains_key(&request.id) {
            return Err(StoreError::Duplicate(format!("withdrawal {}", request.id)));
        }
        state.withdrawals.insert(request.id, request.clone());
        Ok(CapOutcome::Inserted)
    }

    async fn get_withdrawal(
        &self,
        id: WithdrawalId,
    ) -> Result<Option<WithdrawalRequest>, StoreError> {
        Ok(self.lock()?.withdrawals.get(&id).cloned())
    }

    async fn list_withdrawals(
        &self,
        invitation_id: InvitationId,
    ) -> Result<Vec<WithdrawalRequest>, StoreError> {
        let state = self.lock()?;
        let mut rows: Vec<WithdrawalRequest> = state
            .withdrawals
            .values()
            .filter(|w| w.partner_invitation_id == invitation_id)
            .cloned()
            .collect();
        rows.sort_by_key(|w| (w.created_at, w.id));
        Ok(rows)
    }

    async fn withdrawal_usage(
        &self,
        invitation_id: InvitationId,
        since: DateTime<Utc>,
    ) -> Result<(Cents, Cents), StoreError> {
        Ok(self.lock()?.usage(invitation_id, since))
    }

    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        decision: &Decision,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.withdrawals.get_mut(&id) {
            Some(w) if w.status == decision.from => {
                w.status = decision.to;
                w.decided_by = decision.decided_by.or(w.decided_by);
                if decision.reason.is_some() {
                    w.rejection_reason = decision.reason.clone();
                }
                w.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_withdrawal(
        &self,
        id: WithdrawalId,
        token: &str,
        expired_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.withdrawals.get_mut(&id) {
            Some(w)
                if w.status == WithdrawalStatus::Approved
                    && (w.claim_token.is_none()
                        || w.claimed_at.is_none_or(|at| at < expired_before)) =>
            {
                let now = Utc::now();
                w.claim_token = Some(token.to_string());
                w.claimed_at = Some(now);
                w.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, id: WithdrawalId, token: &str) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.withdrawals.get_mut(&id) {
            Some(w) if w.claim_token.as_deref() == Some(token) => {
                w.claim_token = None;
                w.claimed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_settlement_tx(
        &self,
        id: WithdrawalId,
        token: &str,
        tx_id: TransactionId,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.withdrawals.get_mut(&id) {
            Some(w)
                if w.claim_token.as_deref() == Some(token)
                    && w.status == WithdrawalStatus::Approved =>
            {
                w.settlement_tx_id = Some(tx_id);
                w.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_settlement_tx(
        &self,
        id: WithdrawalId,
        expected: TransactionId,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.withdrawals.get_mut(&id) {
            Some(w)
                if w.settlement_tx_id == Some(expected)
                    && w.status == WithdrawalStatus::Approved =>
            {
                w.settlement_tx_id = None;
                w.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_withdrawal(
        &self,
        id: WithdrawalId,
        tx_id: TransactionId,
        external_id: &str,
        credit: Option<BalanceCredit>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.withdrawals.get(&id) {
            Some(w)
                if w.status == WithdrawalStatus::Approved && w.settlement_tx_id == Some(tx_id) => {}
            _ => return Ok(false),
        }
        // a failed attempt never backs a completed request
        match state.transactions.get(&tx_id) {
            Some(tx) if tx.status != TransactionStatus::Failed => {}
            _ => return Ok(false),
        }

        let now = Utc::now();
        state.finalize(
            tx_id,
            TransactionStatus::Completed,
            &Finalize {
                external_id: Some(external_id.to_string()),
                failure_reason: None,
                credit,
            },
            now,
        )?;

        if let Some(w) = state.withdrawals.get_mut(&id) {
            w.status = WithdrawalStatus::Completed;
            w.external_operation_id = Some(external_id.to_string());
            w.claim_token = None;
            w.claimed_at = None;
            w.updated_at = now;
        }
        Ok(true)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn is_event_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.events.contains(event_id))
    }

    async fn record_event(&self, event_id: &str, _event_type: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.events.insert(event_id.to_string()))
    }
}
