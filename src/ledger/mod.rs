//! Ledger Writer
//!
//! Thin facade over [`LedgerStore`] used by the orchestrator, the webhook
//! reconciler and the reconciliation worker. Balance changes only happen
//! through the store's atomic increment, either directly (`update_balance`)
//! or folded into a status transition (`finalize`).

pub mod types;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::core_types::{AccountId, TransactionId};
use crate::money::Cents;
use crate::store::{Store, StoreError};

pub use types::{
    BalanceCredit, Finalize, NewTransaction, Transaction, TransactionKind, TransactionRefs,
    TransactionStatus,
};

#[derive(Clone)]
pub struct LedgerWriter {
    store: Arc<dyn Store>,
}

impl LedgerWriter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Write a provisional `pending` row
    pub async fn record_transaction(&self, new: NewTransaction) -> Result<TransactionId, StoreError> {
        let tx = Transaction::pending(new, Utc::now());
        self.store.insert_transaction(&tx).await?;
        debug!(
            transaction_id = %tx.id,
            kind = %tx.kind,
            amount = tx.amount.value(),
            "Recorded pending transaction"
        );
        Ok(tx.id)
    }

    pub async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        self.store.get_transaction(id).await
    }

    pub async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        self.store.find_transaction_by_external_id(external_id).await
    }

    pub async fn attach_external_id(
        &self,
        id: TransactionId,
        external_id: &str,
    ) -> Result<bool, StoreError> {
        self.store.attach_external_id(id, external_id).await
    }

    /// Atomic balance increment (negative delta debits)
    pub async fn update_balance(
        &self,
        account_id: AccountId,
        delta: Cents,
    ) -> Result<Cents, StoreError> {
        let balance = self.store.update_balance(account_id, delta).await?;
        debug!(account_id = %account_id, delta = delta.value(), balance = balance.value(), "Balance updated");
        Ok(balance)
    }

    /// `pending → completed`, crediting the counterparty its net amount.
    /// Returns false when another path already finalized the row.
    pub async fn complete(
        &self,
        tx: &Transaction,
        external_id: Option<&str>,
    ) -> Result<bool, StoreError> {
        let won = self
            .store
            .finalize_transaction(
                tx.id,
                TransactionStatus::Completed,
                &Finalize {
                    external_id: external_id.map(str::to_string),
                    failure_reason: None,
                    credit: tx.recipient_credit(),
                },
            )
            .await?;
        if won {
            info!(
                transaction_id = %tx.id,
                external_id = external_id.unwrap_or_default(),
                net = tx.net_amount.value(),
                "Transaction completed"
            );
        }
        Ok(won)
    }

    /// `pending → failed`; `refund` reverses a debit taken when the row was
    /// written (payouts)
    pub async fn fail(
        &self,
        tx: &Transaction,
        reason: &str,
        refund: Option<BalanceCredit>,
    ) -> Result<bool, StoreError> {
        let won = self
            .store
            .finalize_transaction(
                tx.id,
                TransactionStatus::Failed,
                &Finalize {
                    external_id: None,
                    failure_reason: Some(reason.to_string()),
                    credit: refund,
                },
            )
            .await?;
        if won {
            info!(transaction_id = %tx.id, reason, "Transaction failed");
        }
        Ok(won)
    }

    /// Generic status transition
    pub async fn finalize(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        finalize: &Finalize,
    ) -> Result<bool, StoreError> {
        self.store.finalize_transaction(id, to, finalize).await
    }

    pub async fn stale_pending(
        &self,
        older_than: chrono::DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.store.find_stale_pending(older_than, limit).await
    }
}
