//! Payer / payee profile provisioning and payee payouts

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::core_types::{AccountId, TransactionId};
use crate::error::SettlementError;
use crate::fee::FeeBreakdown;
use crate::ledger::{
    BalanceCredit, LedgerWriter, NewTransaction, Transaction, TransactionKind, TransactionRefs,
    TransactionStatus,
};
use crate::money::Cents;
use crate::payment::orchestrator::EXPIRED_REASON;
use crate::rail::{METADATA_TRANSACTION_ID, Payout, PayoutParams, RailRegistry};
use crate::store::{Account, PayeeProfile, PayerProfile, Store, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutReceipt {
    pub transaction_id: TransactionId,
    pub payout_id: Option<String>,
    pub status: TransactionStatus,
}

pub struct ProfileService {
    store: Arc<dyn Store>,
    ledger: LedgerWriter,
    rails: RailRegistry,
}

impl ProfileService {
    pub fn new(store: Arc<dyn Store>, rails: RailRegistry) -> Self {
        Self {
            ledger: LedgerWriter::new(store.clone()),
            store,
            rails,
        }
    }

    async fn account(&self, id: AccountId) -> Result<Account, SettlementError> {
        self.store
            .get_account(id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("account {}", id)))
    }

    /// Create the rail customer for this account, once
    pub async fn ensure_payer_profile(
        &self,
        account_id: AccountId,
    ) -> Result<PayerProfile, SettlementError> {
        let account = self.account(account_id).await?;
        if let Some(existing) = account.payer {
            return Ok(existing);
        }

        let customer_id = self.rails.primary()?.create_customer(&account.email).await?;
        let stored = self
            .store
            .set_payer_profile_if_absent(account_id, &PayerProfile { customer_id: customer_id.clone() })
            .await?;
        if stored.customer_id != customer_id {
            warn!(
                account_id = %account_id,
                orphaned = %customer_id,
                "Concurrent payer profile creation, keeping the first"
            );
        } else {
            info!(account_id = %account_id, customer_id = %customer_id, "Payer profile created");
        }
        Ok(stored)
    }

    /// Create the connected payee account for this account, once.
    ///
    /// Onboarding starts incomplete; `account.updated` webhooks flip it.
    pub async fn ensure_payee_profile(
        &self,
        account_id: AccountId,
    ) -> Result<PayeeProfile, SettlementError> {
        let account = self.account(account_id).await?;
        if let Some(existing) = account.payee {
            return Ok(existing);
        }

        let connect = self
            .rails
            .primary()?
            .create_connect_account(&account.email)
            .await?;
        let stored = self
            .store
            .set_payee_profile_if_absent(
                account_id,
                &PayeeProfile {
                    payee_id: connect.payee_id.clone(),
                    onboarding_url: connect.onboarding_url,
                    onboarding_completed: false,
                },
            )
            .await?;
        if stored.payee_id != connect.payee_id {
            warn!(
                account_id = %account_id,
                orphaned = %connect.payee_id,
                "Concurrent payee profile creation, keeping the first"
            );
        } else {
            info!(account_id = %account_id, payee_id = %stored.payee_id, "Payee profile created");
        }
        Ok(stored)
    }

    /// Pay `amount` of the account's balance out to its bank.
    ///
    /// The pending `payout` row is written and the balance debited before
    /// the rail call; a rejection refunds the debit. `payout.*` webhooks
    /// and the reconciliation worker settle the rest.
    pub async fn request_payout(
        &self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<PayoutReceipt, SettlementError> {
        if !amount.is_positive() {
            return Err(SettlementError::Validation(
                "Amount must be greater than zero".to_string(),
            ));
        }
        let account = self.account(account_id).await?;
        let payee = match &account.payee {
            None => return Err(SettlementError::precondition("Account has no payee profile")),
            Some(p) if !p.onboarding_completed => {
                return Err(SettlementError::onboarding_incomplete(p.onboarding_url.clone()));
            }
            Some(p) => p.clone(),
        };
        let rail = self.rails.primary()?;

        let tx_id = self
            .ledger
            .record_transaction(NewTransaction {
                id: TransactionId::new(),
                account_id,
                counterparty_id: None,
                kind: TransactionKind::Payout,
                rail: rail.kind(),
                fees: FeeBreakdown {
                    base: amount,
                    processing_fee: Cents::ZERO,
                    platform_fee: Cents::ZERO,
                    total_charged: amount,
                    net_to_recipient: amount,
                },
                refs: TransactionRefs::default(),
            })
            .await?;
        let tx = self
            .ledger
            .get(tx_id)
            .await?
            .ok_or_else(|| SettlementError::Internal(format!("transaction {} vanished", tx_id)))?;

        if let Err(e) = self.ledger.update_balance(account_id, -amount).await {
            self.ledger.fail(&tx, "insufficient balance", None).await?;
            return Err(match e {
                StoreError::InsufficientBalance(_) => {
                    SettlementError::precondition("Insufficient balance")
                }
                other => other.into(),
            });
        }
        let result = rail
            .create_payout(&PayoutParams {
                amount,
                destination_account: payee.payee_id.clone(),
                idempotency_key: tx_id.to_string(),
                metadata: BTreeMap::from([(METADATA_TRANSACTION_ID.to_string(), tx_id.to_string())]),
            })
            .await;

        let payout = match result {
            Ok(payout) => payout,
            Err(e) if e.is_unknown_outcome() => {
                // the reconciliation worker finds it by transaction id
                warn!(transaction_id = %tx_id, error = %e, "Payout outcome unknown");
                return Err(SettlementError::UnknownOutcome {
                    transaction_id: tx_id,
                    detail: e.to_string(),
                });
            }
            Err(e) => {
                let reason = format!("{}: {}", e.code(), e);
                self.ledger.fail(&tx, &reason, Some(payout_refund(&tx))).await?;
                return Err(e.into());
            }
        };

        let status = match self.settle_payout(&tx, &payout).await {
            Ok(status) => status,
            Err(e) => {
                error!(
                    transaction_id = %tx_id,
                    payout_id = %payout.id,
                    error = %e,
                    "Rail accepted payout but ledger write failed"
                );
                return Err(SettlementError::PartialFailure {
                    transaction_id: tx_id,
                    external_id: payout.id,
                    detail: e.to_string(),
                });
            }
        };

        info!(
            transaction_id = %tx_id,
            account_id = %account_id,
            payout_id = %payout.id,
            amount = amount.value(),
            status = %status,
            "Payout requested"
        );
        Ok(PayoutReceipt {
            transaction_id: tx_id,
            payout_id: Some(payout.id),
            status,
        })
    }

    /// Re-read a pending payout from the rail and settle its row.
    ///
    /// Without a stored payout id the payee's payouts are searched by
    /// transaction id. A row the rail never heard of is failed and refunded
    /// once it was created before `expire_before`.
    pub async fn reconcile_payout(
        &self,
        tx: &Transaction,
        expire_before: DateTime<Utc>,
    ) -> Result<TransactionStatus, SettlementError> {
        if tx.kind != TransactionKind::Payout {
            return Err(SettlementError::Internal(format!(
                "transaction {} is not a payout",
                tx.id
            )));
        }
        if tx.status != TransactionStatus::Pending {
            return Ok(tx.status);
        }

        let payee = self
            .account(tx.account_id)
            .await?
            .payee
            .ok_or_else(|| SettlementError::precondition("Account has no payee profile"))?;
        let rail = self.rails.get(tx.rail)?;
        let payout = match tx.external_operation_id.as_deref() {
            Some(payout_id) => Some(rail.retrieve_payout(&payee.payee_id, payout_id).await?),
            None => rail.find_payout(&payee.payee_id, tx.id).await?,
        };

        match payout {
            Some(payout) => Ok(self.settle_payout(tx, &payout).await?),
            None if tx.created_at < expire_before => {
                self.ledger
                    .fail(tx, EXPIRED_REASON, Some(payout_refund(tx)))
                    .await?;
                info!(transaction_id = %tx.id, "Expired payout with no rail trace");
                Ok(self.current_status(tx).await?)
            }
            None => Ok(TransactionStatus::Pending),
        }
    }

    /// Apply the rail's view of a payout to its pending row
    async fn settle_payout(
        &self,
        tx: &Transaction,
        payout: &Payout,
    ) -> Result<TransactionStatus, StoreError> {
        if payout.status.is_paid() {
            self.ledger.complete(tx, Some(&payout.id)).await?;
        } else if payout.status.is_failed() {
            self.ledger
                .fail(tx, &format!("payout {:?}", payout.status), Some(payout_refund(tx)))
                .await?;
        } else {
            if tx.external_operation_id.as_deref() != Some(payout.id.as_str()) {
                self.ledger.attach_external_id(tx.id, &payout.id).await?;
            }
            return Ok(TransactionStatus::Pending);
        }
        self.current_status(tx).await
    }

    /// Status after a CAS that another path may have won
    async fn current_status(&self, tx: &Transaction) -> Result<TransactionStatus, StoreError> {
        Ok(self.ledger.get(tx.id).await?.map_or(tx.status, |t| t.status))
    }
}

/// Returns the debit taken when the payout row was written
pub(crate) fn payout_refund(tx: &Transaction) -> BalanceCredit {
    BalanceCredit {
        account_id: tx.account_id,
        delta: tx.amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rail::{MockRail, PaymentRail, RailKind};
    use crate::store::{DirectoryStore, LedgerStore, MemoryStore};
    use std::time::Duration;

    fn service(store: Arc<MemoryStore>, rail: Arc<MockRail>) -> ProfileService {
        let rails = RailRegistry::new(RailKind::CardTransfer).with(
            RailKind::CardTransfer,
            rail as Arc<dyn PaymentRail>,
            Duration::from_secs(1),
        );
        ProfileService::new(store, rails)
    }

    #[tokio::test]
    async fn test_profiles_created_once() {
        let store = Arc::new(MemoryStore::new());
        let rail = Arc::new(MockRail::new());
        let account = Account::new("partner@example.com");
        store.insert_account(&account).await.unwrap();
        let svc = service(store.clone(), rail);

        let first = svc.ensure_payee_profile(account.id).await.unwrap();
        let second = svc.ensure_payee_profile(account.id).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.onboarding_completed);
        assert!(first.onboarding_url.contains(&first.payee_id));

        let payer = svc.ensure_payer_profile(account.id).await.unwrap();
        assert!(payer.customer_id.starts_with("cus_"));
    }

    #[tokio::test]
    async fn test_payout_debits_and_refunds_on_rejection() {
        let store = Arc::new(MemoryStore::new());
        let rail = Arc::new(MockRail::new());
        let mut account = Account::new("partner@example.com");
        account.payee = Some(PayeeProfile {
            payee_id: "acct_p".into(),
            onboarding_url: "https://connect.mock.test/onboarding/acct_p".into(),
            onboarding_completed: true,
        });
        store.insert_account(&account).await.unwrap();
        store.update_balance(account.id, Cents(5_000)).await.unwrap();
        let svc = service(store.clone(), rail.clone());

        // rail holds nothing yet: rejected, local debit refunded
        let err = svc.request_payout(account.id, Cents(2_000)).await.unwrap_err();
        assert_eq!(err.http_status(), 502);
        let balance = store.get_account(account.id).await.unwrap().unwrap().balance;
        assert_eq!(balance, Cents(5_000));

        rail.credit_balance("acct_p", Cents(5_000));
        let receipt = svc.request_payout(account.id, Cents(2_000)).await.unwrap();
        assert_eq!(receipt.status, TransactionStatus::Pending);
        let balance = store.get_account(account.id).await.unwrap().unwrap().balance;
        assert_eq!(balance, Cents(3_000));

        let err = svc.request_payout(account.id, Cents(10_000)).await.unwrap_err();
        assert_eq!(err.code(), "PRECONDITION_FAILED");
    }
}
