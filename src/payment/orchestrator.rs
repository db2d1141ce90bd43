//! Payment Orchestrator
//!
//! Persist-before-call transfer driver. The ledger row id is the rail
//! idempotency key, so resuming an attempt can never charge twice.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{PaymentError, PaymentStarted, StartPayment, TransferOrder, TransferReceipt};
use crate::core_types::{AccountId, TransactionId};
use crate::fee::{FeeMode, FeeSchedule, compute_fees};
use crate::ledger::{
    BalanceCredit, LedgerWriter, NewTransaction, Transaction, TransactionKind, TransactionRefs,
    TransactionStatus,
};
use crate::rail::{
    METADATA_TRANSACTION_ID, PaymentIntent, PaymentIntentParams, RailError, RailRegistry,
};
use crate::store::{Account, Store, StoreError};

/// Failure reason recorded when a pending attempt never reached the rail
pub const EXPIRED_REASON: &str = "expired";

pub struct PaymentOrchestrator {
    store: Arc<dyn Store>,
    ledger: LedgerWriter,
    rails: RailRegistry,
    fees: FeeSchedule,
}

impl PaymentOrchestrator {
    pub fn new(store: Arc<dyn Store>, rails: RailRegistry, fees: FeeSchedule) -> Self {
        Self {
            ledger: LedgerWriter::new(store.clone()),
            store,
            rails,
            fees,
        }
    }

    pub fn ledger(&self) -> &LedgerWriter {
        &self.ledger
    }

    pub fn rails(&self) -> &RailRegistry {
        &self.rails
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fees
    }

    async fn account(&self, id: AccountId) -> Result<Account, PaymentError> {
        self.store
            .get_account(id)
            .await?
            .ok_or(PaymentError::AccountNotFound(id))
    }

    /// Charge `order.payer` and split the charge to `order.recipient`.
    ///
    /// The pending row is written before the rail is called. On an unknown
    /// outcome the row stays pending and the error carries its id; passing
    /// that id back as `order.resume` continues the same attempt.
    pub async fn create_transfer(
        &self,
        order: TransferOrder,
    ) -> Result<TransferReceipt, PaymentError> {
        if !order.fees.base.is_positive() {
            return Err(PaymentError::InvalidAmount(
                "Amount must be greater than zero".to_string(),
            ));
        }

        let payer = self.account(order.payer).await?;
        let customer_id = payer
            .payer
            .as_ref()
            .map(|p| p.customer_id.clone())
            .ok_or(PaymentError::NoPayerProfile(order.payer))?;

        let recipient = self.account(order.recipient).await?;
        let payee = recipient
            .payee
            .as_ref()
            .ok_or(PaymentError::NoRecipientProfile(order.recipient))?;
        if !payee.onboarding_completed {
            return Err(PaymentError::RecipientOnboardingIncomplete {
                onboarding_url: payee.onboarding_url.clone(),
            });
        }

        let rail = self.rails.get(order.rail)?;

        let tx = match order.resume {
            Some(id) => match self.ledger.get(id).await? {
                Some(tx) if tx.status == TransactionStatus::Completed => {
                    debug!(transaction_id = %id, "Resumed transaction already completed");
                    return Ok(receipt(&tx, TransactionStatus::Completed, None));
                }
                Some(tx) if tx.status == TransactionStatus::Failed => {
                    return Err(PaymentError::AlreadyFailed(id));
                }
                Some(tx) => tx,
                None => self.record(id, &order).await?,
            },
            None => self.record(TransactionId::new(), &order).await?,
        };

        let mut metadata = order.metadata;
        metadata.insert(METADATA_TRANSACTION_ID.to_string(), tx.id.to_string());
        let params = PaymentIntentParams {
            amount: tx.amount,
            payer_id: customer_id,
            destination: payee.payee_id.clone(),
            application_fee: tx.amount - tx.net_amount,
            idempotency_key: tx.id.to_string(),
            confirm: order.confirm,
            metadata,
        };

        debug!(
            transaction_id = %tx.id,
            rail = %rail.kind(),
            amount = tx.amount.value(),
            confirm = params.confirm,
            "Creating payment intent"
        );

        match rail.create_payment_intent(&params).await {
            Ok(intent) => self.settle_with_intent(&tx, &intent).await,
            Err(e) => Err(self.rail_failure(&tx, e).await),
        }
    }

    async fn record(
        &self,
        id: TransactionId,
        order: &TransferOrder,
    ) -> Result<Transaction, PaymentError> {
        let id = self
            .ledger
            .record_transaction(NewTransaction {
                id,
                account_id: order.payer,
                counterparty_id: Some(order.recipient),
                kind: order.kind,
                rail: order.rail,
                fees: order.fees,
                refs: order.refs,
            })
            .await?;
        self.ledger
            .get(id)
            .await?
            .ok_or(PaymentError::TransactionNotFound(id))
    }

    async fn rail_failure(&self, tx: &Transaction, err: RailError) -> PaymentError {
        if err.is_unknown_outcome() {
            warn!(
                transaction_id = %tx.id,
                error = %err,
                "Rail outcome unknown, transaction left pending"
            );
            return PaymentError::UnknownOutcome {
                transaction_id: tx.id,
                detail: err.to_string(),
            };
        }

        let (code, message, retryable) = match err {
            RailError::Rejected {
                code,
                message,
                retryable,
            } => (code, message, retryable),
            other => (other.code().to_string(), other.to_string(), false),
        };
        let reason = format!("{}: {}", code, message);
        if let Err(e) = self.fail_attempt(tx, &reason, None).await {
            error!(transaction_id = %tx.id, error = %e, "Failed to record rail rejection");
        }
        PaymentError::ExternalRailRejected {
            transaction_id: tx.id,
            code,
            message,
            retryable,
        }
    }

    /// Finalize a pending row from the rail's view of its intent
    pub async fn settle_with_intent(
        &self,
        tx: &Transaction,
        intent: &PaymentIntent,
    ) -> Result<TransferReceipt, PaymentError> {
        if intent.status.is_succeeded() {
            if let Err(e) = self.complete_succeeded(tx, &intent.id).await {
                error!(
                    transaction_id = %tx.id,
                    external_id = %intent.id,
                    error = %e,
                    "Rail captured payment but ledger write failed"
                );
                return Err(PaymentError::PartialFailure {
                    transaction_id: tx.id,
                    external_id: intent.id.clone(),
                    detail: e.to_string(),
                });
            }
            return Ok(TransferReceipt {
                transaction_id: tx.id,
                external_operation_id: Some(intent.id.clone()),
                client_secret: intent.client_secret.clone(),
                status: TransactionStatus::Completed,
                intent_status: Some(intent.status),
            });
        }

        if intent.status.is_failed() {
            self.fail_attempt(tx, "payment intent canceled", None).await?;
            return Err(PaymentError::ExternalRailRejected {
                transaction_id: tx.id,
                code: "payment_intent_canceled".to_string(),
                message: format!("Payment intent {} was canceled", intent.id),
                retryable: false,
            });
        }

        if let Err(e) = self.ledger.attach_external_id(tx.id, &intent.id).await {
            error!(
                transaction_id = %tx.id,
                external_id = %intent.id,
                error = %e,
                "Rail created intent but ledger write failed"
            );
            return Err(PaymentError::PartialFailure {
                transaction_id: tx.id,
                external_id: intent.id.clone(),
                detail: e.to_string(),
            });
        }
        debug!(
            transaction_id = %tx.id,
            external_id = %intent.id,
            intent_status = ?intent.status,
            "Awaiting rail confirmation"
        );
        Ok(TransferReceipt {
            transaction_id: tx.id,
            external_operation_id: Some(intent.id.clone()),
            client_secret: intent.client_secret.clone(),
            status: TransactionStatus::Pending,
            intent_status: Some(intent.status),
        })
    }

    /// `pending → completed`, crediting the recipient once.
    ///
    /// A transaction settling a withdrawal completes the request in the same
    /// atomic store call.
    pub async fn complete_succeeded(
        &self,
        tx: &Transaction,
        external_id: &str,
    ) -> Result<bool, StoreError> {
        if let Some(withdrawal_id) = tx.refs.withdrawal_id
            && self
                .store
                .complete_withdrawal(withdrawal_id, tx.id, external_id, tx.recipient_credit())
                .await?
        {
            info!(
                withdrawal_id = %withdrawal_id,
                transaction_id = %tx.id,
                external_id,
                "Withdrawal completed"
            );
            return Ok(true);
        }
        self.ledger.complete(tx, Some(external_id)).await
    }

    /// `pending → failed`, releasing a withdrawal's settlement attempt so the
    /// next `process` starts a fresh one
    pub async fn fail_attempt(
        &self,
        tx: &Transaction,
        reason: &str,
        refund: Option<BalanceCredit>,
    ) -> Result<bool, StoreError> {
        let won = self.ledger.fail(tx, reason, refund).await?;
        if let Some(withdrawal_id) = tx.refs.withdrawal_id
            && self.store.clear_settlement_tx(withdrawal_id, tx.id).await?
        {
            info!(
                withdrawal_id = %withdrawal_id,
                transaction_id = %tx.id,
                reason,
                "Withdrawal settlement attempt dropped"
            );
        }
        Ok(won)
    }

    /// Re-read a pending transaction's intent from the rail and finalize it.
    ///
    /// Without a stored external id the rail is searched by transaction id;
    /// a receipt with no `intent_status` means the rail has no trace of it.
    pub async fn confirm(&self, id: TransactionId) -> Result<TransferReceipt, PaymentError> {
        let tx = self
            .ledger
            .get(id)
            .await?
            .ok_or(PaymentError::TransactionNotFound(id))?;
        match tx.status {
            TransactionStatus::Completed => {
                return Ok(receipt(&tx, TransactionStatus::Completed, None));
            }
            TransactionStatus::Failed => return Err(PaymentError::AlreadyFailed(id)),
            TransactionStatus::Pending => {}
        }

        let rail = self.rails.get(tx.rail)?;
        let lookup = match tx.external_operation_id.as_deref() {
            Some(external_id) => rail.retrieve_payment_intent(external_id).await.map(Some),
            None => rail.find_payment_intent(tx.id).await,
        };

        match lookup {
            Ok(Some(intent)) => self.settle_with_intent(&tx, &intent).await,
            Ok(None) => Ok(receipt(&tx, TransactionStatus::Pending, None)),
            Err(e) if e.is_unknown_outcome() => Err(PaymentError::UnknownOutcome {
                transaction_id: id,
                detail: e.to_string(),
            }),
            Err(e) => Err(PaymentError::Rail(e)),
        }
    }

    /// Start a supporter payment to a project, or a peer payment.
    ///
    /// The intent is left unconfirmed; the payer confirms on-session with the
    /// returned client secret and the webhook finalizes the row.
    pub async fn start_payment(
        &self,
        payer: AccountId,
        request: StartPayment,
    ) -> Result<PaymentStarted, PaymentError> {
        let (recipient, mode, refs) = match (request.project_id, request.recipient_account_id) {
            (Some(project_id), None) => {
                let project = self
                    .store
                    .get_project(project_id)
                    .await?
                    .ok_or(PaymentError::ProjectNotFound(project_id))?;
                let refs = TransactionRefs {
                    project_id: Some(project_id),
                    ..Default::default()
                };
                (project.owner_id, FeeMode::PayerAbsorbs, refs)
            }
            (None, Some(recipient)) => (
                recipient,
                FeeMode::RecipientAbsorbs,
                TransactionRefs::default(),
            ),
            _ => {
                return Err(PaymentError::InvalidRequest(
                    "Exactly one of projectId or recipientAccountId is required".to_string(),
                ));
            }
        };
        if recipient == payer {
            return Err(PaymentError::InvalidRequest(
                "Payer and recipient must differ".to_string(),
            ));
        }

        let fees = compute_fees(request.amount, mode, &self.fees)?;
        let mut metadata = BTreeMap::new();
        if let Some(project_id) = refs.project_id {
            metadata.insert("project_id".to_string(), project_id.to_string());
        }

        let receipt = self
            .create_transfer(TransferOrder {
                payer,
                recipient,
                kind: TransactionKind::Payment,
                rail: request.method.unwrap_or(self.rails.primary_kind()),
                fees,
                refs,
                metadata,
                confirm: false,
                resume: None,
            })
            .await?;

        info!(
            transaction_id = %receipt.transaction_id,
            payer = %payer,
            recipient = %recipient,
            total = fees.total_charged.value(),
            "Payment started"
        );
        Ok(PaymentStarted { receipt, fees })
    }
}

fn receipt(
    tx: &Transaction,
    status: TransactionStatus,
    client_secret: Option<String>,
) -> TransferReceipt {
    TransferReceipt {
        transaction_id: tx.id,
        external_operation_id: tx.external_operation_id.clone(),
        client_secret,
        status,
        intent_status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Cents;
    use crate::rail::{IntentStatus, MockOutcome, MockRail, PaymentRail, RailKind};
    use crate::store::{DirectoryStore, MemoryStore, PayeeProfile, PayerProfile};
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        rail: Arc<MockRail>,
        orchestrator: PaymentOrchestrator,
        payer: AccountId,
        recipient: AccountId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let rail = Arc::new(MockRail::new());

        let mut payer = Account::new("payer@example.com");
        payer.payer = Some(PayerProfile {
            customer_id: "cus_payer".into(),
        });
        let mut recipient = Account::new("recipient@example.com");
        recipient.payee = Some(PayeeProfile {
            payee_id: "acct_recipient".into(),
            onboarding_url: "https://connect.mock.test/onboarding/acct_recipient".into(),
            onboarding_completed: true,
        });
        store.insert_account(&payer).await.unwrap();
        store.insert_account(&recipient).await.unwrap();

        let rails = RailRegistry::new(RailKind::CardTransfer).with(
            RailKind::CardTransfer,
            rail.clone() as Arc<dyn PaymentRail>,
            Duration::from_secs(1),
        );
        let orchestrator =
            PaymentOrchestrator::new(store.clone(), rails, FeeSchedule::default());
        Fixture {
            store,
            rail,
            orchestrator,
            payer: payer.id,
            recipient: recipient.id,
        }
    }

    fn order(f: &Fixture, confirm: bool) -> TransferOrder {
        TransferOrder {
            payer: f.payer,
            recipient: f.recipient,
            kind: TransactionKind::Payment,
            rail: RailKind::CardTransfer,
            fees: compute_fees(Cents(10_000), FeeMode::PayerAbsorbs, &FeeSchedule::default())
                .unwrap(),
            refs: TransactionRefs::default(),
            metadata: BTreeMap::new(),
            confirm,
            resume: None,
        }
    }

    async fn balance(f: &Fixture, id: AccountId) -> Cents {
        f.store.get_account(id).await.unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn test_confirmed_transfer_completes_and_credits() {
        let f = fixture().await;
        let receipt = f.orchestrator.create_transfer(order(&f, true)).await.unwrap();

        assert_eq!(receipt.status, TransactionStatus::Completed);
        assert_eq!(balance(&f, f.recipient).await, Cents(10_000));
        let tx = f.orchestrator.ledger().get(receipt.transaction_id).await.unwrap().unwrap();
        assert_eq!(tx.amount, Cents(10_520));
        assert_eq!(tx.external_operation_id, receipt.external_operation_id);
    }

    #[tokio::test]
    async fn test_unconfirmed_transfer_stays_pending() {
        let f = fixture().await;
        let receipt = f.orchestrator.create_transfer(order(&f, false)).await.unwrap();

        assert_eq!(receipt.status, TransactionStatus::Pending);
        assert!(receipt.client_secret.is_some());
        assert_eq!(receipt.intent_status, Some(IntentStatus::RequiresConfirmation));
        assert_eq!(balance(&f, f.recipient).await, Cents::ZERO);

        let intent_id = receipt.external_operation_id.unwrap();
        f.rail.set_intent_status(&intent_id, IntentStatus::Succeeded);
        let confirmed = f.orchestrator.confirm(receipt.transaction_id).await.unwrap();
        assert_eq!(confirmed.status, TransactionStatus::Completed);
        assert_eq!(balance(&f, f.recipient).await, Cents(10_000));
    }

    #[tokio::test]
    async fn test_rejection_fails_row() {
        let f = fixture().await;
        f.rail.set_outcome(MockOutcome::Reject {
            code: "card_declined".into(),
            retryable: false,
        });
        let err = f.orchestrator.create_transfer(order(&f, true)).await.unwrap_err();
        let PaymentError::ExternalRailRejected {
            transaction_id,
            code,
            retryable,
            ..
        } = err
        else {
            panic!("expected rejection, got {:?}", err);
        };
        assert_eq!(code, "card_declined");
        assert!(!retryable);

        let tx = f.orchestrator.ledger().get(transaction_id).await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);
        assert_eq!(balance(&f, f.recipient).await, Cents::ZERO);
    }

    #[tokio::test]
    async fn test_lost_response_then_resume_charges_once() {
        let f = fixture().await;
        f.rail.set_outcome(MockOutcome::LoseResponse);
        let err = f.orchestrator.create_transfer(order(&f, true)).await.unwrap_err();
        let PaymentError::UnknownOutcome { transaction_id, .. } = err else {
            panic!("expected unknown outcome, got {:?}", err);
        };
        let tx = f.orchestrator.ledger().get(transaction_id).await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(balance(&f, f.recipient).await, Cents::ZERO);

        f.rail.set_outcome(MockOutcome::Succeed);
        let mut retry = order(&f, true);
        retry.resume = Some(transaction_id);
        let receipt = f.orchestrator.create_transfer(retry).await.unwrap();

        assert_eq!(receipt.transaction_id, transaction_id);
        assert_eq!(receipt.status, TransactionStatus::Completed);
        assert_eq!(f.rail.succeeded_charges(), 1);
        assert_eq!(balance(&f, f.recipient).await, Cents(10_000));
    }

    #[tokio::test]
    async fn test_preconditions() {
        let f = fixture().await;

        let mut reversed = order(&f, true);
        std::mem::swap(&mut reversed.payer, &mut reversed.recipient);
        assert!(matches!(
            f.orchestrator.create_transfer(reversed).await,
            Err(PaymentError::NoPayerProfile(_))
        ));

        let mut pending = Account::new("new@example.com");
        pending.payee = Some(PayeeProfile {
            payee_id: "acct_new".into(),
            onboarding_url: "https://connect.mock.test/onboarding/acct_new".into(),
            onboarding_completed: false,
        });
        f.store.insert_account(&pending).await.unwrap();
        let mut to_pending = order(&f, true);
        to_pending.recipient = pending.id;
        match f.orchestrator.create_transfer(to_pending).await {
            Err(PaymentError::RecipientOnboardingIncomplete { onboarding_url }) => {
                assert!(onboarding_url.ends_with("acct_new"));
            }
            other => panic!("expected onboarding error, got {:?}", other),
        }
        assert_eq!(f.rail.intent_calls(), 0);
    }

    #[tokio::test]
    async fn test_start_peer_payment_uses_recipient_absorbs() {
        let f = fixture().await;
        let started = f
            .orchestrator
            .start_payment(
                f.payer,
                StartPayment {
                    amount: Cents(50_000),
                    recipient_account_id: Some(f.recipient),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(started.fees.total_charged, Cents(50_000));
        assert_eq!(started.fees.net_to_recipient, Cents(49_000));
        assert_eq!(started.receipt.status, TransactionStatus::Pending);

        let err = f
            .orchestrator
            .start_payment(f.payer, StartPayment {
                amount: Cents(100),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRequest(_)));
    }
}
