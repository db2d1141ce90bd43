//! Event dispatch

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::events::{Envelope, PaymentIntentObject, PayoutObject, RailEvent};
use super::signature::verify_signature;
use super::{WebhookError, WebhookOutcome};
use crate::core_types::TransactionId;
use crate::ledger::{Transaction, TransactionKind, TransactionStatus};
use crate::payment::PaymentOrchestrator;
use crate::profiles::payout_refund;
use crate::rail::METADATA_TRANSACTION_ID;
use crate::store::Store;

pub struct WebhookReconciler {
    store: Arc<dyn Store>,
    orchestrator: Arc<PaymentOrchestrator>,
    secret: String,
    tolerance_secs: i64,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        orchestrator: Arc<PaymentOrchestrator>,
        secret: impl Into<String>,
        tolerance_secs: i64,
    ) -> Self {
        Self {
            store,
            orchestrator,
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verify, parse and apply one delivery
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let header = signature
            .ok_or_else(|| WebhookError::InvalidSignature("missing signature header".to_string()))?;
        verify_signature(
            payload,
            header,
            &self.secret,
            self.tolerance_secs,
            Utc::now().timestamp(),
        )?;

        let envelope: Envelope = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        self.apply(&envelope).await
    }

    /// Apply a verified event once
    pub async fn apply(&self, envelope: &Envelope) -> Result<WebhookOutcome, WebhookError> {
        if self.store.is_event_processed(&envelope.id).await? {
            debug!(event_id = %envelope.id, "Duplicate webhook event");
            return Ok(WebhookOutcome::Duplicate);
        }

        let outcome = match envelope.event()? {
            RailEvent::SubscriptionUpserted(sub) => {
                let applied = self
                    .store
                    .apply_subscription(
                        &sub.customer,
                        Some(&sub.to_subscription()),
                        envelope.created_at()?,
                    )
                    .await?;
                applied_or_stale(applied, envelope)
            }
            RailEvent::SubscriptionDeleted(sub) => {
                let applied = self
                    .store
                    .apply_subscription(&sub.customer, None, envelope.created_at()?)
                    .await?;
                applied_or_stale(applied, envelope)
            }
            RailEvent::PaymentSucceeded(intent) => self.payment_succeeded(envelope, &intent).await?,
            RailEvent::PaymentFailed { intent, reason } => {
                self.payment_failed(envelope, &intent, &reason).await?
            }
            RailEvent::AccountUpdated(account) => {
                let completed = account.onboarding_completed();
                if self.store.set_payee_onboarding(&account.id, completed).await? {
                    info!(
                        event_id = %envelope.id,
                        payee_id = %account.id,
                        onboarding_completed = completed,
                        "Payee onboarding updated"
                    );
                    WebhookOutcome::Applied
                } else {
                    WebhookOutcome::Ignored
                }
            }
            RailEvent::PayoutPaid(payout) => match self.payout_tx(&payout).await? {
                Some(tx) => {
                    self.orchestrator.ledger().complete(&tx, Some(&payout.id)).await?;
                    WebhookOutcome::Applied
                }
                None => unknown(envelope, &payout.id),
            },
            RailEvent::PayoutFailed { payout, reason } => match self.payout_tx(&payout).await? {
                Some(tx) => {
                    self.orchestrator
                        .ledger()
                        .fail(&tx, &reason, Some(payout_refund(&tx)))
                        .await?;
                    WebhookOutcome::Applied
                }
                None => unknown(envelope, &payout.id),
            },
            RailEvent::Unhandled => {
                debug!(event_id = %envelope.id, event_type = %envelope.event_type, "Ignoring webhook event");
                WebhookOutcome::Ignored
            }
        };

        self.store
            .record_event(&envelope.id, &envelope.event_type)
            .await?;
        debug!(event_id = %envelope.id, outcome = ?outcome, "Webhook event processed");
        Ok(outcome)
    }

    async fn payment_succeeded(
        &self,
        envelope: &Envelope,
        intent: &PaymentIntentObject,
    ) -> Result<WebhookOutcome, WebhookError> {
        let Some(tx) = self.intent_tx(intent).await? else {
            return Ok(unknown(envelope, &intent.id));
        };
        if tx.status == TransactionStatus::Failed {
            error!(
                event_id = %envelope.id,
                transaction_id = %tx.id,
                external_id = %intent.id,
                "Rail reports success for a failed transaction"
            );
            return Ok(WebhookOutcome::Ignored);
        }
        // completed rows still pass through: a withdrawal may be waiting on it
        self.orchestrator.complete_succeeded(&tx, &intent.id).await?;
        info!(event_id = %envelope.id, transaction_id = %tx.id, "Payment succeeded");
        Ok(WebhookOutcome::Applied)
    }

    async fn payment_failed(
        &self,
        envelope: &Envelope,
        intent: &PaymentIntentObject,
        reason: &str,
    ) -> Result<WebhookOutcome, WebhookError> {
        let Some(tx) = self.intent_tx(intent).await? else {
            return Ok(unknown(envelope, &intent.id));
        };
        if tx.status != TransactionStatus::Pending {
            debug!(
                event_id = %envelope.id,
                transaction_id = %tx.id,
                status = %tx.status,
                "Failure event for settled transaction"
            );
            return Ok(WebhookOutcome::Ignored);
        }
        self.orchestrator.fail_attempt(&tx, reason, None).await?;
        info!(event_id = %envelope.id, transaction_id = %tx.id, reason, "Payment failed");
        Ok(WebhookOutcome::Applied)
    }

    /// Ledger row of an intent: by the transaction id it carries, else by
    /// its external id
    async fn intent_tx(
        &self,
        intent: &PaymentIntentObject,
    ) -> Result<Option<Transaction>, WebhookError> {
        self.tx_for(&intent.metadata, &intent.id).await
    }

    async fn payout_tx(&self, payout: &PayoutObject) -> Result<Option<Transaction>, WebhookError> {
        Ok(self
            .tx_for(&payout.metadata, &payout.id)
            .await?
            .filter(|tx| tx.kind == TransactionKind::Payout))
    }

    async fn tx_for(
        &self,
        metadata: &BTreeMap<String, String>,
        external_id: &str,
    ) -> Result<Option<Transaction>, WebhookError> {
        let ledger = self.orchestrator.ledger();
        if let Some(id) = metadata
            .get(METADATA_TRANSACTION_ID)
            .and_then(|raw| raw.parse::<TransactionId>().ok())
            && let Some(tx) = ledger.get(id).await?
        {
            return Ok(Some(tx));
        }
        Ok(ledger.find_by_external_id(external_id).await?)
    }
}

fn applied_or_stale(applied: bool, envelope: &Envelope) -> WebhookOutcome {
    if applied {
        info!(event_id = %envelope.id, event_type = %envelope.event_type, "Subscription updated");
        WebhookOutcome::Applied
    } else {
        debug!(event_id = %envelope.id, "Subscription event older than applied state");
        WebhookOutcome::Ignored
    }
}

fn unknown(envelope: &Envelope, external_id: &str) -> WebhookOutcome {
    warn!(
        event_id = %envelope.id,
        event_type = %envelope.event_type,
        external_id,
        "No ledger transaction for rail object"
    );
    WebhookOutcome::Ignored
}
