//! In-process payment rail for tests and local development

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::error::RailError;
use super::types::*;
use super::{METADATA_TRANSACTION_ID, PaymentRail};
use crate::core_types::TransactionId;
use crate::money::{CURRENCY, Cents};

/// How the mock answers `create_payment_intent`; `create_payout` honors
/// `LoseResponse` only
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MockOutcome {
    /// Confirmed intents succeed; unconfirmed ones wait for confirmation
    #[default]
    Succeed,
    /// Intent is created but stays `processing`
    Processing,
    /// Refuse without creating anything
    Reject { code: String, retryable: bool },
    /// Create the intent or payout, then report a timeout to the caller
    LoseResponse,
}

#[derive(Debug, Clone)]
struct StoredIntent {
    intent: PaymentIntent,
    destination: String,
    /// Amount forwarded to `destination` once captured
    net: Cents,
    metadata: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct StoredPayout {
    payout: Payout,
    destination: String,
    metadata: std::collections::BTreeMap<String, String>,
}

#[derive(Default)]
struct MockState {
    intents: HashMap<String, StoredIntent>,
    /// idempotency key -> intent id
    intent_keys: HashMap<String, String>,
    /// idempotency key -> payout
    payouts: HashMap<String, StoredPayout>,
    balances: HashMap<String, Cents>,
    next_seq: u64,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_seq += 1;
        format!("{}_mock{:06}", prefix, self.next_seq)
    }
}

pub struct MockRail {
    state: Mutex<MockState>,
    outcome: Mutex<MockOutcome>,
    delay: Mutex<Option<Duration>>,
    /// Count of `create_payment_intent` calls, including dedup hits
    intent_calls: AtomicUsize,
    payout_calls: AtomicUsize,
}

impl Default for MockRail {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRail {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            outcome: Mutex::new(MockOutcome::Succeed),
            delay: Mutex::new(None),
            intent_calls: AtomicUsize::new(0),
            payout_calls: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, RailError> {
        self.state
            .lock()
            .map_err(|_| RailError::Transport("mock rail state poisoned".into()))
    }

    pub fn set_outcome(&self, outcome: MockOutcome) {
        if let Ok(mut current) = self.outcome.lock() {
            *current = outcome;
        }
    }

    /// Sleep this long before answering every call
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut current) = self.delay.lock() {
            *current = delay;
        }
    }

    fn outcome(&self) -> MockOutcome {
        self.outcome
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }

    async fn maybe_delay(&self) {
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn intent_calls(&self) -> usize {
        self.intent_calls.load(Ordering::SeqCst)
    }

    pub fn payout_calls(&self) -> usize {
        self.payout_calls.load(Ordering::SeqCst)
    }

    /// Number of distinct intents that captured money
    pub fn succeeded_charges(&self) -> usize {
        self.state
            .lock()
            .map(|s| {
                s.intents
                    .values()
                    .filter(|i| i.intent.status.is_succeeded())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Number of distinct intents ever created
    pub fn intents_created(&self) -> usize {
        self.state.lock().map(|s| s.intents.len()).unwrap_or(0)
    }

    pub fn intent(&self, intent_id: &str) -> Option<PaymentIntent> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.intents.get(intent_id).map(|i| i.intent.clone()))
    }

    /// Simulate the rail moving an intent to a new status (client confirmation,
    /// async capture, cancellation)
    pub fn set_intent_status(&self, intent_id: &str, status: IntentStatus) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let Some(stored) = state.intents.get_mut(intent_id) else {
            return false;
        };
        let newly_succeeded = status.is_succeeded() && !stored.intent.status.is_succeeded();
        stored.intent.status = status;
        if newly_succeeded {
            let (destination, net) = (stored.destination.clone(), stored.net);
            let entry = state.balances.entry(destination).or_default();
            *entry = *entry + net;
        }
        true
    }

    pub fn payouts_created(&self) -> usize {
        self.state.lock().map(|s| s.payouts.len()).unwrap_or(0)
    }

    /// Simulate the rail settling a payout; a failed payout returns the
    /// funds to the connected account
    pub fn set_payout_status(&self, payout_id: &str, status: PayoutStatus) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let Some(stored) = state.payouts.values_mut().find(|p| p.payout.id == payout_id) else {
            return false;
        };
        let newly_failed = status.is_failed() && !stored.payout.status.is_failed();
        stored.payout.status = status;
        let (destination, amount) = (stored.destination.clone(), stored.payout.amount);
        if newly_failed {
            let entry = state.balances.entry(destination).or_default();
            *entry = *entry + amount;
        }
        true
    }

    pub fn credit_balance(&self, payee_id: &str, amount: Cents) {
        if let Ok(mut state) = self.state.lock() {
            let entry = state.balances.entry(payee_id.to_string()).or_default();
            *entry = *entry + amount;
        }
    }
}

#[async_trait]
impl PaymentRail for MockRail {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_customer(&self, _email: &str) -> Result<String, RailError> {
        self.maybe_delay().await;
        let mut state = self.lock()?;
        Ok(state.next_id("cus"))
    }

    async fn create_connect_account(&self, _email: &str) -> Result<ConnectAccount, RailError> {
        self.maybe_delay().await;
        let mut state = self.lock()?;
        let payee_id = state.next_id("acct");
        Ok(ConnectAccount {
            onboarding_url: format!("https://connect.mock.test/onboarding/{}", payee_id),
            payee_id,
        })
    }

    async fn create_payment_intent(
        &self,
        params: &PaymentIntentParams,
    ) -> Result<PaymentIntent, RailError> {
        self.intent_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;

        let outcome = self.outcome();
        if let MockOutcome::Reject { code, retryable } = &outcome {
            return Err(RailError::Rejected {
                code: code.clone(),
                message: "mock rejection".to_string(),
                retryable: *retryable,
            });
        }

        let mut state = self.lock()?;
        let intent = match state.intent_keys.get(&params.idempotency_key).cloned() {
            Some(existing) => state
                .intents
                .get(&existing)
                .map(|i| i.intent.clone())
                .ok_or_else(|| RailError::InvalidResponse("dangling idempotency key".into()))?,
            None => {
                let id = state.next_id("pi");
                let status = match (&outcome, params.confirm) {
                    (MockOutcome::Processing, _) => IntentStatus::Processing,
                    (_, true) => IntentStatus::Succeeded,
                    (_, false) => IntentStatus::RequiresConfirmation,
                };
                let intent = PaymentIntent {
                    client_secret: Some(format!("{}_secret", id)),
                    id: id.clone(),
                    status,
                    amount: params.amount,
                };
                let net = params.amount - params.application_fee;
                if status.is_succeeded() {
                    let entry = state.balances.entry(params.destination.clone()).or_default();
                    *entry = *entry + net;
                }
                state.intents.insert(
                    id.clone(),
                    StoredIntent {
                        intent: intent.clone(),
                        destination: params.destination.clone(),
                        net,
                        metadata: params.metadata.clone(),
                    },
                );
                state
                    .intent_keys
                    .insert(params.idempotency_key.clone(), id);
                intent
            }
        };
        drop(state);

        if outcome == MockOutcome::LoseResponse {
            return Err(RailError::Timeout(Duration::ZERO));
        }
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, RailError> {
        self.maybe_delay().await;
        let state = self.lock()?;
        state
            .intents
            .get(intent_id)
            .map(|i| i.intent.clone())
            .ok_or_else(|| RailError::Rejected {
                code: "resource_missing".to_string(),
                message: format!("No such payment_intent: {}", intent_id),
                retryable: false,
            })
    }

    async fn find_payment_intent(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<PaymentIntent>, RailError> {
        self.maybe_delay().await;
        let wanted = transaction_id.to_string();
        let state = self.lock()?;
        Ok(state
            .intents
            .values()
            .find(|i| i.metadata.get(METADATA_TRANSACTION_ID) == Some(&wanted))
            .map(|i| i.intent.clone()))
    }

    async fn create_payout(&self, params: &PayoutParams) -> Result<Payout, RailError> {
        self.payout_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;

        let mut state = self.lock()?;
        if let Some(existing) = state.payouts.get(&params.idempotency_key) {
            return Ok(existing.payout.clone());
        }
        let available = state
            .balances
            .get(&params.destination_account)
            .copied()
            .unwrap_or_default();
        if available < params.amount {
            return Err(RailError::Rejected {
                code: "balance_insufficient".to_string(),
                message: "Insufficient available balance".to_string(),
                retryable: false,
            });
        }
        state
            .balances
            .insert(params.destination_account.clone(), available - params.amount);
        let payout = Payout {
            id: state.next_id("po"),
            status: PayoutStatus::Pending,
            amount: params.amount,
        };
        state.payouts.insert(
            params.idempotency_key.clone(),
            StoredPayout {
                payout: payout.clone(),
                destination: params.destination_account.clone(),
                metadata: params.metadata.clone(),
            },
        );
        drop(state);

        if self.outcome() == MockOutcome::LoseResponse {
            return Err(RailError::Timeout(Duration::ZERO));
        }
        Ok(payout)
    }

    async fn retrieve_payout(&self, payee_id: &str, payout_id: &str) -> Result<Payout, RailError> {
        self.maybe_delay().await;
        let state = self.lock()?;
        state
            .payouts
            .values()
            .find(|p| p.payout.id == payout_id && p.destination == payee_id)
            .map(|p| p.payout.clone())
            .ok_or_else(|| RailError::Rejected {
                code: "resource_missing".to_string(),
                message: format!("No such payout: {}", payout_id),
                retryable: false,
            })
    }

    async fn find_payout(
        &self,
        payee_id: &str,
        transaction_id: TransactionId,
    ) -> Result<Option<Payout>, RailError> {
        self.maybe_delay().await;
        let wanted = transaction_id.to_string();
        let state = self.lock()?;
        Ok(state
            .payouts
            .values()
            .find(|p| {
                p.destination == payee_id
                    && p.metadata.get(METADATA_TRANSACTION_ID) == Some(&wanted)
            })
            .map(|p| p.payout.clone()))
    }

    async fn retrieve_balance(&self, payee_id: &str) -> Result<RailBalance, RailError> {
        self.maybe_delay().await;
        let state = self.lock()?;
        let available = state.balances.get(payee_id).copied().unwrap_or_default();
        Ok(RailBalance {
            available: vec![BalanceAmount {
                amount: available,
                currency: CURRENCY.to_string(),
            }],
            pending: vec![BalanceAmount {
                amount: Cents::ZERO,
                currency: CURRENCY.to_string(),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params(key: &str, confirm: bool) -> PaymentIntentParams {
        PaymentIntentParams {
            amount: Cents(10_520),
            payer_id: "cus_1".into(),
            destination: "acct_1".into(),
            application_fee: Cents(520),
            idempotency_key: key.into(),
            confirm,
            metadata: BTreeMap::from([(METADATA_TRANSACTION_ID.to_string(), key.to_string())]),
        }
    }

    #[tokio::test]
    async fn test_idempotency_key_dedups() {
        let rail = MockRail::new();
        let a = rail.create_payment_intent(&params("k1", true)).await.unwrap();
        let b = rail.create_payment_intent(&params("k1", true)).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(rail.intent_calls(), 2);
        assert_eq!(rail.succeeded_charges(), 1);

        let balance = rail.retrieve_balance("acct_1").await.unwrap();
        assert_eq!(balance.available[0].amount, Cents(10_000));
    }

    #[tokio::test]
    async fn test_lose_response_still_creates() {
        let rail = MockRail::new();
        rail.set_outcome(MockOutcome::LoseResponse);
        let err = rail
            .create_payment_intent(&params("k2", true))
            .await
            .unwrap_err();
        assert!(err.is_unknown_outcome());
        assert_eq!(rail.intents_created(), 1);

        let tx = TransactionId::new();
        assert!(rail.find_payment_intent(tx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unconfirmed_then_confirmed() {
        let rail = MockRail::new();
        let intent = rail
            .create_payment_intent(&params("k3", false))
            .await
            .unwrap();
        assert_eq!(intent.status, IntentStatus::RequiresConfirmation);
        assert!(rail.set_intent_status(&intent.id, IntentStatus::Succeeded));
        assert_eq!(
            rail.retrieve_payment_intent(&intent.id).await.unwrap().status,
            IntentStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_payout_requires_balance() {
        let rail = MockRail::new();
        let tx = TransactionId::new();
        let payout = PayoutParams {
            amount: Cents(500),
            destination_account: "acct_9".into(),
            idempotency_key: tx.to_string(),
            metadata: BTreeMap::from([(METADATA_TRANSACTION_ID.to_string(), tx.to_string())]),
        };
        assert!(rail.create_payout(&payout).await.is_err());
        rail.credit_balance("acct_9", Cents(1_000));
        let first = rail.create_payout(&payout).await.unwrap();
        let again = rail.create_payout(&payout).await.unwrap();
        assert_eq!(first, again);
        let balance = rail.retrieve_balance("acct_9").await.unwrap();
        assert_eq!(balance.available[0].amount, Cents(500));

        let found = rail.find_payout("acct_9", tx).await.unwrap();
        assert_eq!(found, Some(first.clone()));
        assert!(rail.find_payout("acct_other", tx).await.unwrap().is_none());

        assert!(rail.set_payout_status(&first.id, PayoutStatus::Failed));
        let failed = rail.retrieve_payout("acct_9", &first.id).await.unwrap();
        assert_eq!(failed.status, PayoutStatus::Failed);
        let balance = rail.retrieve_balance("acct_9").await.unwrap();
        assert_eq!(balance.available[0].amount, Cents(1_000));
    }
}
