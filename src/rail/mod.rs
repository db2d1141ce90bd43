//! Payment Rails
//!
//! External payment networks the engine charges, splits and pays out through.
//! Every rail is reached through the [`PaymentRail`] trait and selected by the
//! closed [`RailKind`] enum via [`RailRegistry`].
//!
//! # Idempotency
//! Every mutating call carries an idempotency key. Retrying with the same key
//! MUST NOT create a second charge or payout on the rail.
//!
//! # Timeouts
//! Calls go through [`TimedRail`], which bounds each round trip with
//! `tokio::time::timeout`. An elapsed timer yields [`RailError::Timeout`],
//! an unknown outcome.

pub mod error;
pub mod http;
#[cfg(any(test, feature = "mock-api"))]
pub mod mock;
pub mod types;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core_types::TransactionId;

pub use error::RailError;
pub use http::HttpRail;
#[cfg(any(test, feature = "mock-api"))]
pub use mock::{MockOutcome, MockRail};
pub use types::{
    BalanceAmount, ConnectAccount, IntentStatus, PaymentIntent, PaymentIntentParams, Payout,
    PayoutParams, PayoutStatus, RailBalance, RailKind,
};

/// Metadata key under which the ledger transaction id travels with an intent
/// or payout
pub const METADATA_TRANSACTION_ID: &str = "transaction_id";

/// Payment rail trait
///
/// Implementations MUST honor idempotency keys: a second `create_*` call with
/// the same key returns the object created by the first.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Rail name for logging
    fn name(&self) -> &'static str;

    /// Create a payer (customer) profile, returns the rail customer id
    async fn create_customer(&self, email: &str) -> Result<String, RailError>;

    /// Create a connected payee account with a hosted onboarding link
    async fn create_connect_account(&self, email: &str) -> Result<ConnectAccount, RailError>;

    /// Create (and optionally confirm) a charge split to a connected payee
    async fn create_payment_intent(
        &self,
        params: &PaymentIntentParams,
    ) -> Result<PaymentIntent, RailError>;

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, RailError>;

    /// Look up the intent created for a ledger transaction, if any
    ///
    /// Used when the create call's response was lost and no external id was
    /// ever stored locally.
    async fn find_payment_intent(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<PaymentIntent>, RailError>;

    /// Pay out a connected account's balance to its bank
    async fn create_payout(&self, params: &PayoutParams) -> Result<Payout, RailError>;

    async fn retrieve_payout(&self, payee_id: &str, payout_id: &str) -> Result<Payout, RailError>;

    /// Look up the payout created for a ledger transaction on a connected
    /// account, if any
    async fn find_payout(
        &self,
        payee_id: &str,
        transaction_id: TransactionId,
    ) -> Result<Option<Payout>, RailError>;

    async fn retrieve_balance(&self, payee_id: &str) -> Result<RailBalance, RailError>;
}

/// Run a rail future with an upper bound on its duration.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, RailError>
where
    F: Future<Output = Result<T, RailError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RailError::Timeout(limit)),
    }
}

/// A rail together with its call deadline
#[derive(Clone)]
pub struct TimedRail {
    kind: RailKind,
    inner: Arc<dyn PaymentRail>,
    timeout: Duration,
}

impl TimedRail {
    pub fn new(kind: RailKind, inner: Arc<dyn PaymentRail>, timeout: Duration) -> Self {
        Self {
            kind,
            inner,
            timeout,
        }
    }

    pub fn kind(&self) -> RailKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn create_customer(&self, email: &str) -> Result<String, RailError> {
        bounded(self.timeout, self.inner.create_customer(email)).await
    }

    pub async fn create_connect_account(&self, email: &str) -> Result<ConnectAccount, RailError> {
        bounded(self.timeout, self.inner.create_connect_account(email)).await
    }

    pub async fn create_payment_intent(
        &self,
        params: &PaymentIntentParams,
    ) -> Result<PaymentIntent, RailError> {
        bounded(self.timeout, self.inner.create_payment_intent(params)).await
    }

    pub async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<PaymentIntent, RailError> {
        bounded(self.timeout, self.inner.retrieve_payment_intent(intent_id)).await
    }

    pub async fn find_payment_intent(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<PaymentIntent>, RailError> {
        bounded(self.timeout, self.inner.find_payment_intent(transaction_id)).await
    }

    pub async fn create_payout(&self, params: &PayoutParams) -> Result<Payout, RailError> {
        bounded(self.timeout, self.inner.create_payout(params)).await
    }

    pub async fn retrieve_payout(&self, payee_id: &str, payout_id: &str) -> Result<Payout, RailError> {
        bounded(self.timeout, self.inner.retrieve_payout(payee_id, payout_id)).await
    }

    pub async fn find_payout(
        &self,
        payee_id: &str,
        transaction_id: TransactionId,
    ) -> Result<Option<Payout>, RailError> {
        bounded(self.timeout, self.inner.find_payout(payee_id, transaction_id)).await
    }

    pub async fn retrieve_balance(&self, payee_id: &str) -> Result<RailBalance, RailError> {
        bounded(self.timeout, self.inner.retrieve_balance(payee_id)).await
    }
}

/// Maps each configured [`RailKind`] to its implementation
#[derive(Clone, Default)]
pub struct RailRegistry {
    rails: HashMap<RailKind, TimedRail>,
    /// Rail used for profile provisioning and partner settlement
    primary: RailKind,
}

impl RailRegistry {
    pub fn new(primary: RailKind) -> Self {
        Self {
            rails: HashMap::new(),
            primary,
        }
    }

    /// Register (or replace) the implementation for a rail kind
    pub fn register(&mut self, kind: RailKind, rail: Arc<dyn PaymentRail>, timeout: Duration) {
        self.rails.insert(kind, TimedRail::new(kind, rail, timeout));
    }

    pub fn with(mut self, kind: RailKind, rail: Arc<dyn PaymentRail>, timeout: Duration) -> Self {
        self.register(kind, rail, timeout);
        self
    }

    pub fn get(&self, kind: RailKind) -> Result<&TimedRail, RailError> {
        self.rails.get(&kind).ok_or(RailError::Unsupported(kind))
    }

    pub fn primary(&self) -> Result<&TimedRail, RailError> {
        self.get(self.primary)
    }

    pub fn primary_kind(&self) -> RailKind {
        self.primary
    }

    pub fn kinds(&self) -> impl Iterator<Item = RailKind> + '_ {
        self.rails.keys().copied()
    }
}
