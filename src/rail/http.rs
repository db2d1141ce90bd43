//! HTTP payment rail client
//!
//! Talks to a connect-style payments API: form-encoded POST bodies, bearer
//! API key, `Idempotency-Key` on every create, and `Rail-Account` to act on
//! behalf of a connected payee account.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::error::RailError;
use super::types::*;
use super::{METADATA_TRANSACTION_ID, PaymentRail};
use crate::core_types::TransactionId;
use crate::money::{CURRENCY, Cents};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const ACCOUNT_HEADER: &str = "Rail-Account";

#[derive(Debug, Clone)]
pub struct HttpRailConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Where the hosted onboarding flow sends the payee back to
    pub onboarding_return_url: String,
}

#[derive(Clone)]
pub struct HttpRail {
    http: Client,
    cfg: HttpRailConfig,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct WireIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: String,
    amount: i64,
}

impl TryFrom<WireIntent> for PaymentIntent {
    type Error = RailError;

    fn try_from(w: WireIntent) -> Result<Self, Self::Error> {
        Ok(PaymentIntent {
            status: w.status.parse().map_err(RailError::InvalidResponse)?,
            id: w.id,
            client_secret: w.client_secret,
            amount: Cents(w.amount),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WirePayout {
    id: String,
    status: String,
    amount: i64,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl TryFrom<WirePayout> for Payout {
    type Error = RailError;

    fn try_from(w: WirePayout) -> Result<Self, Self::Error> {
        Ok(Payout {
            status: w.status.parse().map_err(RailError::InvalidResponse)?,
            id: w.id,
            amount: Cents(w.amount),
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireAmount {
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct WireBalance {
    #[serde(default)]
    available: Vec<WireAmount>,
    #[serde(default)]
    pending: Vec<WireAmount>,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn amounts(list: Vec<WireAmount>) -> Vec<BalanceAmount> {
    list.into_iter()
        .map(|a| BalanceAmount {
            amount: Cents(a.amount),
            currency: a.currency,
        })
        .collect()
}

// ============================================================================
// Client
// ============================================================================

impl HttpRail {
    pub fn new(cfg: HttpRailConfig) -> Result<Self, RailError> {
        let http = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| RailError::Transport(e.to_string()))?;
        Ok(Self { http, cfg })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path)).bearer_auth(&self.cfg.api_key)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path)).bearer_auth(&self.cfg.api_key)
    }

    fn map_transport(&self, e: reqwest::Error) -> RailError {
        if e.is_timeout() {
            RailError::Timeout(self.cfg.timeout)
        } else {
            RailError::Transport(e.to_string())
        }
    }

    /// Send a request and decode a 2xx JSON body, mapping error bodies to
    /// `RailError::Rejected`.
    async fn send<T: for<'de> Deserialize<'de>>(&self, req: RequestBuilder) -> Result<T, RailError> {
        let resp = req.send().await.map_err(|e| self.map_transport(e))?;
        let status = resp.status();

        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| RailError::InvalidResponse(e.to_string()));
        }

        let body = resp.text().await.map_err(|e| self.map_transport(e))?;
        let parsed = serde_json::from_str::<WireErrorBody>(&body).ok();
        let (code, message) = match parsed {
            Some(b) => (
                b.error
                    .code
                    .or(b.error.kind)
                    .unwrap_or_else(|| status.as_str().to_string()),
                b.error.message.unwrap_or_default(),
            ),
            None => (status.as_str().to_string(), body),
        };

        let retryable = status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::CONFLICT
            || status.is_server_error();
        warn!(status = %status, code = %code, retryable, "Rail request rejected");

        Err(RailError::Rejected {
            code,
            message,
            retryable,
        })
    }
}

#[async_trait]
impl PaymentRail for HttpRail {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create_customer(&self, email: &str) -> Result<String, RailError> {
        let created: WireId = self
            .send(self.post("/v1/customers").form(&[("email", email)]))
            .await?;
        Ok(created.id)
    }

    async fn create_connect_account(&self, email: &str) -> Result<ConnectAccount, RailError> {
        let account: WireId = self
            .send(
                self.post("/v1/accounts")
                    .form(&[("type", "express"), ("email", email)]),
            )
            .await?;

        let link: WireLink = self
            .send(self.post("/v1/account_links").form(&[
                ("account", account.id.as_str()),
                ("refresh_url", self.cfg.onboarding_return_url.as_str()),
                ("return_url", self.cfg.onboarding_return_url.as_str()),
                ("type", "account_onboarding"),
            ]))
            .await?;

        Ok(ConnectAccount {
            payee_id: account.id,
            onboarding_url: link.url,
        })
    }

    async fn create_payment_intent(
        &self,
        params: &PaymentIntentParams,
    ) -> Result<PaymentIntent, RailError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), params.amount.value().to_string()),
            ("currency".into(), CURRENCY.into()),
            ("customer".into(), params.payer_id.clone()),
            (
                "application_fee_amount".into(),
                params.application_fee.value().to_string(),
            ),
            (
                "transfer_data[destination]".into(),
                params.destination.clone(),
            ),
        ];
        if params.confirm {
            form.push(("confirm".into(), "true".into()));
            form.push(("off_session".into(), "true".into()));
        }
        for (k, v) in &params.metadata {
            form.push((format!("metadata[{}]", k), v.clone()));
        }

        debug!(
            idempotency_key = %params.idempotency_key,
            amount = params.amount.value(),
            "Creating payment intent"
        );

        let wire: WireIntent = self
            .send(
                self.post("/v1/payment_intents")
                    .header(IDEMPOTENCY_HEADER, &params.idempotency_key)
                    .form(&form),
            )
            .await?;
        wire.try_into()
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, RailError> {
        let wire: WireIntent = self
            .send(self.get(&format!("/v1/payment_intents/{}", intent_id)))
            .await?;
        wire.try_into()
    }

    async fn find_payment_intent(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<PaymentIntent>, RailError> {
        let query = format!("metadata['{}']:'{}'", METADATA_TRANSACTION_ID, transaction_id);
        let list: WireList<WireIntent> = self
            .send(
                self.get("/v1/payment_intents/search")
                    .query(&[("query", query.as_str())]),
            )
            .await?;
        list.data
            .into_iter()
            .next()
            .map(PaymentIntent::try_from)
            .transpose()
    }

    async fn create_payout(&self, params: &PayoutParams) -> Result<Payout, RailError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), params.amount.value().to_string()),
            ("currency".into(), CURRENCY.into()),
        ];
        for (k, v) in &params.metadata {
            form.push((format!("metadata[{}]", k), v.clone()));
        }

        let wire: WirePayout = self
            .send(
                self.post("/v1/payouts")
                    .header(IDEMPOTENCY_HEADER, &params.idempotency_key)
                    .header(ACCOUNT_HEADER, &params.destination_account)
                    .form(&form),
            )
            .await?;
        wire.try_into()
    }

    async fn retrieve_payout(&self, payee_id: &str, payout_id: &str) -> Result<Payout, RailError> {
        let wire: WirePayout = self
            .send(
                self.get(&format!("/v1/payouts/{}", payout_id))
                    .header(ACCOUNT_HEADER, payee_id),
            )
            .await?;
        wire.try_into()
    }

    /// Payouts have no search endpoint; scan the account's recent ones
    async fn find_payout(
        &self,
        payee_id: &str,
        transaction_id: TransactionId,
    ) -> Result<Option<Payout>, RailError> {
        let wanted = transaction_id.to_string();
        let list: WireList<WirePayout> = self
            .send(
                self.get("/v1/payouts")
                    .header(ACCOUNT_HEADER, payee_id)
                    .query(&[("limit", "100")]),
            )
            .await?;
        list.data
            .into_iter()
            .find(|p| p.metadata.get(METADATA_TRANSACTION_ID) == Some(&wanted))
            .map(Payout::try_from)
            .transpose()
    }

    async fn retrieve_balance(&self, payee_id: &str) -> Result<RailBalance, RailError> {
        let wire: WireBalance = self
            .send(self.get("/v1/balance").header(ACCOUNT_HEADER, payee_id))
            .await?;
        Ok(RailBalance {
            available: amounts(wire.available),
            pending: amounts(wire.pending),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rail(server: &MockServer) -> HttpRail {
        HttpRail::new(HttpRailConfig {
            base_url: server.uri(),
            api_key: "sk_test".into(),
            timeout: Duration::from_millis(500),
            onboarding_return_url: "https://app.test/onboarding".into(),
        })
        .unwrap()
    }

    fn intent_params() -> PaymentIntentParams {
        PaymentIntentParams {
            amount: Cents(10_520),
            payer_id: "cus_1".into(),
            destination: "acct_1".into(),
            application_fee: Cents(520),
            idempotency_key: "01HZZTX".into(),
            confirm: true,
            metadata: BTreeMap::from([("transaction_id".to_string(), "01HZZTX".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_create_payment_intent_sends_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header("Idempotency-Key", "01HZZTX"))
            .and(header("Authorization", "Bearer sk_test"))
            .and(body_string_contains("application_fee_amount=520"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "pi_1",
                "client_secret": "pi_1_secret",
                "status": "succeeded",
                "amount": 10520
            })))
            .expect(1)
            .mount(&server)
            .await;

        let intent = rail(&server)
            .create_payment_intent(&intent_params())
            .await
            .unwrap();
        assert_eq!(intent.id, "pi_1");
        assert_eq!(intent.status, IntentStatus::Succeeded);
        assert_eq!(intent.amount, Cents(10_520));
    }

    #[tokio::test]
    async fn test_card_declined_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": { "code": "card_declined", "message": "Your card was declined." }
            })))
            .mount(&server)
            .await;

        let err = rail(&server)
            .create_payment_intent(&intent_params())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "card_declined");
        assert!(!err.is_unknown_outcome());
    }

    #[tokio::test]
    async fn test_server_error_is_unknown_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = rail(&server)
            .create_payment_intent(&intent_params())
            .await
            .unwrap_err();
        assert!(err.is_unknown_outcome());
    }

    #[tokio::test]
    async fn test_slow_rail_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payment_intents/pi_slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = rail(&server)
            .retrieve_payment_intent("pi_slow")
            .await
            .unwrap_err();
        assert!(matches!(err, RailError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_connect_account_with_onboarding_link() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "acct_9" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/account_links"))
            .and(body_string_contains("account=acct_9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({ "url": "https://connect.test/setup/acct_9" }),
            ))
            .mount(&server)
            .await;

        let account = rail(&server)
            .create_connect_account("partner@example.com")
            .await
            .unwrap();
        assert_eq!(account.payee_id, "acct_9");
        assert_eq!(account.onboarding_url, "https://connect.test/setup/acct_9");
    }

    #[tokio::test]
    async fn test_find_payout_by_transaction_metadata() {
        let server = MockServer::start().await;
        let tx = TransactionId::new();
        Mock::given(method("GET"))
            .and(path("/v1/payouts"))
            .and(header("Rail-Account", "acct_9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "id": "po_other", "status": "paid", "amount": 100, "metadata": {} },
                    {
                        "id": "po_1",
                        "status": "in_transit",
                        "amount": 3000,
                        "metadata": { "transaction_id": tx.to_string() }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let rail = rail(&server);
        let payout = rail.find_payout("acct_9", tx).await.unwrap().unwrap();
        assert_eq!(payout.id, "po_1");
        assert_eq!(payout.status, PayoutStatus::InTransit);
        assert_eq!(payout.amount, Cents(3_000));
        assert!(rail.find_payout("acct_9", TransactionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retrieve_balance_on_behalf_of_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/balance"))
            .and(header("Rail-Account", "acct_9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "available": [{ "amount": 49000, "currency": "usd" }],
                "pending": []
            })))
            .mount(&server)
            .await;

        let balance = rail(&server).retrieve_balance("acct_9").await.unwrap();
        assert_eq!(balance.available[0].amount, Cents(49_000));
        assert!(balance.pending.is_empty());
    }
}
