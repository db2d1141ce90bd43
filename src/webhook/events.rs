//! Rail event envelope and the objects the reconciler reads from it

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use super::WebhookError;
use crate::store::Subscription;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// `{ id, type, created, data: { object } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix seconds at which the rail generated the event
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionItem {
    pub price: PriceRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub items: SubscriptionItems,
    pub current_period_end: Option<i64>,
}

impl SubscriptionObject {
    pub fn to_subscription(&self) -> Subscription {
        Subscription {
            subscription_id: self.id.clone(),
            status: self.status.clone(),
            price_id: self.items.data.first().map(|item| item.price.id.clone()),
            current_period_end: self.current_period_end.and_then(unix_time),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LastPaymentError {
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub last_payment_error: Option<LastPaymentError>,
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountObject {
    pub id: String,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
}

impl AccountObject {
    pub fn onboarding_completed(&self) -> bool {
        self.details_submitted && self.payouts_enabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PayoutObject {
    pub id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

/// Events the reconciler acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RailEvent {
    SubscriptionUpserted(SubscriptionObject),
    SubscriptionDeleted(SubscriptionObject),
    PaymentSucceeded(PaymentIntentObject),
    PaymentFailed {
        intent: PaymentIntentObject,
        reason: String,
    },
    AccountUpdated(AccountObject),
    PayoutPaid(PayoutObject),
    PayoutFailed {
        payout: PayoutObject,
        reason: String,
    },
    /// Acknowledged and ignored
    Unhandled,
}

fn object<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, WebhookError> {
    serde_json::from_value(envelope.data.object.clone()).map_err(|e| {
        WebhookError::InvalidPayload(format!("{} object: {}", envelope.event_type, e))
    })
}

impl Envelope {
    pub fn created_at(&self) -> Result<DateTime<Utc>, WebhookError> {
        unix_time(self.created)
            .ok_or_else(|| WebhookError::InvalidPayload(format!("bad created: {}", self.created)))
    }

    pub fn event(&self) -> Result<RailEvent, WebhookError> {
        let event = match self.event_type.as_str() {
            "customer.subscription.created" | "customer.subscription.updated" => {
                RailEvent::SubscriptionUpserted(object(self)?)
            }
            "customer.subscription.deleted" => RailEvent::SubscriptionDeleted(object(self)?),
            "payment_intent.succeeded" => RailEvent::PaymentSucceeded(object(self)?),
            "payment_intent.payment_failed" => {
                let intent: PaymentIntentObject = object(self)?;
                let reason = intent
                    .last_payment_error
                    .as_ref()
                    .and_then(|e| e.message.clone().or_else(|| e.code.clone()))
                    .unwrap_or_else(|| "payment failed".to_string());
                RailEvent::PaymentFailed { intent, reason }
            }
            "payment_intent.canceled" => {
                let intent: PaymentIntentObject = object(self)?;
                let reason = match &intent.cancellation_reason {
                    Some(r) => format!("canceled: {}", r),
                    None => "canceled".to_string(),
                };
                RailEvent::PaymentFailed { intent, reason }
            }
            "account.updated" => RailEvent::AccountUpdated(object(self)?),
            "payout.paid" => RailEvent::PayoutPaid(object(self)?),
            "payout.failed" => {
                let payout: PayoutObject = object(self)?;
                let reason = payout
                    .failure_message
                    .clone()
                    .or_else(|| payout.failure_code.clone())
                    .unwrap_or_else(|| "payout failed".to_string());
                RailEvent::PayoutFailed { payout, reason }
            }
            _ => RailEvent::Unhandled,
        };
        Ok(event)
    }
}

fn unix_time(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
