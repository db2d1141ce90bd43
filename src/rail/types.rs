//! Payment rail request/response types

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::money::Cents;

/// Closed set of supported rails, one `PaymentRail` implementation each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RailKind {
    #[serde(rename = "bank")]
    BankTransfer,
    #[serde(rename = "wallet")]
    WalletTransfer,
    #[default]
    #[serde(rename = "card")]
    CardTransfer,
}

impl RailKind {
    pub const ALL: [RailKind; 3] = [
        RailKind::BankTransfer,
        RailKind::WalletTransfer,
        RailKind::CardTransfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RailKind::BankTransfer => "bank",
            RailKind::WalletTransfer => "wallet",
            RailKind::CardTransfer => "card",
        }
    }
}

impl fmt::Display for RailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RailKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bank" | "bank_transfer" => Ok(RailKind::BankTransfer),
            "wallet" | "wallet_transfer" => Ok(RailKind::WalletTransfer),
            "card" | "card_transfer" => Ok(RailKind::CardTransfer),
            _ => Err(format!("Invalid payment method: {}", s)),
        }
    }
}

/// Charge-and-split request
#[derive(Debug, Clone)]
pub struct PaymentIntentParams {
    /// Total charged to the payer
    pub amount: Cents,
    /// Rail customer id of the payer
    pub payer_id: String,
    /// Rail account id of the connected payee
    pub destination: String,
    /// Withheld by the platform before the transfer to `destination`
    pub application_fee: Cents,
    /// Same key → same intent on the rail
    pub idempotency_key: String,
    /// Charge the stored instrument immediately (off-session)
    pub confirm: bool,
    pub metadata: BTreeMap<String, String>,
}

/// Rail-side lifecycle of a payment intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
}

impl IntentStatus {
    /// Money has been captured and transferred
    pub fn is_succeeded(&self) -> bool {
        matches!(self, IntentStatus::Succeeded)
    }

    /// The rail will never capture this intent
    pub fn is_failed(&self) -> bool {
        matches!(self, IntentStatus::Canceled)
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requires_payment_method" => Ok(IntentStatus::RequiresPaymentMethod),
            "requires_confirmation" => Ok(IntentStatus::RequiresConfirmation),
            "requires_action" => Ok(IntentStatus::RequiresAction),
            "processing" => Ok(IntentStatus::Processing),
            "succeeded" => Ok(IntentStatus::Succeeded),
            "canceled" => Ok(IntentStatus::Canceled),
            other => Err(format!("Unknown intent status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: IntentStatus,
    pub amount: Cents,
}

/// Newly created connected payee account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAccount {
    pub payee_id: String,
    pub onboarding_url: String,
}

#[derive(Debug, Clone)]
pub struct PayoutParams {
    pub amount: Cents,
    /// Connected payee account whose balance is paid out to its bank
    pub destination_account: String,
    pub idempotency_key: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    InTransit,
    Paid,
    Failed,
    Canceled,
}

impl PayoutStatus {
    /// Funds left the connected account for good
    pub fn is_paid(&self) -> bool {
        matches!(self, PayoutStatus::Paid)
    }

    /// Funds returned to the connected account
    pub fn is_failed(&self) -> bool {
        matches!(self, PayoutStatus::Failed | PayoutStatus::Canceled)
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PayoutStatus::Pending),
            "in_transit" => Ok(PayoutStatus::InTransit),
            "paid" => Ok(PayoutStatus::Paid),
            "failed" => Ok(PayoutStatus::Failed),
            "canceled" => Ok(PayoutStatus::Canceled),
            other => Err(format!("Unknown payout status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub id: String,
    pub status: PayoutStatus,
    pub amount: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAmount {
    pub amount: Cents,
    pub currency: String,
}

/// Connected account balance as reported by the rail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RailBalance {
    pub available: Vec<BalanceAmount>,
    pub pending: Vec<BalanceAmount>,
}
