//! Accounts and the read-mostly business entities around them

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, InvitationId, OrganizationId, ProjectId, ReportId};
use crate::money::Cents;

/// Rail customer used when this account pays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerProfile {
    pub customer_id: String,
}

/// Rail connected account used when this account is paid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayeeProfile {
    pub payee_id: String,
    pub onboarding_url: String,
    pub onboarding_completed: bool,
}

/// Rail subscription mirrored onto the payer's account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub balance: Cents,
    pub payer: Option<PayerProfile>,
    pub payee: Option<PayeeProfile>,
    pub subscription: Option<Subscription>,
    /// `created` of the last subscription event applied; older events are dropped
    pub subscription_event_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            email: email.into(),
            balance: Cents::ZERO,
            payer: None,
            payee: None,
            subscription: None,
            subscription_event_at: None,
        }
    }

    /// Payee profile with onboarding finished
    pub fn ready_payee(&self) -> Option<&PayeeProfile> {
        self.payee.as_ref().filter(|p| p.onboarding_completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: OrganizationId,
    pub owner_id: AccountId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub organization_id: OrganizationId,
    /// Receives supporter funding
    pub owner_id: AccountId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Revoked,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "declined" => Ok(InvitationStatus::Declined),
            "revoked" => Ok(InvitationStatus::Revoked),
            other => Err(format!("Unknown invitation status: {}", other)),
        }
    }
}

/// A partner's seat in an organization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerInvitation {
    pub id: InvitationId,
    pub organization_id: OrganizationId,
    pub partner_id: AccountId,
    pub status: InvitationStatus,
}

/// Read-only profit share snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinancialReport {
    pub id: ReportId,
    pub organization_id: OrganizationId,
    pub partner_invitation_id: InvitationId,
    pub available_profit_share: Cents,
    pub created_at: DateTime<Utc>,
}
