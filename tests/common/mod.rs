//! Shared fixtures: an in-memory store, a mock card rail and one organization
//! with an accepted partner and a financial report.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use partner_settlement::config::WebhookConfig;
use partner_settlement::fee::FeeSchedule;
use partner_settlement::gateway::AppState;
use partner_settlement::money::Cents;
use partner_settlement::rail::{MockRail, PaymentRail, RailKind, RailRegistry};
use partner_settlement::store::{
    Account, DirectoryStore, FinancialReport, InvitationStatus, MemoryStore, Organization,
    PartnerInvitation, PayeeProfile, PayerProfile, Project,
};
use partner_settlement::webhook::sign_payload;
use partner_settlement::withdrawal::WithdrawalConfig;
use partner_settlement::{AccountId, InvitationId, OrganizationId, ProjectId, ReportId};

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const JWT_SECRET: &str = "jwt_test";
pub const PARTNER_PAYEE: &str = "acct_partner";
pub const OWNER_CUSTOMER: &str = "cus_owner";

pub struct World {
    pub store: Arc<MemoryStore>,
    pub rail: Arc<MockRail>,
    pub state: Arc<AppState>,
    pub owner: AccountId,
    pub partner: AccountId,
    pub supporter: AccountId,
    pub organization: OrganizationId,
    pub project: ProjectId,
    pub invitation: InvitationId,
    pub report: ReportId,
}

pub fn registry(rail: Arc<MockRail>, timeout: Duration) -> RailRegistry {
    RailRegistry::new(RailKind::CardTransfer).with(
        RailKind::CardTransfer,
        rail as Arc<dyn PaymentRail>,
        timeout,
    )
}

/// Organization whose partner may withdraw up to `profit_share`
pub async fn world(profit_share: Cents) -> World {
    world_with_timeout(profit_share, Duration::from_secs(2)).await
}

pub async fn world_with_timeout(profit_share: Cents, rail_timeout: Duration) -> World {
    let store = Arc::new(MemoryStore::new());
    let rail = Arc::new(MockRail::new());

    // the owner funds settlements and receives project funding
    let mut owner = Account::new("owner@example.com");
    owner.payer = Some(PayerProfile {
        customer_id: OWNER_CUSTOMER.into(),
    });
    owner.payee = Some(PayeeProfile {
        payee_id: "acct_owner".into(),
        onboarding_url: "https://connect.mock.test/onboarding/acct_owner".into(),
        onboarding_completed: true,
    });
    let mut partner = Account::new("partner@example.com");
    partner.payee = Some(PayeeProfile {
        payee_id: PARTNER_PAYEE.into(),
        onboarding_url: format!("https://connect.mock.test/onboarding/{}", PARTNER_PAYEE),
        onboarding_completed: true,
    });
    let mut supporter = Account::new("supporter@example.com");
    supporter.payer = Some(PayerProfile {
        customer_id: "cus_supporter".into(),
    });
    for account in [&owner, &partner, &supporter] {
        store.insert_account(account).await.unwrap();
    }

    let organization = Organization {
        id: OrganizationId::new(),
        owner_id: owner.id,
        name: "Acme Studio".into(),
    };
    store.insert_organization(&organization).await.unwrap();

    let project = Project {
        id: ProjectId::new(),
        organization_id: organization.id,
        owner_id: owner.id,
        name: "Launch".into(),
    };
    store.insert_project(&project).await.unwrap();

    let invitation = PartnerInvitation {
        id: InvitationId::new(),
        organization_id: organization.id,
        partner_id: partner.id,
        status: InvitationStatus::Accepted,
    };
    store.insert_invitation(&invitation).await.unwrap();

    let report = FinancialReport {
        id: ReportId::new(),
        organization_id: organization.id,
        partner_invitation_id: invitation.id,
        available_profit_share: profit_share,
        created_at: Utc::now(),
    };
    store.insert_report(&report).await.unwrap();

    let state = Arc::new(AppState::new(
        store.clone(),
        registry(rail.clone(), rail_timeout),
        FeeSchedule::default(),
        WithdrawalConfig::default(),
        &WebhookConfig {
            secret: WEBHOOK_SECRET.into(),
            tolerance_secs: 300,
        },
        JWT_SECRET,
    ));

    World {
        store,
        rail,
        state,
        owner: owner.id,
        partner: partner.id,
        supporter: supporter.id,
        organization: organization.id,
        project: project.id,
        invitation: invitation.id,
        report: report.id,
    }
}

impl World {
    pub async fn balance(&self, account: AccountId) -> Cents {
        self.store.get_account(account).await.unwrap().unwrap().balance
    }
}

/// Signature header value for `payload`, signed now
pub fn sign(payload: &[u8]) -> String {
    sign_payload(payload, WEBHOOK_SECRET, Utc::now().timestamp()).unwrap()
}

pub fn event_json(id: &str, event_type: &str, created: i64, object: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "id": id,
        "type": event_type,
        "created": created,
        "data": { "object": object },
    }))
    .unwrap()
}
