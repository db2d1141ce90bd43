//! Withdrawal Lifecycle Manager

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::lock::KeyedLocks;
use super::state::WithdrawalStatus;
use super::types::{CapOutcome, CreateWithdrawal, Decision, ProcessOutcome, WithdrawalRequest};
use crate::core_types::{AccountId, Actor, InvitationId, TransactionId, WithdrawalId};
use crate::error::SettlementError;
use crate::fee::{FeeMode, compute_fees};
use crate::ledger::{TransactionKind, TransactionRefs, TransactionStatus};
use crate::money::format_amount;
use crate::payment::worker::ago;
use crate::payment::{PaymentOrchestrator, TransferOrder};
use crate::rail::RailKind;
use crate::store::{InvitationStatus, Organization, PartnerInvitation, Store};

#[derive(Debug, Clone)]
pub struct WithdrawalConfig {
    /// Rail partner settlements are charged on
    pub rail: RailKind,
    /// A processing lease older than this is considered abandoned
    pub processing_lease: Duration,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            rail: RailKind::default(),
            processing_lease: Duration::from_secs(120),
        }
    }
}

pub struct WithdrawalManager {
    store: Arc<dyn Store>,
    orchestrator: Arc<PaymentOrchestrator>,
    locks: KeyedLocks<InvitationId>,
    config: WithdrawalConfig,
}

impl WithdrawalManager {
    pub fn new(
        store: Arc<dyn Store>,
        orchestrator: Arc<PaymentOrchestrator>,
        config: WithdrawalConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            locks: KeyedLocks::new(),
            config,
        }
    }

    async fn load(&self, id: WithdrawalId) -> Result<WithdrawalRequest, SettlementError> {
        self.store
            .get_withdrawal(id)
            .await?
            .ok_or_else(|| SettlementError::withdrawal_not_found(id))
    }

    async fn invitation(&self, id: InvitationId) -> Result<PartnerInvitation, SettlementError> {
        self.store
            .get_invitation(id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("partner invitation {}", id)))
    }

    async fn organization(&self, w: &WithdrawalRequest) -> Result<Organization, SettlementError> {
        self.store
            .get_organization(w.organization_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("organization {}", w.organization_id)))
    }

    /// Owner of the organization the request draws on
    async fn require_owner(
        &self,
        w: &WithdrawalRequest,
        actor: Actor,
        allow_system: bool,
    ) -> Result<Organization, SettlementError> {
        let org = self.organization(w).await?;
        let allowed = actor.is(org.owner_id) || (allow_system && actor == Actor::System);
        if !allowed {
            return Err(SettlementError::Authorization(
                "Only the organization owner can decide on withdrawals".to_string(),
            ));
        }
        Ok(org)
    }

    /// Partner of the invitation, the organization owner, or the system
    async fn require_viewer(
        &self,
        invitation: &PartnerInvitation,
        actor: Actor,
    ) -> Result<(), SettlementError> {
        if actor == Actor::System || actor.is(invitation.partner_id) {
            return Ok(());
        }
        let owner = self
            .store
            .get_organization(invitation.organization_id)
            .await?
            .map(|org| org.owner_id);
        match owner {
            Some(owner) if actor.is(owner) => Ok(()),
            _ => Err(SettlementError::Authorization(
                "Not a party to this partner invitation".to_string(),
            )),
        }
    }

    /// Create a `PENDING` request for the acting partner.
    ///
    /// The cap check against the financial report and the insert are one
    /// atomic store step, so concurrent requests cannot jointly overdraw.
    pub async fn create(
        &self,
        actor: Actor,
        input: CreateWithdrawal,
    ) -> Result<WithdrawalRequest, SettlementError> {
        if !input.amount.is_positive() {
            return Err(SettlementError::Validation(
                "Amount must be greater than zero".to_string(),
            ));
        }
        let Some(partner_id) = actor.account_id() else {
            return Err(SettlementError::Authorization(
                "Withdrawals are requested by partners".to_string(),
            ));
        };

        let invitation = self.invitation(input.partner_invitation_id).await?;
        if invitation.partner_id != partner_id {
            return Err(SettlementError::Authorization(
                "Only the invited partner can request a withdrawal".to_string(),
            ));
        }
        if invitation.status != InvitationStatus::Accepted {
            return Err(SettlementError::precondition(format!(
                "Partner invitation is {}",
                invitation.status
            )));
        }
        if invitation.organization_id != input.organization_id {
            return Err(SettlementError::Validation(
                "Organization does not match the partner invitation".to_string(),
            ));
        }

        self.require_ready_payee(partner_id).await?;

        let report = match input.financial_report_id {
            Some(report_id) => self
                .store
                .get_report(report_id)
                .await?
                .filter(|r| r.partner_invitation_id == invitation.id)
                .ok_or_else(|| SettlementError::NotFound(format!("financial report {}", report_id)))?,
            None => self
                .store
                .latest_report(invitation.id)
                .await?
                .ok_or_else(|| SettlementError::precondition("No financial report available"))?,
        };

        let _guard = self.locks.lock(&invitation.id).await;

        let request = WithdrawalRequest::new(
            &CreateWithdrawal {
                financial_report_id: Some(report.id),
                ..input
            },
            partner_id,
            Utc::now(),
        );
        match self
            .store
            .insert_withdrawal_capped(&request, report.available_profit_share, report.created_at)
            .await?
        {
            CapOutcome::Inserted => {
                info!(
                    withdrawal_id = %request.id,
                    partner_invitation_id = %request.partner_invitation_id,
                    amount = request.amount.value(),
                    report_id = %report.id,
                    "Withdrawal requested"
                );
                Ok(request)
            }
            CapOutcome::Exceeded { available } => {
                debug!(
                    partner_invitation_id = %invitation.id,
                    requested = request.amount.value(),
                    available = available.value(),
                    "Withdrawal exceeds available profit share"
                );
                Err(SettlementError::precondition(format!(
                    "Amount exceeds available profit share ({} available)",
                    format_amount(available)
                )))
            }
        }
    }

    async fn require_ready_payee(&self, partner_id: AccountId) -> Result<(), SettlementError> {
        let partner = self
            .store
            .get_account(partner_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("account {}", partner_id)))?;
        match &partner.payee {
            None => Err(SettlementError::precondition(
                "Partner has no payee profile",
            )),
            Some(p) if !p.onboarding_completed => {
                Err(SettlementError::onboarding_incomplete(p.onboarding_url.clone()))
            }
            Some(_) => Ok(()),
        }
    }

    /// `PENDING → APPROVED`; approving an approved request is a no-op
    pub async fn approve(
        &self,
        id: WithdrawalId,
        actor: Actor,
    ) -> Result<WithdrawalRequest, SettlementError> {
        self.decide(id, actor, WithdrawalStatus::Approved, None).await
    }

    /// `PENDING → REJECTED`; rejecting a rejected request is a no-op
    pub async fn reject(
        &self,
        id: WithdrawalId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<WithdrawalRequest, SettlementError> {
        self.decide(id, actor, WithdrawalStatus::Rejected, reason).await
    }

    async fn decide(
        &self,
        id: WithdrawalId,
        actor: Actor,
        to: WithdrawalStatus,
        reason: Option<String>,
    ) -> Result<WithdrawalRequest, SettlementError> {
        let w = self.load(id).await?;
        self.require_owner(&w, actor, false).await?;

        if w.status == to {
            debug!(withdrawal_id = %id, status = %to, "Decision already applied");
            return Ok(w);
        }
        if !w.status.can_transition_to(to) {
            return Err(invalid_transition(&w, to));
        }

        let won = self
            .store
            .transition_withdrawal(
                id,
                &Decision {
                    from: w.status,
                    to,
                    decided_by: actor.account_id(),
                    reason,
                },
            )
            .await?;

        let current = self.load(id).await?;
        if won {
            info!(
                withdrawal_id = %id,
                from = %w.status,
                to = %to,
                actor = %actor,
                "Withdrawal status changed"
            );
            Ok(current)
        } else if current.status == to {
            // a concurrent identical decision won
            Ok(current)
        } else {
            Err(invalid_transition(&current, to))
        }
    }

    /// Settle an `APPROVED` request: `APPROVED → COMPLETED`.
    ///
    /// Serialized per invitation in-process and by the store claim lease
    /// across processes. A failed or unknown rail outcome leaves the request
    /// `APPROVED`; an unknown one keeps its settlement transaction so the
    /// retry reuses the same idempotency key.
    pub async fn process(
        &self,
        id: WithdrawalId,
        actor: Actor,
    ) -> Result<ProcessOutcome, SettlementError> {
        let w = self.load(id).await?;
        let org = self.require_owner(&w, actor, true).await?;

        let _guard = self.locks.lock(&w.partner_invitation_id).await;
        let w = self.load(id).await?;

        match w.status {
            WithdrawalStatus::Completed => {
                debug!(withdrawal_id = %id, "Withdrawal already completed");
                return Ok(ProcessOutcome {
                    transaction_id: w.settlement_tx_id,
                    withdrawal: w,
                    settled_now: false,
                });
            }
            WithdrawalStatus::Approved => {}
            _ => return Err(invalid_transition(&w, WithdrawalStatus::Completed)),
        }

        let invitation = self.invitation(w.partner_invitation_id).await?;
        self.require_ready_payee(invitation.partner_id).await?;

        let token = ulid::Ulid::new().to_string();
        let expired_before = ago(Utc::now(), self.config.processing_lease);
        if !self.store.claim_withdrawal(id, &token, expired_before).await? {
            return Err(SettlementError::precondition(
                "Withdrawal is already being processed",
            ));
        }

        let result = self
            .settle(&w, &token, org.owner_id, invitation.partner_id)
            .await;

        if let Err(e) = self.store.release_claim(id, &token).await {
            warn!(withdrawal_id = %id, error = %e, "Failed to release processing lease");
        }

        let transaction_id = result?;
        let withdrawal = self.load(id).await?;
        let settled_now = withdrawal.status == WithdrawalStatus::Completed;
        if !settled_now {
            info!(
                withdrawal_id = %id,
                transaction_id = %transaction_id,
                "Settlement awaiting rail confirmation"
            );
        }
        Ok(ProcessOutcome {
            withdrawal,
            transaction_id: Some(transaction_id),
            settled_now,
        })
    }

    async fn settle(
        &self,
        w: &WithdrawalRequest,
        token: &str,
        payer: AccountId,
        partner: AccountId,
    ) -> Result<TransactionId, SettlementError> {
        let ledger = self.orchestrator.ledger();

        let mut resume = w.settlement_tx_id;
        if let Some(tx_id) = resume
            && let Some(tx) = ledger.get(tx_id).await?
        {
            match tx.status {
                TransactionStatus::Failed => {
                    self.store.clear_settlement_tx(w.id, tx_id).await?;
                    resume = None;
                }
                TransactionStatus::Completed => {
                    // captured earlier, request never marked completed
                    let external_id = tx.external_operation_id.clone().unwrap_or_default();
                    self.orchestrator
                        .complete_succeeded(&tx, &external_id)
                        .await?;
                    return Ok(tx_id);
                }
                TransactionStatus::Pending => {}
            }
        }

        let tx_id = resume.unwrap_or_else(TransactionId::new);
        if !self.store.set_settlement_tx(w.id, token, tx_id).await? {
            return Err(SettlementError::precondition(
                "Processing lease lost",
            ));
        }

        let fees = compute_fees(
            w.amount,
            FeeMode::RecipientAbsorbs,
            self.orchestrator.fee_schedule(),
        )?;
        let order = TransferOrder {
            payer,
            recipient: partner,
            kind: TransactionKind::Withdrawal,
            rail: self.config.rail,
            fees,
            refs: TransactionRefs {
                project_id: None,
                partner_invitation_id: Some(w.partner_invitation_id),
                withdrawal_id: Some(w.id),
            },
            metadata: BTreeMap::from([("withdrawal_id".to_string(), w.id.to_string())]),
            confirm: true,
            resume: Some(tx_id),
        };

        info!(
            withdrawal_id = %w.id,
            transaction_id = %tx_id,
            amount = w.amount.value(),
            resumed = w.settlement_tx_id == Some(tx_id),
            "Processing withdrawal"
        );
        let receipt = self.orchestrator.create_transfer(order).await?;
        Ok(receipt.transaction_id)
    }

    pub async fn get(
        &self,
        id: WithdrawalId,
        actor: Actor,
    ) -> Result<WithdrawalRequest, SettlementError> {
        let w = self.load(id).await?;
        let invitation = self.invitation(w.partner_invitation_id).await?;
        self.require_viewer(&invitation, actor).await?;
        Ok(w)
    }

    pub async fn list_for_invitation(
        &self,
        invitation_id: InvitationId,
        actor: Actor,
    ) -> Result<Vec<WithdrawalRequest>, SettlementError> {
        let invitation = self.invitation(invitation_id).await?;
        self.require_viewer(&invitation, actor).await?;
        Ok(self.store.list_withdrawals(invitation_id).await?)
    }
}

fn invalid_transition(w: &WithdrawalRequest, to: WithdrawalStatus) -> SettlementError {
    SettlementError::InvalidStateTransition(format!(
        "Withdrawal {} is {}, cannot move to {}",
        w.id, w.status, to
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{OrganizationId, ReportId};
    use crate::fee::FeeSchedule;
    use crate::money::Cents;
    use crate::rail::{MockRail, PaymentRail, RailRegistry};
    use crate::store::{
        Account, DirectoryStore, FinancialReport, MemoryStore, PayeeProfile, PayerProfile,
    };

    struct Fixture {
        manager: WithdrawalManager,
        owner: AccountId,
        partner: AccountId,
        invitation: InvitationId,
        organization: OrganizationId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mut owner = Account::new("owner@example.com");
        owner.payer = Some(PayerProfile {
            customer_id: "cus_owner".into(),
        });
        let mut partner = Account::new("partner@example.com");
        partner.payee = Some(PayeeProfile {
            payee_id: "acct_partner".into(),
            onboarding_url: "https://connect.mock.test/onboarding/acct_partner".into(),
            onboarding_completed: true,
        });
        store.insert_account(&owner).await.unwrap();
        store.insert_account(&partner).await.unwrap();

        let organization = Organization {
            id: OrganizationId::new(),
            owner_id: owner.id,
            name: "Acme Studio".into(),
        };
        store.insert_organization(&organization).await.unwrap();
        let invitation = PartnerInvitation {
            id: InvitationId::new(),
            organization_id: organization.id,
            partner_id: partner.id,
            status: InvitationStatus::Accepted,
        };
        store.insert_invitation(&invitation).await.unwrap();
        store
            .insert_report(&FinancialReport {
                id: ReportId::new(),
                organization_id: organization.id,
                partner_invitation_id: invitation.id,
                available_profit_share: Cents(50_000),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let rails = RailRegistry::new(RailKind::CardTransfer).with(
            RailKind::CardTransfer,
            Arc::new(MockRail::new()) as Arc<dyn PaymentRail>,
            Duration::from_secs(1),
        );
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            store.clone(),
            rails,
            FeeSchedule::default(),
        ));
        Fixture {
            manager: WithdrawalManager::new(store, orchestrator, WithdrawalConfig::default()),
            owner: owner.id,
            partner: partner.id,
            invitation: invitation.id,
            organization: organization.id,
        }
    }

    #[tokio::test]
    async fn test_invitation_locks_released_after_lifecycle() {
        let f = fixture().await;
        let created = f
            .manager
            .create(
                Actor::Account(f.partner),
                CreateWithdrawal {
                    partner_invitation_id: f.invitation,
                    organization_id: f.organization,
                    amount: Cents(20_000),
                    financial_report_id: None,
                },
            )
            .await
            .unwrap();
        assert!(f.manager.locks.is_empty());

        f.manager
            .approve(created.id, Actor::Account(f.owner))
            .await
            .unwrap();
        let outcome = f
            .manager
            .process(created.id, Actor::Account(f.owner))
            .await
            .unwrap();
        assert_eq!(outcome.withdrawal.status, WithdrawalStatus::Completed);
        assert!(f.manager.locks.is_empty());

        // rejected paths release too
        let err = f
            .manager
            .create(
                Actor::Account(f.partner),
                CreateWithdrawal {
                    partner_invitation_id: f.invitation,
                    organization_id: f.organization,
                    amount: Cents(40_000),
                    financial_report_id: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 422);
        assert!(f.manager.locks.is_empty());
    }
}
