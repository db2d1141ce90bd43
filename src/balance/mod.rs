//! Balance / Profit-Share Accessor
//!
//! Read-side views: what a partner may still withdraw against a financial
//! report snapshot, and the rail-side balance of a connected payee.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::core_types::{AccountId, Actor, InvitationId, ReportId};
use crate::error::SettlementError;
use crate::money::Cents;
use crate::rail::{RailBalance, RailRegistry};
use crate::store::{FinancialReport, Store};

/// Withdrawable profit share for one partner invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitShareBalance {
    pub report_id: ReportId,
    pub available_profit_share: Cents,
    /// Pending + approved requests
    pub outstanding: Cents,
    /// Completed requests created since the report
    pub completed_since_report: Cents,
    /// Never negative
    pub available: Cents,
}

impl ProfitShareBalance {
    pub fn from_usage(report: &FinancialReport, outstanding: Cents, completed: Cents) -> Self {
        let available = (report.available_profit_share - outstanding - completed).max(Cents::ZERO);
        Self {
            report_id: report.id,
            available_profit_share: report.available_profit_share,
            outstanding,
            completed_since_report: completed,
            available,
        }
    }
}

pub struct ProfitShareAccessor {
    store: Arc<dyn Store>,
    rails: RailRegistry,
}

impl ProfitShareAccessor {
    pub fn new(store: Arc<dyn Store>, rails: RailRegistry) -> Self {
        Self { store, rails }
    }

    /// Against the given report, or the latest one for the invitation
    pub async fn available_to_withdraw(
        &self,
        invitation_id: InvitationId,
        report_id: Option<ReportId>,
    ) -> Result<ProfitShareBalance, SettlementError> {
        let report = match report_id {
            Some(id) => self
                .store
                .get_report(id)
                .await?
                .filter(|r| r.partner_invitation_id == invitation_id),
            None => self.store.latest_report(invitation_id).await?,
        }
        .ok_or_else(|| {
            SettlementError::NotFound(format!(
                "financial report for partner invitation {}",
                invitation_id
            ))
        })?;

        let (outstanding, completed) = self
            .store
            .withdrawal_usage(invitation_id, report.created_at)
            .await?;
        let balance = ProfitShareBalance::from_usage(&report, outstanding, completed);
        debug!(
            partner_invitation_id = %invitation_id,
            report_id = %report.id,
            available = balance.available.value(),
            "Computed available profit share"
        );
        Ok(balance)
    }

    /// Same, restricted to the partner and the organization owner
    pub async fn available_for(
        &self,
        actor: Actor,
        invitation_id: InvitationId,
        report_id: Option<ReportId>,
    ) -> Result<ProfitShareBalance, SettlementError> {
        let invitation = self
            .store
            .get_invitation(invitation_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("partner invitation {}", invitation_id)))?;
        let owner = self
            .store
            .get_organization(invitation.organization_id)
            .await?
            .map(|org| org.owner_id);
        let allowed = actor == Actor::System
            || actor.is(invitation.partner_id)
            || owner.is_some_and(|owner| actor.is(owner));
        if !allowed {
            return Err(SettlementError::Authorization(
                "Not a party to this partner invitation".to_string(),
            ));
        }
        self.available_to_withdraw(invitation_id, report_id).await
    }

    /// Connected balance of the account's payee profile, as the rail reports it
    pub async fn rail_balance(&self, account_id: AccountId) -> Result<RailBalance, SettlementError> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("account {}", account_id)))?;
        let payee = account
            .payee
            .as_ref()
            .ok_or_else(|| SettlementError::precondition("Account has no payee profile"))?;
        let rail = self.rails.primary()?;
        Ok(rail.retrieve_balance(&payee.payee_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn report(share: i64) -> FinancialReport {
        FinancialReport {
            id: ReportId::new(),
            organization_id: crate::core_types::OrganizationId::new(),
            partner_invitation_id: InvitationId::new(),
            available_profit_share: Cents(share),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_available_subtracts_usage() {
        let b = ProfitShareBalance::from_usage(&report(80_000), Cents(30_000), Cents(20_000));
        assert_eq!(b.available, Cents(30_000));
    }

    #[test]
    fn test_available_never_negative() {
        let b = ProfitShareBalance::from_usage(&report(10_000), Cents(8_000), Cents(5_000));
        assert_eq!(b.available, Cents::ZERO);
    }
}
