use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use tracing::info;

use super::super::auth::AuthenticatedAccount;
use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, BalanceQuery, CreateWithdrawalRequest, ProfitShareView,
    WithdrawalAction, WithdrawalActionRequest, WithdrawalActionResponse, WithdrawalCreated,
    WithdrawalView, amount_param, created, ok,
};
use crate::core_types::{InvitationId, WithdrawalId};
use crate::money::format_amount;
use crate::withdrawal::CreateWithdrawal;

/// `{id}` or `{id}:process`
fn parse_target(target: &str) -> Result<WithdrawalId, ApiError> {
    let raw = target.strip_suffix(":process").unwrap_or(target);
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid withdrawal id: {}", raw)))
}

/// POST /withdrawals
pub async fn create_withdrawal(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedAccount>,
    Json(req): Json<CreateWithdrawalRequest>,
) -> ApiResult<WithdrawalCreated> {
    let amount = amount_param(&req.amount)?;
    let w = state
        .withdrawals
        .create(
            caller.actor(),
            CreateWithdrawal {
                partner_invitation_id: req.partner_invitation_id,
                organization_id: req.organization_id,
                amount,
                financial_report_id: req.financial_report_id,
            },
        )
        .await?;
    created(WithdrawalCreated {
        withdrawal_request: WithdrawalView::from(&w),
    })
}

/// GET /withdrawals/{id}
pub async fn get_withdrawal(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedAccount>,
    Path(target): Path<String>,
) -> ApiResult<WithdrawalView> {
    let id = parse_target(&target)?;
    let w = state.withdrawals.get(id, caller.actor()).await?;
    ok(WithdrawalView::from(&w))
}

/// POST /withdrawals/{id}:process
pub async fn withdrawal_action(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedAccount>,
    Path(target): Path<String>,
    Json(req): Json<WithdrawalActionRequest>,
) -> ApiResult<WithdrawalActionResponse> {
    let id = parse_target(&target)?;
    let actor = caller.actor();
    info!(withdrawal_id = %id, action = ?req.action, actor = %actor, "Withdrawal action");

    let (w, transaction_id) = match req.action {
        WithdrawalAction::Approve => (state.withdrawals.approve(id, actor).await?, None),
        WithdrawalAction::Reject => (state.withdrawals.reject(id, actor, req.reason).await?, None),
        WithdrawalAction::Process => {
            let outcome = state.withdrawals.process(id, actor).await?;
            (outcome.withdrawal, outcome.transaction_id)
        }
    };

    ok(WithdrawalActionResponse {
        status: w.status,
        withdrawal_request: WithdrawalView::from(&w),
        transaction_id,
    })
}

/// GET /partner-invitations/{id}/withdrawals
pub async fn list_invitation_withdrawals(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedAccount>,
    Path(invitation_id): Path<InvitationId>,
) -> ApiResult<Vec<WithdrawalView>> {
    let list = state
        .withdrawals
        .list_for_invitation(invitation_id, caller.actor())
        .await?;
    ok(list.iter().map(WithdrawalView::from).collect())
}

/// GET /partner-invitations/{id}/balance
pub async fn get_partner_balance(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedAccount>,
    Path(invitation_id): Path<InvitationId>,
    Query(query): Query<BalanceQuery>,
) -> ApiResult<ProfitShareView> {
    let b = state
        .balances
        .available_for(caller.actor(), invitation_id, query.financial_report_id)
        .await?;
    ok(ProfitShareView {
        report_id: b.report_id,
        available_profit_share: format_amount(b.available_profit_share),
        outstanding: format_amount(b.outstanding),
        completed_since_report: format_amount(b.completed_since_report),
        available: format_amount(b.available),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_accepts_process_suffix() {
        let id = WithdrawalId::new();
        assert_eq!(parse_target(&format!("{}:process", id)).unwrap(), id);
        assert_eq!(parse_target(&id.to_string()).unwrap(), id);
        assert!(parse_target("nope:process").is_err());
    }
}
