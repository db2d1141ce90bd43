//! Caller-scoped account endpoints under `/accounts/me`

use std::sync::Arc;

use axum::{Extension, Json, extract::State};

use super::super::auth::AuthenticatedAccount;
use super::super::state::AppState;
use super::super::types::{ApiResult, PayoutRequest, amount_param, created, ok};
use crate::profiles::PayoutReceipt;
use crate::rail::RailBalance;
use crate::store::{PayeeProfile, PayerProfile};

/// POST /accounts/me/payer-profile
pub async fn create_payer_profile(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedAccount>,
) -> ApiResult<PayerProfile> {
    ok(state.profiles.ensure_payer_profile(caller.0).await?)
}

/// POST /accounts/me/payee-profile
pub async fn create_payee_profile(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedAccount>,
) -> ApiResult<PayeeProfile> {
    ok(state.profiles.ensure_payee_profile(caller.0).await?)
}

/// POST /accounts/me/payouts
pub async fn request_payout(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedAccount>,
    Json(req): Json<PayoutRequest>,
) -> ApiResult<PayoutReceipt> {
    let amount = amount_param(&req.amount)?;
    created(state.profiles.request_payout(caller.0, amount).await?)
}

/// GET /accounts/me/rail-balance
pub async fn get_rail_balance(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedAccount>,
) -> ApiResult<RailBalance> {
    ok(state.balances.rail_balance(caller.0).await?)
}
