//! Development-only helpers, compiled with the `mock-api` feature

use std::sync::Arc;

use axum::{Json, extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};

use super::super::auth::issue_token;
use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, created};
use crate::core_types::AccountId;
use crate::error::SettlementError;
use crate::store::Account;

const INTERNAL_SECRET_HEADER: &str = "X-Internal-Secret";
const MOCK_TOKEN_TTL_SECS: i64 = 24 * 3600;

#[derive(Debug, Deserialize)]
pub struct MockAccountRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockAccountResponse {
    pub account_id: AccountId,
    pub token: String,
}

/// POST /internal/mock/accounts
///
/// Creates an account and hands back a bearer token for it.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<MockAccountRequest>,
) -> ApiResult<MockAccountResponse> {
    let secret = headers
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if secret != Some(state.jwt_secret.as_str()) {
        return Err(ApiError(SettlementError::Authorization(
            "Missing or invalid X-Internal-Secret".to_string(),
        )));
    }

    let account = Account::new(req.email);
    state.store.insert_account(&account).await?;
    let token = issue_token(&state.jwt_secret, account.id, MOCK_TOKEN_TTL_SECS)
        .map_err(|e| ApiError(SettlementError::Internal(e.to_string())))?;
    tracing::info!(account_id = %account.id, "[MOCK] Account created");

    created(MockAccountResponse {
        account_id: account.id,
        token,
    })
}
