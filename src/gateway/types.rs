//! API Response types, error codes and request/response DTOs
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `error_codes`: Standard error code constants
//! - `ApiError`: [`SettlementError`] rendered as an HTTP response
//!
//! Amounts cross the HTTP boundary as decimal strings ("105.20") and are
//! converted with [`crate::money`].

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{
    AccountId, InvitationId, OrganizationId, ProjectId, ReportId, TransactionId, WithdrawalId,
};
use crate::error::SettlementError;
use crate::fee::FeeBreakdown;
use crate::ledger::TransactionStatus;
use crate::money::{Cents, format_amount, parse_amount};
use crate::rail::{IntentStatus, RailKind};
use crate::withdrawal::{WithdrawalRequest, WithdrawalStatus};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: payload on success, error detail on failure
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const PRECONDITION_FAILED: i32 = 1002;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const AUTH_FAILED: i32 = 2002;
    pub const FORBIDDEN: i32 = 2003;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4001;
    pub const INVALID_STATE: i32 = 4009;

    // Server / upstream errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const RAIL_ERROR: i32 = 5002;
    pub const OUTCOME_UNKNOWN: i32 = 5004;
}

// ============================================================================
// Errors
// ============================================================================

/// Machine-readable part of an error response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub error: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onboarding_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
}

#[derive(Debug)]
pub struct ApiError(pub SettlementError);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(SettlementError::Validation(msg.into()))
    }

    fn api_code(&self) -> i32 {
        match &self.0 {
            SettlementError::Validation(_) => error_codes::INVALID_PARAMETER,
            SettlementError::Unauthorized => error_codes::AUTH_FAILED,
            SettlementError::Authorization(_) => error_codes::FORBIDDEN,
            SettlementError::NotFound(_) => error_codes::NOT_FOUND,
            SettlementError::PreconditionFailed { .. } => error_codes::PRECONDITION_FAILED,
            SettlementError::InvalidStateTransition(_) => error_codes::INVALID_STATE,
            SettlementError::ExternalRail { .. } => error_codes::RAIL_ERROR,
            SettlementError::UnknownOutcome { .. } => error_codes::OUTCOME_UNKNOWN,
            SettlementError::PartialFailure { .. }
            | SettlementError::Database(_)
            | SettlementError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

macro_rules! api_error_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for ApiError {
                fn from(e: $source) -> Self {
                    ApiError(e.into())
                }
            }
        )*
    };
}

api_error_from!(
    SettlementError,
    crate::payment::PaymentError,
    crate::webhook::WebhookError,
    crate::store::StoreError,
    crate::money::MoneyError,
);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(code = self.0.code(), error = %self.0, "Request failed");
        }

        let (onboarding_url, transaction_id) = match &self.0 {
            SettlementError::PreconditionFailed { onboarding_url, .. } => {
                (onboarding_url.clone(), None)
            }
            SettlementError::UnknownOutcome { transaction_id, .. }
            | SettlementError::PartialFailure { transaction_id, .. } => {
                (None, Some(*transaction_id))
            }
            _ => (None, None),
        };
        let body = ApiResponse {
            code: self.api_code(),
            msg: self.0.to_string(),
            data: Some(ErrorDetail {
                error: self.0.code().to_string(),
                retryable: self.0.is_retryable(),
                onboarding_url,
                transaction_id,
            }),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

pub fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

/// Parse a client amount string, mapping format errors to 400
pub fn amount_param(raw: &str) -> Result<Cents, ApiError> {
    parse_amount(raw).map_err(|e| ApiError::bad_request(format!("amount: {}", e)))
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentRequest {
    pub amount: String,
    pub project_id: Option<ProjectId>,
    pub recipient_account_id: Option<AccountId>,
    pub method: Option<RailKind>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeView {
    pub base: String,
    pub processing_fee: String,
    pub platform_fee: String,
    pub total_charged: String,
    pub net_to_recipient: String,
}

impl From<&FeeBreakdown> for FeeView {
    fn from(f: &FeeBreakdown) -> Self {
        Self {
            base: format_amount(f.base),
            processing_fee: format_amount(f.processing_fee),
            platform_fee: format_amount(f.platform_fee),
            total_charged: format_amount(f.total_charged),
            net_to_recipient: format_amount(f.net_to_recipient),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentResponse {
    pub client_secret: Option<String>,
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub intent_status: Option<IntentStatus>,
    pub fees: FeeView,
}

// ============================================================================
// Withdrawals
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWithdrawalRequest {
    pub amount: String,
    pub partner_invitation_id: InvitationId,
    pub organization_id: OrganizationId,
    pub financial_report_id: Option<ReportId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalAction {
    Approve,
    Reject,
    Process,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalActionRequest {
    pub action: WithdrawalAction,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalView {
    pub id: WithdrawalId,
    pub partner_invitation_id: InvitationId,
    pub organization_id: OrganizationId,
    pub amount: String,
    pub financial_report_id: Option<ReportId>,
    pub status: WithdrawalStatus,
    pub rejection_reason: Option<String>,
    pub external_operation_id: Option<String>,
    pub requested_by: AccountId,
    pub decided_by: Option<AccountId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&WithdrawalRequest> for WithdrawalView {
    fn from(w: &WithdrawalRequest) -> Self {
        Self {
            id: w.id,
            partner_invitation_id: w.partner_invitation_id,
            organization_id: w.organization_id,
            amount: format_amount(w.amount),
            financial_report_id: w.financial_report_id,
            status: w.status,
            rejection_reason: w.rejection_reason.clone(),
            external_operation_id: w.external_operation_id.clone(),
            requested_by: w.requested_by,
            decided_by: w.decided_by,
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalCreated {
    pub withdrawal_request: WithdrawalView,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalActionResponse {
    pub status: WithdrawalStatus,
    pub withdrawal_request: WithdrawalView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    pub financial_report_id: Option<ReportId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitShareView {
    pub report_id: ReportId,
    pub available_profit_share: String,
    pub outstanding: String,
    pub completed_since_report: String,
    pub available: String,
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub amount: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_success_envelope() {
        let json = serde_json::to_value(ApiResponse::success("x")).unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["msg"], "ok");
        assert_eq!(json["data"], "x");

        let json = serde_json::to_value(ApiResponse::<()>::error(1001, "bad")).unwrap();
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn test_precondition_carries_onboarding_url() {
        let response =
            ApiError(SettlementError::onboarding_incomplete("https://onboard.test/x")).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], error_codes::PRECONDITION_FAILED);
        assert_eq!(json["data"]["error"], "PRECONDITION_FAILED");
        assert_eq!(json["data"]["onboardingUrl"], "https://onboard.test/x");
    }

    #[test]
    fn test_withdrawal_action_parsing() {
        let req: WithdrawalActionRequest =
            serde_json::from_str(r#"{"action":"reject","reason":"no"}"#).unwrap();
        assert_eq!(req.action, WithdrawalAction::Reject);
        assert_eq!(req.reason.as_deref(), Some("no"));
        assert!(serde_json::from_str::<WithdrawalActionRequest>(r#"{"action":"cancel"}"#).is_err());
    }
}
