use std::sync::Arc;

use axum::{Extension, Json, extract::State};

use super::super::auth::AuthenticatedAccount;
use super::super::state::AppState;
use super::super::types::{
    ApiResult, FeeView, PaymentIntentRequest, PaymentIntentResponse, amount_param, created,
};
use crate::payment::StartPayment;

/// POST /payment-intents
///
/// Project funding when `projectId` is set, a peer payment when
/// `recipientAccountId` is. The caller confirms with the client secret.
pub async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedAccount>,
    Json(req): Json<PaymentIntentRequest>,
) -> ApiResult<PaymentIntentResponse> {
    let amount = amount_param(&req.amount)?;
    let started = state
        .orchestrator
        .start_payment(
            caller.0,
            StartPayment {
                amount,
                project_id: req.project_id,
                recipient_account_id: req.recipient_account_id,
                method: req.method,
            },
        )
        .await?;

    created(PaymentIntentResponse {
        client_secret: started.receipt.client_secret,
        transaction_id: started.receipt.transaction_id,
        status: started.receipt.status,
        intent_status: started.receipt.intent_status,
        fees: FeeView::from(&started.fees),
    })
}
