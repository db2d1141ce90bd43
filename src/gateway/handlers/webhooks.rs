use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde::Serialize;
use tracing::warn;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, ok};
use crate::webhook::{SIGNATURE_HEADER, WebhookError, WebhookOutcome};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

/// POST /webhooks/payment-rail
///
/// 400 for a bad signature or payload; store failures answer 5xx so the
/// rail redelivers.
pub async fn payment_rail_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    match state.webhooks.handle(&body, signature).await {
        Ok(outcome) => ok(WebhookAck {
            received: true,
            outcome,
        }),
        Err(e) => {
            if matches!(e, WebhookError::InvalidSignature(_)) {
                warn!(error = %e, "Rejected webhook delivery");
            }
            Err(ApiError::from(e))
        }
    }
}
