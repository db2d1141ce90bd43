//! Health check handler

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::super::state::AppState;
use super::super::types::{ApiResponse, error_codes};

const CHECK_INTERVAL_MS: i64 = 5000;

/// Health check response data
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub timestamp_ms: i64,
    pub version: String,
}

/// GET /health
///
/// Pings the database at most once per interval and reports no internal
/// detail in the response.
///
/// - Healthy: 200 OK + {code: 0, data: {timestamp_ms, version}}
/// - Unhealthy: 503 Service Unavailable
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    static LAST_CHECK_MS: AtomicI64 = AtomicI64::new(0);
    static LAST_HEALTHY: AtomicBool = AtomicBool::new(true);

    let now_ms = Utc::now().timestamp_millis();

    let healthy = match &state.db {
        Some(db) if now_ms - LAST_CHECK_MS.load(Ordering::Relaxed) > CHECK_INTERVAL_MS => {
            LAST_CHECK_MS.store(now_ms, Ordering::Relaxed);
            let healthy = match db.health_check().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "[HEALTH] Postgres ping failed");
                    false
                }
            };
            LAST_HEALTHY.store(healthy, Ordering::Relaxed);
            healthy
        }
        Some(_) => LAST_HEALTHY.load(Ordering::Relaxed),
        None => true,
    };

    if healthy {
        (
            StatusCode::OK,
            Json(ApiResponse::success(HealthResponse {
                timestamp_ms: now_ms,
                version: env!("GIT_HASH").to_string(),
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse {
                code: error_codes::SERVICE_UNAVAILABLE,
                msg: "unavailable".to_string(),
                data: None,
            }),
        )
    }
}
