//! HTTP gateway
//!
//! ```text
//! /health                                   public
//! /webhooks/payment-rail                    public, signature-checked
//! /payment-intents                          ┐
//! /withdrawals, /withdrawals/{id}[:process] │ bearer JWT
//! /partner-invitations/{id}/...             │
//! /accounts/me/...                          ┘
//! /internal/mock/...                        mock-api feature only
//! ```

pub mod auth;
pub mod handlers;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tokio::net::TcpListener;

pub use auth::{AuthenticatedAccount, Claims, issue_token, jwt_auth_middleware};
pub use state::AppState;
pub use types::{ApiError, ApiResponse, ApiResult, error_codes};

/// Build the complete router over shared state
pub fn build_router(state: Arc<AppState>) -> Router {
    let private_routes = Router::new()
        .route("/payment-intents", post(handlers::create_payment_intent))
        .route("/withdrawals", post(handlers::create_withdrawal))
        .route(
            "/withdrawals/{id}",
            get(handlers::get_withdrawal).post(handlers::withdrawal_action),
        )
        .route(
            "/partner-invitations/{id}/balance",
            get(handlers::get_partner_balance),
        )
        .route(
            "/partner-invitations/{id}/withdrawals",
            get(handlers::list_invitation_withdrawals),
        )
        .route(
            "/accounts/me/payer-profile",
            post(handlers::create_payer_profile),
        )
        .route(
            "/accounts/me/payee-profile",
            post(handlers::create_payee_profile),
        )
        .route("/accounts/me/payouts", post(handlers::request_payout))
        .route("/accounts/me/rail-balance", get(handlers::get_rail_balance))
        .layer(from_fn_with_state(state.clone(), jwt_auth_middleware));

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/webhooks/payment-rail",
            post(handlers::payment_rail_webhook),
        )
        .merge(private_routes);

    // [SECURITY] Mock routes are only compiled with the 'mock-api' feature.
    // Production builds use `--no-default-features`.
    #[cfg(feature = "mock-api")]
    let app = app.nest(
        "/internal/mock",
        Router::new().route("/accounts", post(handlers::mock::create_account)),
    );

    app.with_state(state)
}

/// Bind and serve until the listener fails
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    tracing::info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
