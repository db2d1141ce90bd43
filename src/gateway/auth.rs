//! Bearer-token authentication
//!
//! Tokens are HS256 JWTs whose `sub` is the account id.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::state::AppState;
use super::types::{ApiResponse, error_codes};
use crate::core_types::{AccountId, Actor};

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // account id
    pub exp: usize,
    pub iat: usize,
}

impl Claims {
    pub fn account_id(&self) -> Option<AccountId> {
        self.sub.parse().ok()
    }
}

/// Authenticated caller, inserted into request extensions by the middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedAccount(pub AccountId);

impl AuthenticatedAccount {
    pub fn actor(&self) -> Actor {
        Actor::Account(self.0)
    }
}

pub fn issue_token(
    secret: &str,
    account_id: AccountId,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: account_id.to_string(),
        exp: (now + ttl_secs) as usize,
        iat: now as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    Ok(decode::<Claims>(token, &decoding_key, &validation)?.claims)
}

type AuthRejection = (StatusCode, Json<ApiResponse<()>>);

fn reject(code: i32, msg: &str) -> AuthRejection {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error(code, msg)),
    )
}

pub async fn jwt_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthRejection> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| reject(error_codes::MISSING_AUTH, "Missing Authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| reject(error_codes::AUTH_FAILED, "Invalid token format"))?;

    let claims = verify_token(&state.jwt_secret, token)
        .map_err(|_| reject(error_codes::AUTH_FAILED, "Invalid or expired token"))?;
    let account_id = claims
        .account_id()
        .ok_or_else(|| reject(error_codes::AUTH_FAILED, "Invalid account id in token"))?;

    request
        .extensions_mut()
        .insert(AuthenticatedAccount(account_id));
    Ok(next.run(request).await)
}
