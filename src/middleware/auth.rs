use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::models::UserContext;
use crate::utils::{ApiError, JwtUtil};

#[derive(Clone)]
pub struct AuthState {
    pub jwt_util: Arc<JwtUtil>,
}

/// Authentication middleware.
/// 1. Verify the bearer token
/// 2. Build the immutable per-request `UserContext` from its claims
/// 3. Insert it into request extensions for handlers
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let uri = req.uri().path().to_string();
    let method = req.method().to_string();

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing authorization header for {} {}", method, uri);
            ApiError::unauthorized("Missing authorization header")
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::warn!("Invalid authorization header format for {} {}", method, uri);
        ApiError::unauthorized("Invalid authorization header format")
    })?;

    let claims = state.jwt_util.verify_token(token).map_err(|err| {
        tracing::warn!("JWT verification failed for {} {}", method, uri);
        err
    })?;

    let user_context = UserContext::from_claims(&claims)?;
    tracing::debug!(
        "Authenticated user {} (tenant {}, locale {}) on {} {}",
        user_context.user_id,
        user_context.tenant_id,
        user_context.locale.as_str(),
        method,
        uri
    );

    req.extensions_mut().insert(user_context);
    Ok(next.run(req).await)
}
