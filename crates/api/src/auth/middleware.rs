//! Authentication middleware
//!
//! The identity-resolver boundary: requests arrive with an optional bearer
//! token, and handlers receive an optional `AuthUser` extension. Guest
//! flows (checkout, code redemption) run through `optional_auth`; pledge
//! and subscription mutations require `require_auth`.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use crate::auth::jwt::JwtManager;

/// The resolved caller identity, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub is_admin: bool,
}

#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(String::from)
}

fn authenticate(auth_state: &AuthState, token: &str) -> Option<AuthUser> {
    match auth_state.jwt_manager.verify_login_token(token) {
        Ok(claims) => Some(AuthUser {
            user_id: claims.sub,
            is_admin: claims.is_admin,
        }),
        Err(e) => {
            tracing::debug!(error = %e, "Bearer token rejected");
            None
        }
    }
}

/// Middleware that requires authentication.
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(&request) else {
        return unauthorized("missing bearer token");
    };
    let Some(auth_user) = authenticate(&auth_state, &token) else {
        return unauthorized("invalid bearer token");
    };

    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// Middleware that requires an admin caller.
pub async fn require_admin(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(auth_user) = extract_bearer_token(&request)
        .and_then(|token| authenticate(&auth_state, &token))
    else {
        return unauthorized("missing or invalid bearer token");
    };
    if !auth_user.is_admin {
        return unauthorized("admin access required");
    }

    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// Middleware that optionally authenticates, for public endpoints that
/// behave differently for logged-in users (checkout, redemption).
pub async fn optional_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(auth_user) =
        extract_bearer_token(&request).and_then(|token| authenticate(&auth_state, &token))
    {
        request.extensions_mut().insert(auth_user);
    }
    next.run(request).await
}

fn unauthorized(reason: &str) -> Response {
    tracing::debug!(reason = reason, "Request rejected by auth middleware");
    (
        axum::http::StatusCode::UNAUTHORIZED,
        axum::Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}
