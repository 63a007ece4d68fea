//! Subscription routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;

use coda_commerce::Subscription;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Explicit follow: the idempotent zero-amount subscription.
pub async fn follow_artist(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(artist_id): Path<Uuid>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription = state
        .commerce
        .subscriptions
        .follow_artist(auth_user.user_id, artist_id)
        .await?;

    Ok(Json(subscription))
}

/// Cancel a subscription; caller must own it or be a platform admin.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(subscription_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .commerce
        .subscriptions
        .cancel(subscription_id, auth_user.user_id, auth_user.is_admin)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
