//! Pledge routes
//!
//! Amend/cancel a pledge, addressed either by a backing release
//! (trackGroup) or by the fundraiser directly. Authenticated pledgers only.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coda_commerce::Pledge;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::routes::PriceInput;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangePledgeRequest {
    pub amount: PriceInput,
}

#[derive(Debug, Serialize)]
pub struct ChangePledgeResponse {
    /// The amended pledge; `null` when the caller had no pending pledge.
    pub pledge: Option<Pledge>,
}

pub async fn amend_by_release(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(release_id): Path<Uuid>,
    Json(body): Json<ChangePledgeRequest>,
) -> Result<Json<ChangePledgeResponse>, ApiError> {
    let amount = body.amount.into_minor_units()?;
    let pledge = state
        .commerce
        .pledges
        .amend_by_release(release_id, auth_user.user_id, amount)
        .await?;

    Ok(Json(ChangePledgeResponse { pledge }))
}

pub async fn cancel_by_release(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(release_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .commerce
        .pledges
        .cancel_by_release(release_id, auth_user.user_id)
        .await?;

    Ok(Json(serde_json::json!({ "cancelled": true })))
}

pub async fn amend_by_fundraiser(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(fundraiser_id): Path<Uuid>,
    Json(body): Json<ChangePledgeRequest>,
) -> Result<Json<ChangePledgeResponse>, ApiError> {
    let amount = body.amount.into_minor_units()?;
    let pledge = state
        .commerce
        .pledges
        .amend(fundraiser_id, auth_user.user_id, amount)
        .await?;

    Ok(Json(ChangePledgeResponse { pledge }))
}

pub async fn cancel_by_fundraiser(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(fundraiser_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .commerce
        .pledges
        .cancel(fundraiser_id, auth_user.user_id)
        .await?;

    Ok(Json(serde_json::json!({ "cancelled": true })))
}
