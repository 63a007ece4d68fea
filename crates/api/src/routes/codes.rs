//! Download code redemption route

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coda_commerce::Purchase;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedeemCodeRequest {
    pub code: String,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCodeResponse {
    pub purchase: Purchase,
    /// Short-lived token the client exchanges for the actual download.
    pub download_token: String,
}

pub async fn redeem_code(
    State(state): State<AppState>,
    auth_user: Option<Extension<AuthUser>>,
    Path(release_id): Path<Uuid>,
    Json(body): Json<RedeemCodeRequest>,
) -> Result<Json<RedeemCodeResponse>, ApiError> {
    let purchase = state
        .commerce
        .codes
        .redeem(
            release_id,
            body.code.trim(),
            auth_user.map(|u| u.user_id),
            body.email.as_deref(),
        )
        .await?;

    let download_token = state
        .jwt_manager
        .issue_download_token(purchase.user_id, purchase.id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(RedeemCodeResponse {
        purchase,
        download_token,
    }))
}
