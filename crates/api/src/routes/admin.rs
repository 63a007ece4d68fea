//! Admin read endpoints
//!
//! Paginated listings over pledges, purchases, tips, and subscriptions.
//! Boundary plumbing only; all state transitions stay in the commerce core.

use axum::{
    extract::{Query, State},
    Json,
};

use coda_commerce::store::{PledgeStore, PurchaseStore, SubscriptionStore, TipStore};
use coda_commerce::{Pledge, Purchase, Subscription, Tip};

use crate::error::ApiError;
use crate::routes::Pagination;
use crate::state::AppState;

pub async fn list_pledges(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<Pledge>>, ApiError> {
    let (skip, take) = pagination.clamp();
    let pledges = state
        .store
        .list_pledges(skip, take)
        .await
        .map_err(coda_commerce::CommerceError::from)?;
    Ok(Json(pledges))
}

pub async fn list_purchases(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<Purchase>>, ApiError> {
    let (skip, take) = pagination.clamp();
    let purchases = state
        .store
        .list_purchases(skip, take)
        .await
        .map_err(coda_commerce::CommerceError::from)?;
    Ok(Json(purchases))
}

pub async fn list_tips(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<Tip>>, ApiError> {
    let (skip, take) = pagination.clamp();
    let tips = state
        .store
        .list_tips(skip, take)
        .await
        .map_err(coda_commerce::CommerceError::from)?;
    Ok(Json(tips))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    let (skip, take) = pagination.clamp();
    let subscriptions = state
        .store
        .list_subscriptions(skip, take)
        .await
        .map_err(coda_commerce::CommerceError::from)?;
    Ok(Json(subscriptions))
}
