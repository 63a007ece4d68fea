//! Checkout routes
//!
//! Each handler resolves the optional caller identity, validates the body,
//! and returns the processor's hosted redirect URL.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coda_commerce::MerchPurchaseArgs;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::routes::{parse_price, PriceInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurchaseRequest {
    pub price: Option<PriceInput>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TipRequest {
    pub price: Option<PriceInput>,
    pub email: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MerchPurchaseRequest {
    pub price: Option<PriceInput>,
    pub email: Option<String>,
    pub quantity: Option<i64>,
    #[serde(default)]
    pub merch_option_ids: Vec<Uuid>,
    pub shipping_destination_id: Uuid,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub redirect_url: String,
}

pub async fn purchase_release(
    State(state): State<AppState>,
    auth_user: Option<Extension<AuthUser>>,
    Path(release_id): Path<Uuid>,
    Json(body): Json<PurchaseRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let session = state
        .commerce
        .checkout
        .release_checkout(
            release_id,
            auth_user.map(|u| u.user_id),
            parse_price(body.price)?,
            body.email,
        )
        .await?;

    Ok(Json(CheckoutResponse {
        redirect_url: session.redirect_url,
    }))
}

pub async fn purchase_track(
    State(state): State<AppState>,
    auth_user: Option<Extension<AuthUser>>,
    Path(track_id): Path<Uuid>,
    Json(body): Json<PurchaseRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let session = state
        .commerce
        .checkout
        .track_checkout(
            track_id,
            auth_user.map(|u| u.user_id),
            parse_price(body.price)?,
            body.email,
        )
        .await?;

    Ok(Json(CheckoutResponse {
        redirect_url: session.redirect_url,
    }))
}

pub async fn purchase_catalogue(
    State(state): State<AppState>,
    auth_user: Option<Extension<AuthUser>>,
    Path(artist_id): Path<Uuid>,
    Json(body): Json<PurchaseRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let session = state
        .commerce
        .checkout
        .catalogue_checkout(
            artist_id,
            auth_user.map(|u| u.user_id),
            parse_price(body.price)?,
            body.email,
        )
        .await?;

    Ok(Json(CheckoutResponse {
        redirect_url: session.redirect_url,
    }))
}

pub async fn tip_artist(
    State(state): State<AppState>,
    auth_user: Option<Extension<AuthUser>>,
    Path(artist_id): Path<Uuid>,
    Json(body): Json<TipRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let session = state
        .commerce
        .checkout
        .tip_checkout(
            artist_id,
            auth_user.map(|u| u.user_id),
            parse_price(body.price)?,
            body.email,
            body.message,
        )
        .await?;

    Ok(Json(CheckoutResponse {
        redirect_url: session.redirect_url,
    }))
}

pub async fn purchase_merch(
    State(state): State<AppState>,
    auth_user: Option<Extension<AuthUser>>,
    Path(merch_id): Path<Uuid>,
    Json(body): Json<MerchPurchaseRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let args = MerchPurchaseArgs {
        price: parse_price(body.price)?,
        email: body.email,
        quantity: body.quantity,
        merch_option_ids: body.merch_option_ids,
        shipping_destination_id: body.shipping_destination_id,
        message: body.message,
    };

    let session = state
        .commerce
        .checkout
        .merch_checkout(merch_id, auth_user.map(|u| u.user_id), args)
        .await?;

    Ok(Json(CheckoutResponse {
        redirect_url: session.redirect_url,
    }))
}
