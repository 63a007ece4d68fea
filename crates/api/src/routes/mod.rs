//! HTTP routes

pub mod admin;
pub mod checkout;
pub mod codes;
pub mod pledges;
pub mod subscriptions;
pub mod webhooks;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;

use coda_commerce::{CommerceError, CommerceResult};

use crate::auth::{optional_auth, require_admin, require_auth};
use crate::state::AppState;

/// A price in minor units, accepted as a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PriceInput {
    Number(i64),
    Text(String),
}

impl PriceInput {
    pub fn into_minor_units(self) -> CommerceResult<i64> {
        match self {
            PriceInput::Number(value) => Ok(value),
            PriceInput::Text(raw) => raw.trim().parse().map_err(|_| {
                CommerceError::InvalidInput(format!("price '{raw}' is not an integer amount"))
            }),
        }
    }
}

/// Unwrap an optional price field from a request body.
pub fn parse_price(price: Option<PriceInput>) -> CommerceResult<Option<i64>> {
    price.map(PriceInput::into_minor_units).transpose()
}

/// Pagination for the admin read endpoints.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_take")]
    pub take: i64,
}

fn default_take() -> i64 {
    50
}

impl Pagination {
    pub fn clamp(self) -> (i64, i64) {
        (self.skip.max(0), self.take.clamp(1, 100))
    }
}

pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Purchase-shaped endpoints: public, but behave differently for
    // logged-in users (guest email vs account email, free-item rejection).
    let public = Router::new()
        .route("/trackGroups/{id}/purchase", post(checkout::purchase_release))
        .route("/tracks/{id}/purchase", post(checkout::purchase_track))
        .route(
            "/artists/{id}/purchaseCatalogue",
            post(checkout::purchase_catalogue),
        )
        .route("/artists/{id}/tip", post(checkout::tip_artist))
        .route("/merch/{id}/purchase", post(checkout::purchase_merch))
        .route("/trackGroups/{id}/redeemCode", post(codes::redeem_code))
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            optional_auth,
        ));

    let authed = Router::new()
        .route(
            "/trackGroups/{id}/changePledge",
            post(pledges::amend_by_release).delete(pledges::cancel_by_release),
        )
        .route(
            "/fundraisers/{id}/changePledge",
            put(pledges::amend_by_fundraiser).delete(pledges::cancel_by_fundraiser),
        )
        .route(
            "/artists/{id}/follow",
            post(subscriptions::follow_artist),
        )
        .route(
            "/manage/subscriptions/{id}",
            delete(subscriptions::cancel_subscription),
        )
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_auth,
        ));

    let admin = Router::new()
        .route("/admin/pledges", get(admin::list_pledges))
        .route("/admin/purchases", get(admin::list_purchases))
        .route("/admin/tips", get(admin::list_tips))
        .route("/admin/subscriptions", get(admin::list_subscriptions))
        .route_layer(middleware::from_fn_with_state(auth_state, require_admin));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .merge(public)
        .merge(authed)
        .merge(admin)
        .with_state(state)
}
