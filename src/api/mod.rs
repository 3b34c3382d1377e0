//! HTTP surface.
//!
//! Every response uses the same envelope: `{status, message, data?}`.

mod handlers;
mod identity;

pub use identity::{Identity, Role};

use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;

use crate::settlement::SettlementEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: SettlementEngine,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self { status: true, message: message.into(), data: Some(data) }
    }
}

impl Envelope<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self { status: false, message: message.into(), data: None }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "foodhub-settlement"})) }))
        .route("/api/v1/cart", get(handlers::view_cart))
        .route("/api/v1/cart/items", post(handlers::add_to_cart))
        .route("/api/v1/cart/items/:product_id", put(handlers::update_cart_item).delete(handlers::remove_from_cart))
        .route("/api/v1/checkout/preview", post(handlers::preview_checkout))
        .route("/api/v1/orders", get(handlers::list_orders).post(handlers::place_order))
        .route("/api/v1/orders/:order_id", get(handlers::get_order))
        .route("/api/v1/orders/:order_id/payments", post(handlers::initiate_payment))
        .route("/api/v1/orders/:order_id/cancel", post(handlers::cancel_order))
        .route("/api/v1/orders/:order_id/items/:product_id/cancel", post(handlers::cancel_item))
        .route("/api/v1/payments/razorpay/callback", post(handlers::razorpay_callback))
        .route("/api/v1/payments/stripe/callback", get(handlers::stripe_callback))
        .route("/api/v1/wallet", get(handlers::user_wallet))
        .route("/api/v1/restaurant/items", get(handlers::restaurant_items))
        .route("/api/v1/restaurant/orders/:order_id/items/:product_id/advance", post(handlers::advance_item))
        .route("/api/v1/restaurant/products/:product_id/offer", put(handlers::set_product_offer))
        .route("/api/v1/restaurant/wallet", get(handlers::restaurant_wallet))
        .route("/api/v1/admin/orders/:order_id", get(handlers::admin_get_order))
        .route("/api/v1/admin/users/:user_id/wallet", post(handlers::admin_top_up))
        .route("/api/v1/admin/sweep", post(handlers::admin_sweep))
        .with_state(state)
}
