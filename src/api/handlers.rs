use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Form, Json};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{AppState, Envelope, Identity};
use crate::domain::aggregates::{CartItem, GatewayKind, Order, OrderItem, PaymentMethod, Product, WalletEntry, WalletParty};
use crate::domain::value_objects::OrderId;
use crate::error::{Result, SettlementError};
use crate::payment::GatewayCallback;
use crate::pricing::Totals;
use crate::settlement::{CancelReport, CartView, OrderDetails, PaymentOutcome, SweepReport, WalletStatement};

fn order_id(raw: String) -> Result<OrderId> {
    OrderId::parse(raw).map_err(|e| SettlementError::Validation(e.to_string()))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub quantity: i32,
    #[validate(length(max = 200))]
    pub cooking_note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCartRequest {
    #[validate(range(min = 0, max = 100))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PreviewRequest {
    #[validate(length(min = 1, max = 32))]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    pub address_id: Uuid,
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1, max = 32))]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub gateway: GatewayKind,
}

/// Fields the hosted checkout widget posts back.
#[derive(Debug, Deserialize, Validate)]
pub struct RazorpayCallbackForm {
    #[validate(length(min = 1))]
    pub razorpay_order_id: String,
    #[validate(length(min = 1))]
    pub razorpay_payment_id: String,
    #[validate(length(min = 1))]
    pub razorpay_signature: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StripeCallbackQuery {
    #[validate(length(min = 1))]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OfferRequest {
    /// `null` clears the offer.
    pub offer_amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: Decimal,
}

pub async fn view_cart(State(s): State<AppState>, who: Identity) -> Result<Envelope<CartView>> {
    let user_id = who.user_id(&s).await?;
    Ok(Envelope::success("Cart", s.engine.view_cart(user_id).await?))
}

pub async fn add_to_cart(State(s): State<AppState>, who: Identity, Json(r): Json<AddToCartRequest>) -> Result<(StatusCode, Envelope<CartItem>)> {
    r.validate()?;
    let user_id = who.user_id(&s).await?;
    let line = s.engine.add_to_cart(user_id, r.product_id, r.quantity, r.cooking_note).await?;
    Ok((StatusCode::CREATED, Envelope::success("Added to cart", line)))
}

pub async fn update_cart_item(State(s): State<AppState>, who: Identity, Path(product_id): Path<Uuid>, Json(r): Json<UpdateCartRequest>) -> Result<Envelope<Option<CartItem>>> {
    r.validate()?;
    let user_id = who.user_id(&s).await?;
    Ok(Envelope::success("Cart updated", s.engine.update_cart_item(user_id, product_id, r.quantity).await?))
}

pub async fn remove_from_cart(State(s): State<AppState>, who: Identity, Path(product_id): Path<Uuid>) -> Result<Envelope<()>> {
    let user_id = who.user_id(&s).await?;
    s.engine.remove_from_cart(user_id, product_id).await?;
    Ok(Envelope::success("Removed from cart", ()))
}

pub async fn preview_checkout(State(s): State<AppState>, who: Identity, Json(r): Json<PreviewRequest>) -> Result<Envelope<Totals>> {
    r.validate()?;
    let user_id = who.user_id(&s).await?;
    Ok(Envelope::success("Checkout preview", s.engine.preview_checkout(user_id, r.coupon_code.as_deref()).await?))
}

pub async fn place_order(State(s): State<AppState>, who: Identity, Json(r): Json<PlaceOrderRequest>) -> Result<(StatusCode, Envelope<Order>)> {
    r.validate()?;
    let user_id = who.user_id(&s).await?;
    let order = s.engine.place_order(user_id, r.address_id, r.payment_method, r.coupon_code.as_deref()).await?;
    Ok((StatusCode::CREATED, Envelope::success("Order placed", order)))
}

pub async fn list_orders(State(s): State<AppState>, who: Identity) -> Result<Envelope<Vec<Order>>> {
    let user_id = who.user_id(&s).await?;
    Ok(Envelope::success("Orders", s.engine.user_orders(user_id).await?))
}

pub async fn get_order(State(s): State<AppState>, who: Identity, Path(id): Path<String>) -> Result<Envelope<OrderDetails>> {
    let user_id = who.user_id(&s).await?;
    Ok(Envelope::success("Order", s.engine.order_details(&order_id(id)?, Some(user_id)).await?))
}

pub async fn initiate_payment(State(s): State<AppState>, who: Identity, Path(id): Path<String>, Json(r): Json<InitiatePaymentRequest>) -> Result<Envelope<PaymentOutcome>> {
    let user_id = who.user_id(&s).await?;
    let outcome = s.engine.initiate_payment(user_id, &order_id(id)?, r.gateway).await?;
    Ok(Envelope::success("Payment initiated", outcome))
}

pub async fn cancel_order(State(s): State<AppState>, who: Identity, Path(id): Path<String>) -> Result<Envelope<CancelReport>> {
    let user_id = who.user_id(&s).await?;
    Ok(Envelope::success("Order cancelled", s.engine.cancel_order(user_id, &order_id(id)?).await?))
}

pub async fn cancel_item(State(s): State<AppState>, who: Identity, Path((id, product_id)): Path<(String, Uuid)>) -> Result<Envelope<CancelReport>> {
    let user_id = who.user_id(&s).await?;
    Ok(Envelope::success("Item cancelled", s.engine.cancel_item(user_id, &order_id(id)?, product_id).await?))
}

/// Authenticated by the payment signature, not by caller identity.
pub async fn razorpay_callback(State(s): State<AppState>, Form(f): Form<RazorpayCallbackForm>) -> Result<Envelope<PaymentOutcome>> {
    f.validate()?;
    let callback = GatewayCallback::Razorpay { order_id: f.razorpay_order_id, payment_id: f.razorpay_payment_id, signature: f.razorpay_signature };
    Ok(Envelope::success("Payment confirmed", s.engine.reconcile_callback(&callback).await?))
}

/// Authenticated by polling the session at the provider.
pub async fn stripe_callback(State(s): State<AppState>, Query(q): Query<StripeCallbackQuery>) -> Result<Envelope<PaymentOutcome>> {
    q.validate()?;
    let callback = GatewayCallback::Stripe { session_id: q.session_id };
    Ok(Envelope::success("Payment confirmed", s.engine.reconcile_callback(&callback).await?))
}

pub async fn user_wallet(State(s): State<AppState>, who: Identity) -> Result<Envelope<WalletStatement>> {
    let user_id = who.user_id(&s).await?;
    Ok(Envelope::success("Wallet", s.engine.wallet_statement(WalletParty::User(user_id)).await?))
}

pub async fn restaurant_items(State(s): State<AppState>, who: Identity) -> Result<Envelope<Vec<OrderItem>>> {
    let restaurant_id = who.restaurant_id(&s).await?;
    Ok(Envelope::success("Order items", s.engine.restaurant_items(restaurant_id).await?))
}

pub async fn advance_item(State(s): State<AppState>, who: Identity, Path((id, product_id)): Path<(String, Uuid)>) -> Result<Envelope<OrderItem>> {
    let restaurant_id = who.restaurant_id(&s).await?;
    Ok(Envelope::success("Item advanced", s.engine.advance_item(restaurant_id, &order_id(id)?, product_id).await?))
}

pub async fn set_product_offer(State(s): State<AppState>, who: Identity, Path(product_id): Path<Uuid>, Json(r): Json<OfferRequest>) -> Result<Envelope<Product>> {
    let restaurant_id = who.restaurant_id(&s).await?;
    Ok(Envelope::success("Offer updated", s.engine.set_product_offer(restaurant_id, product_id, r.offer_amount).await?))
}

pub async fn restaurant_wallet(State(s): State<AppState>, who: Identity) -> Result<Envelope<WalletStatement>> {
    let restaurant_id = who.restaurant_id(&s).await?;
    Ok(Envelope::success("Wallet", s.engine.wallet_statement(WalletParty::Restaurant(restaurant_id)).await?))
}

pub async fn admin_get_order(State(s): State<AppState>, who: Identity, Path(id): Path<String>) -> Result<Envelope<OrderDetails>> {
    who.admin()?;
    Ok(Envelope::success("Order", s.engine.order_details(&order_id(id)?, None).await?))
}

pub async fn admin_top_up(State(s): State<AppState>, who: Identity, Path(user_id): Path<Uuid>, Json(r): Json<TopUpRequest>) -> Result<Envelope<WalletEntry>> {
    who.admin()?;
    Ok(Envelope::success("Wallet credited", s.engine.top_up_wallet(user_id, r.amount).await?))
}

pub async fn admin_sweep(State(s): State<AppState>, who: Identity) -> Result<Envelope<SweepReport>> {
    who.admin()?;
    Ok(Envelope::success("Sweep complete", s.engine.expire_stale_orders(Utc::now()).await?))
}
