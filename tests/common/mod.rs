//! Seeded in-memory engine with scripted payment providers.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use foodhub_settlement::config::{CheckoutSettings, RazorpaySettings};
use foodhub_settlement::domain::aggregates::{Address, Coupon, Product, Restaurant, User, WalletParty};
use foodhub_settlement::ledger::WalletLedger;
use foodhub_settlement::payment::{
    CheckoutSession, GatewayError, Gateways, RazorpayApi, RazorpayGateway, SessionRequest, StripeApi, StripeGateway, WalletGateway,
};
use foodhub_settlement::publisher::RecordingPublisher;
use foodhub_settlement::store::{MemoryStore, Store};
use foodhub_settlement::SettlementEngine;

pub const RAZORPAY_SECRET: &str = "rzp_test_secret";
pub const USER_EMAIL: &str = "meera@example.com";
pub const RESTAURANT_EMAIL: &str = "annapurna@example.com";

/// Hands out sequential remote order ids, or refuses when told to.
#[derive(Default)]
pub struct FakeRazorpay {
    next: AtomicU32,
    pub reject: AtomicBool,
}

#[async_trait]
impl RazorpayApi for FakeRazorpay {
    async fn create_order(&self, _amount_minor: i64, _currency: &str, _receipt: &str) -> Result<String, GatewayError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("Authentication failed".into()));
        }
        Ok(format!("order_rzp{}", self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

/// Keeps sessions in memory; tests flip them to paid with [`FakeStripe::pay`].
#[derive(Default)]
pub struct FakeStripe {
    next: AtomicU32,
    sessions: Mutex<HashMap<String, CheckoutSession>>,
}

impl FakeStripe {
    pub fn pay(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.payment_status = "paid".into();
            session.payment_intent = Some(format!("pi_{session_id}"));
        }
    }
}

#[async_trait]
impl StripeApi for FakeStripe {
    async fn create_session(&self, request: &SessionRequest<'_>) -> Result<CheckoutSession, GatewayError> {
        let id = format!("cs_test_{}", self.next.fetch_add(1, Ordering::SeqCst));
        let session = CheckoutSession {
            id: id.clone(),
            url: Some(format!("https://checkout.example/{id}")),
            payment_status: "unpaid".into(),
            payment_intent: None,
            order_id: Some(request.order_id.to_string()),
        };
        self.sessions.lock().insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, GatewayError> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected(format!("No such checkout.session: {session_id}")))
    }
}

pub struct Harness {
    pub engine: SettlementEngine,
    pub store: Arc<MemoryStore>,
    pub events: Arc<RecordingPublisher>,
    pub razorpay: Arc<FakeRazorpay>,
    pub stripe: Arc<FakeStripe>,
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub restaurant_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("Meera Iyer", USER_EMAIL);
        let address = Address { id: Uuid::new_v4(), user_id: user.id, line1: "4 Temple Street".into(), city: "Chennai".into(), pincode: "600004".into() };
        let (user_id, address_id) = (user.id, address.id);
        store.insert_user(user);
        store.insert_address(address);

        let shared: Arc<dyn Store> = store.clone();
        let razorpay = Arc::new(FakeRazorpay::default());
        let stripe = Arc::new(FakeStripe::default());
        let settings = RazorpaySettings { key_id: "rzp_test_key".into(), key_secret: RAZORPAY_SECRET.into(), api_base: "http://razorpay.invalid".into() };
        let gateways = Gateways::new()
            .register(Arc::new(WalletGateway::new(WalletLedger::new(shared.clone()))))
            .register(Arc::new(RazorpayGateway::new(razorpay.clone(), &settings, "INR", "http://localhost/api/v1/payments/razorpay/callback")))
            .register(Arc::new(StripeGateway::new(stripe.clone(), "INR", "http://localhost/api/v1/payments/stripe/callback")));
        let events = Arc::new(RecordingPublisher::default());
        let engine = SettlementEngine::new(shared, gateways, events.clone(), CheckoutSettings::default());

        let mut harness = Self { engine, store, events, razorpay, stripe, user_id, address_id, restaurant_id: Uuid::nil() };
        harness.restaurant_id = harness.restaurant(RESTAURANT_EMAIL);
        harness
    }

    pub fn restaurant(&self, email: &str) -> Uuid {
        let restaurant = Restaurant { id: Uuid::new_v4(), name: "Annapurna Mess".into(), email: email.into(), wallet_amount: Decimal::ZERO };
        let id = restaurant.id;
        self.store.insert_restaurant(restaurant);
        id
    }

    pub fn product_of(&self, restaurant_id: Uuid, price: i64, stock: i32) -> Uuid {
        let product = Product::new(restaurant_id, "Thali", Decimal::new(price, 0), stock);
        let id = product.id;
        self.store.insert_product(product);
        id
    }

    pub fn product(&self, price: i64, stock: i32) -> Uuid {
        self.product_of(self.restaurant_id, price, stock)
    }

    pub fn coupon(&self, code: &str, percentage: i64, maximum_usage: i32) {
        self.store.insert_coupon(Coupon {
            code: code.into(),
            expires_at: Utc::now() + Duration::days(1),
            percentage: Decimal::new(percentage, 0),
            minimum_amount: Decimal::ZERO,
            maximum_usage,
        });
    }

    pub async fn balance(&self, party: WalletParty) -> Decimal {
        self.engine.wallet().balance(party).await.unwrap()
    }
}
