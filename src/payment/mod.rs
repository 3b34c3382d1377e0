//! Payment Gateway Adapter.
//!
//! One [`PaymentGateway`] per provider. Online providers are two-phase:
//! `initiate` hands the client what it needs to pay remotely, and
//! `reconcile` turns the provider's return leg into a [`Verdict`]. The
//! internal wallet settles during `initiate` and never reconciles.

mod razorpay;
mod stripe;
mod wallet;

pub use razorpay::{sign_payment, verify_payment_signature, RazorpayApi, RazorpayClient, RazorpayGateway};
pub use stripe::{CheckoutSession, SessionRequest, StripeApi, StripeClient, StripeGateway};
pub use wallet::WalletGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::aggregates::{GatewayKind, Order, Payment, User};
use crate::error::{Result, SettlementError};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("unexpected provider response: {0}")]
    Protocol(String),
}

/// What the client does next after initiation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum Initiation {
    /// Open the provider's checkout widget against a remote order.
    Widget { key_id: String, remote_order_id: String, amount: i64, currency: String, callback_url: String },
    /// Redirect to a hosted checkout page.
    Redirect { session_id: String, url: String },
    /// Already paid.
    Settled,
}

impl Initiation {
    /// Provider-side handle the return leg will carry.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Widget { remote_order_id, .. } => Some(remote_order_id),
            Self::Redirect { session_id, .. } => Some(session_id),
            Self::Settled => None,
        }
    }
}

/// Return leg of an online payment, as posted back by the client.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "gateway", rename_all = "lowercase")]
pub enum GatewayCallback {
    Razorpay { order_id: String, payment_id: String, signature: String },
    Stripe { session_id: String },
}

impl GatewayCallback {
    pub fn gateway(&self) -> GatewayKind {
        match self {
            Self::Razorpay { .. } => GatewayKind::Razorpay,
            Self::Stripe { .. } => GatewayKind::Stripe,
        }
    }

    /// The remote reference used to find our payment row.
    pub fn reference(&self) -> &str {
        match self {
            Self::Razorpay { order_id, .. } => order_id,
            Self::Stripe { session_id } => session_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Paid { remote_payment_id: Option<String> },
    SignatureMismatch,
    Unpaid { reason: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn initiate(&self, order: &Order, buyer: &User) -> Result<Initiation>;

    async fn reconcile(&self, payment: &Payment, callback: &GatewayCallback) -> Result<Verdict>;
}

/// Gateways by kind. Unregistered kinds are refused at initiation.
#[derive(Clone, Default)]
pub struct Gateways {
    by_kind: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl Gateways {
    pub fn new() -> Self { Self::default() }

    pub fn register(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.by_kind.insert(gateway.kind(), gateway);
        self
    }

    pub fn get(&self, kind: GatewayKind) -> Result<Arc<dyn PaymentGateway>> {
        self.by_kind
            .get(&kind)
            .cloned()
            .ok_or_else(|| SettlementError::Validation(format!("payment gateway {} is not available", kind.as_str())))
    }
}
