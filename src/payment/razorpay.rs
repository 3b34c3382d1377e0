//! Redirect gateway with a signed return leg.
//!
//! A remote order is created up front; the provider later hands the client
//! `(order_id, payment_id, signature)` where the signature is
//! `hex(HMAC-SHA256(key_secret, "order_id|payment_id"))`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use super::{GatewayCallback, GatewayError, Initiation, PaymentGateway, Verdict};
use crate::config::RazorpaySettings;
use crate::domain::aggregates::{GatewayKind, Order, Payment, User};
use crate::domain::value_objects::to_minor_units;
use crate::error::{Result, SettlementError};

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait RazorpayApi: Send + Sync {
    /// Creates a remote order and returns its id.
    async fn create_order(&self, amount_minor: i64, currency: &str, receipt: &str) -> std::result::Result<String, GatewayError>;
}

pub struct RazorpayClient {
    http: reqwest::Client,
    settings: RazorpaySettings,
}

impl RazorpayClient {
    pub fn new(settings: RazorpaySettings) -> Self {
        Self { http: reqwest::Client::new(), settings }
    }
}

#[async_trait]
impl RazorpayApi for RazorpayClient {
    async fn create_order(&self, amount_minor: i64, currency: &str, receipt: &str) -> std::result::Result<String, GatewayError> {
        let resp: serde_json::Value = self
            .http
            .post(format!("{}/orders", self.settings.api_base))
            .basic_auth(&self.settings.key_id, Some(&self.settings.key_secret))
            .json(&json!({ "amount": amount_minor, "currency": currency, "receipt": receipt }))
            .send()
            .await?
            .json()
            .await?;

        if let Some(description) = resp["error"]["description"].as_str() {
            return Err(GatewayError::Rejected(description.to_string()));
        }
        resp["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| GatewayError::Protocol(format!("order create returned no id: {resp}")))
    }
}

fn payment_mac(secret: &str, remote_order_id: &str, payment_id: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{remote_order_id}|{payment_id}").as_bytes());
    Some(mac)
}

/// `hex(HMAC-SHA256(secret, "order_id|payment_id"))`.
pub fn sign_payment(secret: &str, remote_order_id: &str, payment_id: &str) -> Option<String> {
    payment_mac(secret, remote_order_id, payment_id).map(|mac| hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature.
pub fn verify_payment_signature(secret: &str, remote_order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else { return false };
    payment_mac(secret, remote_order_id, payment_id).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}

pub struct RazorpayGateway {
    api: Arc<dyn RazorpayApi>,
    key_id: String,
    key_secret: String,
    currency: String,
    callback_url: String,
}

impl RazorpayGateway {
    pub fn new(api: Arc<dyn RazorpayApi>, settings: &RazorpaySettings, currency: impl Into<String>, callback_url: impl Into<String>) -> Self {
        Self {
            api,
            key_id: settings.key_id.clone(),
            key_secret: settings.key_secret.clone(),
            currency: currency.into(),
            callback_url: callback_url.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn kind(&self) -> GatewayKind { GatewayKind::Razorpay }

    async fn initiate(&self, order: &Order, _buyer: &User) -> Result<Initiation> {
        let amount = to_minor_units(order.final_amount)
            .ok_or_else(|| SettlementError::Validation(format!("amount {} out of range", order.final_amount)))?;
        let remote_order_id = self.api.create_order(amount, &self.currency, order.id.as_str()).await?;
        info!(order_id = %order.id, %remote_order_id, amount, "Razorpay order created");
        Ok(Initiation::Widget {
            key_id: self.key_id.clone(),
            remote_order_id,
            amount,
            currency: self.currency.clone(),
            callback_url: self.callback_url.clone(),
        })
    }

    async fn reconcile(&self, payment: &Payment, callback: &GatewayCallback) -> Result<Verdict> {
        let GatewayCallback::Razorpay { order_id, payment_id, signature } = callback else {
            return Err(SettlementError::Validation("callback is not for razorpay".into()));
        };
        if payment.remote_reference.as_deref() != Some(order_id.as_str()) {
            warn!(order_id = %payment.order_id, remote_order_id = %order_id, "Razorpay callback for a different remote order");
            return Ok(Verdict::SignatureMismatch);
        }
        if !verify_payment_signature(&self.key_secret, order_id, payment_id, signature) {
            return Ok(Verdict::SignatureMismatch);
        }
        Ok(Verdict::Paid { remote_payment_id: Some(payment_id.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::OrderId;
    use rust_decimal::Decimal;

    struct FixedOrder;

    #[async_trait]
    impl RazorpayApi for FixedOrder {
        async fn create_order(&self, _amount: i64, _currency: &str, _receipt: &str) -> std::result::Result<String, GatewayError> {
            Ok("order_R1".into())
        }
    }

    fn gateway() -> RazorpayGateway {
        let settings = RazorpaySettings { key_id: "rzp_test".into(), key_secret: "s3cret".into(), api_base: String::new() };
        RazorpayGateway::new(Arc::new(FixedOrder), &settings, "INR", "http://localhost/cb")
    }

    fn payment() -> Payment {
        Payment::pending(OrderId::parse("RAVI000001").unwrap(), GatewayKind::Razorpay, Some("order_R1".into()), Decimal::new(250, 0))
    }

    #[test]
    fn test_signature_roundtrip_and_tamper() {
        let sig = sign_payment("s3cret", "order_R1", "pay_P1").unwrap();
        assert!(verify_payment_signature("s3cret", "order_R1", "pay_P1", &sig));
        assert!(!verify_payment_signature("s3cret", "order_R1", "pay_P2", &sig));
        assert!(!verify_payment_signature("other", "order_R1", "pay_P1", &sig));
        assert!(!verify_payment_signature("s3cret", "order_R1", "pay_P1", "not-hex"));
    }

    #[tokio::test]
    async fn test_reconcile_verdicts() {
        let gw = gateway();
        let good = GatewayCallback::Razorpay { order_id: "order_R1".into(), payment_id: "pay_P1".into(), signature: sign_payment("s3cret", "order_R1", "pay_P1").unwrap() };
        assert_eq!(gw.reconcile(&payment(), &good).await.unwrap(), Verdict::Paid { remote_payment_id: Some("pay_P1".into()) });

        let forged = GatewayCallback::Razorpay { order_id: "order_R1".into(), payment_id: "pay_P1".into(), signature: "00".repeat(32) };
        assert_eq!(gw.reconcile(&payment(), &forged).await.unwrap(), Verdict::SignatureMismatch);
    }

    #[tokio::test]
    async fn test_initiate_uses_minor_units() {
        let order = crate::domain::aggregates::Order::create(
            OrderId::parse("RAVI000001").unwrap(), uuid::Uuid::new_v4(), uuid::Uuid::new_v4(),
            crate::domain::aggregates::PaymentMethod::Online, 1, Decimal::new(25050, 2), Decimal::ZERO,
        );
        let init = gateway().initiate(&order, &User::new("Ravi", "ravi@example.com")).await.unwrap();
        assert!(matches!(init, Initiation::Widget { amount: 25050, .. }));
        assert_eq!(init.reference(), Some("order_R1"));
    }
}
