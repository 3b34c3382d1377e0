//! Hosted checkout gateway, polled by session id on the return leg.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::{GatewayCallback, GatewayError, Initiation, PaymentGateway, Verdict};
use crate::config::StripeSettings;
use crate::domain::aggregates::{GatewayKind, Order, Payment, User};
use crate::domain::value_objects::to_minor_units;
use crate::error::{Result, SettlementError};

/// Substituted by the provider with the real session id on redirect.
const SESSION_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: String,
    pub payment_intent: Option<String>,
    /// `metadata[order_id]` as set at creation.
    pub order_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SessionRequest<'a> {
    pub order_id: &'a str,
    pub customer_email: &'a str,
    pub amount_minor: i64,
    pub currency: &'a str,
    pub success_url: String,
    pub cancel_url: String,
}

#[async_trait]
pub trait StripeApi: Send + Sync {
    async fn create_session(&self, request: &SessionRequest<'_>) -> std::result::Result<CheckoutSession, GatewayError>;
    async fn retrieve_session(&self, session_id: &str) -> std::result::Result<CheckoutSession, GatewayError>;
}

pub struct StripeClient {
    http: reqwest::Client,
    settings: StripeSettings,
}

impl StripeClient {
    pub fn new(settings: StripeSettings) -> Self {
        Self { http: reqwest::Client::new(), settings }
    }
}

fn parse_session(resp: serde_json::Value) -> std::result::Result<CheckoutSession, GatewayError> {
    if let Some(message) = resp["error"]["message"].as_str() {
        return Err(GatewayError::Rejected(message.to_string()));
    }
    let id = resp["id"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| GatewayError::Protocol(format!("checkout session without id: {resp}")))?;
    Ok(CheckoutSession {
        id,
        url: resp["url"].as_str().map(String::from),
        payment_status: resp["payment_status"].as_str().unwrap_or("unpaid").to_string(),
        payment_intent: resp["payment_intent"].as_str().map(String::from),
        order_id: resp["metadata"]["order_id"].as_str().map(String::from),
    })
}

#[async_trait]
impl StripeApi for StripeClient {
    async fn create_session(&self, request: &SessionRequest<'_>) -> std::result::Result<CheckoutSession, GatewayError> {
        let amount = request.amount_minor.to_string();
        let product_name = format!("Order {}", request.order_id);
        let resp: serde_json::Value = self
            .http
            .post(format!("{}/checkout/sessions", self.settings.api_base))
            .basic_auth(&self.settings.secret_key, None::<&str>)
            .form(&[
                ("mode", "payment"),
                ("customer_email", request.customer_email),
                ("line_items[0][price_data][currency]", request.currency),
                ("line_items[0][price_data][product_data][name]", product_name.as_str()),
                ("line_items[0][price_data][unit_amount]", amount.as_str()),
                ("line_items[0][quantity]", "1"),
                ("success_url", request.success_url.as_str()),
                ("cancel_url", request.cancel_url.as_str()),
                ("metadata[order_id]", request.order_id),
            ])
            .send()
            .await?
            .json()
            .await?;
        parse_session(resp)
    }

    async fn retrieve_session(&self, session_id: &str) -> std::result::Result<CheckoutSession, GatewayError> {
        let resp: serde_json::Value = self
            .http
            .get(format!("{}/checkout/sessions/{}", self.settings.api_base, session_id))
            .basic_auth(&self.settings.secret_key, None::<&str>)
            .send()
            .await?
            .json()
            .await?;
        parse_session(resp)
    }
}

pub struct StripeGateway {
    api: Arc<dyn StripeApi>,
    currency: String,
    callback_url: String,
}

impl StripeGateway {
    pub fn new(api: Arc<dyn StripeApi>, currency: impl Into<String>, callback_url: impl Into<String>) -> Self {
        Self { api, currency: currency.into().to_lowercase(), callback_url: callback_url.into() }
    }

    fn return_url(&self) -> String {
        format!("{}?session_id={SESSION_PLACEHOLDER}", self.callback_url)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn kind(&self) -> GatewayKind { GatewayKind::Stripe }

    async fn initiate(&self, order: &Order, buyer: &User) -> Result<Initiation> {
        let amount_minor = to_minor_units(order.final_amount)
            .ok_or_else(|| SettlementError::Validation(format!("amount {} out of range", order.final_amount)))?;
        let request = SessionRequest {
            order_id: order.id.as_str(),
            customer_email: &buyer.email,
            amount_minor,
            currency: &self.currency,
            success_url: self.return_url(),
            cancel_url: self.return_url(),
        };
        let session = self.api.create_session(&request).await?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::Protocol(format!("session {} has no checkout url", session.id)))?;
        info!(order_id = %order.id, session_id = %session.id, amount_minor, "Stripe checkout session created");
        Ok(Initiation::Redirect { session_id: session.id, url })
    }

    async fn reconcile(&self, payment: &Payment, callback: &GatewayCallback) -> Result<Verdict> {
        let GatewayCallback::Stripe { session_id } = callback else {
            return Err(SettlementError::Validation("callback is not for stripe".into()));
        };
        let session = self.api.retrieve_session(session_id).await?;
        if payment.remote_reference.as_deref() != Some(session.id.as_str())
            || session.order_id.as_deref() != Some(payment.order_id.as_str())
        {
            warn!(order_id = %payment.order_id, %session_id, "Stripe session does not belong to this order");
            return Ok(Verdict::Unpaid { reason: "session does not match order".into() });
        }
        if session.payment_status != "paid" {
            return Ok(Verdict::Unpaid { reason: format!("session payment status is {}", session.payment_status) });
        }
        Ok(Verdict::Paid { remote_payment_id: session.payment_intent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::OrderId;
    use rust_decimal::Decimal;
    use serde_json::json;

    struct PaidSession(&'static str);

    #[async_trait]
    impl StripeApi for PaidSession {
        async fn create_session(&self, request: &SessionRequest<'_>) -> std::result::Result<CheckoutSession, GatewayError> {
            assert!(request.success_url.ends_with("session_id={CHECKOUT_SESSION_ID}"));
            Ok(CheckoutSession { id: "cs_1".into(), url: Some("https://pay.example/cs_1".into()), payment_status: "unpaid".into(), payment_intent: None, order_id: Some(request.order_id.into()) })
        }

        async fn retrieve_session(&self, session_id: &str) -> std::result::Result<CheckoutSession, GatewayError> {
            Ok(CheckoutSession { id: session_id.into(), url: None, payment_status: self.0.into(), payment_intent: Some("pi_1".into()), order_id: Some("NEHA000001".into()) })
        }
    }

    fn payment() -> Payment {
        Payment::pending(OrderId::parse("NEHA000001").unwrap(), GatewayKind::Stripe, Some("cs_1".into()), Decimal::new(99, 0))
    }

    #[test]
    fn test_parse_session_reads_metadata() {
        let s = parse_session(json!({"id": "cs_9", "payment_status": "paid", "metadata": {"order_id": "X1"}})).unwrap();
        assert_eq!(s.order_id.as_deref(), Some("X1"));
        assert!(matches!(parse_session(json!({"error": {"message": "bad key"}})), Err(GatewayError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_reconcile_requires_paid_status() {
        let callback = GatewayCallback::Stripe { session_id: "cs_1".into() };
        let paid = StripeGateway::new(Arc::new(PaidSession("paid")), "INR", "http://localhost/cb");
        assert_eq!(paid.reconcile(&payment(), &callback).await.unwrap(), Verdict::Paid { remote_payment_id: Some("pi_1".into()) });

        let unpaid = StripeGateway::new(Arc::new(PaidSession("unpaid")), "INR", "http://localhost/cb");
        assert!(matches!(unpaid.reconcile(&payment(), &callback).await.unwrap(), Verdict::Unpaid { .. }));

        let other = GatewayCallback::Stripe { session_id: "cs_2".into() };
        assert!(matches!(paid.reconcile(&payment(), &other).await.unwrap(), Verdict::Unpaid { .. }));
    }
}
