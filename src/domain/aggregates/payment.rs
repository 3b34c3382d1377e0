//! Payment record, one per order, created when payment is initiated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::order::UnknownVariant;
use crate::domain::value_objects::OrderId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind { Razorpay, Stripe, Wallet }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentRecordStatus { Pending, Confirmed, Failed }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub order_id: OrderId,
    pub gateway: GatewayKind,
    /// Remote order id (Razorpay) or checkout session id (Stripe).
    pub remote_reference: Option<String>,
    /// Remote payment id once the provider reports one.
    pub remote_payment_id: Option<String>,
    pub amount: Decimal,
    pub status: PaymentRecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn pending(order_id: OrderId, gateway: GatewayKind, remote_reference: Option<String>, amount: Decimal) -> Self {
        let now = Utc::now();
        Self { order_id, gateway, remote_reference, remote_payment_id: None, amount, status: PaymentRecordStatus::Pending, created_at: now, updated_at: now }
    }
}

impl GatewayKind {
    pub fn as_str(self) -> &'static str {
        match self { Self::Razorpay => "razorpay", Self::Stripe => "stripe", Self::Wallet => "wallet" }
    }
}

impl FromStr for GatewayKind {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "razorpay" => Ok(Self::Razorpay),
            "stripe" => Ok(Self::Stripe),
            "wallet" => Ok(Self::Wallet),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl PaymentRecordStatus {
    pub fn as_str(self) -> &'static str {
        match self { Self::Pending => "PENDING", Self::Confirmed => "CONFIRMED", Self::Failed => "FAILED" }
    }
}

impl FromStr for PaymentRecordStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "FAILED" => Ok(Self::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}
