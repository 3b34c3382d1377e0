//! Order Aggregate
//!
//! An order is written once at checkout. Afterwards only its payment status
//! and coupon fields move, each exactly once. Each order item carries its own
//! fulfillment status, which only ever moves forward along
//! [`OrderStatus::FORWARD`] or sideways into [`OrderStatus::Cancelled`], and
//! its own [`ItemSettlement`] progress through the post-payment hook.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::value_objects::OrderId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: Uuid,
    pub address_id: Uuid,
    /// Total units across all lines.
    pub item_count: i32,
    pub coupon_code: Option<String>,
    pub coupon_discount_amount: Decimal,
    pub product_offer_amount: Decimal,
    /// Gross, before any discount.
    pub total_amount: Decimal,
    pub final_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub ordered_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    /// Line gross.
    pub amount: Decimal,
    pub product_offer_amount: Decimal,
    /// Line net after offer and the pro-rated share of the coupon.
    pub after_deduction: Decimal,
    pub cooking_note: Option<String>,
    pub status: OrderStatus,
    pub review: Option<String>,
    pub rating: Option<i16>,
    #[serde(default)]
    pub settlement: ItemSettlement,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    #[serde(rename = "COD", alias = "CASH_ON_DELIVERY")]
    CashOnDelivery,
    Online,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus { Pending, CodPending, Settling, Confirmed, Failed, Expired }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { Processing, InPreparation, Prepared, OnTheWay, Delivered, Cancelled }

/// How far a paid line has moved through settlement. Only moves forward:
/// `Open` to `StockCommitted` to `Settled`, or `Open` straight to `Settled`
/// for a line cancelled for want of stock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemSettlement {
    #[default]
    Open,
    StockCommitted,
    Settled,
}

impl PaymentMethod {
    pub fn initial_status(self) -> PaymentStatus {
        match self {
            Self::CashOnDelivery => PaymentStatus::CodPending,
            Self::Online => PaymentStatus::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self { Self::CashOnDelivery => "COD", Self::Online => "ONLINE" }
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COD" | "CASH_ON_DELIVERY" => Ok(Self::CashOnDelivery),
            "ONLINE" => Ok(Self::Online),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl PaymentStatus {
    /// Whether the restaurant may work on the order and the user may cancel it.
    /// A settling order is paid but still has stock and proceeds in flight.
    pub fn accepts_fulfillment(self) -> bool { matches!(self, Self::Confirmed | Self::CodPending) }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::CodPending => "COD_PENDING",
            Self::Settling => "SETTLING",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COD_PENDING" => Ok(Self::CodPending),
            "SETTLING" => Ok(Self::Settling),
            "CONFIRMED" => Ok(Self::Confirmed),
            "FAILED" => Ok(Self::Failed),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl OrderStatus {
    pub const FORWARD: [OrderStatus; 5] = [
        OrderStatus::Processing,
        OrderStatus::InPreparation,
        OrderStatus::Prepared,
        OrderStatus::OnTheWay,
        OrderStatus::Delivered,
    ];

    /// The status a restaurant advances to from here.
    pub fn next(self) -> Result<OrderStatus, TransitionError> {
        let pos = Self::FORWARD.iter().position(|s| *s == self).ok_or(TransitionError::Cancelled)?;
        Self::FORWARD.get(pos + 1).copied().ok_or(TransitionError::MaximumReached)
    }

    pub fn is_cancellable(self) -> bool { matches!(self, Self::Processing | Self::InPreparation) }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::InPreparation => "IN_PREPARATION",
            Self::Prepared => "PREPARED",
            Self::OnTheWay => "ON_THE_WAY",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(Self::Processing),
            "IN_PREPARATION" => Ok(Self::InPreparation),
            "PREPARED" => Ok(Self::Prepared),
            "ON_THE_WAY" => Ok(Self::OnTheWay),
            "DELIVERED" => Ok(Self::Delivered),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl ItemSettlement {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::StockCommitted => "STOCK_COMMITTED",
            Self::Settled => "SETTLED",
        }
    }
}

impl FromStr for ItemSettlement {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "STOCK_COMMITTED" => Ok(Self::StockCommitted),
            "SETTLED" => Ok(Self::Settled),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl Order {
    /// Discount-free order; `final_amount` is gross minus product offers.
    pub fn create(id: OrderId, user_id: Uuid, address_id: Uuid, method: PaymentMethod, item_count: i32, total_amount: Decimal, product_offer_amount: Decimal) -> Self {
        Self {
            id, user_id, address_id, item_count,
            coupon_code: None, coupon_discount_amount: Decimal::ZERO,
            product_offer_amount, total_amount,
            final_amount: total_amount - product_offer_amount,
            payment_method: method,
            payment_status: method.initial_status(),
            ordered_at: Utc::now(),
        }
    }

    pub fn has_coupon(&self) -> bool { self.coupon_code.as_deref().is_some_and(|c| !c.is_empty()) }

    /// Records a coupon discount. Legal once per order.
    pub fn apply_coupon(&mut self, code: impl Into<String>, discount: Decimal) -> Result<(), OrderError> {
        if self.has_coupon() { return Err(OrderError::CouponAlreadyApplied); }
        self.coupon_code = Some(code.into());
        self.coupon_discount_amount = discount;
        self.final_amount = self.total_amount - (discount + self.product_offer_amount);
        Ok(())
    }

    /// `final = total - (coupon + offer)`.
    pub fn amounts_balance(&self) -> bool {
        self.final_amount == self.total_amount - (self.coupon_discount_amount + self.product_offer_amount)
    }
}

impl OrderItem {
    pub fn belongs_to_restaurant(&self, restaurant_id: Uuid) -> bool { self.restaurant_id == restaurant_id }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum TransitionError { MaximumReached, Cancelled }
impl std::error::Error for TransitionError {}
impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaximumReached => write!(f, "Maximum transition level reached"),
            Self::Cancelled => write!(f, "Cancelled items cannot move"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { CouponAlreadyApplied }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Order already has a coupon") }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub struct UnknownVariant(pub String);
impl std::error::Error for UnknownVariant {}
impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Unknown value: {}", self.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order::create(OrderId::parse("ASHA000123").unwrap(), Uuid::new_v4(), Uuid::new_v4(), PaymentMethod::Online, 3, Decimal::new(600, 0), Decimal::new(60, 0))
    }

    #[test]
    fn test_status_walks_forward() {
        let mut status = OrderStatus::Processing;
        for expected in &OrderStatus::FORWARD[1..] {
            status = status.next().unwrap();
            assert_eq!(status, *expected);
        }
        assert_eq!(status.next(), Err(TransitionError::MaximumReached));
        assert_eq!(OrderStatus::Cancelled.next(), Err(TransitionError::Cancelled));
    }

    #[test]
    fn test_cancellable_window() {
        assert!(OrderStatus::Processing.is_cancellable());
        assert!(OrderStatus::InPreparation.is_cancellable());
        assert!(!OrderStatus::Prepared.is_cancellable());
        assert!(!OrderStatus::OnTheWay.is_cancellable());
        assert!(!OrderStatus::Delivered.is_cancellable());
    }

    #[test]
    fn test_coupon_applies_once() {
        let mut o = order();
        assert_eq!(o.payment_status, PaymentStatus::Pending);
        o.apply_coupon("WELCOME10", Decimal::new(60, 0)).unwrap();
        assert_eq!(o.final_amount, Decimal::new(480, 0));
        assert!(o.amounts_balance());
        assert_eq!(o.apply_coupon("AGAIN", Decimal::ONE), Err(OrderError::CouponAlreadyApplied));
    }

    #[test]
    fn test_status_strings_round_trip() {
        for s in OrderStatus::FORWARD.iter().chain([OrderStatus::Cancelled].iter()) {
            assert_eq!(s.as_str().parse::<OrderStatus>().unwrap(), *s);
        }
        assert_eq!("COD".parse::<PaymentMethod>().unwrap().initial_status(), PaymentStatus::CodPending);
        assert_eq!("SETTLING".parse::<PaymentStatus>().unwrap(), PaymentStatus::Settling);
        assert_eq!("STOCK_COMMITTED".parse::<ItemSettlement>().unwrap(), ItemSettlement::StockCommitted);
    }

    #[test]
    fn test_settling_order_is_not_yet_fulfillable() {
        assert!(!PaymentStatus::Settling.accepts_fulfillment());
        assert!(!PaymentStatus::Pending.accepts_fulfillment());
        assert!(PaymentStatus::Confirmed.accepts_fulfillment());
        assert!(PaymentStatus::CodPending.accepts_fulfillment());
    }
}
