//! Domain events
use crate::domain::aggregates::{GatewayKind, OrderStatus};
use crate::domain::value_objects::OrderId;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderPlaced { order_id: OrderId, user_id: Uuid, final_amount: Decimal },
    PaymentConfirmed { order_id: OrderId, gateway: GatewayKind, amount: Decimal },
    PaymentFailed { order_id: OrderId, gateway: GatewayKind, reason: String },
    ItemAdvanced { order_id: OrderId, product_id: Uuid, status: OrderStatus },
    ItemCancelled { order_id: OrderId, product_id: Uuid, refunded: Decimal },
    OrderExpired { order_id: OrderId },
}

impl DomainEvent {
    /// Subject suffix used when publishing.
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrderPlaced { .. } => "order_placed",
            Self::PaymentConfirmed { .. } => "payment_confirmed",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::ItemAdvanced { .. } => "item_advanced",
            Self::ItemCancelled { .. } => "item_cancelled",
            Self::OrderExpired { .. } => "order_expired",
        }
    }

    pub fn order_id(&self) -> &OrderId {
        match self {
            Self::OrderPlaced { order_id, .. }
            | Self::PaymentConfirmed { order_id, .. }
            | Self::PaymentFailed { order_id, .. }
            | Self::ItemAdvanced { order_id, .. }
            | Self::ItemCancelled { order_id, .. }
            | Self::OrderExpired { order_id } => order_id,
        }
    }
}
