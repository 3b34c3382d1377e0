//! Order item transitions: restaurant advances, user cancellations.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::SettlementEngine;
use crate::domain::aggregates::{Order, OrderItem, OrderStatus, PaymentStatus};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::OrderId;
use crate::error::{Result, SettlementError};

#[derive(Clone, Debug, Serialize)]
pub struct CancelReport {
    pub order_id: OrderId,
    pub cancelled: Vec<Uuid>,
    pub refunded: Decimal,
}

impl SettlementEngine {
    async fn order_item(&self, order_id: &OrderId, product_id: Uuid) -> Result<OrderItem> {
        self.store
            .order_items(order_id)
            .await?
            .into_iter()
            .find(|i| i.product_id == product_id)
            .ok_or(SettlementError::ItemNotFound)
    }

    /// Moves one of the restaurant's items to its next fulfillment status.
    pub async fn advance_item(&self, restaurant_id: Uuid, order_id: &OrderId, product_id: Uuid) -> Result<OrderItem> {
        let order = self.order(order_id).await?;
        let mut item = self.order_item(order_id, product_id).await?;
        if !item.belongs_to_restaurant(restaurant_id) {
            return Err(SettlementError::Forbidden);
        }
        if !order.payment_status.accepts_fulfillment() {
            return Err(SettlementError::PaymentNotConfirmed);
        }
        let next = item.status.next()?;
        if !self.store.transition_item_status(order_id, product_id, item.status, next).await? {
            return Err(SettlementError::ConcurrentUpdate);
        }
        item.status = next;
        info!(order_id = %order_id, %product_id, status = %next, "Item advanced");
        self.emit(DomainEvent::ItemAdvanced { order_id: order_id.clone(), product_id, status: next }).await;
        Ok(item)
    }

    /// Cancels one item of the user's order.
    pub async fn cancel_item(&self, user_id: Uuid, order_id: &OrderId, product_id: Uuid) -> Result<CancelReport> {
        let order = self.cancellable_order(user_id, order_id).await?;
        let item = self.order_item(order_id, product_id).await?;
        match item.status {
            OrderStatus::Cancelled => return Err(SettlementError::AlreadyCancelled),
            status if !status.is_cancellable() => return Err(SettlementError::NotCancellable(status)),
            _ => {}
        }
        if !self.claim_cancellation(&order, &item).await? {
            let current = self.order_item(order_id, product_id).await?.status;
            return Err(match current {
                OrderStatus::Cancelled => SettlementError::AlreadyCancelled,
                status => SettlementError::NotCancellable(status),
            });
        }
        self.unwind_cancelled(&order, vec![item]).await
    }

    /// Cancels every item of the user's order that is still cancellable.
    pub async fn cancel_order(&self, user_id: Uuid, order_id: &OrderId) -> Result<CancelReport> {
        let order = self.cancellable_order(user_id, order_id).await?;
        let items = self.store.order_items(order_id).await?;
        let mut won = Vec::new();
        for item in items.iter().filter(|i| i.status.is_cancellable()) {
            if self.claim_cancellation(&order, item).await? {
                won.push(item.clone());
            }
        }
        if won.is_empty() {
            return Err(match items.iter().find(|i| i.status != OrderStatus::Cancelled) {
                Some(item) if !item.status.is_cancellable() => SettlementError::NotCancellable(item.status),
                _ => SettlementError::AlreadyCancelled,
            });
        }
        self.unwind_cancelled(&order, won).await
    }

    async fn cancellable_order(&self, user_id: Uuid, order_id: &OrderId) -> Result<Order> {
        let order = self.owned_order(user_id, order_id).await?;
        if !order.payment_status.accepts_fulfillment() {
            return Err(SettlementError::PaymentNotConfirmed);
        }
        Ok(order)
    }

    /// Compare-and-set into `CANCELLED`; only the winner unwinds the item.
    async fn claim_cancellation(&self, order: &Order, item: &OrderItem) -> Result<bool> {
        Ok(self.store.transition_item_status(&order.id, item.product_id, item.status, OrderStatus::Cancelled).await?)
    }

    /// Restores stock for the cancelled items and, for a paid order, refunds
    /// their net through the restaurants back to the buyer.
    async fn unwind_cancelled(&self, order: &Order, items: Vec<OrderItem>) -> Result<CancelReport> {
        for item in &items {
            self.stock.restore(item.product_id, item.quantity).await?;
        }
        let refunded = if order.payment_status == PaymentStatus::Confirmed {
            self.wallet.refund(order.user_id, &order.id, &items).await?
        } else {
            Decimal::ZERO
        };
        for item in &items {
            self.emit(DomainEvent::ItemCancelled { order_id: order.id.clone(), product_id: item.product_id, refunded: item.after_deduction.max(Decimal::ZERO) }).await;
        }
        info!(order_id = %order.id, items = items.len(), %refunded, "Items cancelled");
        Ok(CancelReport { order_id: order.id.clone(), cancelled: items.iter().map(|i| i.product_id).collect(), refunded })
    }
}
