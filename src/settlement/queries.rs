//! Read side: orders, restaurant queues, wallet statements.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::SettlementEngine;
use crate::domain::aggregates::{Order, OrderItem, Payment, WalletEntry, WalletParty};
use crate::domain::value_objects::OrderId;
use crate::error::{Result, SettlementError};
use crate::ledger::REASON_TOP_UP;

#[derive(Clone, Debug, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payment: Option<Payment>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WalletStatement {
    pub party: WalletParty,
    pub balance: Decimal,
    pub history: Vec<WalletEntry>,
}

impl SettlementEngine {
    /// Order with items and payment. With `owner` set, only that user's
    /// orders are visible.
    pub async fn order_details(&self, order_id: &OrderId, owner: Option<Uuid>) -> Result<OrderDetails> {
        let order = match owner {
            Some(user_id) => self.owned_order(user_id, order_id).await?,
            None => self.order(order_id).await?,
        };
        let items = self.store.order_items(order_id).await?;
        let payment = self.store.find_payment(order_id).await?;
        Ok(OrderDetails { order, items, payment })
    }

    pub async fn user_orders(&self, user_id: Uuid) -> Result<Vec<Order>> {
        self.user(user_id).await?;
        Ok(self.store.orders_for_user(user_id).await?)
    }

    pub async fn restaurant_items(&self, restaurant_id: Uuid) -> Result<Vec<OrderItem>> {
        self.store.find_restaurant(restaurant_id).await?.ok_or(SettlementError::RestaurantNotFound)?;
        Ok(self.store.restaurant_order_items(restaurant_id).await?)
    }

    pub async fn wallet_statement(&self, party: WalletParty) -> Result<WalletStatement> {
        let balance = self.wallet.balance(party).await?;
        let history = self.wallet.history(party).await?;
        Ok(WalletStatement { party, balance, history })
    }

    /// Credits a user's wallet from outside the order flow.
    pub async fn top_up_wallet(&self, user_id: Uuid, amount: Decimal) -> Result<WalletEntry> {
        self.wallet.credit(WalletParty::User(user_id), amount, REASON_TOP_UP, None).await
    }
}
