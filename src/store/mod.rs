//! Persistence seam.
//!
//! The settlement layer talks to storage only through these traits. Every
//! method that mutates stock, balances, coupon usage or a status is a single
//! conditional operation in the backing store, so concurrent requests for the
//! same order, product or wallet serialize there rather than in callers.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{
    Address, CartItem, Coupon, GatewayKind, ItemSettlement, Order, OrderItem, OrderStatus, Payment,
    PaymentRecordStatus, PaymentStatus, Product, Restaurant, User, WalletEntry, WalletParty,
};
use crate::domain::value_objects::OrderId;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of a floor-checked stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockUpdate {
    Applied { stock_left: i32 },
    Insufficient { available: i32 },
    Missing,
}

/// Outcome of a wallet delta.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletUpdate {
    Applied(WalletEntry),
    Insufficient { balance: Decimal },
    Missing,
}

/// Outcome of settling a group of order lines against one wallet.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleUpdate {
    /// Lines marked settled. No entry when the amount was zero.
    Applied(Option<WalletEntry>),
    /// A listed line had already moved on; nothing was written.
    Stale,
    /// The wallet refused the movement; nothing was written.
    Refused(WalletUpdate),
}

/// Single wallet movement as handed to the store.
#[derive(Debug, Clone)]
pub struct WalletDelta<'a> {
    pub party: WalletParty,
    /// Positive credits, negative debits.
    pub amount: Decimal,
    pub allow_overdraft: bool,
    pub reason: &'a str,
    pub order_id: Option<&'a OrderId>,
}

/// Read-only lookups served by the catalog and account directories.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_restaurant(&self, id: Uuid) -> StoreResult<Option<Restaurant>>;
    async fn find_restaurant_by_email(&self, email: &str) -> StoreResult<Option<Restaurant>>;
    async fn find_address(&self, id: Uuid) -> StoreResult<Option<Address>>;
    async fn find_product(&self, id: Uuid) -> StoreResult<Option<Product>>;
    /// Returns false when the product does not exist.
    async fn set_product_offer(&self, id: Uuid, offer_amount: Decimal) -> StoreResult<bool>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn cart_items(&self, user_id: Uuid) -> StoreResult<Vec<CartItem>>;
    async fn save_cart_item(&self, item: &CartItem) -> StoreResult<()>;
    async fn delete_cart_item(&self, user_id: Uuid, product_id: Uuid) -> StoreResult<bool>;
    async fn clear_cart(&self, user_id: Uuid) -> StoreResult<u64>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts unless the id is taken; returns false on collision.
    async fn insert_order(&self, order: &Order) -> StoreResult<bool>;
    /// Removes the order together with its items and payment row.
    async fn delete_order(&self, id: &OrderId) -> StoreResult<()>;
    async fn find_order(&self, id: &OrderId) -> StoreResult<Option<Order>>;
    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>>;
    /// Sets coupon fields only if the order has none yet.
    async fn record_coupon(&self, id: &OrderId, code: &str, discount: Decimal, final_amount: Decimal) -> StoreResult<bool>;
    async fn transition_payment_status(&self, id: &OrderId, from: PaymentStatus, to: PaymentStatus) -> StoreResult<bool>;
    async fn insert_order_items(&self, items: &[OrderItem]) -> StoreResult<()>;
    async fn delete_order_items(&self, id: &OrderId) -> StoreResult<()>;
    async fn order_items(&self, id: &OrderId) -> StoreResult<Vec<OrderItem>>;
    async fn restaurant_order_items(&self, restaurant_id: Uuid) -> StoreResult<Vec<OrderItem>>;
    async fn transition_item_status(&self, id: &OrderId, product_id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<bool>;
    async fn orders_with_status_before(&self, status: PaymentStatus, before: DateTime<Utc>) -> StoreResult<Vec<Order>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// One row per order; re-initiation replaces the references.
    async fn upsert_payment(&self, payment: &Payment) -> StoreResult<()>;
    async fn find_payment(&self, order_id: &OrderId) -> StoreResult<Option<Payment>>;
    async fn find_payment_by_reference(&self, gateway: GatewayKind, reference: &str) -> StoreResult<Option<Payment>>;
    async fn update_payment_status(&self, order_id: &OrderId, status: PaymentRecordStatus, remote_payment_id: Option<&str>) -> StoreResult<bool>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn find_coupon(&self, code: &str) -> StoreResult<Option<Coupon>>;
    async fn coupon_usage(&self, user_id: Uuid, code: &str) -> StoreResult<i32>;
    /// Increments below `cap`; `None` when the cap is already reached.
    async fn increment_coupon_usage(&self, user_id: Uuid, code: &str, cap: i32) -> StoreResult<Option<i32>>;
    async fn decrement_coupon_usage(&self, user_id: Uuid, code: &str) -> StoreResult<()>;
}

/// Stock and wallet mutation primitives. Only the ledgers call these.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<StockUpdate>;
    /// Returns the new level, `None` if the product is gone.
    async fn increment_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<Option<i32>>;
    /// Applies the delta and appends the history row in one step.
    async fn apply_wallet_delta(&self, delta: WalletDelta<'_>) -> StoreResult<WalletUpdate>;
    /// Takes a processing line's quantity from stock and marks the line
    /// `StockCommitted`, in one step. A shortfall cancels the line instead.
    /// `None` when the line is not open and processing.
    async fn commit_line_stock(&self, order_id: &OrderId, product_id: Uuid) -> StoreResult<Option<StockUpdate>>;
    /// Applies `delta` and marks the listed lines `Settled`, in one step,
    /// provided every listed line is still at `from`. A zero amount moves no
    /// money and writes no history.
    async fn settle_lines(&self, order_id: &OrderId, product_ids: &[Uuid], from: ItemSettlement, delta: WalletDelta<'_>) -> StoreResult<SettleUpdate>;
    async fn wallet_balance(&self, party: WalletParty) -> StoreResult<Option<Decimal>>;
    async fn wallet_history(&self, party: WalletParty) -> StoreResult<Vec<WalletEntry>>;
}

pub trait Store: DirectoryStore + CartStore + OrderStore + PaymentStore + CouponStore + LedgerStore {}

impl<T> Store for T where T: DirectoryStore + CartStore + OrderStore + PaymentStore + CouponStore + LedgerStore {}
