//! Postgres store.
//!
//! Conditional updates (`WHERE stock_left >= $2`, `WHERE payment_status = $2`,
//! `ON CONFLICT ... WHERE used_count < $3`) carry the atomicity; wallet
//! movements lock the balance row for the span of the update and the history
//! insert. Line settlement locks the order lines and moves stock or money in
//! the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::str::FromStr;
use uuid::Uuid;

use super::{
    CartStore, CouponStore, DirectoryStore, LedgerStore, OrderStore, PaymentStore, SettleUpdate, StockUpdate,
    StoreError, StoreResult, WalletDelta, WalletUpdate,
};
use crate::domain::aggregates::{
    Address, CartItem, Coupon, Direction, GatewayKind, ItemSettlement, Order, OrderItem, OrderStatus, Payment,
    PaymentRecordStatus, PaymentStatus, Product, Restaurant, User, WalletEntry, WalletParty,
};
use crate::domain::value_objects::OrderId;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn parse<T: FromStr>(value: &str) -> StoreResult<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| StoreError::Corrupt(e.to_string()))
}

fn order_id(value: String) -> StoreResult<OrderId> {
    OrderId::parse(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn wallet_tables(party: WalletParty) -> (&'static str, &'static str, &'static str) {
    match party {
        WalletParty::User(_) => ("users", "user_wallet_history", "user_id"),
        WalletParty::Restaurant(_) => ("restaurants", "restaurant_wallet_history", "restaurant_id"),
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    user_id: Uuid,
    address_id: Uuid,
    item_count: i32,
    coupon_code: Option<String>,
    coupon_discount_amount: Decimal,
    product_offer_amount: Decimal,
    total_amount: Decimal,
    final_amount: Decimal,
    payment_method: String,
    payment_status: String,
    ordered_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;
    fn try_from(r: OrderRow) -> StoreResult<Self> {
        Ok(Order {
            id: order_id(r.id)?,
            user_id: r.user_id,
            address_id: r.address_id,
            item_count: r.item_count,
            coupon_code: r.coupon_code,
            coupon_discount_amount: r.coupon_discount_amount,
            product_offer_amount: r.product_offer_amount,
            total_amount: r.total_amount,
            final_amount: r.final_amount,
            payment_method: parse(&r.payment_method)?,
            payment_status: parse(&r.payment_status)?,
            ordered_at: r.ordered_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: String,
    user_id: Uuid,
    restaurant_id: Uuid,
    product_id: Uuid,
    quantity: i32,
    amount: Decimal,
    product_offer_amount: Decimal,
    after_deduction: Decimal,
    cooking_note: Option<String>,
    order_status: String,
    review: Option<String>,
    rating: Option<i16>,
    settlement: String,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;
    fn try_from(r: OrderItemRow) -> StoreResult<Self> {
        Ok(OrderItem {
            order_id: order_id(r.order_id)?,
            user_id: r.user_id,
            restaurant_id: r.restaurant_id,
            product_id: r.product_id,
            quantity: r.quantity,
            amount: r.amount,
            product_offer_amount: r.product_offer_amount,
            after_deduction: r.after_deduction,
            cooking_note: r.cooking_note,
            status: parse(&r.order_status)?,
            review: r.review,
            rating: r.rating,
            settlement: parse(&r.settlement)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    order_id: String,
    gateway: String,
    remote_reference: Option<String>,
    remote_payment_id: Option<String>,
    amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;
    fn try_from(r: PaymentRow) -> StoreResult<Self> {
        Ok(Payment {
            order_id: order_id(r.order_id)?,
            gateway: parse(&r.gateway)?,
            remote_reference: r.remote_reference,
            remote_payment_id: r.remote_payment_id,
            amount: r.amount,
            status: parse(&r.status)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    at: DateTime<Utc>,
    direction: String,
    amount: Decimal,
    balance: Decimal,
    reason: String,
    order_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    restaurant_id: Uuid,
    name: String,
    price: Decimal,
    offer_amount: Decimal,
    stock_left: i32,
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Product { id: r.id, restaurant_id: r.restaurant_id, name: r.name, price: r.price, offer_amount: r.offer_amount, stock_left: r.stock_left }
    }
}

const ORDER_COLUMNS: &str = "id, user_id, address_id, item_count, coupon_code, coupon_discount_amount, product_offer_amount, total_amount, final_amount, payment_method, payment_status, ordered_at";
const ITEM_COLUMNS: &str = "order_id, user_id, restaurant_id, product_id, quantity, amount, product_offer_amount, after_deduction, cooking_note, order_status, review, rating, settlement";
const PAYMENT_COLUMNS: &str = "order_id, gateway, remote_reference, remote_payment_id, amount, status, created_at, updated_at";

#[async_trait]
impl DirectoryStore for PgStore {
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row: Option<(Uuid, String, String, Decimal)> = sqlx::query_as("SELECT id, name, email, wallet_amount FROM users WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(id, name, email, wallet_amount)| User { id, name, email, wallet_amount }))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row: Option<(Uuid, String, String, Decimal)> = sqlx::query_as("SELECT id, name, email, wallet_amount FROM users WHERE lower(email) = lower($1)")
            .bind(email).fetch_optional(&self.pool).await?;
        Ok(row.map(|(id, name, email, wallet_amount)| User { id, name, email, wallet_amount }))
    }

    async fn find_restaurant(&self, id: Uuid) -> StoreResult<Option<Restaurant>> {
        let row: Option<(Uuid, String, String, Decimal)> = sqlx::query_as("SELECT id, name, email, wallet_amount FROM restaurants WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(id, name, email, wallet_amount)| Restaurant { id, name, email, wallet_amount }))
    }

    async fn find_restaurant_by_email(&self, email: &str) -> StoreResult<Option<Restaurant>> {
        let row: Option<(Uuid, String, String, Decimal)> = sqlx::query_as("SELECT id, name, email, wallet_amount FROM restaurants WHERE lower(email) = lower($1)")
            .bind(email).fetch_optional(&self.pool).await?;
        Ok(row.map(|(id, name, email, wallet_amount)| Restaurant { id, name, email, wallet_amount }))
    }

    async fn find_address(&self, id: Uuid) -> StoreResult<Option<Address>> {
        let row: Option<(Uuid, Uuid, String, String, String)> = sqlx::query_as("SELECT id, user_id, line1, city, pincode FROM addresses WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(id, user_id, line1, city, pincode)| Address { id, user_id, line1, city, pincode }))
    }

    async fn find_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, restaurant_id, name, price, offer_amount, stock_left FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(Product::from))
    }

    async fn set_product_offer(&self, id: Uuid, offer_amount: Decimal) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE products SET offer_amount = $2 WHERE id = $1")
            .bind(id).bind(offer_amount).execute(&self.pool).await?;
        Ok(done.rows_affected() == 1)
    }
}

#[async_trait]
impl CartStore for PgStore {
    async fn cart_items(&self, user_id: Uuid) -> StoreResult<Vec<CartItem>> {
        let rows: Vec<(Uuid, Uuid, i32, Option<String>)> = sqlx::query_as("SELECT user_id, product_id, quantity, cooking_note FROM cart_items WHERE user_id = $1 ORDER BY product_id")
            .bind(user_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(user_id, product_id, quantity, cooking_note)| CartItem { user_id, product_id, quantity, cooking_note }).collect())
    }

    async fn save_cart_item(&self, item: &CartItem) -> StoreResult<()> {
        sqlx::query("INSERT INTO cart_items (user_id, product_id, quantity, cooking_note) VALUES ($1, $2, $3, $4) ON CONFLICT (user_id, product_id) DO UPDATE SET quantity = EXCLUDED.quantity, cooking_note = EXCLUDED.cooking_note")
            .bind(item.user_id).bind(item.product_id).bind(item.quantity).bind(&item.cooking_note)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_cart_item(&self, user_id: Uuid, product_id: Uuid) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
            .bind(user_id).bind(product_id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn clear_cart(&self, user_id: Uuid) -> StoreResult<u64> {
        let done = sqlx::query("DELETE FROM cart_items WHERE user_id = $1").bind(user_id).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, o: &Order) -> StoreResult<bool> {
        let done = sqlx::query(&format!("INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) ON CONFLICT (id) DO NOTHING"))
            .bind(o.id.as_str()).bind(o.user_id).bind(o.address_id).bind(o.item_count).bind(&o.coupon_code)
            .bind(o.coupon_discount_amount).bind(o.product_offer_amount).bind(o.total_amount).bind(o.final_amount)
            .bind(o.payment_method.as_str()).bind(o.payment_status.as_str()).bind(o.ordered_at)
            .execute(&self.pool).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn delete_order(&self, id: &OrderId) -> StoreResult<()> {
        sqlx::query("DELETE FROM orders WHERE id = $1").bind(id.as_str()).execute(&self.pool).await?;
        Ok(())
    }

    async fn find_order(&self, id: &OrderId) -> StoreResult<Option<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_str()).fetch_optional(&self.pool).await?
            .map(Order::try_from).transpose()
    }

    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY ordered_at DESC"))
            .bind(user_id).fetch_all(&self.pool).await?
            .into_iter().map(Order::try_from).collect()
    }

    async fn record_coupon(&self, id: &OrderId, code: &str, discount: Decimal, final_amount: Decimal) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE orders SET coupon_code = $2, coupon_discount_amount = $3, final_amount = $4 WHERE id = $1 AND (coupon_code IS NULL OR coupon_code = '')")
            .bind(id.as_str()).bind(code).bind(discount).bind(final_amount)
            .execute(&self.pool).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn transition_payment_status(&self, id: &OrderId, from: PaymentStatus, to: PaymentStatus) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE orders SET payment_status = $3 WHERE id = $1 AND payment_status = $2")
            .bind(id.as_str()).bind(from.as_str()).bind(to.as_str())
            .execute(&self.pool).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn insert_order_items(&self, items: &[OrderItem]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for i in items {
            sqlx::query(&format!("INSERT INTO order_items ({ITEM_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"))
                .bind(i.order_id.as_str()).bind(i.user_id).bind(i.restaurant_id).bind(i.product_id).bind(i.quantity)
                .bind(i.amount).bind(i.product_offer_amount).bind(i.after_deduction).bind(&i.cooking_note)
                .bind(i.status.as_str()).bind(&i.review).bind(i.rating).bind(i.settlement.as_str())
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_order_items(&self, id: &OrderId) -> StoreResult<()> {
        sqlx::query("DELETE FROM order_items WHERE order_id = $1").bind(id.as_str()).execute(&self.pool).await?;
        Ok(())
    }

    async fn order_items(&self, id: &OrderId) -> StoreResult<Vec<OrderItem>> {
        sqlx::query_as::<_, OrderItemRow>(&format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY product_id"))
            .bind(id.as_str()).fetch_all(&self.pool).await?
            .into_iter().map(OrderItem::try_from).collect()
    }

    async fn restaurant_order_items(&self, restaurant_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        sqlx::query_as::<_, OrderItemRow>(&format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE restaurant_id = $1 ORDER BY order_id"))
            .bind(restaurant_id).fetch_all(&self.pool).await?
            .into_iter().map(OrderItem::try_from).collect()
    }

    async fn transition_item_status(&self, id: &OrderId, product_id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE order_items SET order_status = $4 WHERE order_id = $1 AND product_id = $2 AND order_status = $3")
            .bind(id.as_str()).bind(product_id).bind(from.as_str()).bind(to.as_str())
            .execute(&self.pool).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn orders_with_status_before(&self, status: PaymentStatus, before: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE payment_status = $1 AND ordered_at < $2"))
            .bind(status.as_str()).bind(before).fetch_all(&self.pool).await?
            .into_iter().map(Order::try_from).collect()
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn upsert_payment(&self, p: &Payment) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (order_id) DO UPDATE SET gateway = EXCLUDED.gateway, remote_reference = EXCLUDED.remote_reference, \
             remote_payment_id = EXCLUDED.remote_payment_id, amount = EXCLUDED.amount, status = EXCLUDED.status, updated_at = EXCLUDED.updated_at"
        ))
            .bind(p.order_id.as_str()).bind(p.gateway.as_str()).bind(&p.remote_reference).bind(&p.remote_payment_id)
            .bind(p.amount).bind(p.status.as_str()).bind(p.created_at).bind(p.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn find_payment(&self, order_id: &OrderId) -> StoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"))
            .bind(order_id.as_str()).fetch_optional(&self.pool).await?
            .map(Payment::try_from).transpose()
    }

    async fn find_payment_by_reference(&self, gateway: GatewayKind, reference: &str) -> StoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE gateway = $1 AND remote_reference = $2"))
            .bind(gateway.as_str()).bind(reference).fetch_optional(&self.pool).await?
            .map(Payment::try_from).transpose()
    }

    async fn update_payment_status(&self, order_id: &OrderId, status: PaymentRecordStatus, remote_payment_id: Option<&str>) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE payments SET status = $2, remote_payment_id = COALESCE($3, remote_payment_id), updated_at = now() WHERE order_id = $1")
            .bind(order_id.as_str()).bind(status.as_str()).bind(remote_payment_id)
            .execute(&self.pool).await?;
        Ok(done.rows_affected() == 1)
    }
}

#[async_trait]
impl CouponStore for PgStore {
    async fn find_coupon(&self, code: &str) -> StoreResult<Option<Coupon>> {
        let row: Option<(String, DateTime<Utc>, Decimal, Decimal, i32)> = sqlx::query_as("SELECT code, expires_at, percentage, minimum_amount, maximum_usage FROM coupons WHERE code = $1")
            .bind(code).fetch_optional(&self.pool).await?;
        Ok(row.map(|(code, expires_at, percentage, minimum_amount, maximum_usage)| Coupon { code, expires_at, percentage, minimum_amount, maximum_usage }))
    }

    async fn coupon_usage(&self, user_id: Uuid, code: &str) -> StoreResult<i32> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT used_count FROM coupon_usages WHERE user_id = $1 AND code = $2")
            .bind(user_id).bind(code).fetch_optional(&self.pool).await?;
        Ok(row.map(|(n,)| n).unwrap_or(0))
    }

    async fn increment_coupon_usage(&self, user_id: Uuid, code: &str, cap: i32) -> StoreResult<Option<i32>> {
        if cap <= 0 { return Ok(None); }
        let row: Option<(i32,)> = sqlx::query_as(
            "INSERT INTO coupon_usages (user_id, code, used_count) VALUES ($1, $2, 1) \
             ON CONFLICT (user_id, code) DO UPDATE SET used_count = coupon_usages.used_count + 1 \
             WHERE coupon_usages.used_count < $3 RETURNING used_count",
        )
            .bind(user_id).bind(code).bind(cap).fetch_optional(&self.pool).await?;
        Ok(row.map(|(n,)| n))
    }

    async fn decrement_coupon_usage(&self, user_id: Uuid, code: &str) -> StoreResult<()> {
        sqlx::query("UPDATE coupon_usages SET used_count = used_count - 1 WHERE user_id = $1 AND code = $2 AND used_count > 0")
            .bind(user_id).bind(code).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<StockUpdate> {
        let row: Option<(i32,)> = sqlx::query_as("UPDATE products SET stock_left = stock_left - $2 WHERE id = $1 AND stock_left >= $2 RETURNING stock_left")
            .bind(product_id).bind(quantity).fetch_optional(&self.pool).await?;
        if let Some((stock_left,)) = row {
            return Ok(StockUpdate::Applied { stock_left });
        }
        let current: Option<(i32,)> = sqlx::query_as("SELECT stock_left FROM products WHERE id = $1")
            .bind(product_id).fetch_optional(&self.pool).await?;
        Ok(match current {
            Some((available,)) => StockUpdate::Insufficient { available },
            None => StockUpdate::Missing,
        })
    }

    async fn increment_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<Option<i32>> {
        let row: Option<(i32,)> = sqlx::query_as("UPDATE products SET stock_left = stock_left + $2 WHERE id = $1 RETURNING stock_left")
            .bind(product_id).bind(quantity).fetch_optional(&self.pool).await?;
        Ok(row.map(|(n,)| n))
    }

    async fn apply_wallet_delta(&self, delta: WalletDelta<'_>) -> StoreResult<WalletUpdate> {
        let mut tx = self.pool.begin().await?;
        let update = apply_delta(&mut *tx, &delta).await?;
        if matches!(update, WalletUpdate::Applied(_)) {
            tx.commit().await?;
        }
        Ok(update)
    }

    async fn commit_line_stock(&self, order_id: &OrderId, product_id: Uuid) -> StoreResult<Option<StockUpdate>> {
        let mut tx = self.pool.begin().await?;
        let line: Option<(i32,)> = sqlx::query_as(
            "SELECT quantity FROM order_items WHERE order_id = $1 AND product_id = $2 AND settlement = $3 AND order_status = $4 FOR UPDATE",
        )
            .bind(order_id.as_str()).bind(product_id).bind(ItemSettlement::Open.as_str()).bind(OrderStatus::Processing.as_str())
            .fetch_optional(&mut *tx).await?;
        let Some((quantity,)) = line else { return Ok(None) };

        let taken: Option<(i32,)> = sqlx::query_as("UPDATE products SET stock_left = stock_left - $2 WHERE id = $1 AND stock_left >= $2 RETURNING stock_left")
            .bind(product_id).bind(quantity).fetch_optional(&mut *tx).await?;
        let update = match taken {
            Some((stock_left,)) => StockUpdate::Applied { stock_left },
            None => {
                let current: Option<(i32,)> = sqlx::query_as("SELECT stock_left FROM products WHERE id = $1")
                    .bind(product_id).fetch_optional(&mut *tx).await?;
                current.map_or(StockUpdate::Missing, |(available,)| StockUpdate::Insufficient { available })
            }
        };

        let (column, value) = match update {
            StockUpdate::Applied { .. } => ("settlement", ItemSettlement::StockCommitted.as_str()),
            _ => ("order_status", OrderStatus::Cancelled.as_str()),
        };
        sqlx::query(&format!("UPDATE order_items SET {column} = $3 WHERE order_id = $1 AND product_id = $2"))
            .bind(order_id.as_str()).bind(product_id).bind(value)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(Some(update))
    }

    async fn settle_lines(&self, order_id: &OrderId, product_ids: &[Uuid], from: ItemSettlement, delta: WalletDelta<'_>) -> StoreResult<SettleUpdate> {
        if product_ids.is_empty() {
            return Ok(SettleUpdate::Stale);
        }
        let mut tx = self.pool.begin().await?;
        let waiting: Vec<(Uuid,)> = sqlx::query_as("SELECT product_id FROM order_items WHERE order_id = $1 AND product_id = ANY($2) AND settlement = $3 FOR UPDATE")
            .bind(order_id.as_str()).bind(product_ids).bind(from.as_str())
            .fetch_all(&mut *tx).await?;
        if waiting.len() != product_ids.len() {
            return Ok(SettleUpdate::Stale);
        }

        let entry = if delta.amount.is_zero() {
            None
        } else {
            match apply_delta(&mut *tx, &delta).await? {
                WalletUpdate::Applied(entry) => Some(entry),
                refused => return Ok(SettleUpdate::Refused(refused)),
            }
        };
        sqlx::query("UPDATE order_items SET settlement = $3 WHERE order_id = $1 AND product_id = ANY($2)")
            .bind(order_id.as_str()).bind(product_ids).bind(ItemSettlement::Settled.as_str())
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(SettleUpdate::Applied(entry))
    }

    async fn wallet_balance(&self, party: WalletParty) -> StoreResult<Option<Decimal>> {
        let (table, _, _) = wallet_tables(party);
        let row: Option<(Decimal,)> = sqlx::query_as(&format!("SELECT wallet_amount FROM {table} WHERE id = $1"))
            .bind(party.id()).fetch_optional(&self.pool).await?;
        Ok(row.map(|(b,)| b))
    }

    async fn wallet_history(&self, party: WalletParty) -> StoreResult<Vec<WalletEntry>> {
        let (_, history, key) = wallet_tables(party);
        let rows = sqlx::query_as::<_, WalletRow>(&format!("SELECT at, direction, amount, balance, reason, order_id FROM {history} WHERE {key} = $1 ORDER BY id"))
            .bind(party.id()).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|r| -> StoreResult<WalletEntry> {
                Ok(WalletEntry {
                    party,
                    at: r.at,
                    direction: parse(&r.direction)?,
                    amount: r.amount,
                    balance: r.balance,
                    reason: r.reason,
                    order_id: r.order_id.map(order_id).transpose()?,
                })
            })
            .collect()
    }
}

/// Moves a wallet balance and appends its history row on `conn`, which the
/// caller holds inside a transaction.
async fn apply_delta(conn: &mut PgConnection, delta: &WalletDelta<'_>) -> StoreResult<WalletUpdate> {
    let (table, history, key) = wallet_tables(delta.party);
    let current: Option<(Decimal,)> = sqlx::query_as(&format!("SELECT wallet_amount FROM {table} WHERE id = $1 FOR UPDATE"))
        .bind(delta.party.id()).fetch_optional(&mut *conn).await?;
    let Some((balance,)) = current else { return Ok(WalletUpdate::Missing) };

    let next = balance + delta.amount;
    if next < Decimal::ZERO && !delta.allow_overdraft {
        return Ok(WalletUpdate::Insufficient { balance });
    }

    sqlx::query(&format!("UPDATE {table} SET wallet_amount = $2 WHERE id = $1"))
        .bind(delta.party.id()).bind(next).execute(&mut *conn).await?;

    let entry = WalletEntry {
        party: delta.party,
        at: Utc::now(),
        direction: if delta.amount < Decimal::ZERO { Direction::Outgoing } else { Direction::Incoming },
        amount: delta.amount.abs(),
        balance: next,
        reason: delta.reason.to_string(),
        order_id: delta.order_id.cloned(),
    };
    sqlx::query(&format!("INSERT INTO {history} ({key}, at, direction, amount, balance, reason, order_id) VALUES ($1, $2, $3, $4, $5, $6, $7)"))
        .bind(delta.party.id()).bind(entry.at).bind(entry.direction.as_str()).bind(entry.amount)
        .bind(entry.balance).bind(&entry.reason).bind(entry.order_id.as_ref().map(|o| o.as_str()))
        .execute(&mut *conn).await?;
    Ok(WalletUpdate::Applied(entry))
}
