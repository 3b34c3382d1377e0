//! In-process store for local runs and tests.
//!
//! All state sits behind one mutex, so every trait method is atomic with
//! respect to every other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    CartStore, CouponStore, DirectoryStore, LedgerStore, OrderStore, PaymentStore, SettleUpdate, StockUpdate,
    StoreResult, WalletDelta, WalletUpdate,
};
use crate::domain::aggregates::{
    Address, CartItem, Coupon, Direction, GatewayKind, ItemSettlement, Order, OrderItem, OrderStatus, Payment,
    PaymentRecordStatus, PaymentStatus, Product, Restaurant, User, WalletEntry, WalletParty,
};
use crate::domain::value_objects::OrderId;

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    restaurants: HashMap<Uuid, Restaurant>,
    addresses: HashMap<Uuid, Address>,
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Vec<CartItem>>,
    orders: HashMap<OrderId, Order>,
    order_items: HashMap<OrderId, Vec<OrderItem>>,
    payments: HashMap<OrderId, Payment>,
    coupons: HashMap<String, Coupon>,
    coupon_usage: HashMap<(Uuid, String), i32>,
    wallet_history: HashMap<WalletParty, Vec<WalletEntry>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn insert_user(&self, user: User) { self.inner.lock().users.insert(user.id, user); }
    pub fn insert_restaurant(&self, restaurant: Restaurant) { self.inner.lock().restaurants.insert(restaurant.id, restaurant); }
    pub fn insert_address(&self, address: Address) { self.inner.lock().addresses.insert(address.id, address); }
    pub fn insert_product(&self, product: Product) { self.inner.lock().products.insert(product.id, product); }
    pub fn insert_coupon(&self, coupon: Coupon) { self.inner.lock().coupons.insert(coupon.code.clone(), coupon); }
}

impl Inner {
    fn balance_mut(&mut self, party: WalletParty) -> Option<&mut Decimal> {
        match party {
            WalletParty::User(id) => self.users.get_mut(&id).map(|u| &mut u.wallet_amount),
            WalletParty::Restaurant(id) => self.restaurants.get_mut(&id).map(|r| &mut r.wallet_amount),
        }
    }

    fn apply_delta(&mut self, delta: &WalletDelta<'_>) -> WalletUpdate {
        let Some(balance) = self.balance_mut(delta.party) else { return WalletUpdate::Missing };
        let next = *balance + delta.amount;
        if next < Decimal::ZERO && !delta.allow_overdraft {
            return WalletUpdate::Insufficient { balance: *balance };
        }
        *balance = next;
        let entry = WalletEntry {
            party: delta.party,
            at: Utc::now(),
            direction: if delta.amount.is_sign_negative() { Direction::Outgoing } else { Direction::Incoming },
            amount: delta.amount.abs(),
            balance: next,
            reason: delta.reason.to_string(),
            order_id: delta.order_id.cloned(),
        };
        self.wallet_history.entry(delta.party).or_default().push(entry.clone());
        WalletUpdate::Applied(entry)
    }

    fn line(&self, order_id: &OrderId, product_id: Uuid) -> Option<&OrderItem> {
        self.order_items.get(order_id)?.iter().find(|i| i.product_id == product_id)
    }

    fn line_mut(&mut self, order_id: &OrderId, product_id: Uuid) -> Option<&mut OrderItem> {
        self.order_items.get_mut(order_id)?.iter_mut().find(|i| i.product_id == product_id)
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().users.values().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn find_restaurant(&self, id: Uuid) -> StoreResult<Option<Restaurant>> {
        Ok(self.inner.lock().restaurants.get(&id).cloned())
    }

    async fn find_restaurant_by_email(&self, email: &str) -> StoreResult<Option<Restaurant>> {
        Ok(self.inner.lock().restaurants.values().find(|r| r.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn find_address(&self, id: Uuid) -> StoreResult<Option<Address>> {
        Ok(self.inner.lock().addresses.get(&id).cloned())
    }

    async fn find_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.inner.lock().products.get(&id).cloned())
    }

    async fn set_product_offer(&self, id: Uuid, offer_amount: Decimal) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        Ok(match inner.products.get_mut(&id) {
            Some(p) => { p.offer_amount = offer_amount; true }
            None => false,
        })
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn cart_items(&self, user_id: Uuid) -> StoreResult<Vec<CartItem>> {
        Ok(self.inner.lock().carts.get(&user_id).cloned().unwrap_or_default())
    }

    async fn save_cart_item(&self, item: &CartItem) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let cart = inner.carts.entry(item.user_id).or_default();
        match cart.iter_mut().find(|i| i.product_id == item.product_id) {
            Some(existing) => *existing = item.clone(),
            None => cart.push(item.clone()),
        }
        Ok(())
    }

    async fn delete_cart_item(&self, user_id: Uuid, product_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let Some(cart) = inner.carts.get_mut(&user_id) else { return Ok(false) };
        let before = cart.len();
        cart.retain(|i| i.product_id != product_id);
        Ok(cart.len() != before)
    }

    async fn clear_cart(&self, user_id: Uuid) -> StoreResult<u64> {
        Ok(self.inner.lock().carts.remove(&user_id).map(|c| c.len() as u64).unwrap_or(0))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        if inner.orders.contains_key(&order.id) { return Ok(false); }
        inner.orders.insert(order.id.clone(), order.clone());
        Ok(true)
    }

    async fn delete_order(&self, id: &OrderId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.orders.remove(id);
        inner.order_items.remove(id);
        inner.payments.remove(id);
        Ok(())
    }

    async fn find_order(&self, id: &OrderId) -> StoreResult<Option<Order>> {
        Ok(self.inner.lock().orders.get(id).cloned())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self.inner.lock().orders.values().filter(|o| o.user_id == user_id).cloned().collect();
        orders.sort_by(|a, b| b.ordered_at.cmp(&a.ordered_at));
        Ok(orders)
    }

    async fn record_coupon(&self, id: &OrderId, code: &str, discount: Decimal, final_amount: Decimal) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let Some(order) = inner.orders.get_mut(id) else { return Ok(false) };
        if order.has_coupon() { return Ok(false); }
        order.coupon_code = Some(code.to_string());
        order.coupon_discount_amount = discount;
        order.final_amount = final_amount;
        Ok(true)
    }

    async fn transition_payment_status(&self, id: &OrderId, from: PaymentStatus, to: PaymentStatus) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        Ok(match inner.orders.get_mut(id) {
            Some(order) if order.payment_status == from => { order.payment_status = to; true }
            _ => false,
        })
    }

    async fn insert_order_items(&self, items: &[OrderItem]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for item in items {
            inner.order_items.entry(item.order_id.clone()).or_default().push(item.clone());
        }
        Ok(())
    }

    async fn delete_order_items(&self, id: &OrderId) -> StoreResult<()> {
        self.inner.lock().order_items.remove(id);
        Ok(())
    }

    async fn order_items(&self, id: &OrderId) -> StoreResult<Vec<OrderItem>> {
        Ok(self.inner.lock().order_items.get(id).cloned().unwrap_or_default())
    }

    async fn restaurant_order_items(&self, restaurant_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        Ok(self.inner.lock().order_items.values().flatten().filter(|i| i.restaurant_id == restaurant_id).cloned().collect())
    }

    async fn transition_item_status(&self, id: &OrderId, product_id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let item = inner.order_items.get_mut(id).and_then(|items| items.iter_mut().find(|i| i.product_id == product_id));
        Ok(match item {
            Some(item) if item.status == from => { item.status = to; true }
            _ => false,
        })
    }

    async fn orders_with_status_before(&self, status: PaymentStatus, before: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        Ok(self.inner.lock().orders.values().filter(|o| o.payment_status == status && o.ordered_at < before).cloned().collect())
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn upsert_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.inner.lock().payments.insert(payment.order_id.clone(), payment.clone());
        Ok(())
    }

    async fn find_payment(&self, order_id: &OrderId) -> StoreResult<Option<Payment>> {
        Ok(self.inner.lock().payments.get(order_id).cloned())
    }

    async fn find_payment_by_reference(&self, gateway: GatewayKind, reference: &str) -> StoreResult<Option<Payment>> {
        Ok(self.inner.lock().payments.values()
            .find(|p| p.gateway == gateway && p.remote_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn update_payment_status(&self, order_id: &OrderId, status: PaymentRecordStatus, remote_payment_id: Option<&str>) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        let Some(payment) = inner.payments.get_mut(order_id) else { return Ok(false) };
        payment.status = status;
        if let Some(pid) = remote_payment_id { payment.remote_payment_id = Some(pid.to_string()); }
        payment.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl CouponStore for MemoryStore {
    async fn find_coupon(&self, code: &str) -> StoreResult<Option<Coupon>> {
        Ok(self.inner.lock().coupons.get(code).cloned())
    }

    async fn coupon_usage(&self, user_id: Uuid, code: &str) -> StoreResult<i32> {
        Ok(self.inner.lock().coupon_usage.get(&(user_id, code.to_string())).copied().unwrap_or(0))
    }

    async fn increment_coupon_usage(&self, user_id: Uuid, code: &str, cap: i32) -> StoreResult<Option<i32>> {
        let mut inner = self.inner.lock();
        let used = inner.coupon_usage.entry((user_id, code.to_string())).or_insert(0);
        if *used >= cap { return Ok(None); }
        *used += 1;
        Ok(Some(*used))
    }

    async fn decrement_coupon_usage(&self, user_id: Uuid, code: &str) -> StoreResult<()> {
        if let Some(used) = self.inner.lock().coupon_usage.get_mut(&(user_id, code.to_string())) {
            *used = (*used - 1).max(0);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<StockUpdate> {
        let mut inner = self.inner.lock();
        let Some(product) = inner.products.get_mut(&product_id) else { return Ok(StockUpdate::Missing) };
        if product.stock_left < quantity {
            return Ok(StockUpdate::Insufficient { available: product.stock_left });
        }
        product.stock_left -= quantity;
        Ok(StockUpdate::Applied { stock_left: product.stock_left })
    }

    async fn increment_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<Option<i32>> {
        let mut inner = self.inner.lock();
        Ok(inner.products.get_mut(&product_id).map(|p| { p.stock_left += quantity; p.stock_left }))
    }

    async fn apply_wallet_delta(&self, delta: WalletDelta<'_>) -> StoreResult<WalletUpdate> {
        Ok(self.inner.lock().apply_delta(&delta))
    }

    async fn commit_line_stock(&self, order_id: &OrderId, product_id: Uuid) -> StoreResult<Option<StockUpdate>> {
        let mut inner = self.inner.lock();
        let quantity = match inner.line_mut(order_id, product_id) {
            Some(line) if line.settlement == ItemSettlement::Open && line.status == OrderStatus::Processing => line.quantity,
            _ => return Ok(None),
        };
        let update = match inner.products.get_mut(&product_id) {
            None => StockUpdate::Missing,
            Some(p) if p.stock_left < quantity => StockUpdate::Insufficient { available: p.stock_left },
            Some(p) => {
                p.stock_left -= quantity;
                StockUpdate::Applied { stock_left: p.stock_left }
            }
        };
        if let Some(line) = inner.line_mut(order_id, product_id) {
            match update {
                StockUpdate::Applied { .. } => line.settlement = ItemSettlement::StockCommitted,
                _ => line.status = OrderStatus::Cancelled,
            }
        }
        Ok(Some(update))
    }

    async fn settle_lines(&self, order_id: &OrderId, product_ids: &[Uuid], from: ItemSettlement, delta: WalletDelta<'_>) -> StoreResult<SettleUpdate> {
        let mut inner = self.inner.lock();
        let waiting = product_ids.iter().all(|&p| inner.line(order_id, p).is_some_and(|line| line.settlement == from));
        if product_ids.is_empty() || !waiting {
            return Ok(SettleUpdate::Stale);
        }
        let entry = if delta.amount.is_zero() {
            None
        } else {
            match inner.apply_delta(&delta) {
                WalletUpdate::Applied(entry) => Some(entry),
                refused => return Ok(SettleUpdate::Refused(refused)),
            }
        };
        for &p in product_ids {
            if let Some(line) = inner.line_mut(order_id, p) {
                line.settlement = ItemSettlement::Settled;
            }
        }
        Ok(SettleUpdate::Applied(entry))
    }

    async fn wallet_balance(&self, party: WalletParty) -> StoreResult<Option<Decimal>> {
        Ok(self.inner.lock().balance_mut(party).map(|b| *b))
    }

    async fn wallet_history(&self, party: WalletParty) -> StoreResult<Vec<WalletEntry>> {
        Ok(self.inner.lock().wallet_history.get(&party).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_product(stock: i32) -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let p = Product::new(Uuid::new_v4(), "Idli", Decimal::new(40, 0), stock);
        let id = p.id;
        store.insert_product(p);
        (store, id)
    }

    #[tokio::test]
    async fn test_stock_decrement_refuses_below_zero() {
        let (store, id) = store_with_product(3);
        assert_eq!(store.decrement_stock(id, 2).await.unwrap(), StockUpdate::Applied { stock_left: 1 });
        assert_eq!(store.decrement_stock(id, 2).await.unwrap(), StockUpdate::Insufficient { available: 1 });
        assert_eq!(store.decrement_stock(Uuid::new_v4(), 1).await.unwrap(), StockUpdate::Missing);
        assert_eq!(store.find_product(id).await.unwrap().unwrap().stock_left, 1);
    }

    #[tokio::test]
    async fn test_coupon_usage_cap() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        assert_eq!(store.increment_coupon_usage(user, "X", 2).await.unwrap(), Some(1));
        assert_eq!(store.increment_coupon_usage(user, "X", 2).await.unwrap(), Some(2));
        assert_eq!(store.increment_coupon_usage(user, "X", 2).await.unwrap(), None);
        store.decrement_coupon_usage(user, "X").await.unwrap();
        assert_eq!(store.coupon_usage(user, "X").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wallet_delta_overdraft_rules() {
        let store = MemoryStore::new();
        let user = User::new("Ravi", "ravi@example.com");
        let party = WalletParty::User(user.id);
        store.insert_user(user);
        let debit = |allow_overdraft| WalletDelta { party, amount: Decimal::new(-10, 0), allow_overdraft, reason: "test", order_id: None };
        assert_eq!(store.apply_wallet_delta(debit(false)).await.unwrap(), WalletUpdate::Insufficient { balance: Decimal::ZERO });
        assert!(matches!(store.apply_wallet_delta(debit(true)).await.unwrap(), WalletUpdate::Applied(_)));
        assert_eq!(store.wallet_balance(party).await.unwrap(), Some(Decimal::new(-10, 0)));
    }

    fn line(order_id: &OrderId, product_id: Uuid, quantity: i32) -> OrderItem {
        OrderItem {
            order_id: order_id.clone(), user_id: Uuid::new_v4(), restaurant_id: Uuid::new_v4(), product_id, quantity,
            amount: Decimal::new(80, 0), product_offer_amount: Decimal::ZERO, after_deduction: Decimal::new(80, 0),
            cooking_note: None, status: OrderStatus::Processing, review: None, rating: None, settlement: ItemSettlement::Open,
        }
    }

    #[tokio::test]
    async fn test_line_stock_commits_once_and_cancels_on_shortfall() {
        let (store, plenty) = store_with_product(3);
        let scarce = Product::new(Uuid::new_v4(), "Pongal", Decimal::new(60, 0), 1);
        let scarce_id = scarce.id;
        store.insert_product(scarce);
        let order_id = OrderId::parse("RAVI000001").unwrap();
        store.insert_order_items(&[line(&order_id, plenty, 2), line(&order_id, scarce_id, 2)]).await.unwrap();

        assert_eq!(store.commit_line_stock(&order_id, plenty).await.unwrap(), Some(StockUpdate::Applied { stock_left: 1 }));
        assert_eq!(store.commit_line_stock(&order_id, plenty).await.unwrap(), None);
        assert_eq!(store.commit_line_stock(&order_id, scarce_id).await.unwrap(), Some(StockUpdate::Insufficient { available: 1 }));
        assert_eq!(store.commit_line_stock(&order_id, scarce_id).await.unwrap(), None);

        let items = store.order_items(&order_id).await.unwrap();
        assert_eq!(items[0].settlement, ItemSettlement::StockCommitted);
        assert_eq!(items[1].status, OrderStatus::Cancelled);
        assert_eq!(store.find_product(plenty).await.unwrap().unwrap().stock_left, 1);
        assert_eq!(store.find_product(scarce_id).await.unwrap().unwrap().stock_left, 1);
    }

    #[tokio::test]
    async fn test_settle_lines_moves_money_once() {
        let (store, product) = store_with_product(5);
        let restaurant = Restaurant { id: Uuid::new_v4(), name: "Kitchen".into(), email: "k@example.com".into(), wallet_amount: Decimal::ZERO };
        let party = WalletParty::Restaurant(restaurant.id);
        store.insert_restaurant(restaurant);
        let order_id = OrderId::parse("RAVI000002").unwrap();
        store.insert_order_items(&[line(&order_id, product, 1)]).await.unwrap();
        store.commit_line_stock(&order_id, product).await.unwrap();

        let credit = || WalletDelta { party, amount: Decimal::new(80, 0), allow_overdraft: true, reason: "test", order_id: Some(&order_id) };
        assert!(matches!(store.settle_lines(&order_id, &[product], ItemSettlement::StockCommitted, credit()).await.unwrap(), SettleUpdate::Applied(Some(_))));
        assert_eq!(store.settle_lines(&order_id, &[product], ItemSettlement::StockCommitted, credit()).await.unwrap(), SettleUpdate::Stale);
        assert_eq!(store.wallet_balance(party).await.unwrap(), Some(Decimal::new(80, 0)));
        assert_eq!(store.wallet_history(party).await.unwrap().len(), 1);
    }
}
