//! Settlement Orchestrator.
//!
//! Composes the calculator, the ledgers and the gateways into the externally
//! visible workflows: cart and checkout, payment initiation and
//! reconciliation, fulfillment and cancellation, and the expiry sweep.

mod cart;
mod fulfillment;
mod payment;
mod placement;
mod queries;
mod sweep;

pub use cart::{CartLine, CartView};
pub use fulfillment::CancelReport;
pub use payment::PaymentOutcome;
pub use queries::{OrderDetails, WalletStatement};
pub use sweep::SweepReport;

use std::sync::Arc;
use uuid::Uuid;

use crate::config::CheckoutSettings;
use crate::domain::aggregates::{CartItem, Order, Product, User};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::OrderId;
use crate::error::{Result, SettlementError};
use crate::ledger::{StockLedger, WalletLedger};
use crate::payment::Gateways;
use crate::pricing::PricedLine;
use crate::publisher::EventPublisher;
use crate::store::Store;

#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn Store>,
    stock: StockLedger,
    wallet: WalletLedger,
    gateways: Gateways,
    publisher: Arc<dyn EventPublisher>,
    checkout: CheckoutSettings,
}

impl SettlementEngine {
    pub fn new(store: Arc<dyn Store>, gateways: Gateways, publisher: Arc<dyn EventPublisher>, checkout: CheckoutSettings) -> Self {
        Self {
            stock: StockLedger::new(store.clone()),
            wallet: WalletLedger::new(store.clone()),
            store,
            gateways,
            publisher,
            checkout,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> { &self.store }
    pub fn wallet(&self) -> &WalletLedger { &self.wallet }
    pub fn checkout_settings(&self) -> &CheckoutSettings { &self.checkout }

    async fn user(&self, id: Uuid) -> Result<User> {
        self.store.find_user(id).await?.ok_or(SettlementError::UserNotFound)
    }

    async fn product(&self, id: Uuid) -> Result<Product> {
        self.store.find_product(id).await?.ok_or(SettlementError::ProductNotFound(id))
    }

    async fn order(&self, id: &OrderId) -> Result<Order> {
        self.store.find_order(id).await?.ok_or_else(|| SettlementError::OrderNotFound(id.to_string()))
    }

    /// Loads the user's order; someone else's order reads as missing.
    async fn owned_order(&self, user_id: Uuid, id: &OrderId) -> Result<Order> {
        let order = self.order(id).await?;
        if order.user_id != user_id {
            return Err(SettlementError::OrderNotFound(id.to_string()));
        }
        Ok(order)
    }

    /// Current cart with each line priced against the product directory.
    async fn priced_cart(&self, user_id: Uuid) -> Result<Vec<(CartItem, Product, PricedLine)>> {
        let items = self.store.cart_items(user_id).await?;
        let mut priced = Vec::with_capacity(items.len());
        for item in items {
            let product = self.product(item.product_id).await?;
            let line = PricedLine::new(&item, &product);
            priced.push((item, product, line));
        }
        Ok(priced)
    }

    async fn emit(&self, event: DomainEvent) {
        self.publisher.publish(event).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Seeded engine shared by the orchestrator's unit tests.

    use super::*;
    use crate::domain::aggregates::{
        Address, Coupon, GatewayKind, ItemSettlement, OrderItem, OrderStatus, Payment, PaymentRecordStatus, PaymentStatus,
        Restaurant, WalletEntry, WalletParty,
    };
    use crate::payment::WalletGateway;
    use crate::publisher::RecordingPublisher;
    use crate::store::{
        CartStore, CouponStore, DirectoryStore, LedgerStore, MemoryStore, OrderStore, PaymentStore, SettleUpdate, StockUpdate,
        StoreError, StoreResult, WalletDelta, WalletUpdate,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use tokio::sync::oneshot;

    pub struct Fixture {
        pub engine: SettlementEngine,
        pub store: Arc<MemoryStore>,
        pub events: Arc<RecordingPublisher>,
        pub user_id: Uuid,
        pub address_id: Uuid,
        pub restaurant_id: Uuid,
    }

    impl Fixture {
        pub fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            Self::over(store.clone(), store)
        }

        /// Engine running on a [`FaultyStore`] around the fixture's store.
        pub fn faulty() -> (Self, Arc<FaultyStore>) {
            let store = Arc::new(MemoryStore::new());
            let faulty = Arc::new(FaultyStore::new(store.clone()));
            (Self::over(store, faulty.clone()), faulty)
        }

        fn over(store: Arc<MemoryStore>, shared: Arc<dyn Store>) -> Self {
            let user = User::new("Asha Rao", "asha@example.com");
            let restaurant = Restaurant { id: Uuid::new_v4(), name: "Udupi Corner".into(), email: "udupi@example.com".into(), wallet_amount: Decimal::ZERO };
            let address = Address { id: Uuid::new_v4(), user_id: user.id, line1: "12 MG Road".into(), city: "Bengaluru".into(), pincode: "560001".into() };
            let (user_id, address_id, restaurant_id) = (user.id, address.id, restaurant.id);
            store.insert_user(user);
            store.insert_restaurant(restaurant);
            store.insert_address(address);

            let gateways = Gateways::new().register(Arc::new(WalletGateway::new(WalletLedger::new(shared.clone()))));
            let events = Arc::new(RecordingPublisher::default());
            let engine = SettlementEngine::new(shared, gateways, events.clone(), CheckoutSettings::default());
            Self { engine, store, events, user_id, address_id, restaurant_id }
        }

        pub fn product(&self, price: i64, stock: i32) -> Uuid {
            let product = Product::new(self.restaurant_id, "Masala Dosa", Decimal::new(price, 0), stock);
            let id = product.id;
            self.store.insert_product(product);
            id
        }

        pub fn coupon(&self, code: &str, percentage: i64, maximum_usage: i32) {
            self.store.insert_coupon(Coupon {
                code: code.into(),
                expires_at: Utc::now() + Duration::days(7),
                percentage: Decimal::new(percentage, 0),
                minimum_amount: Decimal::ZERO,
                maximum_usage,
            });
        }

        pub fn events_named(&self, name: &str) -> usize {
            self.events.events().iter().filter(|e| e.name() == name).count()
        }
    }

    #[derive(Default)]
    struct Faults {
        pass: u32,
        fail: u32,
    }

    /// Delegates to a [`MemoryStore`]; line stock commits can be made to
    /// fail or to wait for the test.
    pub struct FaultyStore {
        inner: Arc<MemoryStore>,
        faults: Mutex<Faults>,
        hold: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
    }

    impl FaultyStore {
        fn new(inner: Arc<MemoryStore>) -> Self {
            Self { inner, faults: Mutex::new(Faults::default()), hold: Mutex::new(None) }
        }

        /// Lets `pass` line stock commits through, then fails the next
        /// `fail` as if the database had dropped out.
        pub fn fail_line_commits(&self, pass: u32, fail: u32) {
            *self.faults.lock() = Faults { pass, fail };
        }

        fn trip(&self) -> bool {
            let mut faults = self.faults.lock();
            if faults.pass > 0 {
                faults.pass -= 1;
                false
            } else if faults.fail > 0 {
                faults.fail -= 1;
                true
            } else {
                false
            }
        }

        /// The next line stock commit signals the first channel, then waits
        /// until the second one is sent to or dropped.
        pub fn hold_next_line_commit(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
            let (reached_tx, reached_rx) = oneshot::channel();
            let (release_tx, release_rx) = oneshot::channel();
            *self.hold.lock() = Some((reached_tx, release_rx));
            (reached_rx, release_tx)
        }
    }

    #[async_trait]
    impl DirectoryStore for FaultyStore {
        async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> { self.inner.find_user(id).await }
        async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> { self.inner.find_user_by_email(email).await }
        async fn find_restaurant(&self, id: Uuid) -> StoreResult<Option<Restaurant>> { self.inner.find_restaurant(id).await }
        async fn find_restaurant_by_email(&self, email: &str) -> StoreResult<Option<Restaurant>> { self.inner.find_restaurant_by_email(email).await }
        async fn find_address(&self, id: Uuid) -> StoreResult<Option<Address>> { self.inner.find_address(id).await }
        async fn find_product(&self, id: Uuid) -> StoreResult<Option<Product>> { self.inner.find_product(id).await }
        async fn set_product_offer(&self, id: Uuid, offer_amount: Decimal) -> StoreResult<bool> { self.inner.set_product_offer(id, offer_amount).await }
    }

    #[async_trait]
    impl CartStore for FaultyStore {
        async fn cart_items(&self, user_id: Uuid) -> StoreResult<Vec<CartItem>> { self.inner.cart_items(user_id).await }
        async fn save_cart_item(&self, item: &CartItem) -> StoreResult<()> { self.inner.save_cart_item(item).await }
        async fn delete_cart_item(&self, user_id: Uuid, product_id: Uuid) -> StoreResult<bool> { self.inner.delete_cart_item(user_id, product_id).await }
        async fn clear_cart(&self, user_id: Uuid) -> StoreResult<u64> { self.inner.clear_cart(user_id).await }
    }

    #[async_trait]
    impl OrderStore for FaultyStore {
        async fn insert_order(&self, order: &Order) -> StoreResult<bool> { self.inner.insert_order(order).await }
        async fn delete_order(&self, id: &OrderId) -> StoreResult<()> { self.inner.delete_order(id).await }
        async fn find_order(&self, id: &OrderId) -> StoreResult<Option<Order>> { self.inner.find_order(id).await }
        async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> { self.inner.orders_for_user(user_id).await }
        async fn record_coupon(&self, id: &OrderId, code: &str, discount: Decimal, final_amount: Decimal) -> StoreResult<bool> {
            self.inner.record_coupon(id, code, discount, final_amount).await
        }
        async fn transition_payment_status(&self, id: &OrderId, from: PaymentStatus, to: PaymentStatus) -> StoreResult<bool> {
            self.inner.transition_payment_status(id, from, to).await
        }
        async fn insert_order_items(&self, items: &[OrderItem]) -> StoreResult<()> { self.inner.insert_order_items(items).await }
        async fn delete_order_items(&self, id: &OrderId) -> StoreResult<()> { self.inner.delete_order_items(id).await }
        async fn order_items(&self, id: &OrderId) -> StoreResult<Vec<OrderItem>> { self.inner.order_items(id).await }
        async fn restaurant_order_items(&self, restaurant_id: Uuid) -> StoreResult<Vec<OrderItem>> { self.inner.restaurant_order_items(restaurant_id).await }
        async fn transition_item_status(&self, id: &OrderId, product_id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<bool> {
            self.inner.transition_item_status(id, product_id, from, to).await
        }
        async fn orders_with_status_before(&self, status: PaymentStatus, before: DateTime<Utc>) -> StoreResult<Vec<Order>> {
            self.inner.orders_with_status_before(status, before).await
        }
    }

    #[async_trait]
    impl PaymentStore for FaultyStore {
        async fn upsert_payment(&self, payment: &Payment) -> StoreResult<()> { self.inner.upsert_payment(payment).await }
        async fn find_payment(&self, order_id: &OrderId) -> StoreResult<Option<Payment>> { self.inner.find_payment(order_id).await }
        async fn find_payment_by_reference(&self, gateway: GatewayKind, reference: &str) -> StoreResult<Option<Payment>> {
            self.inner.find_payment_by_reference(gateway, reference).await
        }
        async fn update_payment_status(&self, order_id: &OrderId, status: PaymentRecordStatus, remote_payment_id: Option<&str>) -> StoreResult<bool> {
            self.inner.update_payment_status(order_id, status, remote_payment_id).await
        }
    }

    #[async_trait]
    impl CouponStore for FaultyStore {
        async fn find_coupon(&self, code: &str) -> StoreResult<Option<Coupon>> { self.inner.find_coupon(code).await }
        async fn coupon_usage(&self, user_id: Uuid, code: &str) -> StoreResult<i32> { self.inner.coupon_usage(user_id, code).await }
        async fn increment_coupon_usage(&self, user_id: Uuid, code: &str, cap: i32) -> StoreResult<Option<i32>> {
            self.inner.increment_coupon_usage(user_id, code, cap).await
        }
        async fn decrement_coupon_usage(&self, user_id: Uuid, code: &str) -> StoreResult<()> { self.inner.decrement_coupon_usage(user_id, code).await }
    }

    #[async_trait]
    impl LedgerStore for FaultyStore {
        async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<StockUpdate> { self.inner.decrement_stock(product_id, quantity).await }
        async fn increment_stock(&self, product_id: Uuid, quantity: i32) -> StoreResult<Option<i32>> { self.inner.increment_stock(product_id, quantity).await }
        async fn apply_wallet_delta(&self, delta: WalletDelta<'_>) -> StoreResult<WalletUpdate> { self.inner.apply_wallet_delta(delta).await }

        async fn commit_line_stock(&self, order_id: &OrderId, product_id: Uuid) -> StoreResult<Option<StockUpdate>> {
            let held = self.hold.lock().take();
            if let Some((reached, release)) = held {
                let _ = reached.send(());
                let _ = release.await;
            }
            if self.trip() {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.commit_line_stock(order_id, product_id).await
        }

        async fn settle_lines(&self, order_id: &OrderId, product_ids: &[Uuid], from: ItemSettlement, delta: WalletDelta<'_>) -> StoreResult<SettleUpdate> {
            self.inner.settle_lines(order_id, product_ids, from, delta).await
        }

        async fn wallet_balance(&self, party: WalletParty) -> StoreResult<Option<Decimal>> { self.inner.wallet_balance(party).await }
        async fn wallet_history(&self, party: WalletParty) -> StoreResult<Vec<WalletEntry>> { self.inner.wallet_history(party).await }
    }
}
