//! Cart-to-Order conversion, run as a saga.
//!
//! Steps: create the order row, apply the coupon, materialize the items,
//! commit stock for cash on delivery, clear the cart. A failing step unwinds
//! the completed ones, so a rejected checkout leaves no order behind.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::SettlementEngine;
use crate::domain::aggregates::{Coupon, CouponError, ItemSettlement, Order, OrderItem, OrderStatus, PaymentMethod, User};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{OrderId, MONEY_TOLERANCE};
use crate::error::{Result, SettlementError};
use crate::ledger::StockLedger;
use crate::pricing::{self, PricedLine, Totals};
use crate::saga::{Saga, SagaStep};
use crate::store::Store;

/// State threaded through the placement saga.
struct Placement {
    user: User,
    coupon_code: Option<String>,
    lines: Vec<PricedLine>,
    totals: Totals,
    order: Order,
    items: Vec<OrderItem>,
    coupon_counted: bool,
    committed: Vec<(Uuid, i32)>,
}

struct CreateOrder {
    store: Arc<dyn Store>,
    attempts: u32,
}

struct ApplyCoupon {
    store: Arc<dyn Store>,
}

struct MaterializeItems {
    store: Arc<dyn Store>,
}

struct CommitCashOnDeliveryStock {
    stock: StockLedger,
}

struct ClearCart {
    store: Arc<dyn Store>,
}

#[async_trait]
impl SagaStep<Placement> for CreateOrder {
    fn name(&self) -> &'static str { "create_order" }

    async fn execute(&self, ctx: &mut Placement) -> Result<()> {
        for _ in 0..self.attempts {
            ctx.order.id = OrderId::mint(&ctx.user.name, &mut rand::thread_rng());
            if self.store.insert_order(&ctx.order).await? {
                info!(order_id = %ctx.order.id, user_id = %ctx.user.id, total = %ctx.order.total_amount, "Order created");
                return Ok(());
            }
        }
        Err(SettlementError::OrderIdExhausted)
    }

    async fn compensate(&self, ctx: &mut Placement) -> Result<()> {
        warn!(order_id = %ctx.order.id, "Deleting order from failed checkout");
        Ok(self.store.delete_order(&ctx.order.id).await?)
    }
}

#[async_trait]
impl SagaStep<Placement> for ApplyCoupon {
    fn name(&self) -> &'static str { "apply_coupon" }

    async fn execute(&self, ctx: &mut Placement) -> Result<()> {
        let Some(code) = ctx.coupon_code.clone() else { return Ok(()) };
        let coupon = self.store.find_coupon(&code).await?.ok_or(SettlementError::CouponNotFound)?;
        if ctx.order.has_coupon() {
            return Err(SettlementError::CouponAlreadyApplied);
        }
        let used = self.store.coupon_usage(ctx.user.id, &code).await?;
        let discount = pricing::evaluate_coupon(&coupon, &ctx.totals, used, Utc::now())?;
        ctx.order.apply_coupon(code.clone(), discount).map_err(|_| SettlementError::CouponAlreadyApplied)?;

        if !self.store.record_coupon(&ctx.order.id, &code, discount, ctx.order.final_amount).await? {
            return Err(SettlementError::CouponAlreadyApplied);
        }
        if self.store.increment_coupon_usage(ctx.user.id, &code, coupon.maximum_usage).await?.is_none() {
            return Err(CouponError::Exhausted.into());
        }
        ctx.coupon_counted = true;
        ctx.totals = pricing::with_coupon(ctx.totals.clone(), discount);
        info!(order_id = %ctx.order.id, coupon = %code, %discount, "Coupon applied");
        Ok(())
    }

    async fn compensate(&self, ctx: &mut Placement) -> Result<()> {
        if let (true, Some(code)) = (ctx.coupon_counted, ctx.coupon_code.as_deref()) {
            self.store.decrement_coupon_usage(ctx.user.id, code).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SagaStep<Placement> for MaterializeItems {
    fn name(&self) -> &'static str { "materialize_items" }

    async fn execute(&self, ctx: &mut Placement) -> Result<()> {
        let nets = pricing::distribute_coupon(&ctx.lines, ctx.order.coupon_discount_amount, ctx.order.item_count)?;
        let net_total: Decimal = nets.iter().copied().sum();
        if (net_total - ctx.order.final_amount).abs() > MONEY_TOLERANCE {
            return Err(SettlementError::Validation(format!(
                "line nets {net_total} do not add up to order total {}",
                ctx.order.final_amount
            )));
        }
        ctx.items = ctx
            .lines
            .iter()
            .zip(nets)
            .map(|(line, after_deduction)| OrderItem {
                order_id: ctx.order.id.clone(),
                user_id: ctx.user.id,
                restaurant_id: line.restaurant_id,
                product_id: line.product_id,
                quantity: line.quantity,
                amount: line.amount,
                product_offer_amount: line.offer_amount,
                after_deduction,
                cooking_note: line.cooking_note.clone(),
                status: OrderStatus::Processing,
                review: None,
                rating: None,
                settlement: ItemSettlement::Open,
            })
            .collect();
        self.store.insert_order_items(&ctx.items).await?;
        Ok(())
    }

    async fn compensate(&self, ctx: &mut Placement) -> Result<()> {
        Ok(self.store.delete_order_items(&ctx.order.id).await?)
    }
}

#[async_trait]
impl SagaStep<Placement> for CommitCashOnDeliveryStock {
    fn name(&self) -> &'static str { "commit_cod_stock" }

    /// No gateway ever confirms a cash order, so its stock is taken now.
    async fn execute(&self, ctx: &mut Placement) -> Result<()> {
        if ctx.order.payment_method != PaymentMethod::CashOnDelivery {
            return Ok(());
        }
        for line in &ctx.lines {
            if let Err(err) = self.stock.commit(line.product_id, line.quantity).await {
                release(&self.stock, &mut ctx.committed).await;
                return Err(err);
            }
            ctx.committed.push((line.product_id, line.quantity));
        }
        Ok(())
    }

    async fn compensate(&self, ctx: &mut Placement) -> Result<()> {
        release(&self.stock, &mut ctx.committed).await;
        Ok(())
    }
}

#[async_trait]
impl SagaStep<Placement> for ClearCart {
    fn name(&self) -> &'static str { "clear_cart" }

    async fn execute(&self, ctx: &mut Placement) -> Result<()> {
        self.store.clear_cart(ctx.user.id).await?;
        Ok(())
    }
}

async fn release(stock: &StockLedger, committed: &mut Vec<(Uuid, i32)>) {
    for (product_id, quantity) in committed.drain(..) {
        if let Err(err) = stock.restore(product_id, quantity).await {
            tracing::error!(%product_id, quantity, error = %err, "Stock release failed");
        }
    }
}

impl SettlementEngine {
    /// Converts the user's cart into an order.
    ///
    /// Preconditions, in order: the user exists, the address is theirs, every
    /// line fits current stock, the cart is not empty, and cash on delivery
    /// stays within the configured limit.
    pub async fn place_order(&self, user_id: Uuid, address_id: Uuid, method: PaymentMethod, coupon_code: Option<&str>) -> Result<Order> {
        let user = self.user(user_id).await?;
        let address = self.store.find_address(address_id).await?;
        if !address.is_some_and(|a| a.belongs_to(user_id)) {
            return Err(SettlementError::AddressNotOwned);
        }

        let priced = self.priced_cart(user_id).await?;
        for (item, _, _) in &priced {
            self.stock.check(item.product_id, item.quantity).await?;
        }
        if priced.is_empty() {
            return Err(SettlementError::EmptyCart);
        }

        let lines: Vec<PricedLine> = priced.into_iter().map(|(_, _, line)| line).collect();
        let totals = pricing::totals(&lines);
        if method == PaymentMethod::CashOnDelivery && totals.total_amount > self.checkout.cod_limit {
            return Err(SettlementError::CodLimitExceeded { limit: self.checkout.cod_limit });
        }

        let order = Order::create(
            OrderId::mint(&user.name, &mut rand::thread_rng()),
            user_id,
            address_id,
            method,
            totals.item_count,
            totals.total_amount,
            totals.product_offer_amount,
        );
        let mut ctx = Placement {
            user,
            coupon_code: coupon_code.map(Coupon::normalize_code).filter(|c| !c.is_empty()),
            lines,
            totals,
            order,
            items: Vec::new(),
            coupon_counted: false,
            committed: Vec::new(),
        };

        Saga::new("place_order")
            .step(CreateOrder { store: self.store.clone(), attempts: self.checkout.order_id_attempts.max(1) })
            .step(ApplyCoupon { store: self.store.clone() })
            .step(MaterializeItems { store: self.store.clone() })
            .step(CommitCashOnDeliveryStock { stock: self.stock.clone() })
            .step(ClearCart { store: self.store.clone() })
            .run(&mut ctx)
            .await?;

        info!(order_id = %ctx.order.id, items = ctx.items.len(), final_amount = %ctx.order.final_amount, method = ctx.order.payment_method.as_str(), "Order placed");
        self.emit(DomainEvent::OrderPlaced { order_id: ctx.order.id.clone(), user_id, final_amount: ctx.order.final_amount }).await;
        Ok(ctx.order)
    }
}
