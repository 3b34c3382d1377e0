//! Cart maintenance, checkout preview and product offers.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::SettlementEngine;
use crate::domain::aggregates::{Cart, CartItem, Coupon, Product};
use crate::error::{Result, SettlementError};
use crate::pricing::{self, PricedLine, Totals};

#[derive(Clone, Debug, Serialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub offer_amount: Decimal,
    pub cooking_note: Option<String>,
    pub in_stock: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub totals: Totals,
}

impl SettlementEngine {
    async fn load_cart(&self, user_id: Uuid) -> Result<Cart> {
        self.user(user_id).await?;
        let items = self.store.cart_items(user_id).await?;
        Ok(Cart::new(user_id, items, self.checkout.max_line_quantity))
    }

    pub async fn view_cart(&self, user_id: Uuid) -> Result<CartView> {
        self.user(user_id).await?;
        let priced = self.priced_cart(user_id).await?;
        let lines: Vec<PricedLine> = priced.iter().map(|(_, _, l)| l.clone()).collect();
        let view = priced
            .into_iter()
            .map(|(item, product, line)| CartLine {
                product_id: product.id,
                in_stock: product.has_stock_for(item.quantity),
                name: product.name,
                quantity: item.quantity,
                unit_price: product.price,
                amount: line.amount,
                offer_amount: line.offer_amount,
                cooking_note: item.cooking_note,
            })
            .collect();
        Ok(CartView { lines: view, totals: pricing::totals(&lines) })
    }

    pub async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, quantity: i32, cooking_note: Option<String>) -> Result<CartItem> {
        let product = self.product(product_id).await?;
        let mut cart = self.load_cart(user_id).await?;
        let line = cart.add_item(&product, quantity, cooking_note)?.clone();
        self.store.save_cart_item(&line).await?;
        Ok(line)
    }

    /// Sets the line quantity; zero removes the line and returns `None`.
    pub async fn update_cart_item(&self, user_id: Uuid, product_id: Uuid, quantity: i32) -> Result<Option<CartItem>> {
        let product = self.product(product_id).await?;
        let mut cart = self.load_cart(user_id).await?;
        match cart.update_quantity(&product, quantity)?.cloned() {
            Some(line) => {
                self.store.save_cart_item(&line).await?;
                Ok(Some(line))
            }
            None => {
                self.store.delete_cart_item(user_id, product_id).await?;
                Ok(None)
            }
        }
    }

    pub async fn remove_from_cart(&self, user_id: Uuid, product_id: Uuid) -> Result<()> {
        let mut cart = self.load_cart(user_id).await?;
        cart.remove_item(product_id)?;
        self.store.delete_cart_item(user_id, product_id).await?;
        Ok(())
    }

    /// Totals for the current cart with an optional coupon. Usage is checked
    /// but not consumed.
    pub async fn preview_checkout(&self, user_id: Uuid, coupon_code: Option<&str>) -> Result<Totals> {
        self.user(user_id).await?;
        let lines: Vec<PricedLine> = self.priced_cart(user_id).await?.into_iter().map(|(_, _, l)| l).collect();
        if lines.is_empty() {
            return Err(SettlementError::EmptyCart);
        }
        let totals = pricing::totals(&lines);
        let Some(code) = coupon_code.map(Coupon::normalize_code).filter(|c| !c.is_empty()) else {
            return Ok(totals);
        };
        let coupon = self.store.find_coupon(&code).await?.ok_or(SettlementError::CouponNotFound)?;
        let used = self.store.coupon_usage(user_id, &code).await?;
        let discount = pricing::evaluate_coupon(&coupon, &totals, used, Utc::now())?;
        Ok(pricing::with_coupon(totals, discount))
    }

    /// Sets the flat per-unit offer on one of the restaurant's products, or
    /// clears it with `None`.
    pub async fn set_product_offer(&self, restaurant_id: Uuid, product_id: Uuid, offer: Option<Decimal>) -> Result<Product> {
        let mut product = self.product(product_id).await?;
        if product.restaurant_id != restaurant_id {
            return Err(SettlementError::Forbidden);
        }
        match offer {
            Some(amount) => product.set_offer(amount)?,
            None => product.clear_offer(),
        }
        if !self.store.set_product_offer(product_id, product.offer_amount).await? {
            return Err(SettlementError::ProductNotFound(product_id));
        }
        info!(%product_id, offer = %product.offer_amount, "Product offer updated");
        Ok(product)
    }
}
