//! Product Aggregate
//!
//! Read-only directory view of a menu product as seen by settlement. Stock is
//! mutated only through the stock ledger; the offer is the one field
//! settlement lets a restaurant change.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub name: String,
    pub price: Decimal,
    /// Flat amount off per unit.
    pub offer_amount: Decimal,
    pub stock_left: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub wallet_amount: Decimal,
}

impl Product {
    pub fn new(restaurant_id: Uuid, name: impl Into<String>, price: Decimal, stock_left: i32) -> Self {
        Self { id: Uuid::new_v4(), restaurant_id, name: name.into(), price, offer_amount: Decimal::ZERO, stock_left }
    }

    pub fn is_in_stock(&self) -> bool { self.stock_left > 0 }

    pub fn has_stock_for(&self, quantity: i32) -> bool { quantity <= self.stock_left }

    /// Price of one unit after the product offer.
    pub fn unit_price_after_offer(&self) -> Decimal { self.price - self.offer_amount }

    pub fn set_offer(&mut self, amount: Decimal) -> Result<(), ProductError> {
        if amount.is_sign_negative() { return Err(ProductError::NegativeOffer); }
        if amount > self.price { return Err(ProductError::OfferExceedsPrice); }
        self.offer_amount = amount;
        Ok(())
    }

    pub fn clear_offer(&mut self) { self.offer_amount = Decimal::ZERO; }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ProductError { NegativeOffer, OfferExceedsPrice }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeOffer => write!(f, "Offer amount cannot be negative"),
            Self::OfferExceedsPrice => write!(f, "Offer amount cannot exceed the product price"),
        }
    }
}
