//! Cart Aggregate

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::product::Product;

/// One row per (user, product).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub cooking_note: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Cart {
    user_id: Uuid,
    items: Vec<CartItem>,
    max_line_quantity: i32,
}

impl Cart {
    pub fn new(user_id: Uuid, items: Vec<CartItem>, max_line_quantity: i32) -> Self {
        Self { user_id, items, max_line_quantity }
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn line(&self, product_id: Uuid) -> Option<&CartItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    /// Adds `quantity` of `product`, merging with an existing line. Returns the resulting line.
    pub fn add_item(&mut self, product: &Product, quantity: i32, cooking_note: Option<String>) -> Result<&CartItem, CartError> {
        if quantity <= 0 { return Err(CartError::InvalidQuantity); }
        let current = self.line(product.id).map(|i| i.quantity).unwrap_or(0);
        let wanted = current + quantity;
        self.check_bounds(product, wanted)?;

        let idx = match self.items.iter().position(|i| i.product_id == product.id) {
            Some(idx) => {
                let existing = &mut self.items[idx];
                existing.quantity = wanted;
                if cooking_note.is_some() { existing.cooking_note = cooking_note; }
                idx
            }
            None => {
                self.items.push(CartItem { user_id: self.user_id, product_id: product.id, quantity, cooking_note });
                self.items.len() - 1
            }
        };
        Ok(&self.items[idx])
    }

    pub fn update_quantity(&mut self, product: &Product, quantity: i32) -> Result<Option<&CartItem>, CartError> {
        let idx = self.items.iter().position(|i| i.product_id == product.id).ok_or(CartError::ItemNotFound)?;
        if quantity == 0 {
            self.items.remove(idx);
            return Ok(None);
        }
        if quantity < 0 { return Err(CartError::InvalidQuantity); }
        self.check_bounds(product, quantity)?;
        self.items[idx].quantity = quantity;
        Ok(Some(&self.items[idx]))
    }

    pub fn remove_item(&mut self, product_id: Uuid) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        if self.items.len() == before { return Err(CartError::ItemNotFound); }
        Ok(())
    }

    fn check_bounds(&self, product: &Product, quantity: i32) -> Result<(), CartError> {
        if quantity > self.max_line_quantity {
            return Err(CartError::LineLimitExceeded { max: self.max_line_quantity });
        }
        if !product.has_stock_for(quantity) {
            return Err(CartError::OutOfStock { available: product.stock_left });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartError { ItemNotFound, InvalidQuantity, LineLimitExceeded { max: i32 }, OutOfStock { available: i32 } }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound => write!(f, "Item not found in cart"),
            Self::InvalidQuantity => write!(f, "Quantity must be positive"),
            Self::LineLimitExceeded { max } => write!(f, "At most {max} units per item"),
            Self::OutOfStock { available } => write!(f, "Only {available} left in stock"),
        }
    }
}
