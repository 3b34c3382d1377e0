use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::aggregates::OrderItem;
use crate::error::{Result, SettlementError};
use crate::store::{StockUpdate, Store};

/// What happened to one paid line's stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStock {
    Committed { stock_left: i32 },
    /// Not enough left; the line was cancelled instead.
    Short,
    /// Taken or cancelled by an earlier run.
    Done,
}

#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn Store>,
}

impl StockLedger {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    /// Read-only availability check. Not a reservation: a later `commit` can
    /// still lose the race and is checked again there.
    pub async fn check(&self, product_id: Uuid, quantity: i32) -> Result<()> {
        let product = self.store.find_product(product_id).await?.ok_or(SettlementError::ProductNotFound(product_id))?;
        if !product.has_stock_for(quantity) {
            return Err(SettlementError::InsufficientStock { product_id, requested: quantity, available: product.stock_left });
        }
        Ok(())
    }

    /// Atomically takes `quantity` units. A decrement that would go below
    /// zero is refused and nothing is written.
    pub async fn commit(&self, product_id: Uuid, quantity: i32) -> Result<i32> {
        if quantity <= 0 {
            return Err(SettlementError::Validation(format!("stock quantity must be positive, got {quantity}")));
        }
        match self.store.decrement_stock(product_id, quantity).await? {
            StockUpdate::Applied { stock_left } => {
                debug!(%product_id, quantity, stock_left, "Stock committed");
                Ok(stock_left)
            }
            StockUpdate::Insufficient { available } => {
                warn!(%product_id, quantity, available, "Stock commit refused");
                Err(SettlementError::StockUnderflow(product_id))
            }
            StockUpdate::Missing => Err(SettlementError::ProductNotFound(product_id)),
        }
    }

    /// Takes stock for a paid line and records that on the line. Safe to
    /// repeat: a line is only ever taken once.
    pub async fn commit_line(&self, item: &OrderItem) -> Result<LineStock> {
        let (order_id, product_id) = (&item.order_id, item.product_id);
        Ok(match self.store.commit_line_stock(order_id, product_id).await? {
            Some(StockUpdate::Applied { stock_left }) => {
                debug!(%order_id, %product_id, quantity = item.quantity, stock_left, "Line stock committed");
                LineStock::Committed { stock_left }
            }
            Some(StockUpdate::Insufficient { available }) => {
                warn!(%order_id, %product_id, quantity = item.quantity, available, "Line stock short, line cancelled");
                LineStock::Short
            }
            Some(StockUpdate::Missing) => {
                warn!(%order_id, %product_id, "Line product gone, line cancelled");
                LineStock::Short
            }
            None => LineStock::Done,
        })
    }

    pub async fn restore(&self, product_id: Uuid, quantity: i32) -> Result<i32> {
        if quantity <= 0 {
            return Err(SettlementError::Validation(format!("stock quantity must be positive, got {quantity}")));
        }
        let stock_left = self.store.increment_stock(product_id, quantity).await?.ok_or(SettlementError::ProductNotFound(product_id))?;
        debug!(%product_id, quantity, stock_left, "Stock restored");
        Ok(stock_left)
    }
}
