//! Coupon and product-offer arithmetic.
//!
//! Two independent discounts stack: the product offer (flat per unit, always
//! applied) and the coupon (percentage of the gross total, once per order).
//! Everything here is pure; usage counting and persistence live in the
//! settlement layer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{CartItem, Coupon, CouponError, Product};
use crate::domain::value_objects::round_money;
use crate::error::{Result, SettlementError};

/// A cart line priced against the current product directory.
#[derive(Clone, Debug, PartialEq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub restaurant_id: Uuid,
    pub quantity: i32,
    pub amount: Decimal,
    pub offer_amount: Decimal,
    pub cooking_note: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Totals {
    pub item_count: i32,
    pub total_amount: Decimal,
    pub product_offer_amount: Decimal,
    pub coupon_discount_amount: Decimal,
    pub final_amount: Decimal,
}

impl PricedLine {
    pub fn new(item: &CartItem, product: &Product) -> Self {
        let qty = Decimal::from(item.quantity);
        Self {
            product_id: product.id,
            restaurant_id: product.restaurant_id,
            quantity: item.quantity,
            amount: product.price * qty,
            offer_amount: product.offer_amount * qty,
            cooking_note: item.cooking_note.clone(),
        }
    }
}

/// Gross total and product-offer total, before any coupon.
pub fn totals(lines: &[PricedLine]) -> Totals {
    let total_amount: Decimal = lines.iter().map(|l| l.amount).sum();
    let product_offer_amount: Decimal = lines.iter().map(|l| l.offer_amount).sum();
    Totals {
        item_count: lines.iter().map(|l| l.quantity).sum(),
        total_amount,
        product_offer_amount,
        coupon_discount_amount: Decimal::ZERO,
        final_amount: total_amount - product_offer_amount,
    }
}

/// `total * percentage / 100`, rounded, and never more than what is left
/// after product offers.
pub fn coupon_discount(coupon: &Coupon, total_amount: Decimal, product_offer_amount: Decimal) -> Decimal {
    let raw = round_money(total_amount * coupon.percentage / Decimal::ONE_HUNDRED);
    let ceiling = (total_amount - product_offer_amount).max(Decimal::ZERO);
    raw.min(ceiling)
}

/// Validates the coupon against the order snapshot and returns the discount.
pub fn evaluate_coupon(coupon: &Coupon, totals: &Totals, used: i32, now: DateTime<Utc>) -> std::result::Result<Decimal, CouponError> {
    coupon.check(totals.total_amount, used, now)?;
    Ok(coupon_discount(coupon, totals.total_amount, totals.product_offer_amount))
}

/// Totals with the coupon folded in.
pub fn with_coupon(mut totals: Totals, discount: Decimal) -> Totals {
    totals.coupon_discount_amount = discount;
    totals.final_amount = totals.total_amount - (discount + totals.product_offer_amount);
    totals
}

/// Net amount per line: `amount - (offer + coupon * quantity / item_count)`.
///
/// Shares are rounded to the cent and the last line absorbs the remainder,
/// so the nets always sum to `total - (offer + coupon)`.
pub fn distribute_coupon(lines: &[PricedLine], coupon_discount: Decimal, item_count: i32) -> Result<Vec<Decimal>> {
    if item_count <= 0 {
        return Err(SettlementError::ZeroItemCount);
    }
    let line_units: i32 = lines.iter().map(|l| l.quantity).sum();
    if line_units != item_count {
        return Err(SettlementError::Validation(format!(
            "item count {item_count} does not match {line_units} units on the order lines"
        )));
    }

    let count = Decimal::from(item_count);
    let mut remaining = coupon_discount;
    let mut nets = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        let share = if idx + 1 == lines.len() {
            remaining
        } else {
            round_money(coupon_discount * Decimal::from(line.quantity) / count)
        };
        remaining -= share;
        nets.push(line.amount - (line.offer_amount + share));
    }
    Ok(nets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::MONEY_TOLERANCE;
    use chrono::Duration;

    fn line(quantity: i32, price: i64, offer: i64) -> PricedLine {
        PricedLine {
            product_id: Uuid::new_v4(),
            restaurant_id: Uuid::new_v4(),
            quantity,
            amount: Decimal::new(price * quantity as i64, 0),
            offer_amount: Decimal::new(offer * quantity as i64, 0),
            cooking_note: None,
        }
    }

    fn coupon(pct: i64) -> Coupon {
        Coupon { code: "SAVE".into(), expires_at: Utc::now() + Duration::days(3), percentage: Decimal::new(pct, 0), minimum_amount: Decimal::ZERO, maximum_usage: 5 }
    }

    #[test]
    fn test_totals_and_coupon() {
        let lines = vec![line(2, 150, 10), line(1, 99, 0)];
        let t = totals(&lines);
        assert_eq!(t.item_count, 3);
        assert_eq!(t.total_amount, Decimal::new(399, 0));
        assert_eq!(t.product_offer_amount, Decimal::new(20, 0));

        let discount = evaluate_coupon(&coupon(10), &t, 0, Utc::now()).unwrap();
        assert_eq!(discount, Decimal::new(3990, 2));
        let t = with_coupon(t, discount);
        assert_eq!(t.final_amount, t.total_amount - (t.coupon_discount_amount + t.product_offer_amount));
    }

    #[test]
    fn test_coupon_capped_by_remaining_amount() {
        let d = coupon_discount(&coupon(100), Decimal::new(200, 0), Decimal::new(50, 0));
        assert_eq!(d, Decimal::new(150, 0));
    }

    #[test]
    fn test_distribution_sums_to_final() {
        let lines = vec![line(1, 100, 0), line(1, 100, 0), line(1, 100, 0)];
        let t = with_coupon(totals(&lines), Decimal::new(100, 0));
        let nets = distribute_coupon(&lines, t.coupon_discount_amount, t.item_count).unwrap();
        assert_eq!(nets[0], Decimal::new(6667, 2));
        assert_eq!(nets[1], Decimal::new(6667, 2));
        assert_eq!(nets[2], Decimal::new(6666, 2));
        let sum: Decimal = nets.iter().copied().sum();
        assert!((sum - t.final_amount).abs() <= MONEY_TOLERANCE);
    }

    #[test]
    fn test_distribution_guards_item_count() {
        let lines = vec![line(2, 100, 0)];
        assert!(matches!(distribute_coupon(&lines, Decimal::ONE, 0), Err(SettlementError::ZeroItemCount)));
        assert!(matches!(distribute_coupon(&lines, Decimal::ONE, 3), Err(SettlementError::Validation(_))));
    }
}
