//! Coupon definition and per-user usage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    /// Percent off the gross total, 0..=100.
    pub percentage: Decimal,
    pub minimum_amount: Decimal,
    /// Uses allowed per user.
    pub maximum_usage: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponUsage {
    pub user_id: Uuid,
    pub code: String,
    pub used_count: i32,
}

impl Coupon {
    /// Codes are matched case-insensitively and stored upper-case.
    pub fn normalize_code(code: &str) -> String { code.trim().to_uppercase() }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }

    /// Expiry, minimum amount and usage cap, in that order.
    pub fn check(&self, gross_total: Decimal, used: i32, now: DateTime<Utc>) -> Result<(), CouponError> {
        if self.is_expired(now) { return Err(CouponError::Expired); }
        if gross_total < self.minimum_amount { return Err(CouponError::BelowMinimum { minimum: self.minimum_amount }); }
        if used >= self.maximum_usage { return Err(CouponError::Exhausted); }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponError { Expired, BelowMinimum { minimum: Decimal }, Exhausted }
impl std::error::Error for CouponError {}
impl std::fmt::Display for CouponError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "Coupon has expired"),
            Self::BelowMinimum { minimum } => write!(f, "Order total must be at least {minimum} to use this coupon"),
            Self::Exhausted => write!(f, "Coupon usage limit reached"),
        }
    }
}
