//! Value Objects for order settlement

use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest buyer-name prefix carried into an order id.
const NAME_PREFIX_LEN: usize = 10;
/// Prefix used when the buyer name has no usable characters.
const FALLBACK_PREFIX: &str = "ORDER";

/// Order identifier: sanitized buyer name plus a random numeric suffix.
///
/// Shared as the join key across orders, order items and payments.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Mints a candidate id. Uniqueness against storage is the caller's concern.
    pub fn mint(buyer_name: &str, rng: &mut impl Rng) -> Self {
        let mut prefix: String = buyer_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(NAME_PREFIX_LEN)
            .collect::<String>()
            .to_uppercase();
        if prefix.is_empty() {
            prefix = FALLBACK_PREFIX.to_string();
        }
        let suffix: u32 = rng.gen_range(0..1_000_000);
        Self(format!("{prefix}{suffix:06}"))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, OrderIdError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(OrderIdError::Empty); }
        if value.len() > 64 { return Err(OrderIdError::TooLong); }
        if !value.chars().all(|c| c.is_ascii_alphanumeric()) { return Err(OrderIdError::InvalidCharacter); }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderIdError { Empty, TooLong, InvalidCharacter }
impl std::error::Error for OrderIdError {}
impl fmt::Display for OrderIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "order id empty"),
            Self::TooLong => write!(f, "order id too long"),
            Self::InvalidCharacter => write!(f, "order id must be alphanumeric"),
        }
    }
}

/// Rounds a monetary amount to two decimal places, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts an amount to the provider's minor unit (paise/cents).
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    use rust_decimal::prelude::ToPrimitive;
    round_money(amount * Decimal::ONE_HUNDRED).to_i64()
}

/// One cent; the tolerance between order totals and summed line nets.
pub const MONEY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
