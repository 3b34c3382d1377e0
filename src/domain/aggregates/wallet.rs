//! Wallet ledger entries.
//!
//! Each entry stores the balance that resulted from it, so a party's history
//! replays to its stored balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::order::UnknownVariant;
use crate::domain::value_objects::OrderId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum WalletParty { User(Uuid), Restaurant(Uuid) }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction { Incoming, Outgoing }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub party: WalletParty,
    pub at: DateTime<Utc>,
    pub direction: Direction,
    pub amount: Decimal,
    /// Balance after this entry.
    pub balance: Decimal,
    pub reason: String,
    pub order_id: Option<OrderId>,
}

impl WalletEntry {
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Incoming => self.amount,
            Direction::Outgoing => -self.amount,
        }
    }
}

/// Sums signed deltas in order. Returns `None` if any entry's recorded balance
/// disagrees with the running total.
pub fn replay(entries: &[WalletEntry]) -> Option<Decimal> {
    entries.iter().try_fold(Decimal::ZERO, |running, e| {
        let next = running + e.signed_amount();
        (next == e.balance).then_some(next)
    })
}

impl WalletParty {
    pub fn id(self) -> Uuid {
        match self { Self::User(id) | Self::Restaurant(id) => id }
    }
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self { Self::Incoming => "INCOMING", Self::Outgoing => "OUTGOING" }
    }
}

impl FromStr for Direction {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCOMING" => Ok(Self::Incoming),
            "OUTGOING" => Ok(Self::Outgoing),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}
