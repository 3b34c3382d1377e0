use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::aggregates::{ItemSettlement, OrderItem, WalletEntry, WalletParty};
use crate::domain::value_objects::OrderId;
use crate::error::{Result, SettlementError};
use crate::store::{SettleUpdate, Store, WalletDelta, WalletUpdate};

pub const REASON_TOP_UP: &str = "wallet top-up";
pub const REASON_ORDER_PAYMENT: &str = "order payment";
pub const REASON_SETTLEMENT: &str = "order settlement";
pub const REASON_REFUND: &str = "order cancellation refund";
pub const REASON_REFUND_CLAWBACK: &str = "order cancellation clawback";
pub const REASON_OVERSELL_REFUND: &str = "out of stock refund";

/// Whether a debit may take the balance below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overdraft { Deny, Allow }

#[derive(Clone)]
pub struct WalletLedger {
    store: Arc<dyn Store>,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    pub async fn credit(&self, party: WalletParty, amount: Decimal, reason: &str, order_id: Option<&OrderId>) -> Result<WalletEntry> {
        positive(amount)?;
        self.apply(party, amount, Overdraft::Deny, reason, order_id).await
    }

    pub async fn debit(&self, party: WalletParty, amount: Decimal, overdraft: Overdraft, reason: &str, order_id: Option<&OrderId>) -> Result<WalletEntry> {
        positive(amount)?;
        self.apply(party, -amount, overdraft, reason, order_id).await
    }

    pub async fn balance(&self, party: WalletParty) -> Result<Decimal> {
        self.store.wallet_balance(party).await?.ok_or_else(|| missing(party))
    }

    pub async fn history(&self, party: WalletParty) -> Result<Vec<WalletEntry>> {
        Ok(self.store.wallet_history(party).await?)
    }

    /// Credits each restaurant the sum of `after_deduction` over its lines
    /// whose stock is committed, marking those lines settled in the same
    /// step. Settled lines are skipped, so repeating a split pays nothing
    /// twice. Returns the shares paid by this call.
    ///
    /// Pro-rated coupon shares can leave a restaurant's share negative on a
    /// mixed order; that share is taken back as an overdraft debit so the
    /// split always sums to the order's net.
    pub async fn split_to_restaurants(&self, order_id: &OrderId, items: &[OrderItem]) -> Result<BTreeMap<Uuid, Decimal>> {
        let mut groups: BTreeMap<Uuid, (Decimal, Vec<Uuid>)> = BTreeMap::new();
        for item in items.iter().filter(|i| i.settlement == ItemSettlement::StockCommitted) {
            let (share, lines) = groups.entry(item.restaurant_id).or_default();
            *share += item.after_deduction;
            lines.push(item.product_id);
        }

        let mut paid = BTreeMap::new();
        for (restaurant_id, (share, lines)) in groups {
            let delta = WalletDelta { party: WalletParty::Restaurant(restaurant_id), amount: share, allow_overdraft: true, reason: REASON_SETTLEMENT, order_id: Some(order_id) };
            if self.settle_lines(order_id, &lines, ItemSettlement::StockCommitted, delta).await? {
                info!(order_id = %order_id, %restaurant_id, %share, "Restaurant settled");
                paid.insert(restaurant_id, share);
            }
        }
        Ok(paid)
    }

    /// Gives a line cancelled for want of stock its net back to the buyer.
    /// `None` when an earlier run already did.
    pub async fn refund_short_line(&self, item: &OrderItem) -> Result<Option<Decimal>> {
        let refunded = item.after_deduction.max(Decimal::ZERO);
        let delta = WalletDelta { party: WalletParty::User(item.user_id), amount: refunded, allow_overdraft: false, reason: REASON_OVERSELL_REFUND, order_id: Some(&item.order_id) };
        let done = self.settle_lines(&item.order_id, &[item.product_id], ItemSettlement::Open, delta).await?;
        Ok(done.then_some(refunded))
    }

    /// Mirror of the split for cancelled items: take each restaurant's share
    /// back, then credit the user the aggregate.
    pub async fn refund(&self, user_id: Uuid, order_id: &OrderId, items: &[OrderItem]) -> Result<Decimal> {
        let shares = restaurant_shares(items);
        for (&restaurant_id, &share) in &shares {
            let party = WalletParty::Restaurant(restaurant_id);
            if share > Decimal::ZERO {
                self.debit(party, share, Overdraft::Allow, REASON_REFUND_CLAWBACK, Some(order_id)).await?;
            } else if share < Decimal::ZERO {
                self.credit(party, -share, REASON_REFUND_CLAWBACK, Some(order_id)).await?;
            }
        }
        let total: Decimal = shares.values().copied().sum();
        if total > Decimal::ZERO {
            self.credit(WalletParty::User(user_id), total, REASON_REFUND, Some(order_id)).await?;
        }
        info!(order_id = %order_id, %user_id, refunded = %total, "Refund issued");
        Ok(total)
    }

    async fn settle_lines(&self, order_id: &OrderId, lines: &[Uuid], from: ItemSettlement, delta: WalletDelta<'_>) -> Result<bool> {
        let party = delta.party;
        match self.store.settle_lines(order_id, lines, from, delta).await? {
            SettleUpdate::Applied(_) => Ok(true),
            SettleUpdate::Stale => Ok(false),
            SettleUpdate::Refused(WalletUpdate::Insufficient { balance }) => {
                warn!(?party, %balance, "Line settlement refused");
                Err(SettlementError::InsufficientBalance)
            }
            SettleUpdate::Refused(_) => Err(missing(party)),
        }
    }

    async fn apply(&self, party: WalletParty, amount: Decimal, overdraft: Overdraft, reason: &str, order_id: Option<&OrderId>) -> Result<WalletEntry> {
        let delta = WalletDelta { party, amount, allow_overdraft: overdraft == Overdraft::Allow, reason, order_id };
        match self.store.apply_wallet_delta(delta).await? {
            WalletUpdate::Applied(entry) => Ok(entry),
            WalletUpdate::Insufficient { balance } => {
                warn!(?party, %amount, %balance, "Wallet debit refused");
                Err(SettlementError::InsufficientBalance)
            }
            WalletUpdate::Missing => Err(missing(party)),
        }
    }
}

fn restaurant_shares(items: &[OrderItem]) -> BTreeMap<Uuid, Decimal> {
    let mut shares = BTreeMap::new();
    for item in items {
        *shares.entry(item.restaurant_id).or_insert(Decimal::ZERO) += item.after_deduction;
    }
    shares
}

fn positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(SettlementError::Validation(format!("wallet amount must be positive, got {amount}")));
    }
    Ok(())
}

fn missing(party: WalletParty) -> SettlementError {
    match party {
        WalletParty::User(_) => SettlementError::UserNotFound,
        WalletParty::Restaurant(_) => SettlementError::RestaurantNotFound,
    }
}
