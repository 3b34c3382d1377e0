//! Internal wallet: paid in full at initiation, no return leg.

use async_trait::async_trait;

use super::{GatewayCallback, Initiation, PaymentGateway, Verdict};
use crate::domain::aggregates::{GatewayKind, Order, Payment, User, WalletParty};
use crate::error::{Result, SettlementError};
use crate::ledger::{Overdraft, WalletLedger, REASON_ORDER_PAYMENT};

pub struct WalletGateway {
    ledger: WalletLedger,
}

impl WalletGateway {
    pub fn new(ledger: WalletLedger) -> Self { Self { ledger } }
}

#[async_trait]
impl PaymentGateway for WalletGateway {
    fn kind(&self) -> GatewayKind { GatewayKind::Wallet }

    async fn initiate(&self, order: &Order, buyer: &User) -> Result<Initiation> {
        if order.final_amount <= rust_decimal::Decimal::ZERO {
            return Ok(Initiation::Settled);
        }
        self.ledger
            .debit(WalletParty::User(buyer.id), order.final_amount, Overdraft::Deny, REASON_ORDER_PAYMENT, Some(&order.id))
            .await?;
        Ok(Initiation::Settled)
    }

    async fn reconcile(&self, _payment: &Payment, _callback: &GatewayCallback) -> Result<Verdict> {
        Err(SettlementError::Validation("wallet payments have no callback".into()))
    }
}
