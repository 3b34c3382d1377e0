//! Payment initiation, callback reconciliation and the shared
//! post-confirmation hook.
//!
//! A verified payment moves the order from `PENDING` to `SETTLING`. The hook
//! then commits stock and splits proceeds line by line, and only after that
//! moves the order to `CONFIRMED`. Fulfillment and cancellation refuse a
//! settling order, and a settling order left behind by a fault is finished by
//! the next initiation, callback or sweep.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::SettlementEngine;
use crate::domain::aggregates::{
    GatewayKind, ItemSettlement, Order, OrderStatus, Payment, PaymentMethod, PaymentRecordStatus, PaymentStatus, WalletParty,
};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::OrderId;
use crate::error::{ErrorKind, Result, SettlementError};
use crate::ledger::REASON_REFUND;
use crate::payment::{GatewayCallback, Initiation, Verdict};

#[derive(Clone, Debug, Serialize)]
pub struct PaymentOutcome {
    pub order_id: OrderId,
    pub gateway: GatewayKind,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiation: Option<Initiation>,
}

impl SettlementEngine {
    /// Starts payment of a pending online order through `gateway`.
    ///
    /// Provider failures mark the order and payment failed. Precondition
    /// failures (such as an underfunded wallet) leave the order pending so the
    /// user can pick another gateway. On an order that is already paid but
    /// still settling, no money moves: the interrupted hook is finished.
    pub async fn initiate_payment(&self, user_id: Uuid, order_id: &OrderId, gateway: GatewayKind) -> Result<PaymentOutcome> {
        let order = self.owned_order(user_id, order_id).await?;
        if order.payment_method == PaymentMethod::CashOnDelivery {
            return Err(SettlementError::CashOnDeliveryOrder);
        }
        match order.payment_status {
            PaymentStatus::Pending => {}
            PaymentStatus::Settling => {
                let gateway = self.resume_settlement(&order).await?;
                return Ok(PaymentOutcome { order_id: order.id, gateway, payment_status: PaymentStatus::Confirmed, initiation: None });
            }
            _ => return Err(SettlementError::NotAwaitingPayment),
        }
        let adapter = self.gateways.get(gateway)?;
        let buyer = self.user(user_id).await?;

        let initiation = match adapter.initiate(&order, &buyer).await {
            Ok(initiation) => initiation,
            Err(err) if err.kind() == ErrorKind::External => {
                self.mark_failed(&order, gateway, &err.to_string()).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let reference = initiation.reference().map(String::from);
        self.store.upsert_payment(&Payment::pending(order.id.clone(), gateway, reference, order.final_amount)).await?;
        info!(order_id = %order.id, gateway = gateway.as_str(), amount = %order.final_amount, "Payment initiated");

        if initiation != Initiation::Settled {
            return Ok(PaymentOutcome { order_id: order.id, gateway, payment_status: PaymentStatus::Pending, initiation: Some(initiation) });
        }

        if !self.confirm_payment(&order, gateway, None).await? {
            // Lost the race to a sweep or a concurrent confirmation; the debit
            // taken during initiation goes back.
            warn!(order_id = %order.id, "Synchronous payment lost confirmation race, returning funds");
            if order.final_amount > Decimal::ZERO {
                self.wallet.credit(WalletParty::User(user_id), order.final_amount, REASON_REFUND, Some(&order.id)).await?;
            }
            return Err(SettlementError::NotAwaitingPayment);
        }
        Ok(PaymentOutcome { order_id: order.id, gateway, payment_status: PaymentStatus::Confirmed, initiation: Some(initiation) })
    }

    /// Reconciles a provider's return leg. Replaying a callback for an order
    /// that is already confirmed is a no-op; replaying one for an order still
    /// settling finishes the hook.
    pub async fn reconcile_callback(&self, callback: &GatewayCallback) -> Result<PaymentOutcome> {
        let gateway = callback.gateway();
        let payment = self
            .store
            .find_payment_by_reference(gateway, callback.reference())
            .await?
            .ok_or_else(|| SettlementError::OrderNotFound(callback.reference().to_string()))?;
        let order = self.order(&payment.order_id).await?;

        match order.payment_status {
            PaymentStatus::Pending => {}
            PaymentStatus::Settling => {
                self.settle(&order, gateway).await?;
                return Ok(PaymentOutcome { order_id: order.id, gateway, payment_status: PaymentStatus::Confirmed, initiation: None });
            }
            PaymentStatus::Confirmed => {
                info!(order_id = %order.id, gateway = gateway.as_str(), "Callback replay ignored");
                return Ok(PaymentOutcome { order_id: order.id, gateway, payment_status: PaymentStatus::Confirmed, initiation: None });
            }
            _ => return Err(SettlementError::NotAwaitingPayment),
        }

        let adapter = self.gateways.get(gateway)?;
        // Transport faults while checking leave the order pending for a retry.
        let verdict = adapter.reconcile(&payment, callback).await?;
        match verdict {
            Verdict::Paid { remote_payment_id } => {
                self.confirm_payment(&order, gateway, remote_payment_id.as_deref()).await?;
                Ok(PaymentOutcome { order_id: order.id, gateway, payment_status: PaymentStatus::Confirmed, initiation: None })
            }
            Verdict::SignatureMismatch => {
                warn!(order_id = %order.id, gateway = gateway.as_str(), "Payment signature mismatch");
                self.mark_failed(&order, gateway, "signature mismatch").await?;
                Err(SettlementError::SignatureMismatch)
            }
            Verdict::Unpaid { reason } => {
                warn!(order_id = %order.id, gateway = gateway.as_str(), %reason, "Payment not completed");
                self.mark_failed(&order, gateway, &reason).await?;
                Err(SettlementError::PaymentDeclined)
            }
        }
    }

    /// Claims a pending order for settlement and runs the hook.
    ///
    /// Only the caller that moves the order from `PENDING` to `SETTLING` gets
    /// `true`; everyone else gets `false` and must not treat the payment as
    /// theirs.
    async fn confirm_payment(&self, order: &Order, gateway: GatewayKind, remote_payment_id: Option<&str>) -> Result<bool> {
        if !self.store.transition_payment_status(&order.id, PaymentStatus::Pending, PaymentStatus::Settling).await? {
            return Ok(false);
        }
        self.store.update_payment_status(&order.id, PaymentRecordStatus::Confirmed, remote_payment_id).await?;
        self.settle(order, gateway).await?;
        Ok(true)
    }

    /// Finishes the hook for an order a fault left settling. Returns the
    /// gateway the order was paid through.
    pub(super) async fn resume_settlement(&self, order: &Order) -> Result<GatewayKind> {
        let payment = self.store.find_payment(&order.id).await?.ok_or_else(|| SettlementError::OrderNotFound(order.id.to_string()))?;
        info!(order_id = %order.id, gateway = payment.gateway.as_str(), "Resuming settlement");
        self.settle(order, payment.gateway).await?;
        Ok(payment.gateway)
    }

    /// Post-confirmation hook: commit stock for every processing line, split
    /// proceeds to the restaurants, refund lines that ran out of stock since
    /// checkout, then release the order to fulfillment as `CONFIRMED`.
    ///
    /// Every line step is recorded on the line by the same store operation
    /// that performs it, so running the hook again after a fault picks up
    /// where it stopped and does nothing twice.
    async fn settle(&self, order: &Order, gateway: GatewayKind) -> Result<()> {
        if let Err(err) = self.settle_order_lines(order).await {
            error!(order_id = %order.id, gateway = gateway.as_str(), error = %err, "Settlement interrupted, order left settling");
            return Err(err);
        }
        if self.store.transition_payment_status(&order.id, PaymentStatus::Settling, PaymentStatus::Confirmed).await? {
            info!(order_id = %order.id, gateway = gateway.as_str(), amount = %order.final_amount, "Payment confirmed");
            self.emit(DomainEvent::PaymentConfirmed { order_id: order.id.clone(), gateway, amount: order.final_amount }).await;
        }
        Ok(())
    }

    async fn settle_order_lines(&self, order: &Order) -> Result<()> {
        for item in self.store.order_items(&order.id).await? {
            if item.settlement == ItemSettlement::Open && item.status == OrderStatus::Processing {
                self.stock.commit_line(&item).await?;
            }
        }

        let items = self.store.order_items(&order.id).await?;
        self.wallet.split_to_restaurants(&order.id, &items).await?;
        // While the order settles, only a stock shortfall cancels a line.
        for item in items.iter().filter(|i| i.status == OrderStatus::Cancelled && i.settlement == ItemSettlement::Open) {
            if let Some(refunded) = self.wallet.refund_short_line(item).await? {
                warn!(order_id = %order.id, product_id = %item.product_id, %refunded, "Line oversold at confirmation, cancelled");
                self.emit(DomainEvent::ItemCancelled { order_id: order.id.clone(), product_id: item.product_id, refunded }).await;
            }
        }
        Ok(())
    }

    /// Marks a pending order and its payment row failed.
    async fn mark_failed(&self, order: &Order, gateway: GatewayKind, reason: &str) -> Result<()> {
        if !self.store.transition_payment_status(&order.id, PaymentStatus::Pending, PaymentStatus::Failed).await? {
            return Ok(());
        }
        if !self.store.update_payment_status(&order.id, PaymentRecordStatus::Failed, None).await? {
            let mut payment = Payment::pending(order.id.clone(), gateway, None, order.final_amount);
            payment.status = PaymentRecordStatus::Failed;
            self.store.upsert_payment(&payment).await?;
        }
        info!(order_id = %order.id, gateway = gateway.as_str(), reason, "Payment failed");
        self.emit(DomainEvent::PaymentFailed { order_id: order.id.clone(), gateway, reason: reason.to_string() }).await;
        Ok(())
    }
}
