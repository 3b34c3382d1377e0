//! Expiry sweep for checkouts that never complete.
//!
//! Pending online orders older than the TTL are expired and their payment
//! row failed. Orders with no items at all are leftovers of an interrupted
//! checkout and are deleted outright. Paid orders a fault left settling have
//! their settlement finished.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::SettlementEngine;
use crate::domain::aggregates::{PaymentRecordStatus, PaymentStatus};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::OrderId;
use crate::error::Result;

#[derive(Clone, Debug, Default, Serialize)]
pub struct SweepReport {
    pub expired: Vec<OrderId>,
    pub purged: Vec<OrderId>,
    pub resumed: Vec<OrderId>,
}

impl SettlementEngine {
    pub async fn expire_stale_orders(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = now - self.checkout.pending_order_ttl;
        let mut report = SweepReport::default();

        for status in [PaymentStatus::Pending, PaymentStatus::CodPending] {
            for order in self.store.orders_with_status_before(status, cutoff).await? {
                if self.store.order_items(&order.id).await?.is_empty() {
                    warn!(order_id = %order.id, "Purging order without items");
                    self.store.delete_order(&order.id).await?;
                    report.purged.push(order.id);
                    continue;
                }
                if status != PaymentStatus::Pending {
                    continue;
                }
                if !self.store.transition_payment_status(&order.id, PaymentStatus::Pending, PaymentStatus::Expired).await? {
                    continue;
                }
                self.store.update_payment_status(&order.id, PaymentRecordStatus::Failed, None).await?;
                self.emit(DomainEvent::OrderExpired { order_id: order.id.clone() }).await;
                report.expired.push(order.id);
            }
        }

        for order in self.store.orders_with_status_before(PaymentStatus::Settling, now).await? {
            match self.resume_settlement(&order).await {
                Ok(_) => report.resumed.push(order.id),
                Err(err) => warn!(order_id = %order.id, error = %err, "Settlement still interrupted"),
            }
        }

        if !report.expired.is_empty() || !report.purged.is_empty() || !report.resumed.is_empty() {
            info!(expired = report.expired.len(), purged = report.purged.len(), resumed = report.resumed.len(), "Expiry sweep finished");
        }
        Ok(report)
    }
}
