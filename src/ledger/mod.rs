//! Stock and wallet ledgers.
//!
//! Every change to `stock_left` or a wallet balance in the crate goes through
//! one of these two types.

mod stock;
mod wallet;

pub use stock::{LineStock, StockLedger};
pub use wallet::{Overdraft, WalletLedger, REASON_ORDER_PAYMENT, REASON_OVERSELL_REFUND, REASON_REFUND, REASON_REFUND_CLAWBACK, REASON_SETTLEMENT, REASON_TOP_UP};
