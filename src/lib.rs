//! FoodHub settlement engine
//!
//! Turns carts into paid orders for a multi-restaurant food-ordering
//! platform, then keeps money and stock consistent for the rest of the
//! order's life.
//!
//! ## Features
//! - Cart-to-order conversion with coupons and per-product offers
//! - Stock ledger with floor-guarded commits and releases
//! - Razorpay, Stripe Checkout and internal wallet payments
//! - User and restaurant wallet ledgers with full history
//! - Per-item fulfillment state machine and cancellation refunds
//! - Expiry sweep for abandoned checkouts

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod payment;
pub mod pricing;
pub mod publisher;
pub mod saga;
pub mod settlement;
pub mod store;

pub use config::{CheckoutSettings, Settings};
pub use error::{Result, SettlementError};
pub use settlement::SettlementEngine;
