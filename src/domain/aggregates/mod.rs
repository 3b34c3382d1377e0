//! Aggregates module
pub mod cart;
pub mod coupon;
pub mod customer;
pub mod order;
pub mod payment;
pub mod product;
pub mod wallet;

pub use cart::{Cart, CartError, CartItem};
pub use coupon::{Coupon, CouponError, CouponUsage};
pub use customer::{Address, User};
pub use order::{ItemSettlement, Order, OrderError, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, TransitionError, UnknownVariant};
pub use payment::{GatewayKind, Payment, PaymentRecordStatus};
pub use product::{Product, ProductError, Restaurant};
pub use wallet::{Direction, WalletEntry, WalletParty};
