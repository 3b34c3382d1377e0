//! Settlement error taxonomy.
//!
//! Validation and precondition errors are raised before anything is written.
//! External errors come from payment providers. Consistency errors guard the
//! exactly-once rules (coupon, cancellation, stock floor).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::api::Envelope;
use crate::domain::aggregates::{CartError, CouponError, OrderStatus, ProductError, TransitionError};
use crate::payment::GatewayError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind { Validation, Precondition, External, Consistency, Internal }

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not permitted")]
    Forbidden,

    #[error("User not found")]
    UserNotFound,

    #[error("Restaurant not found")]
    RestaurantNotFound,

    #[error("Address does not belong to user")]
    AddressNotOwned,

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order item not found")]
    ItemNotFound,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("{0}")]
    Cart(#[from] CartError),

    #[error("{0}")]
    Offer(#[from] ProductError),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: Uuid, requested: i32, available: i32 },

    #[error("Cash on delivery is not available above {limit}")]
    CodLimitExceeded { limit: Decimal },

    #[error("Insufficient wallet balance")]
    InsufficientBalance,

    #[error("Invalid coupon code")]
    CouponNotFound,

    #[error("{0}")]
    Coupon(#[from] CouponError),

    #[error("Order already has a coupon")]
    CouponAlreadyApplied,

    #[error("Order has no items to distribute the coupon over")]
    ZeroItemCount,

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("Item cannot be cancelled while {0}")]
    NotCancellable(OrderStatus),

    #[error("Item already cancelled")]
    AlreadyCancelled,

    #[error("Order payment is not confirmed")]
    PaymentNotConfirmed,

    #[error("Order is not awaiting payment")]
    NotAwaitingPayment,

    #[error("Cash on delivery orders are not paid online")]
    CashOnDeliveryOrder,

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Payment signature mismatch")]
    SignatureMismatch,

    #[error("Payment was not completed")]
    PaymentDeclined,

    #[error("Stock for product {0} would go negative")]
    StockUnderflow(Uuid),

    #[error("Order item changed concurrently, reload and retry")]
    ConcurrentUpdate,

    #[error("Could not allocate a unique order id")]
    OrderIdExhausted,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SettlementError>;

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        use SettlementError::*;
        match self {
            Validation(_) | Cart(_) | Offer(_) => ErrorKind::Validation,
            Forbidden | UserNotFound | RestaurantNotFound | AddressNotOwned | ProductNotFound(_)
            | OrderNotFound(_) | ItemNotFound | EmptyCart | InsufficientStock { .. }
            | CodLimitExceeded { .. } | InsufficientBalance | CouponNotFound | Coupon(_)
            | Transition(_) | NotCancellable(_) | PaymentNotConfirmed | NotAwaitingPayment
            | CashOnDeliveryOrder => ErrorKind::Precondition,
            Gateway(_) | SignatureMismatch | PaymentDeclined => ErrorKind::External,
            CouponAlreadyApplied | ZeroItemCount | AlreadyCancelled | StockUnderflow(_) | ConcurrentUpdate => ErrorKind::Consistency,
            OrderIdExhausted | Storage(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        use SettlementError::*;
        match self {
            Forbidden => StatusCode::FORBIDDEN,
            UserNotFound | RestaurantNotFound | ProductNotFound(_) | OrderNotFound(_) | ItemNotFound | CouponNotFound => StatusCode::NOT_FOUND,
            SignatureMismatch => StatusCode::UNAUTHORIZED,
            InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
            Gateway(_) => StatusCode::BAD_GATEWAY,
            _ => match self.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Precondition => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::External => StatusCode::BAD_GATEWAY,
                ErrorKind::Consistency => StatusCode::CONFLICT,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<validator::ValidationErrors> for SettlementError {
    fn from(e: validator::ValidationErrors) -> Self { SettlementError::Validation(e.to_string()) }
}

impl IntoResponse for SettlementError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if self.kind() == ErrorKind::Internal {
            tracing::error!(error = %self, "Internal settlement error");
            "Internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Envelope::<()>::failure(message)).into_response()
    }
}
