mod common;

use rust_decimal::Decimal;
use std::sync::atomic::Ordering;

use common::{Harness, RAZORPAY_SECRET};
use foodhub_settlement::domain::aggregates::wallet::replay;
use foodhub_settlement::domain::aggregates::{GatewayKind, OrderStatus, PaymentMethod, PaymentRecordStatus, PaymentStatus, WalletParty};
use foodhub_settlement::domain::events::DomainEvent;
use foodhub_settlement::domain::value_objects::{OrderId, MONEY_TOLERANCE};
use foodhub_settlement::payment::{sign_payment, GatewayCallback, Initiation};
use foodhub_settlement::store::{DirectoryStore, OrderStore, PaymentStore};
use foodhub_settlement::SettlementError;

fn confirmations(h: &Harness) -> usize {
    h.events.events().iter().filter(|e| matches!(e, DomainEvent::PaymentConfirmed { .. })).count()
}

async fn status_of(h: &Harness, id: &OrderId) -> PaymentStatus {
    h.store.find_order(id).await.unwrap().unwrap().payment_status
}

async fn stock_of(h: &Harness, product: uuid::Uuid) -> i32 {
    h.store.find_product(product).await.unwrap().unwrap().stock_left
}

#[tokio::test]
async fn test_razorpay_callback_confirms_once() {
    let h = Harness::new();
    let product = h.product(250, 3);
    h.engine.add_to_cart(h.user_id, product, 2, None).await.unwrap();
    let order = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::Online, None).await.unwrap();

    let outcome = h.engine.initiate_payment(h.user_id, &order.id, GatewayKind::Razorpay).await.unwrap();
    assert_eq!(outcome.payment_status, PaymentStatus::Pending);
    let Some(Initiation::Widget { remote_order_id, amount, .. }) = outcome.initiation else {
        panic!("expected a widget initiation");
    };
    assert_eq!(amount, 50_000);
    assert_eq!(stock_of(&h, product).await, 3);

    let signature = sign_payment(RAZORPAY_SECRET, &remote_order_id, "pay_001").unwrap();
    let callback = GatewayCallback::Razorpay { order_id: remote_order_id, payment_id: "pay_001".into(), signature };

    for _ in 0..2 {
        let outcome = h.engine.reconcile_callback(&callback).await.unwrap();
        assert_eq!(outcome.payment_status, PaymentStatus::Confirmed);
    }

    assert_eq!(status_of(&h, &order.id).await, PaymentStatus::Confirmed);
    assert_eq!(stock_of(&h, product).await, 1);
    assert_eq!(h.balance(WalletParty::Restaurant(h.restaurant_id)).await, Decimal::new(500, 0));
    assert_eq!(confirmations(&h), 1);

    let payment = h.store.find_payment(&order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentRecordStatus::Confirmed);
    assert_eq!(payment.remote_payment_id.as_deref(), Some("pay_001"));
}

#[tokio::test]
async fn test_callback_replay_finishes_settling_order() {
    let h = Harness::new();
    let product = h.product(250, 3);
    h.engine.add_to_cart(h.user_id, product, 2, None).await.unwrap();
    let order = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::Online, None).await.unwrap();
    let outcome = h.engine.initiate_payment(h.user_id, &order.id, GatewayKind::Razorpay).await.unwrap();
    let Some(Initiation::Widget { remote_order_id, .. }) = outcome.initiation else {
        panic!("expected a widget initiation");
    };

    // A worker claimed the order and stopped before doing any settlement work.
    assert!(h.store.transition_payment_status(&order.id, PaymentStatus::Pending, PaymentStatus::Settling).await.unwrap());
    assert!(matches!(h.engine.cancel_order(h.user_id, &order.id).await, Err(SettlementError::PaymentNotConfirmed)));

    let signature = sign_payment(RAZORPAY_SECRET, &remote_order_id, "pay_009").unwrap();
    let callback = GatewayCallback::Razorpay { order_id: remote_order_id, payment_id: "pay_009".into(), signature };
    for _ in 0..2 {
        assert_eq!(h.engine.reconcile_callback(&callback).await.unwrap().payment_status, PaymentStatus::Confirmed);
    }

    assert_eq!(status_of(&h, &order.id).await, PaymentStatus::Confirmed);
    assert_eq!(stock_of(&h, product).await, 1);
    assert_eq!(h.balance(WalletParty::Restaurant(h.restaurant_id)).await, Decimal::new(500, 0));
    assert_eq!(confirmations(&h), 1);
}

#[tokio::test]
async fn test_razorpay_forged_signature_fails_order() {
    let h = Harness::new();
    let product = h.product(120, 2);
    h.engine.add_to_cart(h.user_id, product, 1, None).await.unwrap();
    let order = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::Online, None).await.unwrap();
    let outcome = h.engine.initiate_payment(h.user_id, &order.id, GatewayKind::Razorpay).await.unwrap();
    let remote_order_id = outcome.initiation.as_ref().and_then(Initiation::reference).unwrap().to_string();

    let forged = sign_payment("not-the-secret", &remote_order_id, "pay_002").unwrap();
    let callback = GatewayCallback::Razorpay { order_id: remote_order_id, payment_id: "pay_002".into(), signature: forged };
    let err = h.engine.reconcile_callback(&callback).await.unwrap_err();

    assert!(matches!(err, SettlementError::SignatureMismatch));
    assert_eq!(status_of(&h, &order.id).await, PaymentStatus::Failed);
    assert_eq!(h.store.find_payment(&order.id).await.unwrap().unwrap().status, PaymentRecordStatus::Failed);
    assert_eq!(stock_of(&h, product).await, 2);
    assert!(h.engine.wallet().history(WalletParty::Restaurant(h.restaurant_id)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_razorpay_outage_fails_order_at_initiation() {
    let h = Harness::new();
    let product = h.product(90, 5);
    h.engine.add_to_cart(h.user_id, product, 1, None).await.unwrap();
    let order = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::Online, None).await.unwrap();

    h.razorpay.reject.store(true, Ordering::SeqCst);
    let err = h.engine.initiate_payment(h.user_id, &order.id, GatewayKind::Razorpay).await.unwrap_err();
    assert!(matches!(err, SettlementError::Gateway(_)));
    assert_eq!(status_of(&h, &order.id).await, PaymentStatus::Failed);
    assert!(h.events.events().iter().any(|e| matches!(e, DomainEvent::PaymentFailed { .. })));
}

#[tokio::test]
async fn test_stripe_return_leg_is_polled_and_idempotent() {
    let h = Harness::new();
    let product = h.product(199, 4);
    h.engine.add_to_cart(h.user_id, product, 1, None).await.unwrap();
    let order = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::Online, None).await.unwrap();

    let outcome = h.engine.initiate_payment(h.user_id, &order.id, GatewayKind::Stripe).await.unwrap();
    let Some(Initiation::Redirect { session_id, url }) = outcome.initiation else {
        panic!("expected a redirect initiation");
    };
    assert!(url.ends_with(&session_id));

    h.stripe.pay(&session_id);
    let callback = GatewayCallback::Stripe { session_id };
    h.engine.reconcile_callback(&callback).await.unwrap();
    h.engine.reconcile_callback(&callback).await.unwrap();

    assert_eq!(status_of(&h, &order.id).await, PaymentStatus::Confirmed);
    assert_eq!(stock_of(&h, product).await, 3);
    assert_eq!(h.balance(WalletParty::Restaurant(h.restaurant_id)).await, Decimal::new(199, 0));
    assert_eq!(confirmations(&h), 1);
}

#[tokio::test]
async fn test_stripe_unpaid_session_declines() {
    let h = Harness::new();
    let product = h.product(80, 4);
    h.engine.add_to_cart(h.user_id, product, 1, None).await.unwrap();
    let order = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::Online, None).await.unwrap();
    let outcome = h.engine.initiate_payment(h.user_id, &order.id, GatewayKind::Stripe).await.unwrap();
    let session_id = outcome.initiation.as_ref().and_then(Initiation::reference).unwrap().to_string();

    let err = h.engine.reconcile_callback(&GatewayCallback::Stripe { session_id }).await.unwrap_err();
    assert!(matches!(err, SettlementError::PaymentDeclined));
    assert_eq!(status_of(&h, &order.id).await, PaymentStatus::Failed);
    assert_eq!(stock_of(&h, product).await, 4);
}

#[tokio::test]
async fn test_callback_for_unknown_reference_is_not_found() {
    let h = Harness::new();
    let callback = GatewayCallback::Stripe { session_id: "cs_unknown".into() };
    assert!(matches!(h.engine.reconcile_callback(&callback).await, Err(SettlementError::OrderNotFound(_))));
}

#[tokio::test]
async fn test_two_units_paid_by_wallet_then_cancelled() {
    let h = Harness::new();
    let product = h.product(100, 2);
    h.engine.top_up_wallet(h.user_id, Decimal::new(200, 0)).await.unwrap();
    h.engine.add_to_cart(h.user_id, product, 2, None).await.unwrap();
    let order = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::Online, None).await.unwrap();

    let outcome = h.engine.initiate_payment(h.user_id, &order.id, GatewayKind::Wallet).await.unwrap();
    assert_eq!(outcome.payment_status, PaymentStatus::Confirmed);
    assert_eq!(stock_of(&h, product).await, 0);
    assert_eq!(h.balance(WalletParty::User(h.user_id)).await, Decimal::ZERO);
    assert_eq!(h.balance(WalletParty::Restaurant(h.restaurant_id)).await, Decimal::new(200, 0));

    let report = h.engine.cancel_order(h.user_id, &order.id).await.unwrap();
    assert_eq!(report.cancelled, vec![product]);
    assert_eq!(report.refunded, Decimal::new(200, 0));
    assert_eq!(stock_of(&h, product).await, 2);
    assert_eq!(h.balance(WalletParty::User(h.user_id)).await, Decimal::new(200, 0));
    assert_eq!(h.balance(WalletParty::Restaurant(h.restaurant_id)).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_multi_restaurant_order_conserves_money() {
    let h = Harness::new();
    let other = h.restaurant("kailash@example.com");
    let idli = h.product(70, 10);
    let parotta = h.product_of(other, 45, 10);
    h.coupon("FEAST", 15, 2);
    h.engine.top_up_wallet(h.user_id, Decimal::new(1000, 0)).await.unwrap();

    h.engine.add_to_cart(h.user_id, idli, 3, Some("less spicy".into())).await.unwrap();
    h.engine.add_to_cart(h.user_id, parotta, 2, None).await.unwrap();
    let preview = h.engine.preview_checkout(h.user_id, Some("FEAST")).await.unwrap();
    let order = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::Online, Some("FEAST")).await.unwrap();
    assert_eq!(order.final_amount, preview.final_amount);
    assert!(order.amounts_balance());

    let items = h.store.order_items(&order.id).await.unwrap();
    let net: Decimal = items.iter().map(|i| i.after_deduction).sum();
    assert!((net - order.final_amount).abs() <= MONEY_TOLERANCE);

    h.engine.initiate_payment(h.user_id, &order.id, GatewayKind::Wallet).await.unwrap();
    let item = h.engine.advance_item(h.restaurant_id, &order.id, idli).await.unwrap();
    assert_eq!(item.status, OrderStatus::InPreparation);
    assert!(matches!(h.engine.advance_item(h.restaurant_id, &order.id, parotta).await, Err(SettlementError::Forbidden)));

    let parties = [WalletParty::User(h.user_id), WalletParty::Restaurant(h.restaurant_id), WalletParty::Restaurant(other)];
    let mut total = Decimal::ZERO;
    for party in parties {
        total += h.balance(party).await;
    }
    assert_eq!(total, Decimal::new(1000, 0));

    let report = h.engine.cancel_order(h.user_id, &order.id).await.unwrap();
    assert_eq!(report.cancelled.len(), 2);
    assert_eq!(h.balance(WalletParty::User(h.user_id)).await, Decimal::new(1000, 0));
    for party in parties {
        let statement = h.engine.wallet_statement(party).await.unwrap();
        assert_eq!(replay(&statement.history), Some(statement.balance));
    }
    assert_eq!(stock_of(&h, idli).await, 10);
    assert_eq!(stock_of(&h, parotta).await, 10);
}

#[tokio::test]
async fn test_item_lifecycle_limits() {
    let h = Harness::new();
    let product = h.product(150, 5);
    h.engine.add_to_cart(h.user_id, product, 1, None).await.unwrap();
    let order = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::CashOnDelivery, None).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::CodPending);

    for _ in 0..3 {
        h.engine.advance_item(h.restaurant_id, &order.id, product).await.unwrap();
    }
    let err = h.engine.cancel_item(h.user_id, &order.id, product).await.unwrap_err();
    assert!(matches!(err, SettlementError::NotCancellable(OrderStatus::OnTheWay)));

    let delivered = h.engine.advance_item(h.restaurant_id, &order.id, product).await.unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(matches!(h.engine.advance_item(h.restaurant_id, &order.id, product).await, Err(SettlementError::Transition(_))));
}

#[tokio::test]
async fn test_coupon_usage_is_capped_per_user() {
    let h = Harness::new();
    let product = h.product(100, 20);
    h.coupon("TWICE", 20, 2);

    for _ in 0..2 {
        h.engine.add_to_cart(h.user_id, product, 1, None).await.unwrap();
        let order = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::Online, Some("TWICE")).await.unwrap();
        assert_eq!(order.coupon_discount_amount, Decimal::new(20, 0));
    }
    h.engine.add_to_cart(h.user_id, product, 1, None).await.unwrap();
    let err = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::Online, Some("TWICE")).await.unwrap_err();
    assert!(matches!(err, SettlementError::Coupon(_)));
    assert_eq!(h.store.orders_for_user(h.user_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cash_on_delivery_above_limit_is_refused() {
    let h = Harness::new();
    let product = h.product(400, 10);
    h.engine.add_to_cart(h.user_id, product, 3, None).await.unwrap();
    let err = h.engine.place_order(h.user_id, h.address_id, PaymentMethod::CashOnDelivery, None).await.unwrap_err();
    assert!(matches!(err, SettlementError::CodLimitExceeded { .. }));
    assert_eq!(stock_of(&h, product).await, 10);
    assert!(matches!(
        h.engine.place_order(h.user_id, h.address_id, PaymentMethod::CashOnDelivery, None).await,
        Err(SettlementError::CodLimitExceeded { .. })
    ));
}
